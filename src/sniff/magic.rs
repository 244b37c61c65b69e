//! Pure byte-signature predicates used to classify an unknown blob before any
//! expensive decode attempt. No I/O, no allocation beyond what serde_json
//! needs for the structural parse.

/// Zip local-file-header signature, `PK\x03\x04`.
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// Frame-sequence (GIF) container signature, `GIF`.
const SEQUENCE_MAGIC: [u8; 3] = [0x47, 0x49, 0x46];

/// True iff the buffer starts with the zip local-file-header signature.
pub fn is_zip_archive(bytes: &[u8]) -> bool {
    bytes.len() >= ZIP_MAGIC.len() && bytes[..ZIP_MAGIC.len()] == ZIP_MAGIC
}

/// True iff the buffer starts with the frame-sequence container magic.
pub fn is_frame_sequence(bytes: &[u8]) -> bool {
    bytes.len() >= SEQUENCE_MAGIC.len() && bytes[..SEQUENCE_MAGIC.len()] == SEQUENCE_MAGIC
}

/// True iff the buffer parses under the JSON grammar. Used as a cheap
/// rejection test before a full vector-manifest decode; the parsed value is
/// discarded.
pub fn is_json_text(bytes: &[u8]) -> bool {
    serde_json::from_slice::<serde::de::IgnoredAny>(bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_magic_matches() {
        assert!(is_zip_archive(&[0x50, 0x4B, 0x03, 0x04]));
        assert!(is_zip_archive(&[0x50, 0x4B, 0x03, 0x04, 0xFF, 0x00]));
    }

    #[test]
    fn zip_magic_rejects_differing_first_byte() {
        assert!(!is_zip_archive(&[0x51, 0x4B, 0x03, 0x04, 0x00]));
        assert!(!is_zip_archive(&[0x50, 0x4B, 0x05, 0x06])); // empty-archive EOCD, not a local header
    }

    #[test]
    fn short_buffers_never_match() {
        assert!(!is_zip_archive(&[]));
        assert!(!is_zip_archive(&[0x50, 0x4B, 0x03]));
        assert!(!is_frame_sequence(&[]));
        assert!(!is_frame_sequence(&[0x47, 0x49]));
    }

    #[test]
    fn sequence_magic_matches_both_versions() {
        assert!(is_frame_sequence(b"GIF89a"));
        assert!(is_frame_sequence(b"GIF87a"));
        assert!(!is_frame_sequence(b"gIF89a"));
    }

    #[test]
    fn json_detection() {
        assert!(is_json_text(b"{\"v\":\"5.7.1\"}"));
        assert!(is_json_text(b"[1,2,3]"));
        assert!(is_json_text(b"42"));
        assert!(!is_json_text(b"GIF89a"));
        assert!(!is_json_text(b"{\"unterminated\":"));
        assert!(!is_json_text(&[0x00, 0x01, 0x02]));
    }
}
