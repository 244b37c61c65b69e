//! The format resolution cascade: raw bytes in, a decoded [`Animation`] plus
//! the payload path the store should persist out.
//!
//! Resolution order is deliberate, most-specific signature first:
//! zip envelope, then JSON text, then the frame-sequence magic, then the
//! compact binary container, then one last-resort vector attempt. A JSON
//! buffer that fails the vector decode does NOT fall through; the error is
//! surfaced so a malformed manifest never gets misclassified as binary noise.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use tracing::debug;

use crate::{
    formats::{binary, sequence, vector, Animation, CachedKind},
    foundation::error::{KinoError, KinoResult},
    sniff,
};

const RAW_PAYLOAD_FILE: &str = "payload.bin";
const EXTRACT_DIR: &str = "extracted";

/// A successful resolution: the decoded animation and the scratch path
/// (file or directory) holding its canonical payload.
#[derive(Debug)]
pub struct Resolved {
    pub animation: Animation,
    pub payload: PathBuf,
}

/// Resolve a raw byte buffer inside the given scratch directory.
///
/// The scratch directory is cleared first; on success it holds the payload
/// the caller is expected to move into its cache.
pub fn resolve_bytes(scratch: &Path, bytes: &[u8]) -> KinoResult<Resolved> {
    reset_dir(scratch)?;

    if sniff::is_zip_archive(bytes) {
        return resolve_zip(scratch, bytes);
    }

    let payload = scratch.join(RAW_PAYLOAD_FILE);
    fs::write(&payload, bytes)
        .with_context(|| format!("persist input to '{}'", payload.display()))
        .map_err(KinoError::from)?;

    let animation = resolve_single_file(bytes)?;
    debug!(kind = ?animation.kind(), "resolved single-file input");
    Ok(Resolved { animation, payload })
}

fn resolve_zip(scratch: &Path, bytes: &[u8]) -> KinoResult<Resolved> {
    let dest = scratch.join(EXTRACT_DIR);
    fs::create_dir_all(&dest).map_err(KinoError::from)?;

    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|_| KinoError::UnzipFailed)?;
    archive.extract(&dest).map_err(|_| KinoError::UnzipFailed)?;
    debug!(entries = archive.len(), "extracted zip envelope");

    let entries = visible_entries(&dest)?;
    let Some(target) = entries.first().cloned() else {
        return Err(KinoError::UnrecognizedFile);
    };

    // A single top-level entry IS the resolution target: a lone file goes
    // through the byte cascade, a lone wrapper directory is scanned from
    // itself so its own subdirectory nesting level is still honored.
    if entries.len() == 1 {
        let animation = if target.is_file() {
            let file_bytes = fs::read(&target).map_err(KinoError::from)?;
            resolve_single_file(&file_bytes)?
        } else {
            resolve_directory(&target)?
        };
        return Ok(Resolved {
            animation,
            payload: target,
        });
    }

    let animation = resolve_directory(&dest)?;
    Ok(Resolved {
        animation,
        payload: dest,
    })
}

/// Cascade for a standalone byte buffer.
fn resolve_single_file(bytes: &[u8]) -> KinoResult<Animation> {
    if sniff::is_json_text(bytes) {
        // JSON commits to the vector branch; decode errors propagate.
        return Ok(Animation::Vector(vector::load_single_file(bytes)?));
    }
    if sniff::is_frame_sequence(bytes) {
        return Ok(Animation::Sequence(sequence::decode(bytes)?));
    }
    match binary::decode(bytes) {
        Ok(entity) => Ok(Animation::Binary(entity)),
        // Last resort before giving up: some producers ship manifests with
        // leading noise that defeats the JSON probe.
        Err(_) => match vector::load_single_file(bytes) {
            Ok(bundle) => Ok(Animation::Vector(bundle)),
            Err(_) => Err(KinoError::UnrecognizedFile),
        },
    }
}

/// Resolve an extracted directory: known-extension children first, then the
/// manifest/asset pair, then one level of subdirectories.
fn resolve_directory(dir: &Path) -> KinoResult<Animation> {
    let entries = visible_entries(dir)?;

    for path in &entries {
        if path.is_file() {
            match extension_of(path) {
                Some(ext) if ext == sequence::EXTENSION => {
                    let bytes = fs::read(path).map_err(KinoError::from)?;
                    return Ok(Animation::Sequence(sequence::decode(&bytes)?));
                }
                Some(ext) if ext == binary::EXTENSION => {
                    let bytes = fs::read(path).map_err(KinoError::from)?;
                    return Ok(Animation::Binary(binary::decode(&bytes)?));
                }
                _ => {}
            }
        }
    }

    if dir.join(vector::MANIFEST_FILE).is_file() {
        return Ok(Animation::Vector(vector::load_bundle(dir)?));
    }

    // One nesting level: archives often wrap the bundle in a folder named
    // after the archive itself.
    for path in &entries {
        if path.is_dir() && path.join(vector::MANIFEST_FILE).is_file() {
            return Ok(Animation::Vector(vector::load_bundle(path)?));
        }
    }

    Err(KinoError::UnrecognizedFile)
}

/// Re-decode a persisted payload by its recorded kind. Used by the store to
/// reconstruct the in-memory animation on startup.
pub fn decode_payload(kind: CachedKind, payload: &Path) -> KinoResult<Animation> {
    match kind {
        CachedKind::None => Err(KinoError::UnrecognizedFile),
        CachedKind::Vector => {
            if payload.is_dir() {
                Ok(Animation::Vector(resolve_vector_dir(payload)?))
            } else {
                let bytes = fs::read(payload).map_err(KinoError::from)?;
                Ok(Animation::Vector(vector::load_single_file(&bytes)?))
            }
        }
        CachedKind::Binary => {
            let file = if payload.is_dir() {
                find_child_with_extension(payload, binary::EXTENSION)?
                    .ok_or(KinoError::UnrecognizedFile)?
            } else {
                payload.to_path_buf()
            };
            let bytes = fs::read(file).map_err(KinoError::from)?;
            Ok(Animation::Binary(binary::decode(&bytes)?))
        }
        CachedKind::Sequence => {
            let file = if payload.is_dir() {
                find_child_with_extension(payload, sequence::EXTENSION)?
                    .ok_or(KinoError::UnrecognizedFile)?
            } else {
                payload.to_path_buf()
            };
            let bytes = fs::read(file).map_err(KinoError::from)?;
            Ok(Animation::Sequence(sequence::decode(&bytes)?))
        }
    }
}

fn resolve_vector_dir(dir: &Path) -> KinoResult<vector::VectorBundle> {
    if dir.join(vector::MANIFEST_FILE).is_file() {
        return vector::load_bundle(dir);
    }
    for path in visible_entries(dir)? {
        if path.is_dir() && path.join(vector::MANIFEST_FILE).is_file() {
            return vector::load_bundle(&path);
        }
    }
    Err(KinoError::MissingManifest)
}

fn reset_dir(dir: &Path) -> KinoResult<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)
            .with_context(|| format!("clear scratch '{}'", dir.display()))
            .map_err(KinoError::from)?;
    }
    fs::create_dir_all(dir).map_err(KinoError::from)?;
    Ok(())
}

/// Non-hidden immediate children, sorted by name for deterministic scans.
fn visible_entries(dir: &Path) -> KinoResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).map_err(KinoError::from)? {
        let path = entry.map_err(KinoError::from)?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_none_or(|n| n.starts_with('.') || n == "__MACOSX");
        if !hidden {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

fn find_child_with_extension(dir: &Path, ext: &str) -> KinoResult<Option<PathBuf>> {
    Ok(visible_entries(dir)?
        .into_iter()
        .find(|p| p.is_file() && extension_of(p).as_deref() == Some(ext)))
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashMap, io::Write as _};

    use crate::foundation::core::Bitmap;

    fn scratch() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn manifest_json() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "w": 100, "h": 100, "fr": 25, "ip": 0, "op": 50
        }))
        .unwrap()
    }

    fn bva_bytes() -> Vec<u8> {
        let frames = vec![Bitmap::new(4, 4, vec![9u8; 64]).unwrap(); 2];
        binary::encode(&binary::EncodeParams {
            fps: 10,
            frames: &frames,
            audio_tracks: &[],
            audio_data: &HashMap::new(),
        })
        .unwrap()
    }

    fn gif_bytes() -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut enc = image::codecs::gif::GifEncoder::new(&mut out);
            let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([0, 255, 0, 255]));
            enc.encode_frame(image::Frame::from_parts(
                img,
                0,
                0,
                image::Delay::from_numer_denom_ms(100, 1),
            ))
            .unwrap();
        }
        out
    }

    fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let opts = zip::write::SimpleFileOptions::default();
            for (name, bytes) in entries {
                if name.ends_with('/') {
                    writer.add_directory(name.trim_end_matches('/'), opts).unwrap();
                } else {
                    writer.start_file(*name, opts).unwrap();
                    writer.write_all(bytes).unwrap();
                }
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn json_bytes_resolve_to_vector() {
        let dir = scratch();
        let resolved = resolve_bytes(dir.path(), &manifest_json()).unwrap();
        assert!(matches!(resolved.animation, Animation::Vector(_)));
        assert!(resolved.payload.is_file());
    }

    #[test]
    fn malformed_json_never_falls_through() {
        let dir = scratch();
        let err = resolve_bytes(dir.path(), b"{\"not\":\"a manifest\"}").unwrap_err();
        assert!(matches!(err, KinoError::Decode(_)), "got {err:?}");
    }

    #[test]
    fn gif_bytes_resolve_to_sequence() {
        let dir = scratch();
        let resolved = resolve_bytes(dir.path(), &gif_bytes()).unwrap();
        assert!(matches!(resolved.animation, Animation::Sequence(_)));
    }

    #[test]
    fn bva_bytes_resolve_to_binary() {
        let dir = scratch();
        let resolved = resolve_bytes(dir.path(), &bva_bytes()).unwrap();
        assert!(matches!(resolved.animation, Animation::Binary(_)));
    }

    #[test]
    fn garbage_is_unrecognized() {
        let dir = scratch();
        let err = resolve_bytes(dir.path(), &[0xDEu8, 0xAD, 0xBE, 0xEF]).unwrap_err();
        assert!(matches!(err, KinoError::UnrecognizedFile));
    }

    #[test]
    fn corrupt_zip_is_unzip_failed() {
        let dir = scratch();
        let err = resolve_bytes(dir.path(), &[0x50, 0x4B, 0x03, 0x04, 0, 0]).unwrap_err();
        assert!(matches!(err, KinoError::UnzipFailed));
    }

    #[test]
    fn zipped_gif_resolves_to_sequence() {
        let dir = scratch();
        let zip = zip_of(&[("anim.gif", &gif_bytes())]);
        let resolved = resolve_bytes(dir.path(), &zip).unwrap();
        assert!(matches!(resolved.animation, Animation::Sequence(_)));
    }

    #[test]
    fn zipped_nested_vector_bundle_resolves() {
        let dir = scratch();
        let zip = zip_of(&[
            ("pack/", b""),
            ("pack/data.json", &manifest_json()),
            ("pack/images/", b""),
        ]);
        let resolved = resolve_bytes(dir.path(), &zip).unwrap();
        assert!(matches!(resolved.animation, Animation::Vector(_)));
        assert!(resolved.payload.is_dir());
    }

    #[test]
    fn wrapper_directory_keeps_its_own_nesting_level() {
        // Single top-level directory whose only child directory carries the
        // bundle: the scan anchors at the wrapper, so the bundle is still
        // one level down from the resolution target.
        let dir = scratch();
        let zip = zip_of(&[
            ("outer/", b""),
            ("outer/inner/", b""),
            ("outer/inner/data.json", &manifest_json()),
            ("outer/inner/images/", b""),
        ]);
        let resolved = resolve_bytes(dir.path(), &zip).unwrap();
        assert!(matches!(resolved.animation, Animation::Vector(_)));
        assert!(resolved.payload.ends_with("outer"));

        // The persisted payload reconstructs through the same nested pass.
        let again = decode_payload(CachedKind::Vector, &resolved.payload).unwrap();
        assert_eq!(again.frame_count(), 50);
    }

    #[test]
    fn nested_manifest_without_assets_is_missing_asset_directory() {
        let dir = scratch();
        let zip = zip_of(&[("pack/", b""), ("pack/data.json", &manifest_json())]);
        let err = resolve_bytes(dir.path(), &zip).unwrap_err();
        assert!(matches!(err, KinoError::MissingAssetDirectory));
    }

    #[test]
    fn decode_payload_reconstructs_by_kind() {
        let dir = scratch();
        let resolved = resolve_bytes(dir.path(), &bva_bytes()).unwrap();
        let again = decode_payload(CachedKind::Binary, &resolved.payload).unwrap();
        assert_eq!(again.frame_count(), resolved.animation.frame_count());
        assert_eq!(again.fps(), resolved.animation.fps());
        assert!(decode_payload(CachedKind::None, &resolved.payload).is_err());
    }
}
