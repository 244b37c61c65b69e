//! Compact binary container ("BVA") decoding.
//!
//! Wire layout, all integers little-endian:
//!
//! ```text
//! magic   b"BVA1"
//! u16     version (currently 1)
//! u32     width, height, fps, frame_count
//! frame_count x { u32 len, PNG bytes }
//! u32     audio entry count
//! each    { u16 key len, key utf8, u32 start_frame, u32 end_frame }
//! u32     audio blob count
//! each    { u16 key len, key utf8, u32 len, bytes }
//! u32     crc32 of everything between the magic and this field
//! ```
//!
//! The trailing checksum is what makes this the *most specific* binary probe
//! in the resolver: random non-BVA bytes essentially never validate, so a
//! failed decode here is a reliable "not this format" signal.

use std::{collections::HashMap, sync::Arc};

use crate::foundation::{
    core::{Bitmap, Fps, VideoSize},
    error::{KinoError, KinoResult},
};

pub const MAGIC: [u8; 4] = *b"BVA1";
pub const VERSION: u16 = 1;
pub const EXTENSION: &str = "bva";

/// One multiplexed audio track reference: which blob plays, and over which
/// frame span of the animation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioTrack {
    pub key: String,
    pub start_frame: u32,
    pub end_frame: u32,
}

/// Fully decoded compact binary animation.
#[derive(Debug)]
pub struct BinaryEntity {
    pub size: VideoSize,
    pub fps: Fps,
    pub frame_count: u32,
    pub frames: Vec<Bitmap>,
    pub audio_tracks: Vec<AudioTrack>,
    pub audio_data: HashMap<String, Arc<Vec<u8>>>,
}

impl BinaryEntity {
    /// Playable duration; zero when the entity is degenerate.
    pub fn duration_secs(&self) -> f64 {
        if self.frame_count == 0 || self.fps.0 == 0 {
            return 0.0;
        }
        f64::from(self.frame_count) / self.fps.as_f64()
    }

    pub fn has_audio(&self) -> bool {
        !self.audio_tracks.is_empty()
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> KinoResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| KinoError::decode("bva: truncated container"))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u16(&mut self) -> KinoResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> KinoResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self) -> KinoResult<String> {
        let len = self.u16()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| KinoError::decode("bva: non-utf8 audio key"))
    }
}

/// Decode a BVA container. Any structural problem, including a checksum
/// mismatch, surfaces as `KinoError::Decode` so the resolver can fall
/// through to its last-resort vector attempt.
pub fn decode(bytes: &[u8]) -> KinoResult<BinaryEntity> {
    if bytes.len() < MAGIC.len() + 2 || bytes[..MAGIC.len()] != MAGIC {
        return Err(KinoError::decode("bva: bad magic"));
    }

    // Checksum covers the body between magic and trailer.
    if bytes.len() < MAGIC.len() + 4 {
        return Err(KinoError::decode("bva: truncated container"));
    }
    let crc_offset = bytes.len() - 4;
    let stored = u32::from_le_bytes([
        bytes[crc_offset],
        bytes[crc_offset + 1],
        bytes[crc_offset + 2],
        bytes[crc_offset + 3],
    ]);
    let computed = crc32fast::hash(&bytes[MAGIC.len()..crc_offset]);
    if stored != computed {
        return Err(KinoError::decode("bva: checksum mismatch"));
    }

    let mut r = Reader::new(&bytes[MAGIC.len()..crc_offset]);

    let version = r.u16()?;
    if version != VERSION {
        return Err(KinoError::decode(format!(
            "bva: unsupported version {version}"
        )));
    }

    let width = r.u32()?;
    let height = r.u32()?;
    let fps = r.u32()?;
    let frame_count = r.u32()?;
    if width == 0 || height == 0 {
        return Err(KinoError::decode("bva: degenerate video size"));
    }
    if fps == 0 || frame_count == 0 {
        return Err(KinoError::decode("bva: fps and frame count must be > 0"));
    }

    let mut frames = Vec::with_capacity(frame_count as usize);
    for i in 0..frame_count {
        let len = r.u32()? as usize;
        let blob = r.take(len)?;
        let decoded = image::load_from_memory(blob)
            .map_err(|e| KinoError::decode(format!("bva: frame {i}: {e}")))?;
        let rgba = decoded.to_rgba8();
        let (w, h) = rgba.dimensions();
        frames.push(Bitmap::new(w, h, rgba.into_raw())?);
    }

    let track_count = r.u32()?;
    let mut audio_tracks = Vec::with_capacity(track_count as usize);
    for _ in 0..track_count {
        let key = r.string()?;
        let start_frame = r.u32()?;
        let end_frame = r.u32()?;
        if end_frame < start_frame || end_frame > frame_count {
            return Err(KinoError::decode("bva: audio track frame span out of range"));
        }
        audio_tracks.push(AudioTrack {
            key,
            start_frame,
            end_frame,
        });
    }

    let blob_count = r.u32()?;
    let mut audio_data = HashMap::with_capacity(blob_count as usize);
    for _ in 0..blob_count {
        let key = r.string()?;
        let len = r.u32()? as usize;
        audio_data.insert(key, Arc::new(r.take(len)?.to_vec()));
    }

    for track in &audio_tracks {
        if !audio_data.contains_key(&track.key) {
            return Err(KinoError::decode(format!(
                "bva: audio track '{}' has no blob",
                track.key
            )));
        }
    }

    Ok(BinaryEntity {
        size: VideoSize::new(width, height),
        fps: Fps(fps),
        frame_count,
        frames,
        audio_tracks,
        audio_data,
    })
}

/// Inputs for [`encode`]. Frames are re-encoded as PNG blobs.
pub struct EncodeParams<'a> {
    pub fps: u32,
    pub frames: &'a [Bitmap],
    pub audio_tracks: &'a [AudioTrack],
    pub audio_data: &'a HashMap<String, Arc<Vec<u8>>>,
}

/// Build a BVA container. Used by tooling and tests; the preview pipeline
/// itself only decodes.
pub fn encode(params: &EncodeParams<'_>) -> KinoResult<Vec<u8>> {
    if params.frames.is_empty() {
        return Err(KinoError::validation("bva encode: no frames"));
    }
    if params.fps == 0 {
        return Err(KinoError::validation("bva encode: fps must be > 0"));
    }
    let size = params.frames[0].size();

    let mut body = Vec::new();
    body.extend_from_slice(&VERSION.to_le_bytes());
    body.extend_from_slice(&size.width.to_le_bytes());
    body.extend_from_slice(&size.height.to_le_bytes());
    body.extend_from_slice(&params.fps.to_le_bytes());
    body.extend_from_slice(&(params.frames.len() as u32).to_le_bytes());

    for bitmap in params.frames {
        let img = image::RgbaImage::from_raw(bitmap.width, bitmap.height, bitmap.rgba8.to_vec())
            .ok_or_else(|| KinoError::validation("bva encode: malformed bitmap"))?;
        let mut png = std::io::Cursor::new(Vec::new());
        img.write_to(&mut png, image::ImageFormat::Png)
            .map_err(|e| KinoError::decode(format!("bva encode: png: {e}")))?;
        let png = png.into_inner();
        body.extend_from_slice(&(png.len() as u32).to_le_bytes());
        body.extend_from_slice(&png);
    }

    body.extend_from_slice(&(params.audio_tracks.len() as u32).to_le_bytes());
    for track in params.audio_tracks {
        write_string(&mut body, &track.key)?;
        body.extend_from_slice(&track.start_frame.to_le_bytes());
        body.extend_from_slice(&track.end_frame.to_le_bytes());
    }

    body.extend_from_slice(&(params.audio_data.len() as u32).to_le_bytes());
    let mut keys: Vec<_> = params.audio_data.keys().collect();
    keys.sort();
    for key in keys {
        let blob = &params.audio_data[key];
        write_string(&mut body, key)?;
        body.extend_from_slice(&(blob.len() as u32).to_le_bytes());
        body.extend_from_slice(blob);
    }

    let mut out = Vec::with_capacity(MAGIC.len() + body.len() + 4);
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&body);
    out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    Ok(out)
}

fn write_string(out: &mut Vec<u8>, s: &str) -> KinoResult<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| KinoError::validation("bva encode: audio key too long"))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frames(n: u32) -> Vec<Bitmap> {
        (0..n)
            .map(|i| {
                let px = [(i * 40) as u8, 0, 0, 255];
                Bitmap::new(8, 6, px.repeat(8 * 6)).unwrap()
            })
            .collect()
    }

    fn sample_container() -> Vec<u8> {
        let frames = solid_frames(3);
        let tracks = vec![AudioTrack {
            key: "bgm".into(),
            start_frame: 0,
            end_frame: 3,
        }];
        let mut data = HashMap::new();
        data.insert("bgm".to_string(), Arc::new(vec![1u8, 2, 3, 4]));
        encode(&EncodeParams {
            fps: 20,
            frames: &frames,
            audio_tracks: &tracks,
            audio_data: &data,
        })
        .unwrap()
    }

    #[test]
    fn encode_decode_preserves_header_and_audio() {
        let entity = decode(&sample_container()).unwrap();
        assert_eq!(entity.size, VideoSize::new(8, 6));
        assert_eq!(entity.fps, Fps(20));
        assert_eq!(entity.frame_count, 3);
        assert_eq!(entity.frames.len(), 3);
        assert_eq!(entity.duration_secs(), 0.15);
        assert!(entity.has_audio());
        assert_eq!(entity.audio_tracks[0].key, "bgm");
        assert_eq!(entity.audio_data["bgm"].as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn corrupted_byte_fails_checksum() {
        let mut bytes = sample_container();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("checksum"), "got {err}");
    }

    #[test]
    fn truncated_container_is_a_decode_error() {
        let bytes = sample_container();
        for cut in [0, 3, 10, bytes.len() - 1] {
            assert!(matches!(decode(&bytes[..cut]), Err(KinoError::Decode(_))));
        }
    }

    #[test]
    fn foreign_bytes_are_rejected_cheaply() {
        assert!(decode(b"GIF89a...").is_err());
        assert!(decode(b"{\"w\":1}").is_err());
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn audio_span_must_fit_frame_range() {
        let frames = solid_frames(2);
        let tracks = vec![AudioTrack {
            key: "fx".into(),
            start_frame: 0,
            end_frame: 9,
        }];
        let mut data = HashMap::new();
        data.insert("fx".to_string(), Arc::new(vec![0u8]));
        let bytes = encode(&EncodeParams {
            fps: 10,
            frames: &frames,
            audio_tracks: &tracks,
            audio_data: &data,
        })
        .unwrap();
        assert!(decode(&bytes).is_err());
    }
}
