//! Frame-sequence (GIF) decoding.
//!
//! Per-frame delays come from the container; anything below the 20ms floor is
//! treated as "unspecified" and replaced with the conventional 100ms default,
//! matching what viewers in the wild do with zero-delay GIFs.

use crate::foundation::{
    core::{Bitmap, VideoSize},
    error::{KinoError, KinoResult},
};

use image::AnimationDecoder as _;

/// Delays below this are considered unspecified by the encoder.
pub const MIN_FRAME_DELAY_SECS: f64 = 0.02;

/// Substitute delay for unspecified frames.
pub const DEFAULT_FRAME_DELAY_SECS: f64 = 0.1;

pub const EXTENSION: &str = "gif";

/// One decoded frame with its presentation delay.
#[derive(Clone, Debug)]
pub struct SequenceFrame {
    pub bitmap: Bitmap,
    pub delay_secs: f64,
}

/// A decoded frame sequence. Non-empty by construction.
#[derive(Debug)]
pub struct FrameSequence {
    pub frames: Vec<SequenceFrame>,
    /// Sum of all normalized frame delays.
    pub total_duration: f64,
}

impl FrameSequence {
    /// Canvas size, taken from the first frame.
    pub fn size(&self) -> VideoSize {
        self.frames[0].bitmap.size()
    }

    /// Effective average frame rate over the whole sequence.
    pub fn nominal_fps(&self) -> f64 {
        if self.total_duration <= 0.0 {
            return 0.0;
        }
        self.frames.len() as f64 / self.total_duration
    }

    /// Index of the frame being presented `t` seconds into one loop.
    pub fn frame_at_time(&self, t: f64) -> usize {
        if self.total_duration <= 0.0 {
            return 0;
        }
        let mut t = t.rem_euclid(self.total_duration);
        for (i, frame) in self.frames.iter().enumerate() {
            if t < frame.delay_secs {
                return i;
            }
            t -= frame.delay_secs;
        }
        self.frames.len() - 1
    }
}

fn normalize_delay(secs: f64) -> f64 {
    if secs < MIN_FRAME_DELAY_SECS {
        DEFAULT_FRAME_DELAY_SECS
    } else {
        secs
    }
}

/// Decode a GIF byte buffer into a frame sequence. Empty or undecodable
/// sequences are `DecodeSequenceFailed`.
pub fn decode(bytes: &[u8]) -> KinoResult<FrameSequence> {
    let decoder = image::codecs::gif::GifDecoder::new(std::io::Cursor::new(bytes))
        .map_err(|e| KinoError::DecodeSequenceFailed(e.to_string()))?;
    let raw_frames = decoder
        .into_frames()
        .collect_frames()
        .map_err(|e| KinoError::DecodeSequenceFailed(e.to_string()))?;
    if raw_frames.is_empty() {
        return Err(KinoError::DecodeSequenceFailed("no frames".into()));
    }

    let mut frames = Vec::with_capacity(raw_frames.len());
    let mut total_duration = 0.0;
    for frame in raw_frames {
        let (numer_ms, denom_ms) = frame.delay().numer_denom_ms();
        let secs = if denom_ms == 0 {
            0.0
        } else {
            f64::from(numer_ms) / f64::from(denom_ms) / 1000.0
        };
        let delay_secs = normalize_delay(secs);

        let rgba = frame.into_buffer();
        let (w, h) = rgba.dimensions();
        let bitmap = Bitmap::new(w, h, rgba.into_raw())?;

        total_duration += delay_secs;
        frames.push(SequenceFrame { bitmap, delay_secs });
    }

    Ok(FrameSequence {
        frames,
        total_duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Frame, Rgba, RgbaImage};

    fn encode_gif(delays_ms: &[u32]) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut out);
            for (i, &ms) in delays_ms.iter().enumerate() {
                let img = RgbaImage::from_pixel(10, 8, Rgba([(i * 60) as u8, 0, 0, 255]));
                let frame = Frame::from_parts(img, 0, 0, Delay::from_numer_denom_ms(ms, 1));
                encoder.encode_frame(frame).unwrap();
            }
        }
        out
    }

    #[test]
    fn decodes_frames_and_delays() {
        let seq = decode(&encode_gif(&[100, 50, 200])).unwrap();
        assert_eq!(seq.frames.len(), 3);
        assert_eq!(seq.size(), VideoSize::new(10, 8));
        assert!((seq.total_duration - 0.35).abs() < 1e-9);
        assert!((seq.frames[1].delay_secs - 0.05).abs() < 1e-9);
    }

    #[test]
    fn sub_floor_delays_become_the_default() {
        // 10ms is below the 20ms floor, so each frame presents for 100ms.
        let seq = decode(&encode_gif(&[10, 10])).unwrap();
        assert!((seq.frames[0].delay_secs - DEFAULT_FRAME_DELAY_SECS).abs() < 1e-9);
        assert!((seq.total_duration - 0.2).abs() < 1e-9);
        assert!((seq.nominal_fps() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn garbage_is_a_sequence_decode_error() {
        let err = decode(b"GIF89a but not really").unwrap_err();
        assert!(matches!(err, KinoError::DecodeSequenceFailed(_)));
        assert!(matches!(
            decode(&[]),
            Err(KinoError::DecodeSequenceFailed(_))
        ));
    }

    #[test]
    fn frame_at_time_walks_delays_and_wraps() {
        let seq = decode(&encode_gif(&[100, 100, 100])).unwrap();
        assert_eq!(seq.frame_at_time(0.0), 0);
        assert_eq!(seq.frame_at_time(0.15), 1);
        assert_eq!(seq.frame_at_time(0.25), 2);
        // Wraps past the total duration.
        assert_eq!(seq.frame_at_time(0.35), 0);
    }
}
