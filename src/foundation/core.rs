use std::sync::Arc;

use crate::foundation::error::{KinoError, KinoResult};

/// Zero-based frame index into an animation's playable range.
pub type FrameIndex = u64;

/// Pixel dimensions of a video frame or animation canvas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct VideoSize {
    pub width: u32,
    pub height: u32,
}

impl VideoSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_degenerate(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Integer frames-per-second. All three supported containers carry whole
/// frame rates; rational fps is not needed here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fps(pub u32);

impl Fps {
    pub fn new(raw: u32) -> KinoResult<Self> {
        if raw == 0 {
            return Err(KinoError::validation("fps must be > 0"));
        }
        Ok(Self(raw))
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.0)
    }

    pub fn frame_duration_secs(self) -> f64 {
        1.0 / f64::from(self.0)
    }

    pub fn frames_to_secs(self, frames: u64) -> f64 {
        frames as f64 * self.frame_duration_secs()
    }
}

/// Decoded raster image, straight (non-premultiplied) RGBA8, row-major.
///
/// Shared via `Arc` so a cached animation and any number of players/export
/// jobs can hold the same pixels without copying.
#[derive(Clone, Debug)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub rgba8: Arc<Vec<u8>>,
}

impl Bitmap {
    pub fn new(width: u32, height: u32, rgba8: Vec<u8>) -> KinoResult<Self> {
        let expected = width as usize * height as usize * 4;
        if rgba8.len() != expected {
            return Err(KinoError::validation(format!(
                "bitmap buffer length {} does not match {}x{}x4",
                rgba8.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            rgba8: Arc::new(rgba8),
        })
    }

    pub fn size(&self) -> VideoSize {
        VideoSize::new(self.width, self.height)
    }

    /// True when any pixel is not fully opaque.
    pub fn has_alpha(&self) -> bool {
        self.rgba8.chunks_exact(4).any(|px| px[3] != 255)
    }
}

/// Destination rectangle for aspect-fit placement of a `src`-sized image
/// centered on a `dst`-sized canvas. Returns `(x, y, w, h)` in dst pixels.
pub fn aspect_fit_rect(src: VideoSize, dst: VideoSize) -> (u32, u32, u32, u32) {
    if src.is_degenerate() || dst.is_degenerate() {
        return (0, 0, 0, 0);
    }

    let (sw, sh) = (src.width as f64, src.height as f64);
    let (dw, dh) = (dst.width as f64, dst.height as f64);

    let (w, h) = if sw / sh > dw / dh {
        (dw, dw * (sh / sw))
    } else {
        (dh * (sw / sh), dh)
    };

    let x = ((dw - w) / 2.0).round() as u32;
    let y = ((dh - h) / 2.0).round() as u32;
    (x, y, (w.round() as u32).max(1), (h.round() as u32).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_rejects_zero() {
        assert!(Fps::new(0).is_err());
        assert_eq!(Fps::new(20).unwrap().frame_duration_secs(), 0.05);
    }

    #[test]
    fn bitmap_validates_buffer_length() {
        assert!(Bitmap::new(2, 2, vec![0u8; 16]).is_ok());
        assert!(Bitmap::new(2, 2, vec![0u8; 15]).is_err());
    }

    #[test]
    fn bitmap_alpha_detection() {
        let opaque = Bitmap::new(1, 2, vec![1, 2, 3, 255, 4, 5, 6, 255]).unwrap();
        assert!(!opaque.has_alpha());
        let translucent = Bitmap::new(1, 2, vec![1, 2, 3, 255, 4, 5, 6, 128]).unwrap();
        assert!(translucent.has_alpha());
    }

    #[test]
    fn aspect_fit_wide_source_letterboxes_vertically() {
        // 200x100 into 100x100 -> 100x50 centered at y=25.
        let r = aspect_fit_rect(VideoSize::new(200, 100), VideoSize::new(100, 100));
        assert_eq!(r, (0, 25, 100, 50));
    }

    #[test]
    fn aspect_fit_tall_source_letterboxes_horizontally() {
        let r = aspect_fit_rect(VideoSize::new(100, 200), VideoSize::new(100, 100));
        assert_eq!(r, (25, 0, 50, 100));
    }

    #[test]
    fn aspect_fit_exact_match_fills() {
        let r = aspect_fit_rect(VideoSize::new(64, 64), VideoSize::new(64, 64));
        assert_eq!(r, (0, 0, 64, 64));
    }
}
