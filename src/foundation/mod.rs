//! Shared primitives: error type, sizes, frame rates, bitmaps.

pub mod core;
pub mod error;

pub use core::{aspect_fit_rect, Bitmap, Fps, FrameIndex, VideoSize};
pub use error::{KinoError, KinoResult};
