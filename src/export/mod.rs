//! Deterministic video export: frame driving, pixel conversion, ffmpeg
//! writing, audio muxing.

pub mod job;
pub mod pixels;
pub mod writer;

pub use job::{export_animation, ExportOptions};
pub use writer::{FfmpegWriter, WriterConfig};
