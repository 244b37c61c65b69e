//! Content sniffing for unknown byte buffers.

pub mod magic;

pub use magic::{is_frame_sequence, is_json_text, is_zip_archive};
