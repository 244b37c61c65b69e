//! Untyped-bytes to typed-animation resolution.

pub mod resolver;

pub use resolver::{decode_payload, resolve_bytes, Resolved};
