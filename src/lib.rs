#![forbid(unsafe_code)]

pub mod controller;
pub mod export;
pub mod formats;
pub mod foundation;
pub mod player;
pub mod resolve;
pub mod sniff;
pub mod store;

pub use controller::{HostShell, PreviewController};
pub use export::{export_animation, ExportOptions};
pub use formats::{Animation, CachedKind};
pub use foundation::{Bitmap, Fps, FrameIndex, KinoError, KinoResult, VideoSize};
pub use player::{FrameSource, LoopPolicy, PlaybackStatus, Player};
pub use resolve::{resolve_bytes, Resolved};
pub use store::{AnimationStore, StorePaths};
