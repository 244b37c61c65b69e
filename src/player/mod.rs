//! Uniform frame-addressable playback over any decoded animation.

pub mod binding;
pub mod handoff;
pub mod player;
pub mod policy;
pub mod source;

pub use binding::BindingTable;
pub use handoff::{gate_pair, GateServicer, MainThreadGate};
pub use player::Player;
pub use policy::{LoopPolicy, PlaybackState, PlaybackStatus};
pub use source::{
    source_for, BinarySource, FrameSource, PosterEngine, SequenceSource, VectorEngine,
    VectorSource,
};
