//! Persistent decode cache with a single-owner worker thread.

pub mod paths;
pub mod store;

pub use paths::StorePaths;
pub use store::AnimationStore;
