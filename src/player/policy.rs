//! Loop policies and the per-player state machine.

/// How playback traverses the frame range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopPolicy {
    /// Repeat first-to-last.
    Forward,
    /// Repeat last-to-first.
    Backward,
    /// Repeat, reversing direction at each edge.
    Bounce,
    /// One forward traversal, then stop.
    ForwardOnce,
    /// One backward traversal, then stop.
    BackwardOnce,
}

impl LoopPolicy {
    /// Policies that complete after a single traversal.
    pub fn is_once(self) -> bool {
        matches!(self, LoopPolicy::ForwardOnce | LoopPolicy::BackwardOnce)
    }

    /// Whether the policy starts out traversing backwards.
    pub fn starts_reversed(self) -> bool {
        matches!(self, LoopPolicy::Backward | LoopPolicy::BackwardOnce)
    }
}

/// Player lifecycle. `Loading` only appears when the backing representation
/// has to be fetched or decoded asynchronously; already-resolved in-memory
/// animations skip straight to `Playing`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackStatus {
    Idle,
    Loading,
    Playing,
    Paused,
    Stopped,
}

impl PlaybackStatus {
    /// Legal transitions of the status machine:
    /// `Idle -> Loading -> (Playing <-> Paused) -> Stopped -> Idle|Playing`.
    pub fn can_transition_to(self, next: PlaybackStatus) -> bool {
        use PlaybackStatus::*;
        match (self, next) {
            (Idle, Loading) | (Idle, Playing) => true,
            (Loading, Playing) | (Loading, Idle) => true,
            (Playing, Paused) | (Playing, Stopped) | (Playing, Playing) => true,
            (Paused, Playing) | (Paused, Stopped) => true,
            (Stopped, Idle) | (Stopped, Playing) => true,
            _ => false,
        }
    }
}

/// Mutable playback state, owned by exactly one player.
#[derive(Clone, Debug)]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub policy: LoopPolicy,
    /// Current traversal direction; toggles at edges under `Bounce`.
    pub is_reversing: bool,
    /// Fraction of one traversal completed, in `[0, 1]`.
    pub progress: f64,
}

impl PlaybackState {
    pub fn new() -> Self {
        Self {
            status: PlaybackStatus::Idle,
            policy: LoopPolicy::Forward,
            is_reversing: false,
            progress: 0.0,
        }
    }

    /// Wall-clock seconds left in the current traversal. A reversing
    /// traversal has `progress` left to cover, not `1 - progress`.
    pub fn remaining_delay_secs(&self, duration_secs: f64) -> f64 {
        if self.is_reversing {
            duration_secs * self.progress
        } else {
            duration_secs * (1.0 - self.progress)
        }
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::new()
    }
}
