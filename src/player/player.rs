//! The player: one frame source, one playback state machine, and the
//! scheduled completion for "once" policies.
//!
//! The player has no internal display clock; an interactive host calls
//! [`Player::advance`] from its frame tick, and a deterministic consumer
//! (export) addresses frames directly through the source. Completion of a
//! "once" traversal is additionally scheduled on a wall-clock timer so hosts
//! that never tick still get their callback, guarded by a generation token
//! so a superseded play never completes.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Condvar, Mutex,
    },
    thread,
    time::Duration,
};

use tracing::debug;

use crate::{
    foundation::{
        core::Bitmap,
        error::{KinoError, KinoResult},
    },
    player::{
        policy::{LoopPolicy, PlaybackState, PlaybackStatus},
        source::FrameSource,
    },
};

type CompletionFn = Box<dyn FnOnce() + Send>;

pub struct Player {
    source: Box<dyn FrameSource>,
    state: Arc<Mutex<PlaybackState>>,
    generation: Arc<AtomicU64>,
    completion: Arc<Mutex<Option<CompletionFn>>>,
    timer: Option<OnceTimer>,
}

impl Player {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source,
            state: Arc::new(Mutex::new(PlaybackState::new())),
            generation: Arc::new(AtomicU64::new(0)),
            completion: Arc::new(Mutex::new(None)),
            timer: None,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.state.lock().expect("player lock").status
    }

    pub fn state(&self) -> PlaybackState {
        self.state.lock().expect("player lock").clone()
    }

    pub fn source(&self) -> &dyn FrameSource {
        self.source.as_ref()
    }

    /// Mark the player as waiting on asynchronous backing data. Only legal
    /// from `Idle`; already-resolved animations skip this state entirely.
    pub fn begin_loading(&mut self) -> KinoResult<()> {
        self.transition(PlaybackStatus::Loading)
    }

    /// Start (or restart) playback under `policy`. From `Stopped` or `Idle`
    /// playback begins at the policy's edge frame: leading for forward
    /// traversal, trailing for backward.
    pub fn play(&mut self, policy: LoopPolicy) -> KinoResult<()> {
        let from = self.status();
        if !from.can_transition_to(PlaybackStatus::Playing) {
            return Err(KinoError::playback(format!(
                "cannot play from {from:?}"
            )));
        }
        self.invalidate_timer();

        let resuming = from == PlaybackStatus::Paused;
        {
            let mut state = self.state.lock().expect("player lock");
            if !resuming {
                state.progress = if policy.starts_reversed() { 1.0 } else { 0.0 };
                state.is_reversing = policy.starts_reversed();
            } else if state.policy != policy {
                state.is_reversing = policy.starts_reversed();
            }
            state.policy = policy;
            state.status = PlaybackStatus::Playing;
        }
        self.sync_frame();
        debug!(?policy, resuming, "playback started");
        Ok(())
    }

    /// `play` for a once policy, with a completion callback scheduled after
    /// the *remaining* traversal time. Resuming a reversing traversal at
    /// progress `p` schedules `duration * p`, not `duration * (1 - p)`.
    pub fn play_once(
        &mut self,
        policy: LoopPolicy,
        on_complete: impl FnOnce() + Send + 'static,
    ) -> KinoResult<()> {
        if !policy.is_once() {
            return Err(KinoError::validation("play_once requires a once policy"));
        }
        self.play(policy)?;

        let remaining = {
            let state = self.state.lock().expect("player lock");
            state.remaining_delay_secs(self.source.duration_secs())
        };
        *self.completion.lock().expect("player lock") = Some(Box::new(on_complete));

        let token = self.generation.load(Ordering::SeqCst);
        let generation = Arc::clone(&self.generation);
        let state = Arc::clone(&self.state);
        let completion = Arc::clone(&self.completion);
        self.timer = Some(OnceTimer::spawn(
            Duration::from_secs_f64(remaining.max(0.0)),
            move || {
                if generation.load(Ordering::SeqCst) != token {
                    return; // superseded play
                }
                let callback = {
                    let mut state = state.lock().expect("player lock");
                    if state.status != PlaybackStatus::Playing {
                        return;
                    }
                    state.progress = if state.is_reversing { 0.0 } else { 1.0 };
                    state.status = PlaybackStatus::Stopped;
                    completion.lock().expect("player lock").take()
                };
                if let Some(callback) = callback {
                    callback();
                }
            },
        ));
        Ok(())
    }

    pub fn pause(&mut self) -> KinoResult<()> {
        self.transition(PlaybackStatus::Paused)?;
        self.invalidate_timer();
        Ok(())
    }

    pub fn stop(&mut self) -> KinoResult<()> {
        self.transition(PlaybackStatus::Stopped)?;
        self.invalidate_timer();
        *self.completion.lock().expect("player lock") = None;
        Ok(())
    }

    /// Return a stopped player to `Idle`, detaching its playback history.
    pub fn reset(&mut self) -> KinoResult<()> {
        self.transition(PlaybackStatus::Idle)?;
        let mut state = self.state.lock().expect("player lock");
        state.progress = 0.0;
        state.is_reversing = false;
        Ok(())
    }

    /// Advance the playback clock by `dt` seconds and move the frame cursor
    /// accordingly. No-op unless playing.
    pub fn advance(&mut self, dt_secs: f64) {
        let duration = self.source.duration_secs();
        let completed = {
            let mut state = self.state.lock().expect("player lock");
            if state.status != PlaybackStatus::Playing || duration <= 0.0 || dt_secs <= 0.0 {
                return;
            }
            let delta = dt_secs / duration;
            step_progress(&mut state, delta)
        };
        self.sync_frame();
        if completed {
            self.invalidate_timer();
            {
                let mut state = self.state.lock().expect("player lock");
                state.status = PlaybackStatus::Stopped;
            }
            if let Some(callback) = self.completion.lock().expect("player lock").take() {
                callback();
            }
        }
    }

    pub fn set_frame(&mut self, n: u64) {
        self.source.set_frame(n);
    }

    pub fn current_frame(&self) -> u64 {
        self.source.current_frame()
    }

    pub fn render_current_frame(&mut self) -> KinoResult<Bitmap> {
        self.source.render_current()
    }

    fn transition(&self, to: PlaybackStatus) -> KinoResult<()> {
        let mut state = self.state.lock().expect("player lock");
        if !state.status.can_transition_to(to) {
            return Err(KinoError::playback(format!(
                "cannot move from {:?} to {to:?}",
                state.status
            )));
        }
        state.status = to;
        Ok(())
    }

    /// Map current progress to a source frame and push it to the adapter.
    fn sync_frame(&mut self) {
        let count = self.source.frame_count();
        if count == 0 {
            return;
        }
        let progress = self.state.lock().expect("player lock").progress;
        let frame = (progress.clamp(0.0, 1.0) * (count - 1) as f64).round() as u64;
        self.source.set_frame(frame);
    }

    fn invalidate_timer(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(mut timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.invalidate_timer();
    }
}

/// Advance `state.progress` by `delta` (a traversal fraction), honoring the
/// loop policy. Returns true when a once traversal just completed.
fn step_progress(state: &mut PlaybackState, delta: f64) -> bool {
    match state.policy {
        LoopPolicy::Forward => {
            state.progress = (state.progress + delta).rem_euclid(1.0);
            false
        }
        LoopPolicy::Backward => {
            state.progress = (state.progress - delta).rem_euclid(1.0);
            false
        }
        LoopPolicy::Bounce => {
            let mut p = if state.is_reversing {
                state.progress - delta
            } else {
                state.progress + delta
            };
            // Reflect at the edges, toggling direction each bounce.
            while !(0.0..=1.0).contains(&p) {
                if p > 1.0 {
                    p = 2.0 - p;
                } else {
                    p = -p;
                }
                state.is_reversing = !state.is_reversing;
            }
            state.progress = p;
            false
        }
        LoopPolicy::ForwardOnce => {
            state.progress = (state.progress + delta).min(1.0);
            state.progress >= 1.0
        }
        LoopPolicy::BackwardOnce => {
            state.progress = (state.progress - delta).max(0.0);
            state.progress <= 0.0
        }
    }
}

/// Cancellable one-shot delay on a dedicated thread.
struct OnceTimer {
    signal: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<thread::JoinHandle<()>>,
}

impl OnceTimer {
    fn spawn(delay: Duration, fire: impl FnOnce() + Send + 'static) -> Self {
        let signal = Arc::new((Mutex::new(false), Condvar::new()));
        let thread_signal = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name("kinoscope-once".into())
            .spawn(move || {
                let (lock, cv) = &*thread_signal;
                let guard = lock.lock().expect("timer lock");
                let (guard, timeout) = cv
                    .wait_timeout_while(guard, delay, |cancelled| !*cancelled)
                    .expect("timer lock");
                let cancelled = *guard;
                drop(guard);
                if timeout.timed_out() && !cancelled {
                    fire();
                }
            })
            .expect("spawn once timer");
        Self {
            signal,
            handle: Some(handle),
        }
    }

    fn cancel(&mut self) {
        let (lock, cv) = &*self.signal;
        *lock.lock().expect("timer lock") = true;
        cv.notify_all();
    }
}

impl Drop for OnceTimer {
    fn drop(&mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
