//! Blocking handoff to a thread-affine context.
//!
//! Some vector engines may only render on one designated thread. The gate
//! lets a background caller submit a closure, block until that thread has
//! run it, and get the result back. The wait always carries a timeout so a
//! stalled or departed servicing thread cannot leave the caller unkillable.

use std::{
    sync::mpsc,
    time::Duration,
};

use crate::foundation::error::{KinoError, KinoResult};

type GateJob = Box<dyn FnOnce() + Send>;

/// Caller-side handle. Cheap to clone.
#[derive(Clone)]
pub struct MainThreadGate {
    tx: mpsc::Sender<GateJob>,
}

/// Servicing-side handle, owned by the affine thread.
pub struct GateServicer {
    rx: mpsc::Receiver<GateJob>,
}

/// Create a connected gate pair.
pub fn gate_pair() -> (MainThreadGate, GateServicer) {
    let (tx, rx) = mpsc::channel();
    (MainThreadGate { tx }, GateServicer { rx })
}

impl MainThreadGate {
    /// Run `f` on the servicing thread and block for its result, up to
    /// `timeout`. A timed-out or disconnected gate is a playback error, not
    /// a hang.
    pub fn run<R, F>(&self, timeout: Duration, f: F) -> KinoResult<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (done_tx, done_rx) = mpsc::channel();
        let job: GateJob = Box::new(move || {
            let _ = done_tx.send(f());
        });
        self.tx
            .send(job)
            .map_err(|_| KinoError::playback("render gate is closed"))?;
        done_rx
            .recv_timeout(timeout)
            .map_err(|_| KinoError::playback("render handoff timed out"))
    }
}

impl GateServicer {
    /// Run at most one pending job, waiting up to `wait` for one to arrive.
    /// Returns whether a job ran.
    pub fn service_one(&self, wait: Duration) -> bool {
        match self.rx.recv_timeout(wait) {
            Ok(job) => {
                job();
                true
            }
            Err(_) => false,
        }
    }

    /// Drain and run everything currently queued.
    pub fn service_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }
}
