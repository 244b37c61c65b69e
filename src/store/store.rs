//! The animation store: zero-or-one current animation, backed by a persisted
//! payload and a discriminant state file.
//!
//! All mutations run on one dedicated worker thread fed by an mpsc channel,
//! so callers never reason about reentrancy; they submit a task and get a
//! completion callback. The callback fires on the worker thread.
//!
//! Crash-safety invariant: the state file (discriminant) is written only
//! after the payload is fully staged in the cache directory. A crash between
//! the two leaves a payload without a discriminant, which `setup` treats as
//! an empty cache.

use std::{
    fs,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc, Arc, RwLock,
    },
    thread,
};

use anyhow::Context as _;
use tracing::{debug, warn};

use crate::{
    formats::{Animation, CachedKind},
    foundation::error::{KinoError, KinoResult},
    resolve,
    store::paths::StorePaths,
};

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StateFile {
    kind: u8,
    payload: String,
}

type SetupDone = Box<dyn FnOnce(KinoResult<()>) + Send>;
type ClearDone = Box<dyn FnOnce() + Send>;
type LoadSuccess = Box<dyn FnOnce(Arc<Animation>) + Send>;
type LoadFailure = Box<dyn FnOnce(KinoError) + Send>;

enum Job {
    Setup {
        done: SetupDone,
    },
    Clear {
        done: ClearDone,
    },
    Load {
        bytes: Vec<u8>,
        token: u64,
        success: LoadSuccess,
        failure: LoadFailure,
    },
    Shutdown,
}

/// Shared between the handle and the worker.
struct Shared {
    paths: StorePaths,
    current: RwLock<Option<Arc<Animation>>>,
    generation: AtomicU64,
}

pub struct AnimationStore {
    shared: Arc<Shared>,
    sender: mpsc::Sender<Job>,
    worker: Option<thread::JoinHandle<()>>,
}

impl AnimationStore {
    /// Create a store over a namespace root. No I/O happens until `setup`.
    pub fn new(paths: StorePaths) -> Self {
        let shared = Arc::new(Shared {
            paths,
            current: RwLock::new(None),
            generation: AtomicU64::new(0),
        });
        let (sender, receiver) = mpsc::channel();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("kinoscope-store".into())
            .spawn(move || run_worker(worker_shared, receiver))
            .expect("spawn store worker");
        Self {
            shared,
            sender,
            worker: Some(worker),
        }
    }

    /// Create directories and reconstruct the cached animation, if any.
    /// A payload that no longer decodes clears the cache instead of failing.
    pub fn setup(&self, done: impl FnOnce(KinoResult<()>) + Send + 'static) {
        self.submit(Job::Setup {
            done: Box::new(done),
        });
    }

    /// Drop the current animation and delete the persisted payload.
    /// Idempotent; completion always fires.
    pub fn clear_cache(&self, done: impl FnOnce() + Send + 'static) {
        self.submit(Job::Clear {
            done: Box::new(done),
        });
    }

    /// Resolve and install new animation bytes. On failure the previous
    /// animation and its cache are left untouched.
    pub fn load_data(
        &self,
        bytes: Vec<u8>,
        success: impl FnOnce(Arc<Animation>) + Send + 'static,
        failure: impl FnOnce(KinoError) + Send + 'static,
    ) {
        let token = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.submit(Job::Load {
            bytes,
            token,
            success: Box::new(success),
            failure: Box::new(failure),
        });
    }

    /// The current animation, if one is loaded.
    pub fn current(&self) -> Option<Arc<Animation>> {
        self.shared.current.read().expect("store lock").clone()
    }

    fn submit(&self, job: Job) {
        // Send can only fail after shutdown, which only Drop triggers.
        let _ = self.sender.send(job);
    }
}

impl Drop for AnimationStore {
    fn drop(&mut self) {
        let _ = self.sender.send(Job::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(shared: Arc<Shared>, receiver: mpsc::Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        match job {
            Job::Setup { done } => done(do_setup(&shared)),
            Job::Clear { done } => {
                do_clear(&shared);
                done();
            }
            Job::Load {
                bytes,
                token,
                success,
                failure,
            } => match do_load(&shared, &bytes, token) {
                Ok(Some(animation)) => success(animation),
                Ok(None) => {} // superseded by a newer load
                Err(err) => failure(err),
            },
            Job::Shutdown => break,
        }
    }
}

fn do_setup(shared: &Shared) -> KinoResult<()> {
    let paths = &shared.paths;
    fs::create_dir_all(paths.scratch_dir()).map_err(KinoError::from)?;
    fs::create_dir_all(paths.cache_dir()).map_err(KinoError::from)?;

    let Some(state) = read_state(paths) else {
        debug!("store setup: empty cache");
        return Ok(());
    };
    let kind = CachedKind::from_raw(state.kind);
    if kind == CachedKind::None {
        return Ok(());
    }

    let payload = paths.cache_dir().join(&state.payload);
    match resolve::decode_payload(kind, &payload) {
        Ok(animation) => {
            debug!(?kind, "store setup: reconstructed cached animation");
            *shared.current.write().expect("store lock") = Some(Arc::new(animation));
            Ok(())
        }
        Err(err) => {
            warn!(%err, "store setup: cached payload no longer decodes, clearing");
            do_clear(shared);
            Ok(())
        }
    }
}

fn do_clear(shared: &Shared) {
    let paths = &shared.paths;
    *shared.current.write().expect("store lock") = None;

    let state = paths.state_file();
    if state.exists() {
        if let Err(err) = fs::remove_file(&state) {
            warn!(%err, "store clear: could not remove state file");
        }
    }
    let cache = paths.cache_dir();
    if cache.exists() {
        if let Err(err) = fs::remove_dir_all(&cache) {
            warn!(%err, "store clear: could not remove cache dir");
        }
    }
    if let Err(err) = fs::create_dir_all(&cache) {
        warn!(%err, "store clear: could not recreate cache dir");
    }
}

/// `Ok(None)` means the load completed but was superseded.
fn do_load(shared: &Shared, bytes: &[u8], token: u64) -> KinoResult<Option<Arc<Animation>>> {
    let paths = &shared.paths;
    let resolved = resolve::resolve_bytes(&paths.scratch_dir(), bytes)?;

    if token != shared.generation.load(Ordering::SeqCst) {
        debug!(token, "store load: superseded before persist, dropping");
        return Ok(None);
    }

    persist(paths, &resolved)?;
    let animation = Arc::new(resolved.animation);
    *shared.current.write().expect("store lock") = Some(Arc::clone(&animation));
    debug!(kind = ?animation.kind(), "store load: installed new animation");
    Ok(Some(animation))
}

/// Move the resolved payload into the cache and record the discriminant.
/// Order matters: payload first, state file last.
fn persist(paths: &StorePaths, resolved: &resolve::Resolved) -> KinoResult<()> {
    let cache = paths.cache_dir();
    if cache.exists() {
        fs::remove_dir_all(&cache).map_err(KinoError::from)?;
    }
    fs::create_dir_all(&cache).map_err(KinoError::from)?;

    let name = resolved
        .payload
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| KinoError::validation("payload path has no file name"))?
        .to_string();
    let dest = cache.join(&name);
    move_path(&resolved.payload, &dest)?;

    let state = StateFile {
        kind: resolved.animation.kind().as_raw(),
        payload: name,
    };
    let json = serde_json::to_vec_pretty(&state)
        .map_err(|e| KinoError::validation(format!("encode state file: {e}")))?;
    fs::write(paths.state_file(), json)
        .with_context(|| "write state file")
        .map_err(KinoError::from)?;
    Ok(())
}

/// Rename when possible, copy-then-delete across filesystems.
fn move_path(src: &PathBuf, dest: &PathBuf) -> KinoResult<()> {
    if fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    if src.is_dir() {
        copy_dir(src, dest)?;
        fs::remove_dir_all(src).map_err(KinoError::from)?;
    } else {
        fs::copy(src, dest).map_err(KinoError::from)?;
        fs::remove_file(src).map_err(KinoError::from)?;
    }
    Ok(())
}

fn copy_dir(src: &PathBuf, dest: &PathBuf) -> KinoResult<()> {
    fs::create_dir_all(dest).map_err(KinoError::from)?;
    for entry in fs::read_dir(src).map_err(KinoError::from)? {
        let entry = entry.map_err(KinoError::from)?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        if from.is_dir() {
            copy_dir(&from, &to)?;
        } else {
            fs::copy(&from, &to).map_err(KinoError::from)?;
        }
    }
    Ok(())
}

fn read_state(paths: &StorePaths) -> Option<StateFile> {
    let bytes = fs::read(paths.state_file()).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashMap, sync::mpsc::channel, time::Duration};

    use crate::formats::binary;
    use crate::foundation::core::Bitmap;

    const WAIT: Duration = Duration::from_secs(10);

    fn bva_bytes(fps: u32, frames: u32) -> Vec<u8> {
        let frames: Vec<_> = (0..frames)
            .map(|_| Bitmap::new(4, 4, vec![7u8; 64]).unwrap())
            .collect();
        binary::encode(&binary::EncodeParams {
            fps,
            frames: &frames,
            audio_tracks: &[],
            audio_data: &HashMap::new(),
        })
        .unwrap()
    }

    fn setup_store(root: &std::path::Path) -> AnimationStore {
        let store = AnimationStore::new(StorePaths::new(root));
        let (tx, rx) = channel();
        store.setup(move |r| tx.send(r).unwrap());
        rx.recv_timeout(WAIT).unwrap().unwrap();
        store
    }

    fn load_ok(store: &AnimationStore, bytes: Vec<u8>) -> Arc<Animation> {
        let (tx, rx) = channel();
        let tx_err = tx.clone();
        store.load_data(
            bytes,
            move |a| tx.send(Ok(a)).unwrap(),
            move |e| tx_err.send(Err(e)).unwrap(),
        );
        rx.recv_timeout(WAIT).unwrap().unwrap()
    }

    #[test]
    fn load_then_reconstruct_round_trips() {
        let root = tempfile::tempdir().unwrap();
        {
            let store = setup_store(root.path());
            let animation = load_ok(&store, bva_bytes(10, 3));
            assert_eq!(animation.frame_count(), 3);
            assert!(store.current().is_some());
        }

        // Fresh handle over the same namespace reconstructs from disk.
        let store = setup_store(root.path());
        let current = store.current().expect("reconstructed animation");
        assert_eq!(current.frame_count(), 3);
        assert_eq!(current.fps(), 10.0);
    }

    #[test]
    fn failed_load_preserves_previous_animation_and_cache() {
        let root = tempfile::tempdir().unwrap();
        let store = setup_store(root.path());
        load_ok(&store, bva_bytes(10, 3));

        let (tx, rx) = channel();
        store.load_data(
            vec![0xBA, 0xD0, 0xBA, 0xD0],
            |_| panic!("garbage must not load"),
            move |e| tx.send(e).unwrap(),
        );
        let err = rx.recv_timeout(WAIT).unwrap();
        assert!(matches!(err, KinoError::UnrecognizedFile));

        assert_eq!(store.current().unwrap().frame_count(), 3);
        drop(store);
        let store = setup_store(root.path());
        assert_eq!(store.current().unwrap().frame_count(), 3);
    }

    #[test]
    fn clear_cache_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let store = setup_store(root.path());
        load_ok(&store, bva_bytes(10, 2));

        for _ in 0..2 {
            let (tx, rx) = channel();
            store.clear_cache(move || tx.send(()).unwrap());
            rx.recv_timeout(WAIT).unwrap();
            assert!(store.current().is_none());
        }

        drop(store);
        let store = setup_store(root.path());
        assert!(store.current().is_none());
    }

    #[test]
    fn superseded_load_is_a_silent_no_op() {
        let root = tempfile::tempdir().unwrap();
        let store = setup_store(root.path());

        // Submitting two loads back to back: by the time the first one runs,
        // the generation has already advanced, so only the second installs.
        let (tx, rx) = channel();
        store.load_data(bva_bytes(10, 1), |_| {}, |_| {});
        store.load_data(
            bva_bytes(20, 5),
            move |a| tx.send(a).unwrap(),
            |e| panic!("unexpected failure: {e}"),
        );
        let installed = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(installed.frame_count(), 5);
        assert_eq!(store.current().unwrap().frame_count(), 5);
    }
}
