//! Ties the store, player adapters and export pipeline together behind the
//! host-application seam.
//!
//! The host (file pickers, share sheets, whatever chrome exists) is reached
//! only through [`HostShell`]; every shell call may decline or return
//! nothing, and the controller treats that as a normal outcome.

use std::{
    path::Path,
    sync::{
        atomic::AtomicBool,
        mpsc::channel,
        Arc,
    },
};

use tracing::debug;

use crate::{
    export::{export_animation, ExportOptions},
    formats::Animation,
    foundation::error::{KinoError, KinoResult},
    player::source::source_for,
    store::{AnimationStore, StorePaths},
};

/// Callbacks into the embedding application. All methods are allowed to
/// decline (`false` / `None`).
pub trait HostShell: Send + Sync {
    /// Hand an encoded PNG to the host for saving. Returns whether the host
    /// accepted it.
    fn save_image(&self, png: &[u8]) -> bool;
    /// Hand a finished video file to the host. Returns whether the host
    /// accepted it.
    fn save_video(&self, path: &Path) -> bool;
    /// Ask the host for animation bytes (a picked file, a dropped blob).
    fn pick_data(&self) -> Option<Vec<u8>>;
}

pub struct PreviewController<H: HostShell> {
    store: AnimationStore,
    shell: H,
}

impl<H: HostShell> PreviewController<H> {
    pub fn new(paths: StorePaths, shell: H) -> Self {
        Self {
            store: AnimationStore::new(paths),
            shell,
        }
    }

    pub fn store(&self) -> &AnimationStore {
        &self.store
    }

    /// Run store setup and wait for it.
    pub fn setup(&self) -> KinoResult<()> {
        let (tx, rx) = channel();
        self.store.setup(move |r| {
            let _ = tx.send(r);
        });
        rx.recv()
            .map_err(|_| KinoError::playback("store worker went away"))?
    }

    /// Load raw bytes through the resolver and wait for the result.
    pub fn load_bytes(&self, bytes: Vec<u8>) -> KinoResult<Arc<Animation>> {
        let (tx, rx) = channel();
        let tx_err = tx.clone();
        self.store.load_data(
            bytes,
            move |animation| {
                let _ = tx.send(Ok(animation));
            },
            move |err| {
                let _ = tx_err.send(Err(err));
            },
        );
        rx.recv()
            .map_err(|_| KinoError::playback("store worker went away"))?
    }

    /// Ask the host for bytes and load them. A declined pick is an error the
    /// caller can ignore, not a crash.
    pub fn load_picked(&self) -> KinoResult<Arc<Animation>> {
        let bytes = self
            .shell
            .pick_data()
            .ok_or_else(|| KinoError::validation("host declined to provide data"))?;
        self.load_bytes(bytes)
    }

    pub fn clear_cache(&self) -> KinoResult<()> {
        let (tx, rx) = channel();
        self.store.clear_cache(move || {
            let _ = tx.send(());
        });
        rx.recv()
            .map_err(|_| KinoError::playback("store worker went away"))
    }

    /// Render the animation's frame `n` as PNG and offer it to the host.
    /// Returns whether the host accepted.
    pub fn snapshot_frame(&self, n: u64) -> KinoResult<bool> {
        let animation = self
            .store
            .current()
            .ok_or_else(|| KinoError::playback("no animation loaded"))?;
        let mut source = source_for(&animation)?;
        source.set_frame(n);
        let bitmap = source.render_current()?;

        let img = image::RgbaImage::from_raw(bitmap.width, bitmap.height, bitmap.rgba8.to_vec())
            .ok_or_else(|| KinoError::playback("rendered bitmap is malformed"))?;
        let mut png = std::io::Cursor::new(Vec::new());
        img.write_to(&mut png, image::ImageFormat::Png)
            .map_err(|e| KinoError::decode(format!("encode snapshot: {e}")))?;

        let accepted = self.shell.save_image(&png.into_inner());
        debug!(frame = n, accepted, "snapshot offered to host");
        Ok(accepted)
    }

    /// Export the current animation to `output` and offer the file to the
    /// host. Returns whether the host accepted.
    pub fn export(
        &self,
        output: &Path,
        options: &ExportOptions,
        cancel: &AtomicBool,
    ) -> KinoResult<bool> {
        let animation = self
            .store
            .current()
            .ok_or_else(|| KinoError::playback("no animation loaded"))?;
        export_animation(&animation, output, options, cancel)?;
        Ok(self.shell.save_video(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use crate::formats::binary;
    use crate::foundation::core::Bitmap;

    #[derive(Default)]
    struct RecordingShell {
        picked: Option<Vec<u8>>,
        images_saved: AtomicUsize,
    }

    impl HostShell for RecordingShell {
        fn save_image(&self, png: &[u8]) -> bool {
            assert_eq!(&png[1..4], b"PNG");
            self.images_saved.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn save_video(&self, _path: &Path) -> bool {
            false
        }

        fn pick_data(&self) -> Option<Vec<u8>> {
            self.picked.clone()
        }
    }

    fn bva_bytes() -> Vec<u8> {
        let frames = vec![Bitmap::new(4, 4, vec![3u8; 64]).unwrap(); 3];
        binary::encode(&binary::EncodeParams {
            fps: 10,
            frames: &frames,
            audio_tracks: &[],
            audio_data: &HashMap::new(),
        })
        .unwrap()
    }

    #[test]
    fn declined_pick_is_an_error_not_a_panic() {
        let root = tempfile::tempdir().unwrap();
        let controller =
            PreviewController::new(StorePaths::new(root.path()), RecordingShell::default());
        controller.setup().unwrap();
        assert!(controller.load_picked().is_err());
        assert!(controller.store().current().is_none());
    }

    #[test]
    fn picked_bytes_load_and_snapshot() {
        let root = tempfile::tempdir().unwrap();
        let shell = RecordingShell {
            picked: Some(bva_bytes()),
            ..Default::default()
        };
        let controller = PreviewController::new(StorePaths::new(root.path()), shell);
        controller.setup().unwrap();

        let animation = controller.load_picked().unwrap();
        assert_eq!(animation.frame_count(), 3);
        assert!(controller.snapshot_frame(1).unwrap());
    }

    #[test]
    fn snapshot_without_animation_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let controller =
            PreviewController::new(StorePaths::new(root.path()), RecordingShell::default());
        controller.setup().unwrap();
        assert!(controller.snapshot_frame(0).is_err());
    }
}
