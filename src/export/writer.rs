//! Streaming H.264/MP4 writer over a spawned `ffmpeg` process.
//!
//! Raw BGRA frames are piped to ffmpeg's stdin; the OS pipe provides the
//! back-pressure (a full pipe blocks the writer until the encoder catches
//! up). The child's liveness doubles as the "still writing" signal: a frame
//! append aborts as soon as the process has exited.

use std::{
    io::{Read, Write as _},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, Stdio},
    thread,
};

use tracing::debug;

use crate::foundation::{
    core::VideoSize,
    error::{KinoError, KinoResult},
};

pub const DEFAULT_BITRATE_KBPS: u32 = 5000;
pub const DEFAULT_KEYFRAME_INTERVAL: u32 = 60;

#[derive(Clone, Debug)]
pub struct WriterConfig {
    pub size: VideoSize,
    pub fps: u32,
    pub bitrate_kbps: u32,
    /// Maximum key-frame interval, ffmpeg's `-g`.
    pub keyframe_interval: u32,
    pub ffmpeg_path: PathBuf,
}

impl WriterConfig {
    pub fn new(size: VideoSize, fps: u32) -> Self {
        Self {
            size,
            fps,
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
            keyframe_interval: DEFAULT_KEYFRAME_INTERVAL,
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }

    pub fn validate(&self) -> KinoResult<()> {
        if self.size.is_degenerate() {
            return Err(KinoError::validation("writer size must be non-zero"));
        }
        if self.size.width % 2 != 0 || self.size.height % 2 != 0 {
            return Err(KinoError::validation(
                "writer dimensions must be even for yuv420p output",
            ));
        }
        if self.fps == 0 {
            return Err(KinoError::validation("writer fps must be > 0"));
        }
        if self.bitrate_kbps == 0 {
            return Err(KinoError::validation("writer bitrate must be > 0"));
        }
        Ok(())
    }

    fn frame_len(&self) -> usize {
        self.size.width as usize * self.size.height as usize * 4
    }
}

#[derive(Debug)]
pub struct FfmpegWriter {
    config: WriterConfig,
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_thread: Option<thread::JoinHandle<String>>,
    frames_written: u64,
}

impl FfmpegWriter {
    /// Spawn the encoder process targeting `output`. Construction failure
    /// (missing binary, bad config) is terminal for the export.
    pub fn spawn(config: WriterConfig, output: &Path) -> KinoResult<Self> {
        config.validate()?;

        let mut child = Command::new(&config.ffmpeg_path)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "rawvideo", "-pix_fmt", "bgra"])
            .args(["-s", &format!("{}x{}", config.size.width, config.size.height)])
            .args(["-r", &config.fps.to_string()])
            .args(["-i", "-"])
            .args(["-c:v", "libx264", "-pix_fmt", "yuv420p"])
            .args(["-b:v", &format!("{}k", config.bitrate_kbps)])
            .args(["-g", &config.keyframe_interval.to_string()])
            .args(["-movflags", "+faststart"])
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| KinoError::writer(format!("failed to spawn ffmpeg: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| KinoError::writer("ffmpeg stdin unavailable"))?;
        // Drain stderr so the child never blocks on a full pipe; the text is
        // attached to the error when encoding fails.
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| KinoError::writer("ffmpeg stderr unavailable"))?;
        let stderr_thread = thread::spawn(move || {
            let mut text = String::new();
            let mut reader = std::io::BufReader::new(stderr);
            let _ = reader.read_to_string(&mut text);
            text
        });

        debug!(size = ?config.size, fps = config.fps, "ffmpeg writer started");
        Ok(Self {
            config,
            child,
            stdin: Some(stdin),
            stderr_thread: Some(stderr_thread),
            frames_written: 0,
        })
    }

    /// True while the encoder process is alive and accepting frames.
    pub fn is_writing(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Append one BGRA frame. Blocks until the encoder accepts the bytes;
    /// fails if the encoder has left its writing state.
    pub fn write_frame(&mut self, bgra: &[u8]) -> KinoResult<()> {
        if bgra.len() != self.config.frame_len() {
            return Err(KinoError::validation(format!(
                "frame buffer length {} does not match writer size {}x{}",
                bgra.len(),
                self.config.size.width,
                self.config.size.height
            )));
        }
        if !self.is_writing() {
            return Err(self.failure("encoder exited mid-stream"));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| KinoError::writer("writer already finished"))?;
        if let Err(e) = stdin.write_all(bgra) {
            return Err(self.failure(&format!("frame write failed: {e}")));
        }
        self.frames_written += 1;
        Ok(())
    }

    /// Close the input stream and wait for the encoder to finalize the file.
    pub fn finish(mut self) -> KinoResult<u64> {
        drop(self.stdin.take());
        let status = self
            .child
            .wait()
            .map_err(|e| KinoError::writer(format!("wait for ffmpeg: {e}")))?;
        let stderr = self.collect_stderr();
        if !status.success() {
            return Err(KinoError::writer(format!(
                "ffmpeg exited with {status}: {}",
                stderr.trim()
            )));
        }
        debug!(frames = self.frames_written, "ffmpeg writer finished");
        Ok(self.frames_written)
    }

    fn failure(&mut self, reason: &str) -> KinoError {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let stderr = self.collect_stderr();
        KinoError::writer(format!("{reason}: {}", stderr.trim()))
    }

    fn collect_stderr(&mut self) -> String {
        self.stderr_thread
            .take()
            .and_then(|t| t.join().ok())
            .unwrap_or_default()
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        // Abandoned writer: tear the child down rather than leak it.
        if matches!(self.child.try_wait(), Ok(None)) {
            drop(self.stdin.take());
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
