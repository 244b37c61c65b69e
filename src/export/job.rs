//! The export driver: walks the animation's frame range deterministically,
//! feeds the writer, and muxes binary-container audio into the final file.
//!
//! Every exit path deletes scratch audio files and the intermediate video
//! file; a failed export never leaves a partial output behind.

use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::{
    export::{
        pixels::{even_size, pixel_buffer},
        writer::{FfmpegWriter, WriterConfig, DEFAULT_BITRATE_KBPS, DEFAULT_KEYFRAME_INTERVAL},
    },
    formats::{
        binary::{AudioTrack, BinaryEntity},
        Animation,
    },
    foundation::{
        core::VideoSize,
        error::{KinoError, KinoResult},
    },
    player::source::source_for,
};

/// Upper bound on the parallel pixel-conversion pre-pass.
const MAX_PREPARE_WORKERS: usize = 10;

#[derive(Clone, Debug)]
pub struct ExportOptions {
    /// Output video frame rate.
    pub framerate: u32,
    /// Rate at which the virtual frame cursor is driven; when it differs
    /// from `framerate`, source frames are proportionally remapped.
    pub frame_interval: u32,
    /// Exports shorter than this are rejected outright.
    pub min_duration_secs: f64,
    pub bitrate_kbps: u32,
    pub keyframe_interval: u32,
    pub ffmpeg_path: PathBuf,
}

impl ExportOptions {
    pub fn new(framerate: u32) -> Self {
        Self {
            framerate,
            frame_interval: framerate,
            min_duration_secs: 1.0,
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
            keyframe_interval: DEFAULT_KEYFRAME_INTERVAL,
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

/// Removes its path (file or directory) on drop unless disarmed.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if !self.armed || !self.path.exists() {
            return;
        }
        let result = if self.path.is_dir() {
            fs::remove_dir_all(&self.path)
        } else {
            fs::remove_file(&self.path)
        };
        if let Err(err) = result {
            warn!(path = %self.path.display(), %err, "could not remove export scratch");
        }
    }
}

/// The retained source-frame plan for one export: virtual frame indices
/// proportionally remapped onto the output timeline, with consecutive
/// duplicates dropped (the writer rejects duplicate presentation times).
/// Deterministic for identical inputs.
pub fn frame_plan(total_frames: u64, driven_frames: u64) -> Vec<u64> {
    let mut plan = Vec::with_capacity(driven_frames as usize);
    let mut last = None;
    for i in 0..driven_frames {
        let mapped = (total_frames as f64 * i as f64 / driven_frames as f64).round() as u64;
        if last != Some(mapped) {
            plan.push(mapped);
            last = Some(mapped);
        }
    }
    plan
}

/// Source frame holding the content shown at export time `t`, in the
/// source's own frame space: sequences walk their per-frame delays,
/// fixed-rate sources map `floor(fps * t)`. Clamped to the trailing frame
/// at the end of the timeline, never wrapped back to the start.
fn source_frame_at(animation: &Animation, t: f64) -> u64 {
    match animation {
        Animation::Sequence(seq) => {
            if t >= seq.total_duration {
                seq.frames.len().saturating_sub(1) as u64
            } else {
                seq.frame_at_time(t) as u64
            }
        }
        _ => {
            let count = animation.frame_count();
            if count == 0 {
                0
            } else {
                ((animation.fps() * t).floor() as u64).min(count - 1)
            }
        }
    }
}

/// Export the animation to an H.264 MP4 at `output`. `cancel` is observed at
/// every frame boundary; a cancelled export reports an error and deletes its
/// partial output.
pub fn export_animation(
    animation: &Arc<Animation>,
    output: &Path,
    options: &ExportOptions,
    cancel: &AtomicBool,
) -> KinoResult<()> {
    let duration = animation.duration_secs();
    if duration < options.min_duration_secs {
        return Err(KinoError::validation(format!(
            "animation is too short to export ({duration:.2}s < {:.2}s minimum)",
            options.min_duration_secs
        )));
    }
    if options.framerate == 0 || options.frame_interval == 0 {
        return Err(KinoError::validation("export rates must be > 0"));
    }

    let audio = match animation.as_ref() {
        Animation::Binary(entity) if entity.has_audio() => Some(entity),
        _ => None,
    };

    // With audio to merge, video goes to an intermediate file first.
    let video_path = if audio.is_some() {
        output.with_extension("video.tmp.mp4")
    } else {
        output.to_path_buf()
    };
    let mut video_guard = TempFileGuard::new(video_path.clone());

    let target = even_size(animation.size());
    write_video(animation, &video_path, target, options, cancel)?;

    match audio {
        Some(entity) => {
            let mut output_guard = TempFileGuard::new(output.to_path_buf());
            mux_audio(entity, &video_path, output, options)?;
            output_guard.disarm();
            // video_guard stays armed: the intermediate is always deleted.
        }
        None => video_guard.disarm(),
    }
    debug!(output = %output.display(), "export complete");
    Ok(())
}

fn write_video(
    animation: &Arc<Animation>,
    video_path: &Path,
    target: VideoSize,
    options: &ExportOptions,
    cancel: &AtomicBool,
) -> KinoResult<()> {
    let duration = animation.duration_secs();
    let mut source = source_for(animation)?;

    let mut config = WriterConfig::new(target, options.framerate);
    config.bitrate_kbps = options.bitrate_kbps;
    config.keyframe_interval = options.keyframe_interval;
    config.ffmpeg_path = options.ffmpeg_path.clone();
    let mut writer = FfmpegWriter::spawn(config, video_path)?;

    let total_frames = (f64::from(options.framerate) * duration).round() as u64;
    let driven_frames = (f64::from(options.frame_interval) * duration).round() as u64;
    let plan = frame_plan(total_frames, driven_frames);

    // Sequences are fully decoded already, so their pixel conversion is an
    // order-independent pre-pass worth parallelizing.
    let prepared = prepare_sequence_buffers(animation, target);

    for &mapped in &plan {
        if cancel.load(Ordering::Relaxed) {
            return Err(KinoError::writer("export cancelled"));
        }
        let t = mapped as f64 / f64::from(options.framerate);
        let frame_idx = source_frame_at(animation, t);
        let buffer = match &prepared {
            Some(table) => table[frame_idx as usize].clone(),
            None => {
                source.set_frame(frame_idx);
                let frame = source.render_current()?;
                pixel_buffer(&frame, target)
            }
        };
        writer.write_frame(&buffer)?;
    }
    writer.finish()?;
    Ok(())
}

fn prepare_sequence_buffers(animation: &Arc<Animation>, target: VideoSize) -> Option<Vec<Vec<u8>>> {
    let Animation::Sequence(seq) = animation.as_ref() else {
        return None;
    };
    let workers = MAX_PREPARE_WORKERS.min(seq.frames.len().max(1));
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .ok()?;
    Some(pool.install(|| {
        seq.frames
            .par_iter()
            .map(|frame| pixel_buffer(&frame.bitmap, target))
            .collect()
    }))
}

/// The `filter_complex` graph for the audio merge: each input is trimmed to
/// its recorded frame span, delayed to its start-frame offset at the source
/// fps time scale, then mixed at unity gain. Input 0 is the video.
fn audio_filter_graph(tracks: &[AudioTrack], fps: f64) -> String {
    let mut filters = Vec::with_capacity(tracks.len());
    let mut labels = Vec::with_capacity(tracks.len());
    for (i, track) in tracks.iter().enumerate() {
        let input = i + 1;
        let delay_ms = (f64::from(track.start_frame) / fps * 1000.0).round() as u64;
        let span_secs = f64::from(track.end_frame - track.start_frame) / fps;
        filters.push(format!(
            "[{input}:a]atrim=duration={span_secs:.3},adelay={delay_ms}|{delay_ms}[d{i}]"
        ));
        labels.push(format!("[d{i}]"));
    }
    if labels.len() == 1 {
        format!("{};{}anull[aout]", filters[0], labels[0])
    } else {
        format!(
            "{};{}amix=inputs={}:normalize=0[aout]",
            filters.join(";"),
            labels.concat(),
            labels.len()
        )
    }
}

/// Merge the entity's audio tracks into the final container: each track is
/// staged to a scratch file and wired through [`audio_filter_graph`], then
/// muxed alongside the copied video stream. Merge failure is export failure.
fn mux_audio(
    entity: &BinaryEntity,
    video_path: &Path,
    output: &Path,
    options: &ExportOptions,
) -> KinoResult<()> {
    let mut command = Command::new(&options.ffmpeg_path);
    command
        .args(["-hide_banner", "-loglevel", "error", "-y"])
        .arg("-i")
        .arg(video_path);

    let mut scratch_guards = Vec::new();
    for (i, track) in entity.audio_tracks.iter().enumerate() {
        let Some(blob) = entity.audio_data.get(&track.key) else {
            return Err(KinoError::writer(format!(
                "audio track '{}' has no data",
                track.key
            )));
        };
        let scratch = output.with_extension(format!("audio{i}.tmp"));
        fs::write(&scratch, blob.as_slice()).map_err(KinoError::from)?;
        command.arg("-i").arg(&scratch);
        scratch_guards.push(TempFileGuard::new(scratch));
    }

    let filter = audio_filter_graph(&entity.audio_tracks, entity.fps.as_f64());

    let status = command
        .args(["-filter_complex", &filter])
        .args(["-map", "0:v", "-map", "[aout]"])
        .args(["-c:v", "copy", "-c:a", "aac"])
        .arg(output)
        .output()
        .map_err(|e| KinoError::writer(format!("failed to spawn ffmpeg for audio merge: {e}")))?;
    if !status.status.success() {
        return Err(KinoError::writer(format!(
            "audio merge failed: {}",
            String::from_utf8_lossy(&status.stderr).trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::formats::binary;
    use crate::formats::sequence::{FrameSequence, SequenceFrame};
    use crate::foundation::core::Bitmap;

    fn sequence_animation(frames: usize, delay_secs: f64) -> Arc<Animation> {
        let frames: Vec<_> = (0..frames)
            .map(|i| SequenceFrame {
                bitmap: Bitmap::new(2, 2, vec![i as u8; 16]).unwrap(),
                delay_secs,
            })
            .collect();
        let total_duration = frames.iter().map(|f| f.delay_secs).sum();
        Arc::new(Animation::Sequence(FrameSequence {
            frames,
            total_duration,
        }))
    }

    fn binary_animation(frames: u32, fps: u32) -> Arc<Animation> {
        let frames = vec![Bitmap::new(4, 4, vec![0u8; 64]).unwrap(); frames as usize];
        let bytes = binary::encode(&binary::EncodeParams {
            fps,
            frames: &frames,
            audio_tracks: &[],
            audio_data: &HashMap::new(),
        })
        .unwrap();
        Arc::new(Animation::Binary(binary::decode(&bytes).unwrap()))
    }

    #[test]
    fn sequence_export_tracks_frame_delays_in_real_time() {
        // 4 frames x 0.25 s rendered at 8 fps: each source frame occupies
        // exactly two output slots, in order, at natural speed.
        let animation = sequence_animation(4, 0.25);
        let emitted: Vec<u64> = frame_plan(8, 8)
            .iter()
            .map(|&m| source_frame_at(&animation, m as f64 / 8.0))
            .collect();
        assert_eq!(emitted, vec![0, 0, 1, 1, 2, 2, 3, 3]);
    }

    #[test]
    fn export_mapping_never_wraps_past_the_end() {
        // At or beyond the timeline end the trailing frame holds; the cursor
        // never returns to frame 0.
        let sequence = sequence_animation(4, 0.25);
        assert_eq!(source_frame_at(&sequence, 1.0), 3);
        assert_eq!(source_frame_at(&sequence, 1.25), 3);

        let binary = binary_animation(10, 10);
        assert_eq!(source_frame_at(&binary, 1.0), 9);
        assert_eq!(source_frame_at(&binary, 5.0), 9);
    }

    #[test]
    fn downsampled_export_advances_monotonically() {
        // 10 source frames at 10 fps rendered at 4 fps: the retained frames
        // sample the source timeline in strictly increasing order.
        let animation = binary_animation(10, 10);
        let emitted: Vec<u64> = frame_plan(4, 4)
            .iter()
            .map(|&m| source_frame_at(&animation, m as f64 / 4.0))
            .collect();
        assert_eq!(emitted, vec![0, 2, 5, 7]);
    }

    #[test]
    fn audio_graph_trims_each_track_to_its_frame_span() {
        let solo = vec![AudioTrack {
            key: "bgm".into(),
            start_frame: 10,
            end_frame: 25,
        }];
        assert_eq!(
            audio_filter_graph(&solo, 10.0),
            "[1:a]atrim=duration=1.500,adelay=1000|1000[d0];[d0]anull[aout]"
        );

        let pair = vec![
            AudioTrack {
                key: "a".into(),
                start_frame: 0,
                end_frame: 20,
            },
            AudioTrack {
                key: "b".into(),
                start_frame: 5,
                end_frame: 15,
            },
        ];
        let graph = audio_filter_graph(&pair, 10.0);
        assert!(graph.starts_with("[1:a]atrim=duration=2.000,adelay=0|0[d0]"));
        assert!(graph.contains("[2:a]atrim=duration=1.000,adelay=500|500[d1]"));
        assert!(graph.ends_with("[d0][d1]amix=inputs=2:normalize=0[aout]"));
    }

    #[test]
    fn equal_rates_skip_nothing() {
        let plan = frame_plan(30, 30);
        assert_eq!(plan, (0..30).collect::<Vec<u64>>());
    }

    #[test]
    fn slower_drive_skips_deterministically() {
        // 30 source frames driven at half rate: 15 retained, no duplicates,
        // and identical on every run.
        let plan = frame_plan(30, 15);
        assert_eq!(plan.len(), 15);
        assert!(plan.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(plan, frame_plan(30, 15));
    }

    #[test]
    fn faster_drive_collapses_duplicates() {
        // Driving at double rate maps pairs of iterations onto the same
        // source frame; only one of each survives.
        let plan = frame_plan(15, 30);
        assert_eq!(plan.len(), 16); // 0..=15 midpoints round up once
        assert!(plan.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn short_animations_are_rejected_before_any_io() {
        // 0.2 s of material against the 1 s default minimum.
        let animation = binary_animation(2, 10);
        let err = export_animation(
            &animation,
            Path::new("/tmp/never-written.mp4"),
            &ExportOptions::new(30),
            &AtomicBool::new(false),
        )
        .unwrap_err();
        assert!(matches!(err, KinoError::Validation(_)), "got {err:?}");
    }

    #[test]
    fn guard_deletes_unless_disarmed() {
        let dir = tempfile::tempdir().unwrap();
        let kept = dir.path().join("kept");
        let dropped = dir.path().join("dropped");
        fs::write(&kept, b"x").unwrap();
        fs::write(&dropped, b"x").unwrap();

        let mut guard = TempFileGuard::new(kept.clone());
        guard.disarm();
        drop(guard);
        drop(TempFileGuard::new(dropped.clone()));

        assert!(kept.exists());
        assert!(!dropped.exists());
    }
}
