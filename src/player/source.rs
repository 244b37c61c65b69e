//! Per-format adapters implementing the uniform frame-addressable contract.

use std::sync::Arc;

use crate::{
    formats::{binary::BinaryEntity, sequence::FrameSequence, vector::VectorBundle, Animation},
    foundation::{
        core::{aspect_fit_rect, Bitmap, FrameIndex, VideoSize},
        error::{KinoError, KinoResult},
    },
};

/// One uniform interface over whichever representation is active, serving
/// both interactive scrubbing and deterministic export.
pub trait FrameSource: Send {
    fn frame_count(&self) -> u64;
    fn fps(&self) -> f64;
    fn duration_secs(&self) -> f64;
    fn size(&self) -> VideoSize;
    fn set_frame(&mut self, n: FrameIndex);
    fn current_frame(&self) -> FrameIndex;
    fn render_current(&mut self) -> KinoResult<Bitmap>;
}

/// Build the adapter appropriate for an animation. Vector animations get the
/// built-in poster engine; callers with a real engine use
/// [`VectorSource::with_engine`].
pub fn source_for(animation: &Arc<Animation>) -> KinoResult<Box<dyn FrameSource>> {
    match animation.as_ref() {
        Animation::Vector(bundle) => Ok(Box::new(VectorSource::with_engine(
            Box::new(PosterEngine::new(bundle)),
            bundle,
        ))),
        Animation::Binary(_) => Ok(Box::new(BinarySource::new(Arc::clone(animation))?)),
        Animation::Sequence(_) => Ok(Box::new(SequenceSource::new(Arc::clone(animation))?)),
    }
}

/// Frame-index wrap used by the sequence adapter: an exact non-zero multiple
/// of the frame count maps to the *last* index, preserving continuity when
/// scrubbing forward past the loop boundary.
pub fn wrap_frame(n: u64, count: u64) -> u64 {
    if count == 0 {
        return 0;
    }
    let m = n % count;
    if m == 0 && n != 0 { count - 1 } else { m }
}

// ---------------------------------------------------------------------------
// Vector

/// Seam for the actual vector rendering engine. Implementations may be
/// main-thread-affine; such engines marshal through a
/// [`MainThreadGate`](crate::player::handoff::MainThreadGate) internally.
pub trait VectorEngine: Send {
    fn set_frame(&mut self, frame: u64);
    fn current_frame(&self) -> u64;
    fn render(&mut self) -> KinoResult<Bitmap>;
}

/// Built-in poster-quality engine: renders the first atlas bitmap aspect-fit
/// on the scene canvas, identically for every frame. Deterministic and
/// thread-safe, which is all previews and tests need.
pub struct PosterEngine {
    canvas: VideoSize,
    poster: Option<Bitmap>,
    frame: u64,
}

impl PosterEngine {
    pub fn new(bundle: &VectorBundle) -> Self {
        Self {
            canvas: bundle.scene.size,
            poster: bundle.atlas.first().cloned(),
            frame: 0,
        }
    }
}

impl VectorEngine for PosterEngine {
    fn set_frame(&mut self, frame: u64) {
        self.frame = frame;
    }

    fn current_frame(&self) -> u64 {
        self.frame
    }

    fn render(&mut self) -> KinoResult<Bitmap> {
        let VideoSize { width, height } = self.canvas;
        let mut canvas = vec![0u8; width as usize * height as usize * 4];

        match &self.poster {
            Some(poster) => {
                let (x, y, w, h) = aspect_fit_rect(poster.size(), self.canvas);
                let src = image::RgbaImage::from_raw(
                    poster.width,
                    poster.height,
                    poster.rgba8.to_vec(),
                )
                .ok_or_else(|| KinoError::playback("poster bitmap is malformed"))?;
                let scaled =
                    image::imageops::resize(&src, w, h, image::imageops::FilterType::Triangle);
                blit(&mut canvas, width, &scaled, x, y);
            }
            None => {
                for px in canvas.chunks_exact_mut(4) {
                    px.copy_from_slice(&[24, 24, 24, 255]);
                }
            }
        }

        Bitmap::new(width, height, canvas)
    }
}

fn blit(canvas: &mut [u8], canvas_width: u32, src: &image::RgbaImage, x: u32, y: u32) {
    let stride = canvas_width as usize * 4;
    for (row, pixels) in src.rows().enumerate() {
        let offset = (y as usize + row) * stride + x as usize * 4;
        for (col, px) in pixels.enumerate() {
            let at = offset + col * 4;
            if at + 4 <= canvas.len() {
                canvas[at..at + 4].copy_from_slice(&px.0);
            }
        }
    }
}

/// Adapter delegating frame cursor and rendering to a [`VectorEngine`].
pub struct VectorSource {
    engine: Box<dyn VectorEngine>,
    frame_count: u64,
    fps: f64,
    duration_secs: f64,
    size: VideoSize,
}

impl VectorSource {
    pub fn with_engine(engine: Box<dyn VectorEngine>, bundle: &VectorBundle) -> Self {
        Self {
            engine,
            frame_count: bundle.scene.frame_count(),
            fps: bundle.scene.fps,
            duration_secs: bundle.scene.duration_secs(),
            size: bundle.scene.size,
        }
    }
}

impl FrameSource for VectorSource {
    fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    fn size(&self) -> VideoSize {
        self.size
    }

    fn set_frame(&mut self, n: u64) {
        self.engine.set_frame(n);
    }

    fn current_frame(&self) -> u64 {
        self.engine.current_frame()
    }

    fn render_current(&mut self) -> KinoResult<Bitmap> {
        self.engine.render()
    }
}

// ---------------------------------------------------------------------------
// Binary

pub struct BinarySource {
    animation: Arc<Animation>,
    current: u64,
}

impl BinarySource {
    pub fn new(animation: Arc<Animation>) -> KinoResult<Self> {
        if !matches!(animation.as_ref(), Animation::Binary(_)) {
            return Err(KinoError::playback("not a binary animation"));
        }
        Ok(Self {
            animation,
            current: 0,
        })
    }

    fn entity(&self) -> &BinaryEntity {
        match self.animation.as_ref() {
            Animation::Binary(entity) => entity,
            _ => unreachable!("validated at construction"),
        }
    }
}

impl FrameSource for BinarySource {
    fn frame_count(&self) -> u64 {
        u64::from(self.entity().frame_count)
    }

    fn fps(&self) -> f64 {
        self.entity().fps.as_f64()
    }

    fn duration_secs(&self) -> f64 {
        self.entity().duration_secs()
    }

    fn size(&self) -> VideoSize {
        self.entity().size
    }

    fn set_frame(&mut self, n: u64) {
        // The binary player steps frames directly; out-of-range requests
        // pin to the trailing frame.
        self.current = n.min(self.frame_count().saturating_sub(1));
    }

    fn current_frame(&self) -> u64 {
        self.current
    }

    fn render_current(&mut self) -> KinoResult<Bitmap> {
        self.entity()
            .frames
            .get(self.current as usize)
            .cloned()
            .ok_or_else(|| KinoError::playback("frame index out of range"))
    }
}

// ---------------------------------------------------------------------------
// Sequence

pub struct SequenceSource {
    animation: Arc<Animation>,
    current: u64,
}

impl SequenceSource {
    pub fn new(animation: Arc<Animation>) -> KinoResult<Self> {
        if !matches!(animation.as_ref(), Animation::Sequence(_)) {
            return Err(KinoError::playback("not a frame sequence"));
        }
        Ok(Self {
            animation,
            current: 0,
        })
    }

    fn sequence(&self) -> &FrameSequence {
        match self.animation.as_ref() {
            Animation::Sequence(seq) => seq,
            _ => unreachable!("validated at construction"),
        }
    }
}

impl FrameSource for SequenceSource {
    fn frame_count(&self) -> u64 {
        self.sequence().frames.len() as u64
    }

    fn fps(&self) -> f64 {
        self.sequence().nominal_fps()
    }

    fn duration_secs(&self) -> f64 {
        self.sequence().total_duration
    }

    fn size(&self) -> VideoSize {
        self.sequence().size()
    }

    fn set_frame(&mut self, n: u64) {
        self.current = wrap_frame(n, self.frame_count());
    }

    fn current_frame(&self) -> u64 {
        self.current
    }

    fn render_current(&mut self) -> KinoResult<Bitmap> {
        self.sequence()
            .frames
            .get(self.current as usize)
            .map(|f| f.bitmap.clone())
            .ok_or_else(|| KinoError::playback("frame index out of range"))
    }
}
