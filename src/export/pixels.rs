//! Bitmap to writer pixel-buffer conversion.
//!
//! The writer consumes 32-bit BGRA. Source frames are aspect-fit onto the
//! target canvas; alpha is kept (premultiplied) only when the source frame
//! actually carries it, otherwise the buffer is flattened fully opaque.

use crate::foundation::core::{aspect_fit_rect, Bitmap, VideoSize};

#[inline]
fn mul_div255(a: u8, b: u8) -> u8 {
    ((u16::from(a) * u16::from(b) + 127) / 255) as u8
}

/// Convert one frame to a `target`-sized BGRA buffer, letterboxed.
pub fn pixel_buffer(frame: &Bitmap, target: VideoSize) -> Vec<u8> {
    let keep_alpha = frame.has_alpha();
    let fill: [u8; 4] = if keep_alpha {
        [0, 0, 0, 0]
    } else {
        [0, 0, 0, 255]
    };

    let mut out = Vec::with_capacity(target.width as usize * target.height as usize * 4);
    for _ in 0..target.width as usize * target.height as usize {
        out.extend_from_slice(&fill);
    }

    let (x, y, w, h) = aspect_fit_rect(frame.size(), target);
    if w == 0 || h == 0 {
        return out;
    }

    let scaled = if frame.size() == VideoSize::new(w, h) {
        None
    } else {
        image::RgbaImage::from_raw(frame.width, frame.height, frame.rgba8.to_vec()).map(|img| {
            image::imageops::resize(&img, w, h, image::imageops::FilterType::Triangle)
        })
    };
    let (src, src_w): (&[u8], usize) = match &scaled {
        Some(img) => (img.as_raw(), w as usize),
        None => (frame.rgba8.as_slice(), frame.width as usize),
    };

    let stride = target.width as usize * 4;
    for row in 0..h as usize {
        let src_row = &src[row * src_w * 4..(row + 1) * src_w * 4];
        let dst_off = (y as usize + row) * stride + x as usize * 4;
        for (col, px) in src_row.chunks_exact(4).enumerate() {
            let (r, g, b, a) = (px[0], px[1], px[2], px[3]);
            let bgra = if keep_alpha {
                [
                    mul_div255(b, a),
                    mul_div255(g, a),
                    mul_div255(r, a),
                    a,
                ]
            } else {
                [b, g, r, 255]
            };
            let at = dst_off + col * 4;
            out[at..at + 4].copy_from_slice(&bgra);
        }
    }
    out
}

/// Round dimensions down to even values; the yuv420p output format requires
/// even width and height.
pub fn even_size(size: VideoSize) -> VideoSize {
    VideoSize::new((size.width & !1).max(2), (size.height & !1).max(2))
}
