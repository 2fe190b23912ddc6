//! Pixel format conversion for the software encode path.
//!
//! The pipeline only needs a [`Converter`]; hosts with their own colorspace
//! machinery plug that in. [`SoftwareConverter`] is the reference
//! implementation: integer BT.601/BT.709 RGB to YUV, YUV 4:2:0 plane
//! shuffles and packed RGB swizzles. It does not scale.

use crate::{CodecError, ColorRange, ColorSpace, PixelFormat, VideoFrame, VideoFrameRef};

/// Converts host frames into the pixel format an encoder consumes.
pub trait Converter: Send {
    /// Convert `src` into `dst`. `dst` keeps its format and dimensions;
    /// the timestamp is copied over.
    fn convert(&mut self, src: &VideoFrameRef<'_>, dst: &mut VideoFrame) -> Result<(), CodecError>;

    /// Returns true if `from` can be converted to `to`.
    fn supports(&self, from: PixelFormat, to: PixelFormat) -> bool;
}

/// Reference converter running on the CPU.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwareConverter {
    color_space: ColorSpace,
    color_range: ColorRange,
}

impl SoftwareConverter {
    /// Create a converter producing YUV in the given matrix and range.
    #[must_use]
    pub fn new(color_space: ColorSpace, color_range: ColorRange) -> Self {
        Self {
            color_space,
            color_range,
        }
    }
}

impl Converter for SoftwareConverter {
    fn convert(&mut self, src: &VideoFrameRef<'_>, dst: &mut VideoFrame) -> Result<(), CodecError> {
        if src.width != dst.width || src.height != dst.height {
            return Err(CodecError::InvalidDimensions {
                width: src.width,
                height: src.height,
            });
        }
        if src.format == dst.format {
            return dst.copy_from(src);
        }
        src.validate()?;

        let coefficients = Coefficients::select(self.color_space, self.color_range);
        match (src.format, dst.format) {
            (PixelFormat::I420, PixelFormat::Nv12) => i420_to_nv12(src, dst),
            (PixelFormat::Nv12, PixelFormat::I420) => nv12_to_i420(src, dst),
            (from, to) if rgb_layout(from).is_some() && to.is_yuv() => {
                rgb_to_yuv(src, dst, &coefficients)
            }
            (from, to) if rgb_layout(from).is_some() && rgb_layout(to).is_some() => {
                swizzle(src, dst)
            }
            (from, to) => {
                return Err(CodecError::conversion(format!(
                    "conversion from {:?} to {:?} not implemented",
                    from, to
                )))
            }
        }
        dst.pts = src.pts;
        Ok(())
    }

    fn supports(&self, from: PixelFormat, to: PixelFormat) -> bool {
        from == to
            || matches!(
                (from, to),
                (PixelFormat::I420, PixelFormat::Nv12) | (PixelFormat::Nv12, PixelFormat::I420)
            )
            || (rgb_layout(from).is_some() && (to.is_yuv() || rgb_layout(to).is_some()))
    }
}

// ============================================================================
// Color conversion functions
// ============================================================================

/// Byte offsets of R, G, B (and alpha) within one packed pixel.
#[derive(Debug, Clone, Copy)]
struct RgbLayout {
    r: usize,
    g: usize,
    b: usize,
    a: Option<usize>,
    bpp: usize,
}

fn rgb_layout(format: PixelFormat) -> Option<RgbLayout> {
    let layout = |r, g, b, a, bpp| Some(RgbLayout { r, g, b, a, bpp });
    match format {
        PixelFormat::Rgb => layout(0, 1, 2, None, 3),
        PixelFormat::Bgr => layout(2, 1, 0, None, 3),
        PixelFormat::Rgba => layout(0, 1, 2, Some(3), 4),
        PixelFormat::Bgra => layout(2, 1, 0, Some(3), 4),
        PixelFormat::Argb => layout(1, 2, 3, Some(0), 4),
        PixelFormat::Abgr => layout(3, 2, 1, Some(0), 4),
        PixelFormat::Nv12 | PixelFormat::I420 | PixelFormat::I444 => None,
    }
}

/// Fixed-point (8-bit fraction) RGB to YUV matrix.
#[derive(Debug, Clone, Copy)]
struct Coefficients {
    y: [i32; 3],
    u: [i32; 3],
    v: [i32; 3],
    y_offset: i32,
}

impl Coefficients {
    fn select(space: ColorSpace, range: ColorRange) -> Self {
        match (space, range) {
            (ColorSpace::Bt601, ColorRange::Partial) => Self {
                y: [66, 129, 25],
                u: [-38, -74, 112],
                v: [112, -94, -18],
                y_offset: 16,
            },
            (ColorSpace::Bt601, ColorRange::Full) => Self {
                y: [77, 150, 29],
                u: [-43, -85, 128],
                v: [128, -107, -21],
                y_offset: 0,
            },
            (_, ColorRange::Partial) => Self {
                y: [47, 157, 16],
                u: [-26, -87, 112],
                v: [112, -102, -10],
                y_offset: 16,
            },
            (_, ColorRange::Full) => Self {
                y: [54, 183, 18],
                u: [-29, -99, 128],
                v: [128, -116, -12],
                y_offset: 0,
            },
        }
    }

    fn luma(&self, r: i32, g: i32, b: i32) -> u8 {
        (((self.y[0] * r + self.y[1] * g + self.y[2] * b + 128) >> 8) + self.y_offset).clamp(0, 255)
            as u8
    }

    fn chroma(&self, r: i32, g: i32, b: i32) -> (u8, u8) {
        let u = ((self.u[0] * r + self.u[1] * g + self.u[2] * b + 128) >> 8) + 128;
        let v = ((self.v[0] * r + self.v[1] * g + self.v[2] * b + 128) >> 8) + 128;
        (u.clamp(0, 255) as u8, v.clamp(0, 255) as u8)
    }
}

/// Read the RGB triple at pixel (x, y).
fn rgb_at(src: &VideoFrameRef<'_>, layout: &RgbLayout, x: usize, y: usize) -> (i32, i32, i32) {
    let row = src.row(0, y);
    let idx = x * layout.bpp;
    (
        row[idx + layout.r] as i32,
        row[idx + layout.g] as i32,
        row[idx + layout.b] as i32,
    )
}

/// Convert any packed RGB format to NV12, I420 or I444.
fn rgb_to_yuv(src: &VideoFrameRef<'_>, dst: &mut VideoFrame, coefficients: &Coefficients) {
    let Some(layout) = rgb_layout(src.format) else {
        return;
    };
    let w = src.width as usize;
    let h = src.height as usize;

    // Y plane
    for y in 0..h {
        for x in 0..w {
            let (r, g, b) = rgb_at(src, &layout, x, y);
            dst.row_mut(0, y)[x] = coefficients.luma(r, g, b);
        }
    }

    if dst.format == PixelFormat::I444 {
        for y in 0..h {
            for x in 0..w {
                let (r, g, b) = rgb_at(src, &layout, x, y);
                let (u, v) = coefficients.chroma(r, g, b);
                dst.row_mut(1, y)[x] = u;
                dst.row_mut(2, y)[x] = v;
            }
        }
        return;
    }

    // Chroma planes (subsampled 2x2)
    for y in (0..h).step_by(2) {
        for x in (0..w).step_by(2) {
            // Average 2x2 block
            let mut r_sum = 0i32;
            let mut g_sum = 0i32;
            let mut b_sum = 0i32;
            for dy in 0..2 {
                for dx in 0..2 {
                    let py = (y + dy).min(h - 1);
                    let px = (x + dx).min(w - 1);
                    let (r, g, b) = rgb_at(src, &layout, px, py);
                    r_sum += r;
                    g_sum += g;
                    b_sum += b;
                }
            }
            let (u, v) = coefficients.chroma(r_sum / 4, g_sum / 4, b_sum / 4);

            if dst.format == PixelFormat::Nv12 {
                let row = dst.row_mut(1, y / 2);
                row[x] = u;
                row[x + 1] = v;
            } else {
                dst.row_mut(1, y / 2)[x / 2] = u;
                dst.row_mut(2, y / 2)[x / 2] = v;
            }
        }
    }
}

/// Convert I420 to NV12.
fn i420_to_nv12(src: &VideoFrameRef<'_>, dst: &mut VideoFrame) {
    let h = src.height as usize;
    for y in 0..h {
        dst.row_mut(0, y).copy_from_slice(src.row(0, y));
    }

    // Interleave U and V planes
    let chroma_rows = (h + 1) / 2;
    for y in 0..chroma_rows {
        let u_row = src.row(1, y);
        let v_row = src.row(2, y);
        let uv_row = dst.row_mut(1, y);
        for (i, (&u, &v)) in u_row.iter().zip(v_row).enumerate() {
            uv_row[i * 2] = u;
            uv_row[i * 2 + 1] = v;
        }
    }
}

/// Convert NV12 to I420.
fn nv12_to_i420(src: &VideoFrameRef<'_>, dst: &mut VideoFrame) {
    let h = src.height as usize;
    for y in 0..h {
        dst.row_mut(0, y).copy_from_slice(src.row(0, y));
    }

    let chroma_rows = (h + 1) / 2;
    for y in 0..chroma_rows {
        let uv_row = src.row(1, y);
        for (i, pair) in uv_row.chunks_exact(2).enumerate() {
            dst.row_mut(1, y)[i] = pair[0];
            dst.row_mut(2, y)[i] = pair[1];
        }
    }
}

/// Reorder channels between packed RGB formats; missing alpha becomes opaque.
fn swizzle(src: &VideoFrameRef<'_>, dst: &mut VideoFrame) {
    let (Some(from), Some(to)) = (rgb_layout(src.format), rgb_layout(dst.format)) else {
        return;
    };
    let w = src.width as usize;
    for y in 0..src.height as usize {
        let src_row = src.row(0, y);
        let dst_row = dst.row_mut(0, y);
        for x in 0..w {
            let s = x * from.bpp;
            let d = x * to.bpp;
            dst_row[d + to.r] = src_row[s + from.r];
            dst_row[d + to.g] = src_row[s + from.g];
            dst_row[d + to.b] = src_row[s + from.b];
            if let Some(a) = to.a {
                dst_row[d + a] = from.a.map_or(255, |fa| src_row[s + fa]);
            }
        }
    }
}
