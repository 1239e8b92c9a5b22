//! Chained image transforms.
//!
//! Order is fixed: area-average down-scale reading through an
//! offset-shifted source window (this is where stabilization is actually
//! realized), 90-degree rotation into portrait, then NV12 to packed ARGB
//! conversion with a fixed color matrix. Every step takes explicit strides.
//! None of them allocate: all intermediates live in per-worker scratch
//! sized once at thread start.
//!
//! Output pixels are 32-bit ARGB words stored little-endian, i.e. B, G, R,
//! A byte order in memory.

use crate::config::{ColorProfile, PipelineConfig, Resolution};
use crate::estimator::StabilizationOffset;
use crate::frame::Nv12Frame;

/// Per-worker intermediate buffers, allocated once and reused for the
/// worker's lifetime.
pub struct WorkerScratch {
    y_scaled: Vec<u8>,
    uv_scaled: Vec<u8>,
    y_rot: Vec<u8>,
    u_rot: Vec<u8>,
    v_rot: Vec<u8>,
    uv_rot: Vec<u8>,
    argb: Vec<u8>,
}

impl WorkerScratch {
    pub fn new(cfg: &PipelineConfig) -> Self {
        let ww = cfg.working.width as usize;
        let wh = cfg.working.height as usize;
        let dw = cfg.display.width as usize;
        let dh = cfg.display.height as usize;
        Self {
            y_scaled: vec![0; ww * wh],
            uv_scaled: vec![0; ww * (wh / 2)],
            y_rot: vec![0; dw * dh],
            u_rot: vec![0; (dw / 2) * (dh / 2)],
            v_rot: vec![0; (dw / 2) * (dh / 2)],
            uv_rot: vec![0; dw * (dh / 2)],
            argb: vec![0; dw * 4 * dh],
        }
    }
}

/// YUV-to-RGB conversion coefficients.
struct ColorMatrix {
    y_offset: f32,
    y_scale: f32,
    r_v: f32,
    g_u: f32,
    g_v: f32,
    b_u: f32,
}

const BT601_FULL: ColorMatrix = ColorMatrix {
    y_offset: 0.0,
    y_scale: 1.0,
    r_v: 1.402,
    g_u: 0.344_136,
    g_v: 0.714_136,
    b_u: 1.772,
};

const BT709_LIMITED: ColorMatrix = ColorMatrix {
    y_offset: 16.0,
    y_scale: 1.164_4,
    r_v: 1.792_7,
    g_u: 0.213_2,
    g_v: 0.532_9,
    b_u: 2.112_4,
};

pub struct TransformPipeline {
    capture: Resolution,
    working: Resolution,
    display: Resolution,
    profile: ColorProfile,
}

impl TransformPipeline {
    pub fn new(cfg: &PipelineConfig) -> Self {
        Self {
            capture: cfg.capture,
            working: cfg.working,
            display: cfg.display,
            profile: cfg.color_profile,
        }
    }

    /// Run the full chain for one frame. Returns the packed ARGB display
    /// buffer inside `scratch` and its row stride in bytes.
    pub fn apply<'a>(
        &self,
        frame: &Nv12Frame,
        offset: StabilizationOffset,
        scratch: &'a mut WorkerScratch,
    ) -> (&'a [u8], usize) {
        let cw = self.capture.width as usize;
        let ch = self.capture.height as usize;
        let ww = self.working.width as usize;
        let wh = self.working.height as usize;
        let dw = self.display.width as usize;
        let dh = self.display.height as usize;

        scale_plane_area(
            frame.y(),
            frame.y_stride(),
            cw,
            ch,
            (offset.x, offset.y),
            &mut scratch.y_scaled,
            ww,
            wh,
        );
        // The chroma plane is half-size in both axes and interleaved; an
        // even offset divides cleanly into whole UV pairs.
        scale_uv_area(
            frame.uv(),
            frame.uv_stride(),
            cw / 2,
            ch / 2,
            (offset.x / 2, offset.y / 2),
            &mut scratch.uv_scaled,
            ww / 2,
            wh / 2,
        );

        rotate_plane_90_cw(&scratch.y_scaled, ww, ww, wh, &mut scratch.y_rot, dw);
        rotate_uv_90_cw(
            &scratch.uv_scaled,
            ww,
            ww / 2,
            wh / 2,
            &mut scratch.u_rot,
            &mut scratch.v_rot,
            dw / 2,
        );
        merge_uv(
            &scratch.u_rot,
            &scratch.v_rot,
            dw / 2,
            dw / 2,
            dh / 2,
            &mut scratch.uv_rot,
            dw,
        );

        let matrix = match self.profile {
            ColorProfile::Bt601 => &BT601_FULL,
            ColorProfile::Bt709 => &BT709_LIMITED,
        };
        nv12_to_argb(
            &scratch.y_rot,
            dw,
            &scratch.uv_rot,
            dw,
            &mut scratch.argb,
            dw * 4,
            dw,
            dh,
            matrix,
        );

        (&scratch.argb, dw * 4)
    }
}

/// Area-average down-scale of a single plane. The source read window is
/// shifted by `offset` and clamped so no block reads outside the plane.
#[allow(clippy::too_many_arguments)]
fn scale_plane_area(
    src: &[u8],
    src_stride: usize,
    src_w: usize,
    src_h: usize,
    offset: (i32, i32),
    dst: &mut [u8],
    dst_w: usize,
    dst_h: usize,
) {
    let fx = src_w / dst_w;
    let fy = src_h / dst_h;
    let norm = (fx * fy) as u32;
    let max_sx = (src_w - fx) as i32;
    let max_sy = (src_h - fy) as i32;

    for y in 0..dst_h {
        let sy = ((y * fy) as i32 + offset.1).clamp(0, max_sy) as usize;
        let dst_row = y * dst_w;
        for x in 0..dst_w {
            let sx = ((x * fx) as i32 + offset.0).clamp(0, max_sx) as usize;
            let mut sum = 0u32;
            for by in 0..fy {
                let row = (sy + by) * src_stride + sx;
                for bx in 0..fx {
                    sum += src[row + bx] as u32;
                }
            }
            dst[dst_row + x] = ((sum + norm / 2) / norm) as u8;
        }
    }
}

/// Area-average down-scale of an interleaved UV plane. Dimensions and the
/// offset are in UV pairs / chroma rows.
#[allow(clippy::too_many_arguments)]
fn scale_uv_area(
    src: &[u8],
    src_stride: usize,
    src_pairs: usize,
    src_rows: usize,
    offset: (i32, i32),
    dst: &mut [u8],
    dst_pairs: usize,
    dst_rows: usize,
) {
    let fx = src_pairs / dst_pairs;
    let fy = src_rows / dst_rows;
    let norm = (fx * fy) as u32;
    let max_sx = (src_pairs - fx) as i32;
    let max_sy = (src_rows - fy) as i32;

    for y in 0..dst_rows {
        let sy = ((y * fy) as i32 + offset.1).clamp(0, max_sy) as usize;
        let dst_row = y * dst_pairs * 2;
        for x in 0..dst_pairs {
            let sx = ((x * fx) as i32 + offset.0).clamp(0, max_sx) as usize;
            let mut sum_u = 0u32;
            let mut sum_v = 0u32;
            for by in 0..fy {
                let row = (sy + by) * src_stride + sx * 2;
                for bx in 0..fx {
                    sum_u += src[row + bx * 2] as u32;
                    sum_v += src[row + bx * 2 + 1] as u32;
                }
            }
            dst[dst_row + x * 2] = ((sum_u + norm / 2) / norm) as u8;
            dst[dst_row + x * 2 + 1] = ((sum_v + norm / 2) / norm) as u8;
        }
    }
}

/// Rotate a plane 90 degrees clockwise. Output is `src_h` wide and
/// `src_w` tall.
fn rotate_plane_90_cw(
    src: &[u8],
    src_stride: usize,
    src_w: usize,
    src_h: usize,
    dst: &mut [u8],
    dst_stride: usize,
) {
    for y in 0..src_w {
        let dst_row = y * dst_stride;
        for x in 0..src_h {
            dst[dst_row + x] = src[(src_h - 1 - x) * src_stride + y];
        }
    }
}

/// Rotate an interleaved UV plane 90 degrees clockwise, de-interleaving
/// into separate U and V planes of `src_rows` x `src_pairs`.
#[allow(clippy::too_many_arguments)]
fn rotate_uv_90_cw(
    src: &[u8],
    src_stride: usize,
    src_pairs: usize,
    src_rows: usize,
    dst_u: &mut [u8],
    dst_v: &mut [u8],
    dst_stride: usize,
) {
    for y in 0..src_pairs {
        let dst_row = y * dst_stride;
        for x in 0..src_rows {
            let s = (src_rows - 1 - x) * src_stride + y * 2;
            dst_u[dst_row + x] = src[s];
            dst_v[dst_row + x] = src[s + 1];
        }
    }
}

/// Re-interleave separate U and V planes into a single UV plane.
fn merge_uv(
    src_u: &[u8],
    src_v: &[u8],
    src_stride: usize,
    width: usize,
    height: usize,
    dst: &mut [u8],
    dst_stride: usize,
) {
    for y in 0..height {
        let src_row = y * src_stride;
        let dst_row = y * dst_stride;
        for x in 0..width {
            dst[dst_row + x * 2] = src_u[src_row + x];
            dst[dst_row + x * 2 + 1] = src_v[src_row + x];
        }
    }
}

/// Convert NV12 planes to packed ARGB (B, G, R, A byte order).
#[allow(clippy::too_many_arguments)]
fn nv12_to_argb(
    y_plane: &[u8],
    y_stride: usize,
    uv_plane: &[u8],
    uv_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    width: usize,
    height: usize,
    matrix: &ColorMatrix,
) {
    for j in 0..height {
        let y_row = j * y_stride;
        let uv_row = (j / 2) * uv_stride;
        let dst_row = j * dst_stride;
        for i in 0..width {
            let luma = (y_plane[y_row + i] as f32 - matrix.y_offset) * matrix.y_scale;
            let u = uv_plane[uv_row + (i / 2) * 2] as f32 - 128.0;
            let v = uv_plane[uv_row + (i / 2) * 2 + 1] as f32 - 128.0;

            let r = luma + matrix.r_v * v;
            let g = luma - matrix.g_u * u - matrix.g_v * v;
            let b = luma + matrix.b_u * u;

            let out = dst_row + i * 4;
            dst[out] = clamp_to_u8(b);
            dst[out + 1] = clamp_to_u8(g);
            dst[out + 2] = clamp_to_u8(r);
            dst[out + 3] = 0xFF;
        }
    }
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
