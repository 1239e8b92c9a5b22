//! Pyramidal translational Lucas-Kanade tracking.
//!
//! Coarse-to-fine over the shared pyramid depth: at each level the 2x2
//! gradient normal equations are solved iteratively for a translation
//! update, and the displacement is doubled when descending to the next
//! finer level. Per-feature status codes drive compaction in the
//! estimator; a failed feature never aborts the batch.

use crate::estimator::pyramid::{LumaPlane, LumaPyramid};

/// Outcome of one frame-to-frame tracking pass for a single feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    Tracked,
    /// The solver diverged past the search range.
    Lost,
    /// The tracked position left the image bounds.
    OutOfBounds,
    /// Singular normal equations (flat or aperture-limited patch).
    Degenerate,
}

/// A feature position in analysis-plane coordinates, with its most recent
/// tracking outcome.
#[derive(Debug, Clone, Copy)]
pub struct FeatureTrack {
    pub x: f32,
    pub y: f32,
    pub status: TrackStatus,
}

impl FeatureTrack {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            status: TrackStatus::Tracked,
        }
    }
}

pub struct FlowParams {
    pub window_half: usize,
    pub max_iterations: usize,
    pub epsilon: f32,
}

/// Displace each feature from its position in `prev` to the matching
/// position in `next`, updating positions and statuses in place.
pub fn track(
    prev: &LumaPyramid,
    next: &LumaPyramid,
    tracks: &mut [FeatureTrack],
    params: &FlowParams,
) {
    let num_levels = prev.num_levels().min(next.num_levels());
    if num_levels == 0 {
        return;
    }
    for feature in tracks.iter_mut() {
        if feature.status == TrackStatus::Tracked {
            track_single(prev, next, feature, num_levels, params);
        }
    }
}

fn track_single(
    prev: &LumaPyramid,
    next: &LumaPyramid,
    feature: &mut FeatureTrack,
    num_levels: usize,
    params: &FlowParams,
) {
    let mut dx = 0.0f32;
    let mut dy = 0.0f32;

    for level in (0..num_levels).rev() {
        let scale = 1.0 / (1u32 << level) as f32;
        let fx = feature.x * scale;
        let fy = feature.y * scale;

        match lk_level(prev.level(level), next.level(level), fx, fy, dx, dy, params) {
            LkResult::Converged(nx, ny) | LkResult::MaxIter(nx, ny) => {
                dx = nx;
                dy = ny;
            }
            LkResult::Singular => {
                feature.status = TrackStatus::Degenerate;
                return;
            }
        }

        if level > 0 {
            dx *= 2.0;
            dy *= 2.0;
        }
    }

    // A displacement beyond the pyramid's search reach means the solver
    // wandered rather than converged.
    let max_reach = ((1usize << num_levels) * (params.window_half + 1)) as f32;
    if dx * dx + dy * dy > max_reach * max_reach {
        feature.status = TrackStatus::Lost;
        return;
    }

    let new_x = feature.x + dx;
    let new_y = feature.y + dy;
    let level0 = prev.level(0);
    if new_x < 0.0
        || new_y < 0.0
        || new_x >= level0.width() as f32
        || new_y >= level0.height() as f32
    {
        feature.x = new_x;
        feature.y = new_y;
        feature.status = TrackStatus::OutOfBounds;
        return;
    }

    feature.x = new_x;
    feature.y = new_y;
    feature.status = TrackStatus::Tracked;
}

enum LkResult {
    Converged(f32, f32),
    MaxIter(f32, f32),
    Singular,
}

/// Iterative forward-additive Lucas-Kanade at one pyramid level. Gradients
/// are sampled at the warped position in the next frame, so the 2x2 system
/// is rebuilt every iteration.
fn lk_level(
    prev: &LumaPlane,
    next: &LumaPlane,
    fx: f32,
    fy: f32,
    mut dx: f32,
    mut dy: f32,
    params: &FlowParams,
) -> LkResult {
    let half = params.window_half as i32;

    for _ in 0..params.max_iterations {
        let mut h00 = 0.0f32;
        let mut h01 = 0.0f32;
        let mut h11 = 0.0f32;
        let mut b0 = 0.0f32;
        let mut b1 = 0.0f32;

        for py in -half..=half {
            for px in -half..=half {
                let tx = fx + px as f32;
                let ty = fy + py as f32;
                let wx = tx + dx;
                let wy = ty + dy;

                let t_val = prev.sample(tx, ty);
                let i_val = next.sample(wx, wy);
                let error = t_val - i_val;

                let gx = 0.5 * (next.sample(wx + 1.0, wy) - next.sample(wx - 1.0, wy));
                let gy = 0.5 * (next.sample(wx, wy + 1.0) - next.sample(wx, wy - 1.0));

                h00 += gx * gx;
                h01 += gx * gy;
                h11 += gy * gy;
                b0 += gx * error;
                b1 += gy * error;
            }
        }

        let det = h00 * h11 - h01 * h01;
        if det.abs() < 1e-6 {
            return LkResult::Singular;
        }
        let inv_det = 1.0 / det;
        let delta_x = inv_det * (h11 * b0 - h01 * b1);
        let delta_y = inv_det * (h00 * b1 - h01 * b0);

        dx += delta_x;
        dy += delta_y;

        if delta_x * delta_x + delta_y * delta_y < params.epsilon * params.epsilon {
            return LkResult::Converged(dx, dy);
        }
    }

    LkResult::MaxIter(dx, dy)
}
