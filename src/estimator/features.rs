//! Corner detection for feature re-seeding.
//!
//! Shi-Tomasi scoring: the minimum eigenvalue of the 3x3-windowed
//! structure tensor of central-difference gradients. Candidates above the
//! score floor are kept greedily from strongest to weakest, enforcing a
//! minimum spacing so the tracked set covers the frame instead of
//! clustering on one edge.

use crate::estimator::pyramid::LumaPlane;

#[derive(Debug, Clone, Copy)]
pub struct Corner {
    pub x: f32,
    pub y: f32,
    pub score: f32,
}

pub struct DetectParams {
    pub max_features: usize,
    pub min_distance: u32,
    pub min_score: f32,
}

/// Detect up to `max_features` corners on the analysis plane.
pub fn detect(plane: &LumaPlane, params: &DetectParams) -> Vec<Corner> {
    let width = plane.width();
    let height = plane.height();
    // One pixel for the gradient plus one for the tensor window.
    let margin = 2usize;
    if width <= 2 * margin || height <= 2 * margin {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    for y in margin..height - margin {
        for x in margin..width - margin {
            let score = min_eigenvalue(plane, x, y);
            if score >= params.min_score {
                candidates.push(Corner {
                    x: x as f32,
                    y: y as f32,
                    score,
                });
            }
        }
    }

    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let min_dist_sq = (params.min_distance * params.min_distance) as f32;
    let mut selected: Vec<Corner> = Vec::with_capacity(params.max_features);
    for cand in candidates {
        if selected.len() >= params.max_features {
            break;
        }
        let spaced = selected.iter().all(|kept| {
            let dx = kept.x - cand.x;
            let dy = kept.y - cand.y;
            dx * dx + dy * dy >= min_dist_sq
        });
        if spaced {
            selected.push(cand);
        }
    }
    selected
}

/// Minimum eigenvalue of the structure tensor summed over a 3x3 window.
fn min_eigenvalue(plane: &LumaPlane, cx: usize, cy: usize) -> f32 {
    let mut gxx = 0.0f32;
    let mut gxy = 0.0f32;
    let mut gyy = 0.0f32;
    for dy in -1i32..=1 {
        for dx in -1i32..=1 {
            let x = (cx as i32 + dx) as usize;
            let y = (cy as i32 + dy) as usize;
            let gx = 0.5 * (plane.get(x + 1, y) as f32 - plane.get(x - 1, y) as f32);
            let gy = 0.5 * (plane.get(x, y + 1) as f32 - plane.get(x, y - 1) as f32);
            gxx += gx * gx;
            gxy += gx * gy;
            gyy += gy * gy;
        }
    }
    let trace = gxx + gyy;
    let diff = gxx - gyy;
    0.5 * (trace - (diff * diff + 4.0 * gxy * gxy).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::pyramid::LumaPyramid;

    /// Full-res frame with a bright square; level 0 of the pyramid halves it.
    fn square_plane(w: usize, h: usize, sq_x: usize, sq_y: usize, sq: usize) -> LumaPyramid {
        let mut luma = vec![30u8; w * h];
        for y in sq_y..(sq_y + sq).min(h) {
            for x in sq_x..(sq_x + sq).min(w) {
                luma[y * w + x] = 220;
            }
        }
        let mut pyr = LumaPyramid::new();
        pyr.rebuild(&luma, w, w, h, 1);
        pyr
    }

    #[test]
    fn finds_square_corners() {
        let pyr = square_plane(128, 128, 40, 40, 40);
        let corners = detect(
            pyr.level(0),
            &DetectParams {
                max_features: 8,
                min_distance: 4,
                min_score: 50.0,
            },
        );
        assert!(!corners.is_empty());
        // Strongest responses sit on the square's boundary (in half-res
        // coordinates the square spans 20..40).
        for c in &corners {
            let on_x_edge = (c.x - 20.0).abs() < 3.0 || (c.x - 40.0).abs() < 3.0;
            let on_y_edge = (c.y - 20.0).abs() < 3.0 || (c.y - 40.0).abs() < 3.0;
            assert!(
                on_x_edge || on_y_edge,
                "corner ({}, {}) not on square boundary",
                c.x,
                c.y
            );
        }
    }

    #[test]
    fn flat_image_yields_nothing() {
        let mut pyr = LumaPyramid::new();
        pyr.rebuild(&vec![100u8; 64 * 64], 64, 64, 64, 1);
        let corners = detect(
            pyr.level(0),
            &DetectParams {
                max_features: 16,
                min_distance: 4,
                min_score: 10.0,
            },
        );
        assert!(corners.is_empty());
    }

    #[test]
    fn respects_spacing_and_cap() {
        let pyr = square_plane(128, 128, 30, 30, 60);
        let params = DetectParams {
            max_features: 5,
            min_distance: 6,
            min_score: 10.0,
        };
        let corners = detect(pyr.level(0), &params);
        assert!(corners.len() <= 5);
        for (i, a) in corners.iter().enumerate() {
            for b in corners.iter().skip(i + 1) {
                let dist_sq = (a.x - b.x).powi(2) + (a.y - b.y).powi(2);
                assert!(dist_sq >= 36.0, "corners too close: {:?} {:?}", a, b);
            }
        }
    }

    #[test]
    fn ordered_by_strength() {
        let pyr = square_plane(128, 128, 40, 40, 40);
        let corners = detect(
            pyr.level(0),
            &DetectParams {
                max_features: 8,
                min_distance: 4,
                min_score: 10.0,
            },
        );
        for pair in corners.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }
}
