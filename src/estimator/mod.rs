//! Sensor-fusion motion estimator.
//!
//! Fuses angular-rate samples from the motion-sensor feed with sparse
//! optical-flow feature tracking on a down-scaled luma plane, producing a
//! clamped, even-parity 2-D stabilization offset per frame.
//!
//! All estimator state (feature tracks, pyramids, running offset, fused
//! gyro rate) sits behind one coarse lock: the sensor thread writes the
//! angular-rate state and whichever worker currently calls `estimate`
//! runs the vision update, one frame at a time.

pub mod features;
pub mod flow;
pub mod pyramid;

use std::sync::Mutex;

use crate::config::{Resolution, StabilizerConfig};
use crate::estimator::features::DetectParams;
use crate::estimator::flow::{FeatureTrack, FlowParams, TrackStatus};
use crate::estimator::pyramid::LumaPyramid;
use crate::sensor::MotionSample;

const NS_TO_S: f32 = 1.0e-9;

/// 2-D pixel displacement applied to the crop window to counteract
/// hand-shake. Always within the configured clamp range and always even,
/// so the shifted chroma read stays aligned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StabilizationOffset {
    pub x: i32,
    pub y: i32,
}

/// Single-pole low-pass filter over the three gyro axes.
pub struct LowPassFilter {
    alpha: f32,
    state: [f32; 3],
}

impl LowPassFilter {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha,
            state: [0.0; 3],
        }
    }

    pub fn filter(&mut self, input: [f32; 3]) -> [f32; 3] {
        let a = self.alpha;
        let out = [
            a * self.state[0] + (1.0 - a) * input[0],
            a * self.state[1] + (1.0 - a) * input[1],
            a * self.state[2] + (1.0 - a) * input[2],
        ];
        self.state = out;
        out
    }
}

/// Gyro integration state: smoothed samples converted into a per-frame
/// translational rate in capture pixels.
struct GyroFusion {
    lpf: LowPassFilter,
    last_timestamp_ns: Option<u64>,
    rate_px: (f32, f32),
}

impl GyroFusion {
    fn new(alpha: f32) -> Self {
        Self {
            lpf: LowPassFilter::new(alpha),
            last_timestamp_ns: None,
            rate_px: (0.0, 0.0),
        }
    }

    fn ingest(&mut self, sample: &MotionSample, cfg: &StabilizerConfig) {
        let [wx, wy, wz] = self.lpf.filter(sample.angular_velocity);
        if let Some(prev_ts) = self.last_timestamp_ns {
            if sample.timestamp_ns > prev_ts {
                let dt = (sample.timestamp_ns - prev_ts) as f32 * NS_TO_S;
                let omega = (wx * wx + wy * wy + wz * wz).sqrt();
                // Normalize the rotation axis only when the magnitude is
                // large enough to be meaningful.
                let (ax, ay) = if omega > 1.0 {
                    (wx / omega, wy / omega)
                } else {
                    (wx, wy)
                };
                let sin_half = (omega * dt / 2.0).sin();
                self.rate_px = (
                    -cfg.gyro_scale_x * sin_half * ax,
                    -cfg.gyro_scale_y * sin_half * ay,
                );
            }
        }
        self.last_timestamp_ns = Some(sample.timestamp_ns);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    Redetect,
    Tracking,
    Fault,
}

struct EstimatorState {
    phase: Phase,
    // Running offset in capture pixels, kept as f32 so sub-pixel flow
    // residue accumulates instead of truncating away.
    offset_x: f32,
    offset_y: f32,
    tracks: Vec<FeatureTrack>,
    prev_positions: Vec<(f32, f32)>,
    prev: LumaPyramid,
    next: LumaPyramid,
    gyro: GyroFusion,
}

pub struct MotionEstimator {
    cfg: StabilizerConfig,
    capture: Resolution,
    state: Mutex<EstimatorState>,
}

impl MotionEstimator {
    pub fn new(cfg: StabilizerConfig, capture: Resolution) -> Self {
        let state = EstimatorState {
            phase: Phase::Init,
            offset_x: 0.0,
            offset_y: 0.0,
            tracks: Vec::with_capacity(cfg.max_features),
            prev_positions: Vec::with_capacity(cfg.max_features),
            prev: LumaPyramid::new(),
            next: LumaPyramid::new(),
            gyro: GyroFusion::new(cfg.lpf_alpha),
        };
        Self {
            cfg,
            capture,
            state: Mutex::new(state),
        }
    }

    /// Fold one angular-rate sample into the fused gyro state. Called from
    /// the sensor thread; contends on the same lock as `estimate`.
    pub fn ingest_sample(&self, sample: MotionSample) {
        let mut state = self.state.lock().expect("estimator lock poisoned");
        state.gyro.ingest(&sample, &self.cfg);
    }

    /// Number of currently tracked features (diagnostics).
    pub fn tracked_count(&self) -> usize {
        let state = self.state.lock().expect("estimator lock poisoned");
        state
            .tracks
            .iter()
            .filter(|t| t.status == TrackStatus::Tracked)
            .count()
    }

    /// Estimate the stabilization offset for one captured luma plane.
    ///
    /// The plane must be at the capture resolution the estimator was
    /// constructed with; `stride` is its row pitch in bytes.
    pub fn estimate(&self, luma: &[u8], stride: usize) -> StabilizationOffset {
        let width = self.capture.width as usize;
        let height = self.capture.height as usize;
        let mut state = self.state.lock().expect("estimator lock poisoned");

        if stride < width || luma.len() < stride * (height - 1) + width {
            log::error!(
                "luma plane too small for {}x{} (stride {}): frame skipped",
                width,
                height,
                stride
            );
            return self.quantize(&state);
        }

        // Sensor sanity check first: a saturated gyro means the image is
        // not trustworthy either, so flow is suppressed for this cycle.
        let (rate_x, rate_y) = state.gyro.rate_px;
        if rate_x.abs() > self.cfg.gyro_saturation_px
            || rate_y.abs() > self.cfg.gyro_saturation_px
        {
            if state.phase != Phase::Fault {
                log::warn!(
                    "gyro saturated (rate {:.1}, {:.1} px): holding offset",
                    rate_x,
                    rate_y
                );
            }
            state.phase = Phase::Fault;
            return self.quantize(&state);
        }

        let tracked = state
            .tracks
            .iter()
            .filter(|t| t.status == TrackStatus::Tracked)
            .count();
        let needs_redetect =
            state.phase != Phase::Tracking || tracked < self.cfg.redetect_floor;

        if needs_redetect {
            state.phase = Phase::Redetect;
            self.redetect(&mut state, luma, stride, width, height);
            state.phase = Phase::Tracking;
            return self.quantize(&state);
        }

        self.track(&mut state, luma, stride, width, height);
        self.quantize(&state)
    }

    /// Re-seed the feature set and rebuild the reference pyramid from the
    /// current frame. Emits the previous offset, clamped into range.
    fn redetect(
        &self,
        state: &mut EstimatorState,
        luma: &[u8],
        stride: usize,
        width: usize,
        height: usize,
    ) {
        state.offset_x = state.offset_x.clamp(-self.cfg.clamp_x as f32, self.cfg.clamp_x as f32);
        state.offset_y = state.offset_y.clamp(-self.cfg.clamp_y as f32, self.cfg.clamp_y as f32);

        state
            .prev
            .rebuild(luma, stride, width, height, self.cfg.pyramid_levels);

        let corners = features::detect(
            state.prev.level(0),
            &DetectParams {
                max_features: self.cfg.max_features,
                min_distance: self.cfg.min_feature_distance,
                min_score: self.cfg.min_corner_score,
            },
        );
        state.tracks.clear();
        state
            .tracks
            .extend(corners.iter().map(|c| FeatureTrack::new(c.x, c.y)));
        log::debug!("re-detected {} features", state.tracks.len());
    }

    /// One TRACKING cycle: flow against the stored reference, average the
    /// tracked displacements into the running offset, compact, swap roles.
    fn track(
        &self,
        state: &mut EstimatorState,
        luma: &[u8],
        stride: usize,
        width: usize,
        height: usize,
    ) {
        state
            .next
            .rebuild(luma, stride, width, height, self.cfg.pyramid_levels);

        state.prev_positions.clear();
        state
            .prev_positions
            .extend(state.tracks.iter().map(|t| (t.x, t.y)));

        let EstimatorState {
            prev,
            next,
            tracks,
            ..
        } = &mut *state;
        flow::track(
            prev,
            next,
            tracks,
            &FlowParams {
                window_half: self.cfg.lk_window_half,
                max_iterations: self.cfg.lk_max_iterations,
                epsilon: self.cfg.lk_epsilon,
            },
        );

        let mut dx = 0.0f32;
        let mut dy = 0.0f32;
        let mut count = 0usize;
        for (track, &(px, py)) in state.tracks.iter().zip(&state.prev_positions) {
            if track.status == TrackStatus::Tracked {
                dx += track.x - px;
                dy += track.y - py;
                count += 1;
            }
        }

        if count > 0 {
            // Analysis coordinates are half capture resolution.
            let avg_dx = 2.0 * dx / count as f32;
            let avg_dy = 2.0 * dy / count as f32;
            state.offset_x = (state.offset_x + avg_dx)
                .clamp(-self.cfg.clamp_x as f32, self.cfg.clamp_x as f32);
            state.offset_y = (state.offset_y + avg_dy)
                .clamp(-self.cfg.clamp_y as f32, self.cfg.clamp_y as f32);
        } else {
            log::debug!("no features tracked this frame; offset held");
        }

        state.tracks.retain(|t| t.status == TrackStatus::Tracked);
        std::mem::swap(&mut state.prev, &mut state.next);
    }

    /// Clamp to the configured range and force even parity by rounding to
    /// the nearest even pixel. The clamp bounds are even, so the result
    /// stays in range.
    fn quantize(&self, state: &EstimatorState) -> StabilizationOffset {
        let x = (2.0 * (state.offset_x / 2.0).round()) as i32;
        let y = (2.0 * (state.offset_y / 2.0).round()) as i32;
        StabilizationOffset {
            x: x.clamp(-self.cfg.clamp_x, self.cfg.clamp_x),
            y: y.clamp(-self.cfg.clamp_y, self.cfg.clamp_y),
        }
    }
}
