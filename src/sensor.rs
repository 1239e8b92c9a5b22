//! Motion-sensor feed.
//!
//! One pipeline thread polls a `MotionSensor` on a fixed cadence and hands
//! each sample to the estimator. Samples carry nanosecond timestamps; the
//! feed makes no strict periodicity guarantee.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

/// One angular-rate sample from the motion sensor.
#[derive(Debug, Clone, Copy)]
pub struct MotionSample {
    /// Angular velocity around the device axes, rad/s.
    pub angular_velocity: [f32; 3],
    pub timestamp_ns: u64,
}

/// Source of angular-rate samples, polled from the sensor thread.
pub trait MotionSensor: Send {
    /// Wait up to `timeout` for the next sample. `Ok(None)` means the poll
    /// timed out with no event, which is not an error.
    fn poll(&mut self, timeout: Duration) -> Result<Option<MotionSample>>;
}

/// Synthetic gyroscope producing a smooth hand-shake wobble with noise.
/// Backs tests and the demo binary.
pub struct SyntheticGyro {
    rng: StdRng,
    amplitude: f32,
    phase: f32,
    started: Instant,
}

impl SyntheticGyro {
    pub fn new(seed: u64, amplitude: f32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            amplitude,
            phase: 0.0,
            started: Instant::now(),
        }
    }
}

impl MotionSensor for SyntheticGyro {
    fn poll(&mut self, timeout: Duration) -> Result<Option<MotionSample>> {
        std::thread::sleep(timeout);
        self.phase += 0.21;
        let noise = |rng: &mut StdRng| rng.gen_range(-0.05f32..0.05);
        let sample = MotionSample {
            angular_velocity: [
                self.amplitude * self.phase.sin() + noise(&mut self.rng),
                self.amplitude * (self.phase * 0.7).cos() + noise(&mut self.rng),
                noise(&mut self.rng),
            ],
            timestamp_ns: self.started.elapsed().as_nanos() as u64,
        };
        Ok(Some(sample))
    }
}
