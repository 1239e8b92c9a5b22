//! steadycam
//!
//! Real-time preview stabilization: raw planar frames come in at capture
//! resolution, hand-shake is estimated and compensated, and a cropped,
//! rotated, color-converted image goes out to a display surface, all
//! within a display refresh interval and without unbounded backlog.
//!
//! # Architecture
//!
//! - `queue`: bounded FIFO of frame tasks between the capture feed and the
//!   worker pool.
//! - `estimator`: sensor-fusion motion estimator, combining gyro
//!   integration with sparse pyramidal optical flow on a down-scaled
//!   luma plane.
//! - `transform`: chained down-scale (through an offset-shifted read
//!   window), 90-degree rotation and NV12-to-ARGB conversion over
//!   per-worker scratch buffers.
//! - `gate`: presentation gate admitting at most one in-flight frame to
//!   the surface, newest frame number wins.
//! - `pipeline`: explicit assembly object owning the threads.
//!
//! Intake order is FIFO, but display order is "highest frame number wins":
//! a worker finishing an older frame after a newer one has posted gets its
//! result dropped. That trade of completeness for freshness is the core
//! policy, applied at both the bounded queue and the gate.
//!
//! Camera/session lifecycle, device enumeration and platform bridging are
//! collaborator concerns; this crate starts at `on_frame_ready` and ends
//! at the display surface.

pub mod config;
pub mod estimator;
pub mod frame;
pub mod gate;
pub mod pipeline;
pub mod queue;
pub mod sensor;
pub mod transform;

pub use config::{ColorProfile, PipelineConfig, Resolution, StabilizerConfig};
pub use estimator::{LowPassFilter, MotionEstimator, StabilizationOffset};
pub use frame::{DisplaySurface, FrameTask, InMemorySurface, LockedSurface, Nv12Frame};
pub use gate::PresentationGate;
pub use pipeline::{Pipeline, PipelineStats};
pub use queue::FrameQueue;
pub use sensor::{MotionSample, MotionSensor, SyntheticGyro};
pub use transform::{TransformPipeline, WorkerScratch};
