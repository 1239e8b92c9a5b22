//! Pipeline assembly.
//!
//! An explicitly constructed object owns the queue, estimator, gate and
//! threads; nothing lives in process-wide state. The capture collaborator
//! pushes tasks via `on_frame_ready` on its own thread; a fixed pool of
//! workers drains the queue and drives estimate -> transform -> present;
//! one sensor thread polls the motion feed. Shutdown sets a stop flag,
//! lets each thread finish its current iteration, and joins.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::PipelineConfig;
use crate::estimator::MotionEstimator;
use crate::frame::FrameTask;
use crate::gate::PresentationGate;
use crate::queue::FrameQueue;
use crate::sensor::MotionSensor;
use crate::transform::{TransformPipeline, WorkerScratch};

/// Snapshot of the pipeline's frame accounting. Every enqueued frame ends
/// up presented or in exactly one drop counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStats {
    pub frames_enqueued: u64,
    pub queue_drops: u64,
    pub frames_processed: u64,
    pub frames_presented: u64,
    pub busy_drops: u64,
    pub stale_drops: u64,
    pub last_displayed: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    queue_drops: AtomicU64,
    processed: AtomicU64,
    presented: AtomicU64,
}

pub struct Pipeline {
    cfg: PipelineConfig,
    queue: Arc<FrameQueue>,
    estimator: Arc<MotionEstimator>,
    gate: Arc<PresentationGate>,
    counters: Arc<Counters>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    sensor_thread: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Spawn the worker pool and, if a sensor is supplied, the sensor poll
    /// thread.
    pub fn start(cfg: PipelineConfig, sensor: Option<Box<dyn MotionSensor>>) -> Self {
        let queue = Arc::new(FrameQueue::new(cfg.queue_capacity));
        let estimator = Arc::new(MotionEstimator::new(cfg.stabilizer.clone(), cfg.capture));
        let gate = Arc::new(PresentationGate::new());
        let counters = Arc::new(Counters::default());
        let stop = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(cfg.workers);
        for index in 0..cfg.workers {
            let cfg = cfg.clone();
            let queue = queue.clone();
            let estimator = estimator.clone();
            let gate = gate.clone();
            let counters = counters.clone();
            let stop = stop.clone();
            workers.push(std::thread::spawn(move || {
                run_worker(index, &cfg, &queue, &estimator, &gate, &counters, &stop);
            }));
        }

        let sensor_thread = sensor.map(|mut sensor| {
            let estimator = estimator.clone();
            let stop = stop.clone();
            let interval = cfg.sensor_interval;
            std::thread::spawn(move || {
                log::debug!("sensor thread started");
                while !stop.load(Ordering::SeqCst) {
                    match sensor.poll(interval) {
                        Ok(Some(sample)) => estimator.ingest_sample(sample),
                        Ok(None) => log::trace!("sensor poll timed out"),
                        Err(e) => log::warn!("sensor poll failed: {}", e),
                    }
                }
                log::debug!("sensor thread stopped");
            })
        });

        log::info!(
            "pipeline started: {} workers, queue capacity {}, {}x{} -> {}x{}",
            cfg.workers,
            cfg.queue_capacity,
            cfg.capture.width,
            cfg.capture.height,
            cfg.display.width,
            cfg.display.height
        );

        Self {
            cfg,
            queue,
            estimator,
            gate,
            counters,
            stop,
            workers,
            sensor_thread,
        }
    }

    /// Capture-feed push interface: hand over one frame task. Invalid
    /// tasks are dropped and counted; this never blocks the caller beyond
    /// the queue mutex.
    pub fn on_frame_ready(&self, task: FrameTask) {
        if task.frame.resolution() != self.cfg.capture {
            log::error!(
                "frame {} dropped: resolution {}x{} does not match capture {}x{}",
                task.frame_number,
                task.frame.width(),
                task.frame.height(),
                self.cfg.capture.width,
                self.cfg.capture.height
            );
            self.counters.queue_drops.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        let report = self.queue.push(task);
        if let Some(dropped) = report.dropped_frame {
            self.counters.queue_drops.fetch_add(1, Ordering::Relaxed);
            log::debug!("frame {} dropped: queue full", dropped);
        }
        log::debug!("queue backlog: {}", report.backlog);
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            frames_enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            queue_drops: self.counters.queue_drops.load(Ordering::Relaxed),
            frames_processed: self.counters.processed.load(Ordering::Relaxed),
            frames_presented: self.counters.presented.load(Ordering::Relaxed),
            busy_drops: self.gate.busy_drops(),
            stale_drops: self.gate.stale_drops(),
            last_displayed: self.gate.last_displayed(),
        }
    }

    /// Number of tasks currently waiting in the queue.
    pub fn backlog(&self) -> usize {
        self.queue.len()
    }

    /// The motion estimator, for collaborators that deliver angular-rate
    /// samples on their own thread instead of through a polled sensor.
    pub fn estimator(&self) -> &MotionEstimator {
        &self.estimator
    }

    /// Stop all threads after their current iteration and join them.
    pub fn shutdown(mut self) -> Result<PipelineStats> {
        self.stop.store(true, Ordering::SeqCst);
        self.queue.close();
        for worker in self.workers.drain(..) {
            worker
                .join()
                .map_err(|_| anyhow!("worker thread panicked"))?;
        }
        if let Some(sensor) = self.sensor_thread.take() {
            sensor
                .join()
                .map_err(|_| anyhow!("sensor thread panicked"))?;
        }
        let stats = self.stats();
        log::info!(
            "pipeline stopped: {} enqueued, {} presented, {} stale, {} busy, {} queue drops",
            stats.frames_enqueued,
            stats.frames_presented,
            stats.stale_drops,
            stats.busy_drops,
            stats.queue_drops
        );
        Ok(stats)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // Threads hold clones of the queue and stop flag; make sure they
        // wind down even if shutdown() was never called.
        self.stop.store(true, Ordering::SeqCst);
        self.queue.close();
    }
}

fn run_worker(
    index: usize,
    cfg: &PipelineConfig,
    queue: &FrameQueue,
    estimator: &MotionEstimator,
    gate: &PresentationGate,
    counters: &Counters,
    stop: &AtomicBool,
) {
    // Scratch is sized once per worker; the frame loop never allocates.
    let transform = TransformPipeline::new(cfg);
    let mut scratch = WorkerScratch::new(cfg);
    log::debug!("worker {} started", index);

    while let Some(task) = queue.pop(stop) {
        let offset = estimator.estimate(task.frame.y(), task.frame.y_stride());
        let (argb, stride) = transform.apply(&task.frame, offset, &mut scratch);
        let presented = gate.try_present(task.frame_number, argb, stride, task.surface.as_ref());
        counters.processed.fetch_add(1, Ordering::Relaxed);
        if presented {
            counters.presented.fetch_add(1, Ordering::Relaxed);
        }
        log::trace!(
            "worker {} frame {}: offset ({}, {}), presented {}",
            index,
            task.frame_number,
            offset.x,
            offset.y,
            presented
        );
    }

    log::debug!("worker {} stopped", index);
}
