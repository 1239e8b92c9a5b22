//! steadyd - synthetic end-to-end run of the stabilization pipeline.
//!
//! Feeds generated NV12 frames with a wobbling test pattern and a
//! synthetic gyro into the pipeline, then reports the frame accounting.

use anyhow::Result;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use steadycam::{
    FrameTask, InMemorySurface, Nv12Frame, Pipeline, PipelineConfig, Resolution, SyntheticGyro,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Duration of the synthetic run in seconds.
    #[arg(long, default_value_t = 5)]
    seconds: u64,
    /// Capture frame rate.
    #[arg(long, default_value_t = 30)]
    fps: u32,
    /// Worker thread count.
    #[arg(long, default_value_t = 2)]
    workers: usize,
    /// Synthetic capture width (height is derived 16:9).
    #[arg(long, default_value_t = 640)]
    width: u32,
    /// Amplitude of the synthetic hand-shake, in rad/s.
    #[arg(long, default_value_t = 0.08)]
    shake: f32,
    /// Deterministic seed for the synthetic sources.
    #[arg(long, default_value_t = 41)]
    seed: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = PipelineConfig::load()?;
    cfg.capture = Resolution::new(args.width, args.width * 9 / 16);
    cfg.working = Resolution::new(cfg.capture.width / 2, cfg.capture.height / 2);
    cfg.display = cfg.working.transposed();
    cfg.workers = args.workers;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || {
        log::info!("interrupt received, stopping");
        stop_handler.store(true, Ordering::SeqCst);
    })?;

    let surface = Arc::new(InMemorySurface::new(cfg.display));
    let capture = cfg.capture;
    let sensor = SyntheticGyro::new(args.seed, args.shake);
    let pipeline = Pipeline::start(cfg, Some(Box::new(sensor)));

    let mut rng = StdRng::seed_from_u64(args.seed);
    let frame_interval = Duration::from_secs(1) / args.fps;
    let total_frames = args.seconds * args.fps as u64;
    let mut last_report = Instant::now();

    log::info!(
        "running {} frames at {} fps ({}x{} capture)",
        total_frames,
        args.fps,
        capture.width,
        capture.height
    );

    for frame_number in 1..=total_frames {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let frame = synthetic_frame(capture, frame_number, &mut rng)?;
        pipeline.on_frame_ready(FrameTask {
            frame_number,
            frame,
            surface: surface.clone(),
        });

        if last_report.elapsed() >= Duration::from_secs(2) {
            let stats = pipeline.stats();
            log::info!(
                "frame {}: displayed {}, presented {}, backlog {}",
                frame_number,
                stats.last_displayed,
                stats.frames_presented,
                pipeline.backlog()
            );
            last_report = Instant::now();
        }
        std::thread::sleep(frame_interval);
    }

    let stats = pipeline.shutdown()?;
    log::info!(
        "done: {} enqueued, {} presented, {} stale drops, {} busy drops, {} queue drops, last displayed {}",
        stats.frames_enqueued,
        stats.frames_presented,
        stats.stale_drops,
        stats.busy_drops,
        stats.queue_drops,
        stats.last_displayed
    );
    log::info!("surface posts: {}", surface.post_count());
    Ok(())
}

/// Test pattern: a diagonal luma gradient with a bright square that drifts
/// smoothly and jitters frame to frame like an unsteady hand.
fn synthetic_frame(capture: Resolution, frame_number: u64, rng: &mut StdRng) -> Result<Nv12Frame> {
    let w = capture.width as usize;
    let h = capture.height as usize;

    let phase = frame_number as f32 * 0.12;
    let jitter_x = rng.gen_range(-3i32..=3);
    let jitter_y = rng.gen_range(-3i32..=3);
    let sq = w / 8;
    let sq_x = (w as f32 * 0.4 + (phase.sin() * sq as f32 * 0.5)) as i32 + jitter_x;
    let sq_y = (h as f32 * 0.4 + (phase.cos() * sq as f32 * 0.3)) as i32 + jitter_y;

    let mut y_plane = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            y_plane[y * w + x] = (((x + y) / 8) % 180) as u8 + 30;
        }
    }
    for y in sq_y.max(0) as usize..((sq_y + sq as i32).max(0) as usize).min(h) {
        for x in sq_x.max(0) as usize..((sq_x + sq as i32).max(0) as usize).min(w) {
            y_plane[y * w + x] = 235;
        }
    }

    let mut uv = Vec::with_capacity(w * h / 2);
    for row in 0..h / 2 {
        for _pair in 0..w / 2 {
            uv.push(110 + ((row / 4) % 32) as u8);
            uv.push(140);
        }
    }

    Nv12Frame::from_planes(capture.width, capture.height, y_plane, w, uv, w)
}
