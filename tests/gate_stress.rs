//! Concurrent stress on the presentation gate: at most one holder at any
//! instant, exact drop accounting, and newest-frame-wins display order.

use anyhow::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use steadycam::{DisplaySurface, LockedSurface, PresentationGate, Resolution};

/// Surface that measures how many lock holders exist at once.
struct ProbeSurface {
    resolution: Resolution,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ProbeSurface {
    fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn max_overlap(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct ProbeLock<'a> {
    buffer: Vec<u8>,
    stride: usize,
    in_flight: &'a AtomicUsize,
}

impl Drop for ProbeLock<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl LockedSurface for ProbeLock<'_> {
    fn pixels(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    fn stride_bytes(&self) -> usize {
        self.stride
    }

    fn post(self: Box<Self>) -> Result<()> {
        // Hold the "copy window" open a little to widen any race.
        std::thread::yield_now();
        Ok(())
    }
}

impl DisplaySurface for ProbeSurface {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn lock(&self) -> Result<Box<dyn LockedSurface + '_>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let stride = self.resolution.width as usize * 4;
        Ok(Box::new(ProbeLock {
            buffer: vec![0u8; stride * self.resolution.height as usize],
            stride,
            in_flight: &self.in_flight,
        }))
    }
}

#[test]
fn concurrent_presents_never_overlap() {
    let resolution = Resolution::new(16, 16);
    let gate = Arc::new(PresentationGate::new());
    let surface = Arc::new(ProbeSurface::new(resolution));

    let threads = 8usize;
    let per_thread = 200u64;
    let stride = resolution.width as usize * 4;
    let total = threads as u64 * per_thread;

    let mut handles = Vec::new();
    for t in 0..threads {
        let gate = gate.clone();
        let surface = surface.clone();
        handles.push(std::thread::spawn(move || {
            let argb = vec![t as u8; stride * 16];
            let mut presented: Vec<u64> = Vec::new();
            for i in 0..per_thread {
                // Interleaved frame numbers so threads race over order.
                let frame_number = 1 + t as u64 + i * threads as u64;
                if gate.try_present(frame_number, &argb, stride, surface.as_ref()) {
                    presented.push(frame_number);
                }
            }
            presented
        }));
    }

    let mut all_presented = Vec::new();
    for handle in handles {
        all_presented.extend(handle.join().expect("gate thread panicked"));
    }

    // Gate exclusivity: no two copy windows ever overlapped.
    assert_eq!(surface.max_overlap(), 1);

    // Exact accounting: every attempt presented, stale-dropped or
    // busy-dropped.
    let presented = all_presented.len() as u64;
    assert_eq!(presented + gate.stale_drops() + gate.busy_drops(), total);

    // Newest wins: the final displayed frame is the largest successful one.
    let max_presented = all_presented.iter().copied().max().unwrap_or(0);
    assert_eq!(gate.last_displayed(), max_presented);
    assert!(presented >= 1);
}

#[test]
fn displayed_frame_number_is_non_decreasing() {
    let resolution = Resolution::new(8, 8);
    let gate = Arc::new(PresentationGate::new());
    let surface = Arc::new(ProbeSurface::new(resolution));
    let stride = resolution.width as usize * 4;

    let mut handles = Vec::new();
    for t in 0..4usize {
        let gate = gate.clone();
        let surface = surface.clone();
        handles.push(std::thread::spawn(move || {
            let argb = vec![0u8; stride * 8];
            let mut observed = Vec::new();
            for i in 0..300u64 {
                let frame_number = 1 + (i * 4) + t as u64;
                gate.try_present(frame_number, &argb, stride, surface.as_ref());
                observed.push(gate.last_displayed());
            }
            observed
        }));
    }

    for handle in handles {
        let observed = handle.join().expect("gate thread panicked");
        for pair in observed.windows(2) {
            assert!(pair[0] <= pair[1], "last_displayed went backwards");
        }
    }
}
