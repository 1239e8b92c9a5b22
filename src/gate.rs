//! Presentation gate.
//!
//! Admits at most one in-flight frame into the output surface and enforces
//! the freshness policy: a compare-and-swap busy flag gates entry, and a
//! monotonic last-displayed counter discards frames that finished after a
//! newer frame already posted. Dropped frames are counted, never retried:
//! a slow frame must not block a faster, newer one from reaching the
//! screen.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::frame::DisplaySurface;

pub struct PresentationGate {
    busy: AtomicBool,
    last_displayed: AtomicU64,
    busy_drops: AtomicU64,
    stale_drops: AtomicU64,
}

impl PresentationGate {
    pub fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
            last_displayed: AtomicU64::new(0),
            busy_drops: AtomicU64::new(0),
            stale_drops: AtomicU64::new(0),
        }
    }

    /// Copy `argb` into the surface if the gate is free and the frame is
    /// newer than anything already displayed. Returns whether the frame
    /// was presented.
    pub fn try_present(
        &self,
        frame_number: u64,
        argb: &[u8],
        argb_stride: usize,
        surface: &dyn DisplaySurface,
    ) -> bool {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.busy_drops.fetch_add(1, Ordering::Relaxed);
            log::debug!("frame {} dropped: surface busy", frame_number);
            return false;
        }

        // Single holder from here on; release the gate on every exit path.
        let presented = self.present_locked(frame_number, argb, argb_stride, surface);
        self.busy.store(false, Ordering::Release);
        presented
    }

    fn present_locked(
        &self,
        frame_number: u64,
        argb: &[u8],
        argb_stride: usize,
        surface: &dyn DisplaySurface,
    ) -> bool {
        if frame_number <= self.last_displayed.load(Ordering::Acquire) {
            self.stale_drops.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "frame {} dropped: stale (last displayed {})",
                frame_number,
                self.last_displayed.load(Ordering::Relaxed)
            );
            return false;
        }

        let resolution = surface.resolution();
        let mut lock = match surface.lock() {
            Ok(lock) => lock,
            Err(e) => {
                log::warn!("surface lock failed for frame {}: {}", frame_number, e);
                return false;
            }
        };

        let dst_stride = lock.stride_bytes();
        let row_bytes = (resolution.width as usize * 4).min(argb_stride).min(dst_stride);
        let rows = resolution.height as usize;
        {
            let dst = lock.pixels();
            for row in 0..rows {
                let src_start = row * argb_stride;
                let dst_start = row * dst_stride;
                dst[dst_start..dst_start + row_bytes]
                    .copy_from_slice(&argb[src_start..src_start + row_bytes]);
            }
        }
        if let Err(e) = lock.post() {
            log::warn!("surface post failed for frame {}: {}", frame_number, e);
            return false;
        }

        self.last_displayed.store(frame_number, Ordering::Release);
        true
    }

    pub fn last_displayed(&self) -> u64 {
        self.last_displayed.load(Ordering::Acquire)
    }

    pub fn busy_drops(&self) -> u64 {
        self.busy_drops.load(Ordering::Relaxed)
    }

    pub fn stale_drops(&self) -> u64 {
        self.stale_drops.load(Ordering::Relaxed)
    }
}

impl Default for PresentationGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Resolution;
    use crate::frame::InMemorySurface;

    fn buffer(resolution: Resolution, fill: u8) -> (Vec<u8>, usize) {
        let stride = resolution.width as usize * 4;
        (vec![fill; stride * resolution.height as usize], stride)
    }

    #[test]
    fn presents_fresh_frame() {
        let gate = PresentationGate::new();
        let resolution = Resolution::new(4, 4);
        let surface = InMemorySurface::new(resolution);
        let (argb, stride) = buffer(resolution, 0xAB);

        assert!(gate.try_present(1, &argb, stride, &surface));
        assert_eq!(gate.last_displayed(), 1);
        assert_eq!(surface.post_count(), 1);
        assert_eq!(surface.contents()[0], 0xAB);
    }

    #[test]
    fn drops_stale_frame() {
        let gate = PresentationGate::new();
        let resolution = Resolution::new(4, 4);
        let surface = InMemorySurface::new(resolution);
        let (argb, stride) = buffer(resolution, 1);

        assert!(gate.try_present(5, &argb, stride, &surface));
        let (argb2, stride2) = buffer(resolution, 2);
        assert!(!gate.try_present(3, &argb2, stride2, &surface));
        assert!(!gate.try_present(5, &argb2, stride2, &surface));

        assert_eq!(gate.last_displayed(), 5);
        assert_eq!(gate.stale_drops(), 2);
        assert_eq!(surface.post_count(), 1);
        // Stale content never reached the surface.
        assert_eq!(surface.contents()[0], 1);
    }

    #[test]
    fn last_displayed_is_monotonic() {
        let gate = PresentationGate::new();
        let resolution = Resolution::new(2, 2);
        let surface = InMemorySurface::new(resolution);
        let (argb, stride) = buffer(resolution, 0);

        let mut last = 0;
        for n in [1u64, 4, 2, 6, 5, 9] {
            gate.try_present(n, &argb, stride, &surface);
            let now = gate.last_displayed();
            assert!(now >= last);
            last = now;
        }
        assert_eq!(last, 9);
    }
}
