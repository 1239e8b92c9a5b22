//! Frame and surface types.
//!
//! - `Nv12Frame`: owned lease on a planar luma + interleaved-chroma image.
//! - `FrameTask`: one captured frame awaiting stabilization and presentation.
//! - `DisplaySurface`: the lock/copy/post seam to the output surface.
//!
//! Plane strides are carried explicitly and may exceed the pixel width;
//! nothing in the pipeline assumes stride == width.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::Resolution;

/// Owned NV12 frame: full-resolution Y plane plus half-resolution
/// interleaved UV plane.
///
/// The capture collaborator hands over ownership; the buffer is released
/// when the frame is dropped at the end of processing.
pub struct Nv12Frame {
    width: u32,
    height: u32,
    y: Vec<u8>,
    y_stride: usize,
    uv: Vec<u8>,
    uv_stride: usize,
}

impl Nv12Frame {
    /// Wrap pre-filled planes, validating sizes against the strides.
    pub fn from_planes(
        width: u32,
        height: u32,
        y: Vec<u8>,
        y_stride: usize,
        uv: Vec<u8>,
        uv_stride: usize,
    ) -> Result<Self> {
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(anyhow!("NV12 dimensions must be non-zero and even"));
        }
        if y_stride < width as usize || uv_stride < width as usize {
            return Err(anyhow!("plane stride smaller than row width"));
        }
        let y_expected = y_stride * height as usize;
        if y.len() < y_expected {
            return Err(anyhow!(
                "Y plane too short: expected at least {}, got {}",
                y_expected,
                y.len()
            ));
        }
        let uv_expected = uv_stride * (height as usize / 2);
        if uv.len() < uv_expected {
            return Err(anyhow!(
                "UV plane too short: expected at least {}, got {}",
                uv_expected,
                uv.len()
            ));
        }
        Ok(Self {
            width,
            height,
            y,
            y_stride,
            uv,
            uv_stride,
        })
    }

    /// A frame filled with a single color, tightly packed.
    pub fn solid(width: u32, height: u32, y_val: u8, u_val: u8, v_val: u8) -> Result<Self> {
        let y = vec![y_val; width as usize * height as usize];
        let mut uv = Vec::with_capacity(width as usize * height as usize / 2);
        for _ in 0..(width as usize / 2) * (height as usize / 2) {
            uv.push(u_val);
            uv.push(v_val);
        }
        Self::from_planes(width, height, y, width as usize, uv, width as usize)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn y(&self) -> &[u8] {
        &self.y
    }

    pub fn y_stride(&self) -> usize {
        self.y_stride
    }

    pub fn uv(&self) -> &[u8] {
        &self.uv
    }

    pub fn uv_stride(&self) -> usize {
        self.uv_stride
    }
}

/// Unit of work: one captured frame plus its destination surface.
///
/// Exactly one worker owns a task at a time; the frame lease is released
/// when the task is dropped, whether it was presented or superseded.
pub struct FrameTask {
    /// Monotonic capture sequence number.
    pub frame_number: u64,
    pub frame: Nv12Frame,
    pub surface: Arc<dyn DisplaySurface>,
}

/// A locked region of a display surface.
///
/// The region stays valid until `post()` consumes the lock; dropping the
/// guard without posting abandons the frame.
pub trait LockedSurface {
    fn pixels(&mut self) -> &mut [u8];
    /// Row stride of the locked region, in bytes.
    fn stride_bytes(&self) -> usize;
    fn post(self: Box<Self>) -> Result<()>;
}

/// Destination surface with a scoped lock/copy/post protocol.
pub trait DisplaySurface: Send + Sync {
    fn resolution(&self) -> Resolution;
    fn lock(&self) -> Result<Box<dyn LockedSurface + '_>>;
}

/// In-memory surface for tests and the demo binary. Records the posted
/// pixel data and counts posts.
pub struct InMemorySurface {
    resolution: Resolution,
    stride_bytes: usize,
    pixels: Mutex<Vec<u8>>,
    posts: AtomicU64,
}

impl InMemorySurface {
    pub fn new(resolution: Resolution) -> Self {
        let stride_bytes = resolution.width as usize * 4;
        Self {
            resolution,
            stride_bytes,
            pixels: Mutex::new(vec![0u8; stride_bytes * resolution.height as usize]),
            posts: AtomicU64::new(0),
        }
    }

    pub fn post_count(&self) -> u64 {
        self.posts.load(Ordering::SeqCst)
    }

    /// Snapshot of the last posted contents.
    pub fn contents(&self) -> Vec<u8> {
        self.pixels.lock().expect("surface poisoned").clone()
    }
}

struct InMemoryLock<'a> {
    guard: MutexGuard<'a, Vec<u8>>,
    stride_bytes: usize,
    posts: &'a AtomicU64,
}

impl LockedSurface for InMemoryLock<'_> {
    fn pixels(&mut self) -> &mut [u8] {
        &mut self.guard
    }

    fn stride_bytes(&self) -> usize {
        self.stride_bytes
    }

    fn post(self: Box<Self>) -> Result<()> {
        self.posts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl DisplaySurface for InMemorySurface {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn lock(&self) -> Result<Box<dyn LockedSurface + '_>> {
        let guard = self
            .pixels
            .lock()
            .map_err(|_| anyhow!("display surface lock poisoned"))?;
        Ok(Box::new(InMemoryLock {
            guard,
            stride_bytes: self.stride_bytes,
            posts: &self.posts,
        }))
    }
}
