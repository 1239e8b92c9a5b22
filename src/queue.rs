//! Bounded frame queue.
//!
//! FIFO intake order under one mutex, with a condition variable instead of
//! a busy-poll consumer loop. Capacity is bounded: when the producer
//! outruns the workers the oldest queued task is dropped and counted, so
//! backlog can never grow without limit and the freshest frames win, the
//! same policy the presentation gate applies at the other end.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::frame::FrameTask;

const POP_WAIT: Duration = Duration::from_millis(50);

/// Outcome of a push, for the producer's accounting.
pub struct PushReport {
    /// Queue length after the push.
    pub backlog: usize,
    /// Frame number of the task evicted to make room, if any.
    pub dropped_frame: Option<u64>,
}

pub struct FrameQueue {
    inner: Mutex<Inner>,
    available: Condvar,
    capacity: usize,
}

struct Inner {
    tasks: VecDeque<FrameTask>,
    closed: bool,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be at least 1");
        Self {
            inner: Mutex::new(Inner {
                tasks: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Enqueue a task, evicting the oldest queued task if at capacity.
    /// Tasks pushed after `close()` are dropped immediately.
    pub fn push(&self, task: FrameTask) -> PushReport {
        let mut inner = self.inner.lock().expect("frame queue poisoned");
        if inner.closed {
            return PushReport {
                backlog: inner.tasks.len(),
                dropped_frame: Some(task.frame_number),
            };
        }
        let dropped_frame = if inner.tasks.len() >= self.capacity {
            inner.tasks.pop_front().map(|t| t.frame_number)
        } else {
            None
        };
        inner.tasks.push_back(task);
        let backlog = inner.tasks.len();
        drop(inner);
        self.available.notify_one();
        PushReport {
            backlog,
            dropped_frame,
        }
    }

    /// Block until a task is available, the queue is closed, or `stop` is
    /// set. Returns `None` only on shutdown.
    pub fn pop(&self, stop: &AtomicBool) -> Option<FrameTask> {
        let mut inner = self.inner.lock().expect("frame queue poisoned");
        loop {
            if let Some(task) = inner.tasks.pop_front() {
                return Some(task);
            }
            if inner.closed || stop.load(Ordering::SeqCst) {
                return None;
            }
            let (guard, _timeout) = self
                .available
                .wait_timeout(inner, POP_WAIT)
                .expect("frame queue poisoned");
            inner = guard;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("frame queue poisoned").tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark the queue closed and wake all waiting workers.
    pub fn close(&self) {
        self.inner.lock().expect("frame queue poisoned").closed = true;
        self.available.notify_all();
    }
}
