// THEORY:
// The track buffer is the hand-off point between the frame loop and whoever consumes
// finished ellipses. It has its own lock, separate from the session lock, so a
// consumer popping records only ever waits for a queue operation, never for a whole
// frame to be processed.

use crate::core_modules::ellipse_fitter::EllipseParams;
use crate::error::{Result, TrackerError};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const DEFAULT_MAX_TRACK_QUEUE_LENGTH: usize = 1000;

#[derive(Debug)]
struct Inner {
    queue: VecDeque<EllipseParams>,
    capacity: usize,
}

/// Bounded FIFO of finalized ellipses. Full buffers drop their oldest record.
#[derive(Debug)]
pub struct TrackBuffer {
    inner: Mutex<Inner>,
}

impl TrackBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity.min(4096)),
                capacity: capacity.max(1),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `ellipse`, first evicting from the front if the buffer is full.
    /// Returns the evicted record.
    pub fn push(&self, ellipse: EllipseParams) -> Option<EllipseParams> {
        let mut inner = self.lock();
        let evicted = if inner.queue.len() >= inner.capacity {
            inner.queue.pop_front()
        } else {
            None
        };
        inner.queue.push_back(ellipse);
        evicted
    }

    pub fn pop_front(&self) -> Result<EllipseParams> {
        self.lock()
            .queue
            .pop_front()
            .ok_or(TrackerError::TrackBufferEmpty)
    }

    pub fn pop_back(&self) -> Result<EllipseParams> {
        self.lock()
            .queue
            .pop_back()
            .ok_or(TrackerError::TrackBufferEmpty)
    }

    /// Empties the buffer and returns only its newest record.
    pub fn pop_all_and_clear(&self) -> Result<EllipseParams> {
        let mut inner = self.lock();
        let last = inner.queue.pop_back().ok_or(TrackerError::TrackBufferEmpty)?;
        inner.queue.clear();
        Ok(last)
    }

    /// Takes every record, oldest first.
    pub fn drain_all(&self) -> Vec<EllipseParams> {
        self.lock().queue.drain(..).collect()
    }

    pub fn set_capacity(&self, capacity: usize) {
        let mut inner = self.lock();
        inner.capacity = capacity.max(1);
        while inner.queue.len() > inner.capacity {
            inner.queue.pop_front();
        }
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }
}

impl Default for TrackBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRACK_QUEUE_LENGTH)
    }
}
