// THEORY:
// A `HistoryBuffer` is a short sliding window over recent measurements together with
// the mean of whatever is currently in the window. The heading resolver keeps one
// for centre displacements and one for unwrapped orientations.
//
// Key architectural principles:
// 1.  **Bounded**: The window never holds more than `capacity` entries. A push that
//     would exceed the bound evicts the oldest entry in the same call.
// 2.  **Incremental mean**: The mean is updated from the pushed and evicted values
//     only (add, then remove-and-renormalise), never recomputed by a full scan.
//     Because push and eviction happen inside one `&mut self` call, no observer can
//     see a mean that disagrees with the contents.
// 3.  **Uniform shift**: `shift_all` adds a constant to every entry and to the mean.
//     This is how a 180 degree head/tail flip is applied to the orientation window.

use std::collections::VecDeque;
use std::ops::{Add, Div, Mul, Sub};

/// Values that can be averaged: anything with vector-space arithmetic over `f64`.
pub trait HistoryValue:
    Copy + Default + Add<Output = Self> + Sub<Output = Self> + Mul<f64, Output = Self> + Div<f64, Output = Self>
{
}

impl<T> HistoryValue for T where
    T: Copy
        + Default
        + Add<Output = T>
        + Sub<Output = T>
        + Mul<f64, Output = T>
        + Div<f64, Output = T>
{
}

#[derive(Debug, Clone)]
pub struct HistoryBuffer<T: HistoryValue> {
    entries: VecDeque<T>,
    mean: T,
    capacity: usize,
}

impl<T: HistoryValue> HistoryBuffer<T> {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            mean: T::default(),
            capacity,
        }
    }

    /// Appends `value` and returns the entry evicted to stay within capacity, if any.
    pub fn push(&mut self, value: T) -> Option<T> {
        self.entries.push_back(value);
        let n = self.entries.len() as f64;
        self.mean = self.mean + (value - self.mean) / n;

        if self.entries.len() > self.capacity {
            self.evict_front()
        } else {
            None
        }
    }

    fn evict_front(&mut self) -> Option<T> {
        let n = self.entries.len() as f64;
        let oldest = self.entries.pop_front()?;
        self.mean = if self.entries.is_empty() {
            T::default()
        } else {
            (self.mean * n - oldest) / (n - 1.0)
        };
        Some(oldest)
    }

    /// Adds `delta` to every entry and to the mean.
    pub fn shift_all(&mut self, delta: T) {
        if self.entries.is_empty() {
            return;
        }
        for entry in self.entries.iter_mut() {
            *entry = *entry + delta;
        }
        self.mean = self.mean + delta;
    }

    /// Mean of the current contents, or `T::default()` when empty.
    pub fn mean(&self) -> T {
        self.mean
    }

    pub fn last(&self) -> Option<T> {
        self.entries.back().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Changes the bound, evicting the oldest entries if the window is now too long.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.entries.len() > self.capacity {
            self.evict_front();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.mean = T::default();
    }
}
