// src/pipeline/history.rs
//
// Sliding window of normalized keypoint vectors, one per processed frame.
// Capacity equals the profile's timesteps; eviction is strict FIFO.

use std::collections::VecDeque;

pub struct HistoryBuffer {
    frames: VecDeque<Vec<f32>>,
    capacity: usize,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, observation: Vec<f32>) {
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(observation);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Flattened sequence in arrival order, oldest first. The classifier
    /// input for a full buffer is capacity × features long.
    pub fn as_flat(&self) -> Vec<f32> {
        let per_frame = self.frames.front().map_or(0, Vec::len);
        let mut flat = Vec::with_capacity(self.frames.len() * per_frame);
        for frame in &self.frames {
            flat.extend_from_slice(frame);
        }
        flat
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
