//! PreEventRingBuffer - Pre-Roll Frame History
//!
//! ## Responsibilities
//!
//! - Keep the last `pre_roll_secs x expected_fps` (raw, annotated) pairs
//! - Evict the oldest pair when full
//! - Drain oldest-first at episode start to seed the clip with context
//!
//! The buffer is owned by the recorder loop (sole producer and consumer)
//! and keeps accumulating after a drain, ready for the next episode.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::models::Frame;

/// One buffered frame pair
#[derive(Clone)]
pub struct FramePair {
    pub raw: Arc<Frame>,
    pub annotated: Arc<Frame>,
}

/// Fixed-capacity ring of pre-anomaly frame pairs
pub struct PreEventRingBuffer {
    pairs: VecDeque<FramePair>,
    capacity: usize,
}

impl PreEventRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            pairs: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Capacity sized for a pre-roll window at the expected ingest rate
    pub fn for_pre_roll(pre_roll_secs: u32, expected_fps: u32) -> Self {
        Self::new((pre_roll_secs * expected_fps) as usize)
    }

    /// Append a pair, evicting the oldest when full
    pub fn push(&mut self, raw: Arc<Frame>, annotated: Arc<Frame>) {
        if self.pairs.len() >= self.capacity {
            self.pairs.pop_front();
        }
        self.pairs.push_back(FramePair { raw, annotated });
    }

    /// Remove and return all buffered pairs, oldest first
    pub fn drain(&mut self) -> Vec<FramePair> {
        self.pairs.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
