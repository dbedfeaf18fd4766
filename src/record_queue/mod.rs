//! FrameRecordQueue - Ingest to Recorder Handoff
//!
//! ## Responsibilities
//!
//! - Carry frames from the ingest loop to the recorder loop
//! - Bound memory with a fixed capacity
//! - Drop the oldest unread frame on overflow (never block the producer,
//!   never reject the newest frame)
//!
//! `take` returns a tri-state result instead of raising on empty, so the
//! recorder loop can use its timeout to also check episode expiry.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::models::Frame;

/// Result of a bounded-wait take
#[derive(Debug)]
pub enum TakeResult {
    Item(Arc<Frame>),
    Empty,
    Closed,
}

#[derive(Debug)]
struct Inner {
    items: VecDeque<Arc<Frame>>,
    capacity: usize,
    closed: bool,
    dropped: u64,
}

/// Bounded FIFO with drop-oldest overflow
#[derive(Debug)]
pub struct FrameRecordQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl FrameRecordQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                capacity: capacity.max(1),
                closed: false,
                dropped: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Admit a frame, evicting the oldest entry if the queue is full
    ///
    /// Returns false once the queue is closed.
    pub async fn offer(&self, frame: Arc<Frame>) -> bool {
        {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return false;
            }
            if inner.items.len() >= inner.capacity {
                inner.items.pop_front();
                inner.dropped += 1;
                tracing::trace!(dropped_total = inner.dropped, "Record queue overflow, oldest frame dropped");
            }
            inner.items.push_back(frame);
        }
        self.notify.notify_one();
        true
    }

    /// Take the oldest frame, waiting up to `timeout`
    pub async fn take(&self, timeout: Duration) -> TakeResult {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(frame) = inner.items.pop_front() {
                    return TakeResult::Item(frame);
                }
                if inner.closed {
                    return TakeResult::Closed;
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return TakeResult::Empty;
            }
            if tokio::time::timeout(remaining, self.notify.notified())
                .await
                .is_err()
            {
                return TakeResult::Empty;
            }
        }
    }

    /// Close the queue; pending items stay takeable, then `Closed` is returned
    pub async fn close(&self) {
        {
            let mut inner = self.inner.lock().await;
            inner.closed = true;
        }
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Total frames evicted under overflow since creation
    pub async fn dropped(&self) -> u64 {
        self.inner.lock().await.dropped
    }
}
