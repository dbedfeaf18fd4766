//! EventSink - Persistence Collaborator Boundary
//!
//! ## Responsibilities
//!
//! - Deliver EventRecords to the persistence collaborator (fire-and-forget)
//! - Keep a local in-memory event log for inspection endpoints
//!
//! A sink failure is logged, never retried, and never blocks the pipeline.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::models::EventRecord;

/// Write-once event delivery
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn insert_event(&self, event: &EventRecord) -> Result<()>;
}

/// In-memory ring buffer of recent events
pub struct MemoryEventLog {
    buffer: RwLock<EventRingBuffer>,
}

struct EventRingBuffer {
    events: VecDeque<EventRecord>,
    capacity: usize,
}

impl MemoryEventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: RwLock::new(EventRingBuffer {
                events: VecDeque::with_capacity(capacity),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Latest events, newest first
    pub async fn latest(&self, count: usize) -> Vec<EventRecord> {
        let buffer = self.buffer.read().await;
        buffer.events.iter().rev().take(count).cloned().collect()
    }

    /// Latest events for one camera, newest first
    pub async fn by_camera(&self, camera_id: &str, count: usize) -> Vec<EventRecord> {
        let buffer = self.buffer.read().await;
        buffer
            .events
            .iter()
            .rev()
            .filter(|e| e.camera_id == camera_id)
            .take(count)
            .cloned()
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.buffer.read().await.events.len()
    }
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new(2000)
    }
}

#[async_trait]
impl EventSink for MemoryEventLog {
    async fn insert_event(&self, event: &EventRecord) -> Result<()> {
        let mut buffer = self.buffer.write().await;
        if buffer.events.len() >= buffer.capacity {
            buffer.events.pop_front();
        }
        buffer.events.push_back(event.clone());
        Ok(())
    }
}

/// HTTP sink posting events to the persistence collaborator
pub struct HttpEventSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEventSink {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to create HTTP client");
        Self { client, base_url }
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn insert_event(&self, event: &EventRecord) -> Result<()> {
        let url = format!("{}/events", self.base_url);
        let resp = self.client.post(&url).json(event).send().await?;
        if !resp.status().is_success() {
            return Err(Error::EventSink(format!(
                "event store returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

/// Fans one event out to every configured sink, best-effort
pub struct EventPublisher {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventPublisher {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    /// Deliver to all sinks; failures are logged and swallowed
    pub async fn publish(&self, event: EventRecord) {
        tracing::info!(
            camera_id = %event.camera_id,
            object = %event.object_label,
            confidence = event.confidence,
            video_path = %event.video_path,
            "Event recorded"
        );
        for sink in &self.sinks {
            if let Err(e) = sink.insert_event(&event).await {
                tracing::warn!(
                    camera_id = %event.camera_id,
                    object = %event.object_label,
                    error = %e,
                    "Event sink write failed (not retried)"
                );
            }
        }
    }
}
