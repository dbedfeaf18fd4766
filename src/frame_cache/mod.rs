//! FrameCache - Latest Frame / Latest Detection Cache
//!
//! ## Responsibilities
//!
//! - Hold the single most-recent raw frame for a session
//! - Hold the single most-recent detection result
//! - Serve independent snapshots to the detect, preview and record loops
//!
//! Single-slot with overwrite semantics: no history, only the latest value
//! is observable. The ingest loop publishes immutable `Arc<Frame>` values,
//! so a reader holds a consistent frame even while the next one lands.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::models::{Frame, Region};

#[derive(Debug)]
struct Slot {
    latest: Option<Arc<Frame>>,
    regions: Vec<Region>,
    detected_at: Option<DateTime<Utc>>,
}

/// Per-session latest-frame cache
#[derive(Debug)]
pub struct FrameCache {
    slot: RwLock<Slot>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(Slot {
                latest: None,
                regions: Vec::new(),
                detected_at: None,
            }),
        }
    }

    /// Overwrite the single frame slot
    pub async fn put(&self, frame: Arc<Frame>) {
        let mut slot = self.slot.write().await;
        slot.latest = Some(frame);
    }

    /// Latest raw frame, if any frame has arrived yet
    pub async fn latest(&self) -> Option<Arc<Frame>> {
        let slot = self.slot.read().await;
        slot.latest.clone()
    }

    /// Overwrite the detection slot
    pub async fn set_detection(&self, regions: Vec<Region>) {
        let mut slot = self.slot.write().await;
        slot.regions = regions;
        slot.detected_at = Some(Utc::now());
    }

    /// Most recent detection regions (empty until the first detect cycle)
    pub async fn detection(&self) -> Vec<Region> {
        let slot = self.slot.read().await;
        slot.regions.clone()
    }

    /// Latest frame together with the most recent regions, for annotation
    ///
    /// Returns `None` until the first raw frame arrives. The regions vec is
    /// empty while no detection has run yet.
    pub async fn snapshot(&self) -> Option<(Arc<Frame>, Vec<Region>)> {
        let slot = self.slot.read().await;
        slot.latest
            .clone()
            .map(|frame| (frame, slot.regions.clone()))
    }

    pub async fn detected_at(&self) -> Option<DateTime<Utc>> {
        let slot = self.slot.read().await;
        slot.detected_at
    }
}

impl Default for FrameCache {
    fn default() -> Self {
        Self::new()
    }
}
