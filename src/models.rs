//! Shared domain types
//!
//! Frames are immutable once built and travel between the session loops as
//! `Arc<Frame>` snapshots, so concurrent readers never observe a torn frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Decoded video frame (packed RGB8, row-major)
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    /// Create a frame from an RGB8 buffer
    pub fn new(width: u32, height: u32, data: Vec<u8>, captured_at: DateTime<Utc>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(Error::Decode(format!(
                "frame buffer size mismatch: got {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
            captured_at,
        })
    }

    /// Decode an encoded frame (JPEG/PNG bytes) arriving from the transport
    pub fn decode(bytes: &[u8], captured_at: DateTime<Utc>) -> Result<Self> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| Error::Decode(format!("frame decode failed: {}", e)))?
            .to_rgb8();
        let (width, height) = decoded.dimensions();
        Self::new(width, height, decoded.into_raw(), captured_at)
    }
}

/// Axis-aligned bounding box in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn centroid(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Non-disjoint intervals on both axes
    pub fn overlaps(&self, other: &BBox) -> bool {
        self.x1 <= other.x2 && other.x1 <= self.x2 && self.y1 <= other.y2 && other.y1 <= self.y2
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2
    }
}

/// One labeled detection from the inference server, tied to a frame's timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub label: String,
    pub confidence: f32,
    pub bbox: BBox,
}

impl Region {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

/// One rule-based anomaly finding from a single detection cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvidenceItem {
    DangerousAnimal {
        confidence: f32,
        region: Region,
    },
    PersonOutsideHours {
        confidence: f32,
        region: Region,
    },
    PersonWithWeapon {
        confidence: f32,
        person: Region,
        weapon: Region,
    },
    PersonLoiteringNearDoor {
        confidence: f32,
        person: Region,
        door: Region,
        dwell_secs: f64,
    },
}

impl EvidenceItem {
    /// Event label recorded for this evidence kind
    pub fn label(&self) -> &'static str {
        match self {
            EvidenceItem::DangerousAnimal { .. } => "dangerous_animal",
            EvidenceItem::PersonOutsideHours { .. } => "person_outside_hours",
            EvidenceItem::PersonWithWeapon { .. } => "person_with_weapon",
            EvidenceItem::PersonLoiteringNearDoor { .. } => "person_loitering_near_door",
        }
    }

    pub fn confidence(&self) -> f32 {
        match self {
            EvidenceItem::DangerousAnimal { confidence, .. }
            | EvidenceItem::PersonOutsideHours { confidence, .. }
            | EvidenceItem::PersonWithWeapon { confidence, .. }
            | EvidenceItem::PersonLoiteringNearDoor { confidence, .. } => *confidence,
        }
    }
}

/// Write-once fact sent to the persistence collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub object_label: String,
    pub confidence: f32,
    pub camera_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    pub video_path: String,
}

impl EventRecord {
    pub fn new(
        object_label: impl Into<String>,
        confidence: f32,
        camera: &CameraInfo,
        video_path: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            object_label: object_label.into(),
            confidence,
            camera_id: camera.camera_id.clone(),
            room_id: camera.room_name.clone(),
            video_path: video_path.into(),
        }
    }
}

/// Camera identity provided at session creation
///
/// Camera/room metadata lives in an external store; the pipeline only needs
/// what the clip path layout and event records reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraInfo {
    pub camera_id: String,
    pub camera_name: String,
    pub room_name: Option<String>,
}

impl CameraInfo {
    pub fn new(camera_id: impl Into<String>) -> Self {
        let camera_id = camera_id.into();
        Self {
            camera_name: camera_id.clone(),
            camera_id,
            room_name: None,
        }
    }

    pub fn with_names(
        camera_id: impl Into<String>,
        camera_name: impl Into<String>,
        room_name: Option<String>,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            camera_name: camera_name.into(),
            room_name,
        }
    }
}
