//! DetectionAdapter - Inference Server Boundary
//!
//! ## Responsibilities
//!
//! - Send a frame to the object classifier and parse labeled regions back
//! - Keep inference failures local: the detect loop treats an error as
//!   "no detections this cycle"
//!
//! The classifier itself is an external collaborator; this module only
//! owns the wire contract.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use crate::annotator;
use crate::error::{Error, Result};
use crate::models::{BBox, Frame, Region};

/// Frame in, labeled regions out
#[async_trait]
pub trait DetectionAdapter: Send + Sync {
    /// Run detection on one frame, restricted to the given label set
    /// (empty = no restriction)
    async fn detect(&self, frame: &Frame, allowed_labels: &[String]) -> Result<Vec<Region>>;
}

/// One detection in the inference server response
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireRegion {
    label: String,
    #[serde(alias = "conf")]
    confidence: f32,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

#[derive(Debug, Clone, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    regions: Vec<WireRegion>,
}

/// HTTP adapter posting JPEG frames to an inference server
pub struct HttpDetector {
    client: reqwest::Client,
    base_url: String,
    jpeg_quality: u8,
}

impl HttpDetector {
    pub fn new(base_url: String) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    pub fn with_timeout(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            base_url,
            jpeg_quality: 85,
        }
    }

    /// Check inference server health
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/healthz", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl DetectionAdapter for HttpDetector {
    async fn detect(&self, frame: &Frame, allowed_labels: &[String]) -> Result<Vec<Region>> {
        let url = format!("{}/v1/detect", self.base_url);
        let jpeg = annotator::encode_jpeg(frame, self.jpeg_quality)?;

        let mut form = Form::new().part(
            "frame",
            Part::bytes(jpeg)
                .file_name("frame.jpg")
                .mime_str("image/jpeg")
                .map_err(|e| Error::Detection(e.to_string()))?,
        );
        if !allowed_labels.is_empty() {
            form = form.text("allowed_labels", allowed_labels.join(","));
        }

        let resp = self.client.post(&url).multipart(form).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Detection(format!(
                "inference server returned {}",
                resp.status()
            )));
        }

        let body: DetectResponse = resp.json().await?;
        Ok(body
            .regions
            .into_iter()
            .map(|r| Region::new(r.label, r.confidence, BBox::new(r.x1, r.y1, r.x2, r.y2)))
            .collect())
    }
}
