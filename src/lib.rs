//! Vigil Camserver - per-camera surveillance video pipeline
//!
//! Each connected camera gets one session running four cooperating loops:
//!
//! - ingest: decode incoming frames, publish to the frame cache, hand off
//!   to the record queue
//! - detect: rate-limited object detection, anomaly classification and
//!   episode state transitions
//! - record: pre-event buffering and dual-stream (clean + annotated) clip
//!   encoding around anomaly episodes
//! - preview: annotated JPEG stream back over the camera's transport
//!
//! Loops share immutable `Arc<Frame>` snapshots; the detection adapter,
//! clip encoder and event sinks are trait seams so collaborators stay
//! external.

pub mod annotator;
pub mod anomaly;
pub mod detection;
pub mod episode;
pub mod error;
pub mod event_sink;
pub mod frame_cache;
pub mod models;
pub mod pre_event_buffer;
pub mod record_queue;
pub mod recorder;
pub mod session;
pub mod state;
pub mod web_api;

pub use error::{Error, Result};
pub use state::{AppConfig, AppState};
