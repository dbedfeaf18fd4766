//! Application state
//!
//! Holds configuration and the shared components handlers reach through.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveTime;

use crate::anomaly::AnomalyRules;
use crate::detection::DetectionAdapter;
use crate::event_sink::{EventPublisher, MemoryEventLog};
use crate::recorder::encoder::EncoderFactory;
use crate::session::SessionRegistry;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Inference server URL
    pub inference_url: String,
    /// Event store collaborator URL (unset = local event log only)
    pub event_store_url: Option<String>,
    /// Root directory for clip output
    pub output_root: PathBuf,
    /// Detection cycle interval
    pub detect_interval: Duration,
    /// Preview frame pacing
    pub preview_interval: Duration,
    /// Pre-roll window seconds
    pub pre_roll_secs: u32,
    /// Expected ingest rate, sizes the pre-roll buffer
    pub expected_fps: u32,
    /// Clip output frame rate
    pub output_fps: u32,
    /// Record queue capacity (drop-oldest beyond this)
    pub record_queue_capacity: usize,
    /// Quiet time before an episode ends
    pub end_delay: Duration,
    /// Recorder queue-take bound
    pub record_poll_timeout: Duration,
    /// Bound on waiting for loops to exit at teardown
    pub teardown_timeout: Duration,
    /// Preview JPEG quality
    pub jpeg_quality: u8,
    /// Anomaly rule table
    pub rules: AnomalyRules,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut rules = AnomalyRules {
            min_confidence: env_parse("MIN_CONFIDENCE", 0.5),
            stay_threshold: Duration::from_secs(env_parse("STAY_THRESHOLD_SECS", 10)),
            ..AnomalyRules::default()
        };
        if let Some(labels) = env_list("DANGEROUS_ANIMAL_LABELS") {
            rules.dangerous_animal_labels = labels;
        }
        if let Some(labels) = env_list("WEAPON_LABELS") {
            rules.weapon_labels = labels;
        }
        if let Some(labels) = env_list("DOOR_LABELS") {
            rules.door_labels = labels;
        }
        if let Some(t) = env_time("WORKING_HOURS_START") {
            rules.working_hours_start = t;
        }
        if let Some(t) = env_time("WORKING_HOURS_END") {
            rules.working_hours_end = t;
        }

        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("PORT", 8080),
            inference_url: std::env::var("INFERENCE_URL")
                .unwrap_or_else(|_| "http://localhost:9000".to_string()),
            event_store_url: std::env::var("EVENT_STORE_URL").ok(),
            output_root: std::env::var("VIDEO_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/output")),
            detect_interval: Duration::from_millis(env_parse("DETECT_INTERVAL_MS", 1000)),
            preview_interval: Duration::from_millis(env_parse("PREVIEW_INTERVAL_MS", 33)),
            pre_roll_secs: env_parse("PRE_ROLL_SECS", 10),
            expected_fps: env_parse("EXPECTED_FPS", 25),
            output_fps: env_parse("OUTPUT_FPS", 30),
            record_queue_capacity: env_parse("RECORD_QUEUE_CAPACITY", 300),
            end_delay: Duration::from_secs(env_parse("ABNORMAL_END_DELAY_SECS", 3)),
            record_poll_timeout: Duration::from_millis(env_parse("RECORD_POLL_TIMEOUT_MS", 500)),
            teardown_timeout: Duration::from_millis(env_parse("TEARDOWN_TIMEOUT_MS", 3000)),
            jpeg_quality: env_parse("JPEG_QUALITY", 80),
            rules,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Option<Vec<String>> {
    std::env::var(key).ok().map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

fn env_time(key: &str) -> Option<NaiveTime> {
    std::env::var(key)
        .ok()
        .and_then(|v| NaiveTime::parse_from_str(&v, "%H:%M").ok())
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Live sessions keyed by camera id
    pub registry: Arc<SessionRegistry>,
    /// Detection adapter (inference server boundary)
    pub detector: Arc<dyn DetectionAdapter>,
    /// Event fan-out (local log + persistence collaborator)
    pub events: Arc<EventPublisher>,
    /// Local event log for inspection endpoints
    pub event_log: Arc<MemoryEventLog>,
    /// Clip encoder factory
    pub encoder_factory: Arc<dyn EncoderFactory>,
}
