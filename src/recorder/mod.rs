//! ClipRecorder - Episode Recording Loop
//!
//! ## Responsibilities
//!
//! - Consume the FrameRecordQueue (sole consumer)
//! - Feed the pre-event ring buffer while idle
//! - Open/close the clean + annotated encoder pair at episode edges
//! - Verify clip files on close and emit start/end event records
//!
//! The recorder loop is the single writer of episode state: no other loop
//! touches the encoders, so at most one episode exists per session.

pub mod encoder;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use tokio::sync::RwLock;

use crate::annotator;
use crate::episode::EpisodeStateMachine;
use crate::error::Result;
use crate::event_sink::EventPublisher;
use crate::frame_cache::FrameCache;
use crate::models::{CameraInfo, EventRecord, Frame};
use crate::pre_event_buffer::{FramePair, PreEventRingBuffer};
use crate::record_queue::{FrameRecordQueue, TakeResult};
use encoder::{ClipEncoder, EncoderFactory};

const CLEAN_FILE: &str = "clean.mp4";
const ANNOTATED_FILE: &str = "annotated.mp4";

/// Recorder settings
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub output_root: PathBuf,
    pub output_fps: u32,
    /// Queue-take bound; expiry is re-checked on every timeout
    pub poll_timeout: Duration,
}

/// One running episode: exclusively owned by the recorder loop
struct RecordingEpisode {
    started_at: DateTime<Utc>,
    clean: Box<dyn ClipEncoder>,
    annotated: Box<dyn ClipEncoder>,
    clean_path: PathBuf,
    annotated_path: PathBuf,
    width: u32,
    height: u32,
    frame_count: u64,
}

/// Per-session recording consumer
pub struct ClipRecorder {
    camera: CameraInfo,
    config: RecorderConfig,
    queue: Arc<FrameRecordQueue>,
    cache: Arc<FrameCache>,
    machine: Arc<RwLock<EpisodeStateMachine>>,
    factory: Arc<dyn EncoderFactory>,
    events: Arc<EventPublisher>,
    /// Clean clip path of the running episode, read by the detect loop
    /// for evidence event records
    active_clip: Arc<RwLock<Option<String>>>,
    pre_roll: PreEventRingBuffer,
    episode: Option<RecordingEpisode>,
}

impl ClipRecorder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        camera: CameraInfo,
        config: RecorderConfig,
        queue: Arc<FrameRecordQueue>,
        cache: Arc<FrameCache>,
        machine: Arc<RwLock<EpisodeStateMachine>>,
        factory: Arc<dyn EncoderFactory>,
        events: Arc<EventPublisher>,
        active_clip: Arc<RwLock<Option<String>>>,
        pre_roll: PreEventRingBuffer,
    ) -> Self {
        Self {
            camera,
            config,
            queue,
            cache,
            machine,
            factory,
            events,
            active_clip,
            pre_roll,
            episode: None,
        }
    }

    /// Run until the queue closes; forces any open episode shut on exit
    pub async fn run(mut self) {
        tracing::debug!(camera_id = %self.camera.camera_id, "Recorder loop started");
        loop {
            match self.queue.take(self.config.poll_timeout).await {
                TakeResult::Item(raw) => self.handle_frame(raw).await,
                TakeResult::Empty => {
                    let active = {
                        let mut machine = self.machine.write().await;
                        machine.tick(Utc::now());
                        machine.is_active()
                    };
                    // Close on observed state, not the returned transition:
                    // the detect loop also applies end hysteresis and may
                    // consume the Ended edge itself.
                    if !active && self.episode.is_some() {
                        self.close_episode().await;
                    }
                }
                TakeResult::Closed => break,
            }
        }

        if self.episode.is_some() {
            // Teardown mid-episode: flush, verify and log regardless of timer
            self.machine.write().await.force_idle();
            self.close_episode().await;
        }
        tracing::debug!(camera_id = %self.camera.camera_id, "Recorder loop stopped");
    }

    async fn handle_frame(&mut self, raw: Arc<Frame>) {
        let regions = self.cache.detection().await;
        let annotated = Arc::new(annotator::annotate(&raw, &regions));

        let active = {
            let mut machine = self.machine.write().await;
            machine.tick(Utc::now());
            machine.is_active()
        };
        if !active {
            if self.episode.is_some() {
                self.close_episode().await;
            }
            self.pre_roll.push(raw, annotated);
            return;
        }

        if self.episode.is_none() {
            if let Err(e) = self.start_episode(&raw).await {
                tracing::error!(
                    camera_id = %self.camera.camera_id,
                    error = %e,
                    "Episode start aborted, staying idle"
                );
                // Next anomaly cycle retries from Idle
                self.machine.write().await.force_idle();
                self.pre_roll.push(raw, annotated);
                return;
            }
        }

        if let Err(e) = self.write_pair(&raw, &annotated).await {
            tracing::error!(
                camera_id = %self.camera.camera_id,
                error = %e,
                "Frame write failed, closing episode"
            );
            self.machine.write().await.force_idle();
            self.close_episode().await;
        }
    }

    /// Open both encoders sized to the first frame, drain the pre-roll
    async fn start_episode(&mut self, first: &Frame) -> Result<()> {
        let started_at = Utc::now();
        let dir = clip_dir(
            &self.config.output_root,
            &self.camera,
            Local::now(),
        );
        tokio::fs::create_dir_all(&dir).await?;

        let clean_path = dir.join(CLEAN_FILE);
        let annotated_path = dir.join(ANNOTATED_FILE);

        let clean = self
            .factory
            .open(&clean_path, first.width, first.height, self.config.output_fps)
            .await?;
        let annotated = match self
            .factory
            .open(
                &annotated_path,
                first.width,
                first.height,
                self.config.output_fps,
            )
            .await
        {
            Ok(enc) => enc,
            Err(e) => {
                // Abort cleanly: the clean encoder must not leak
                if let Err(close_err) = clean.finish().await {
                    tracing::warn!(error = %close_err, "Clean encoder close failed during abort");
                }
                return Err(e);
            }
        };

        let mut episode = RecordingEpisode {
            started_at,
            clean,
            annotated,
            clean_path: clean_path.clone(),
            annotated_path,
            width: first.width,
            height: first.height,
            frame_count: 0,
        };

        let pre_roll = self.pre_roll.drain();
        tracing::info!(
            camera_id = %self.camera.camera_id,
            clip = %clean_path.display(),
            pre_roll_frames = pre_roll.len(),
            "Recording episode started"
        );
        let mut drain_err = None;
        for FramePair { raw, annotated } in pre_roll {
            if raw.width != episode.width || raw.height != episode.height {
                continue;
            }
            let written = match episode.clean.write_frame(&raw).await {
                Ok(()) => episode.annotated.write_frame(&annotated).await,
                Err(e) => Err(e),
            };
            match written {
                Ok(()) => episode.frame_count += 1,
                Err(e) => {
                    drain_err = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = drain_err {
            self.discard_episode(episode, &dir).await;
            return Err(e);
        }

        let clip = clean_path.to_string_lossy().into_owned();
        *self.active_clip.write().await = Some(clip.clone());
        self.events
            .publish(EventRecord::new("abnormal_start", 1.0, &self.camera, clip))
            .await;

        self.episode = Some(episode);
        Ok(())
    }

    /// Abort a half-built episode: close both encoders and remove the
    /// partial clip files so the directory never looks like a finished clip
    async fn discard_episode(&self, episode: RecordingEpisode, dir: &std::path::Path) {
        let RecordingEpisode {
            clean, annotated, ..
        } = episode;
        if let Err(e) = clean.finish().await {
            tracing::warn!(error = %e, "Clean encoder close failed during abort");
        }
        if let Err(e) = annotated.finish().await {
            tracing::warn!(error = %e, "Annotated encoder close failed during abort");
        }
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => {
                tracing::info!(
                    camera_id = %self.camera.camera_id,
                    dir = %dir.display(),
                    "Aborted episode, clip directory removed"
                );
            }
            Err(e) => {
                tracing::warn!(
                    camera_id = %self.camera.camera_id,
                    dir = %dir.display(),
                    error = %e,
                    "Aborted episode, orphaned clip directory left behind"
                );
            }
        }
    }

    async fn write_pair(&mut self, raw: &Frame, annotated: &Frame) -> Result<()> {
        let Some(episode) = self.episode.as_mut() else {
            return Ok(());
        };
        if raw.width != episode.width || raw.height != episode.height {
            tracing::warn!(
                camera_id = %self.camera.camera_id,
                "Frame dimensions changed mid-episode, frame skipped"
            );
            return Ok(());
        }
        episode.clean.write_frame(raw).await?;
        episode.annotated.write_frame(annotated).await?;
        episode.frame_count += 1;
        Ok(())
    }

    /// Close encoders, verify outputs, emit the end marker
    async fn close_episode(&mut self) {
        let Some(episode) = self.episode.take() else {
            return;
        };
        *self.active_clip.write().await = None;

        let duration_secs = (Utc::now() - episode.started_at).num_seconds();
        if let Err(e) = episode.clean.finish().await {
            tracing::error!(error = %e, "Clean encoder close failed");
        }
        if let Err(e) = episode.annotated.finish().await {
            tracing::error!(error = %e, "Annotated encoder close failed");
        }

        let clean_ok = verify_output(&episode.clean_path).await;
        let annotated_ok = verify_output(&episode.annotated_path).await;
        if clean_ok && annotated_ok {
            tracing::info!(
                camera_id = %self.camera.camera_id,
                clip = %episode.clean_path.display(),
                frames = episode.frame_count,
                duration_secs = duration_secs,
                "Recording episode closed"
            );
            self.events
                .publish(EventRecord::new(
                    "abnormal_end",
                    1.0,
                    &self.camera,
                    episode.clean_path.to_string_lossy(),
                ))
                .await;
        } else {
            // Episode is lost; no end marker may reference a bad path
            tracing::error!(
                camera_id = %self.camera.camera_id,
                clean = %episode.clean_path.display(),
                clean_ok = clean_ok,
                annotated_ok = annotated_ok,
                "Clip verification failed, episode lost"
            );
        }
    }
}

async fn verify_output(path: &std::path::Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len() > 0,
        Err(_) => false,
    }
}

/// Clip directory layout:
/// `{root}/{room|unknown_room}/{camera}/{YYYY-MM-DD}/{HH-MM-SS}`
pub fn clip_dir(
    root: &std::path::Path,
    camera: &CameraInfo,
    started_at: DateTime<Local>,
) -> PathBuf {
    let room = camera
        .room_name
        .as_deref()
        .map(sanitize_component)
        .unwrap_or_else(|| "unknown_room".to_string());
    root.join(room)
        .join(sanitize_component(&camera.camera_name))
        .join(started_at.format("%Y-%m-%d").to_string())
        .join(started_at.format("%H-%M-%S").to_string())
}

/// Keep camera/room names path-safe
fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn clip_dir_uses_room_and_camera_names() {
        let camera = CameraInfo::with_names("cam-1", "front door", Some("lobby".into()));
        let t = Local.with_ymd_and_hms(2026, 8, 25, 14, 30, 5).unwrap();
        let dir = clip_dir(std::path::Path::new("/clips"), &camera, t);
        assert_eq!(
            dir,
            PathBuf::from("/clips/lobby/front_door/2026-08-25/14-30-05")
        );
    }

    #[test]
    fn clip_dir_falls_back_to_unknown_room() {
        let camera = CameraInfo::new("cam9");
        let t = Local.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let dir = clip_dir(std::path::Path::new("out"), &camera, t);
        assert!(dir.starts_with("out/unknown_room/cam9"));
    }

    #[test]
    fn sanitize_replaces_separators() {
        assert_eq!(sanitize_component("a/b\\c d"), "a_b_c_d");
        assert_eq!(sanitize_component(""), "unnamed");
    }

    #[tokio::test]
    async fn verify_rejects_missing_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.mp4");
        assert!(!verify_output(&missing).await);

        let empty = dir.path().join("empty.mp4");
        tokio::fs::write(&empty, b"").await.unwrap();
        assert!(!verify_output(&empty).await);

        let full = dir.path().join("full.mp4");
        tokio::fs::write(&full, b"data").await.unwrap();
        assert!(verify_output(&full).await);
    }
}
