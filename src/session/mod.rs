//! Session - Per-Camera Pipeline Lifecycle
//!
//! ## Responsibilities
//!
//! - Own one camera's pipeline state (frame cache, record queue, episode
//!   state machine, active clip path)
//! - Track live sessions in a registry keyed by camera id
//! - Run the ingest, detect, preview and recorder loops and guarantee
//!   bounded teardown when the transport drops or a stop is requested
//!
//! The transport is abstracted behind `FrameSource`/`FrameSink` so the
//! pipeline never sees WebSocket types.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::annotator::StreamAnnotator;
use crate::anomaly::AnomalyClassifier;
use crate::detection::DetectionAdapter;
use crate::episode::EpisodeStateMachine;
use crate::error::{Error, Result};
use crate::event_sink::EventPublisher;
use crate::frame_cache::FrameCache;
use crate::models::{CameraInfo, EventRecord, Frame};
use crate::pre_event_buffer::PreEventRingBuffer;
use crate::record_queue::FrameRecordQueue;
use crate::recorder::encoder::EncoderFactory;
use crate::recorder::{ClipRecorder, RecorderConfig};
use crate::state::AppConfig;

/// Inbound side of a camera transport
#[async_trait]
pub trait FrameSource: Send {
    /// Next encoded frame; `Ok(None)` means the peer disconnected
    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Outbound side of a camera transport (annotated preview)
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, jpeg: Vec<u8>) -> Result<()>;
}

/// One camera's live pipeline state
#[derive(Debug)]
pub struct Session {
    pub camera: CameraInfo,
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub cache: Arc<FrameCache>,
    pub queue: Arc<FrameRecordQueue>,
    pub machine: Arc<RwLock<EpisodeStateMachine>>,
    /// Clean clip path of the running episode, set by the recorder loop
    pub active_clip: Arc<RwLock<Option<String>>>,
    running: RwLock<bool>,
    stopped: Notify,
}

impl Session {
    fn new(camera: CameraInfo, config: &AppConfig) -> Self {
        Self {
            camera,
            session_id: Uuid::new_v4(),
            started_at: Utc::now(),
            cache: Arc::new(FrameCache::new()),
            queue: Arc::new(FrameRecordQueue::new(config.record_queue_capacity)),
            machine: Arc::new(RwLock::new(EpisodeStateMachine::new(config.end_delay))),
            active_clip: Arc::new(RwLock::new(None)),
            running: RwLock::new(true),
            stopped: Notify::new(),
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Request teardown; idempotent, wakes every loop
    pub async fn stop(&self) {
        {
            let mut running = self.running.write().await;
            if !*running {
                return;
            }
            *running = false;
        }
        self.queue.close().await;
        self.stopped.notify_waiters();
        // notify_one stores a permit, so a stop landing while the ingest
        // loop is between select iterations is not lost
        self.stopped.notify_one();
        tracing::info!(camera_id = %self.camera.camera_id, "Session stop requested");
    }

    async fn stopped(&self) {
        self.stopped.notified().await;
    }
}

/// Registry view of one session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub camera_id: String,
    pub camera_name: String,
    pub room_name: Option<String>,
    pub started_at: DateTime<Utc>,
    pub episode_active: bool,
    pub queued_frames: usize,
}

/// Live sessions keyed by camera id; one session per camera
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new session; a second connection for the same camera
    /// is rejected while the first is alive
    pub async fn create(&self, camera: CameraInfo, config: &AppConfig) -> Result<Arc<Session>> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&camera.camera_id) {
            return Err(Error::SessionExists(camera.camera_id));
        }
        let session = Arc::new(Session::new(camera, config));
        sessions.insert(session.camera.camera_id.clone(), session.clone());
        tracing::info!(
            camera_id = %session.camera.camera_id,
            session_id = %session.session_id,
            "Session registered"
        );
        Ok(session)
    }

    pub async fn get(&self, camera_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(camera_id).cloned()
    }

    pub async fn list(&self) -> Vec<SessionSummary> {
        let sessions: Vec<Arc<Session>> =
            self.sessions.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(sessions.len());
        for session in sessions {
            out.push(SessionSummary {
                session_id: session.session_id,
                camera_id: session.camera.camera_id.clone(),
                camera_name: session.camera.camera_name.clone(),
                room_name: session.camera.room_name.clone(),
                started_at: session.started_at,
                episode_active: session.machine.read().await.is_active(),
                queued_frames: session.queue.len().await,
            });
        }
        out.sort_by(|a, b| a.camera_id.cmp(&b.camera_id));
        out
    }

    /// Request a stop on a live session
    pub async fn stop(&self, camera_id: &str) -> Result<()> {
        let session = self
            .get(camera_id)
            .await
            .ok_or_else(|| Error::SessionNotFound(camera_id.to_string()))?;
        session.stop().await;
        Ok(())
    }

    /// Drop a session from the registry, but only the identified one:
    /// a replacement session under the same camera id stays untouched
    pub async fn remove(&self, camera_id: &str, session_id: Uuid) {
        let mut sessions = self.sessions.write().await;
        if sessions
            .get(camera_id)
            .is_some_and(|s| s.session_id == session_id)
        {
            sessions.remove(camera_id);
            tracing::info!(camera_id = camera_id, "Session removed");
        }
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one session's loops to completion
pub struct SessionOrchestrator {
    session: Arc<Session>,
    registry: Arc<SessionRegistry>,
    detector: Arc<dyn DetectionAdapter>,
    events: Arc<EventPublisher>,
    encoder_factory: Arc<dyn EncoderFactory>,
    config: AppConfig,
}

impl SessionOrchestrator {
    pub fn new(
        session: Arc<Session>,
        registry: Arc<SessionRegistry>,
        detector: Arc<dyn DetectionAdapter>,
        events: Arc<EventPublisher>,
        encoder_factory: Arc<dyn EncoderFactory>,
        config: AppConfig,
    ) -> Self {
        Self {
            session,
            registry,
            detector,
            events,
            encoder_factory,
            config,
        }
    }

    /// Run ingest inline and the detect/preview/recorder loops as tasks
    ///
    /// Returns once the transport drops or a stop is requested, after all
    /// loops have been joined (bounded by the teardown timeout).
    pub async fn run(
        self,
        mut source: Box<dyn FrameSource>,
        sink: Box<dyn FrameSink>,
    ) {
        let session = self.session.clone();
        tracing::info!(
            camera_id = %session.camera.camera_id,
            session_id = %session.session_id,
            "Session pipeline starting"
        );

        let recorder = ClipRecorder::new(
            session.camera.clone(),
            RecorderConfig {
                output_root: self.config.output_root.clone(),
                output_fps: self.config.output_fps,
                poll_timeout: self.config.record_poll_timeout,
            },
            session.queue.clone(),
            session.cache.clone(),
            session.machine.clone(),
            self.encoder_factory.clone(),
            self.events.clone(),
            session.active_clip.clone(),
            PreEventRingBuffer::for_pre_roll(self.config.pre_roll_secs, self.config.expected_fps),
        );
        let record_task = tokio::spawn(recorder.run());

        let detect_task = tokio::spawn(detect_loop(
            session.clone(),
            self.detector.clone(),
            self.events.clone(),
            self.config.clone(),
        ));

        let preview_task = tokio::spawn(preview_loop(
            session.clone(),
            sink,
            self.config.clone(),
        ));

        // Ingest runs inline so the transport's receive half stays here
        loop {
            tokio::select! {
                _ = session.stopped() => break,
                received = source.next_frame() => match received {
                    Ok(Some(bytes)) => {
                        match Frame::decode(&bytes, Utc::now()) {
                            Ok(frame) => {
                                let frame = Arc::new(frame);
                                session.cache.put(frame.clone()).await;
                                if !session.queue.offer(frame).await {
                                    break;
                                }
                            }
                            Err(e) => {
                                // Bad frame: skip, the stream continues
                                tracing::warn!(
                                    camera_id = %session.camera.camera_id,
                                    error = %e,
                                    "Frame decode failed, frame skipped"
                                );
                            }
                        }
                    }
                    Ok(None) => {
                        tracing::info!(
                            camera_id = %session.camera.camera_id,
                            "Transport disconnected"
                        );
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            camera_id = %session.camera.camera_id,
                            error = %e,
                            "Transport receive failed"
                        );
                        break;
                    }
                },
            }
        }

        session.stop().await;
        join_bounded("record", record_task, self.config.teardown_timeout).await;
        join_bounded("detect", detect_task, self.config.teardown_timeout).await;
        join_bounded("preview", preview_task, self.config.teardown_timeout).await;

        self.registry
            .remove(&session.camera.camera_id, session.session_id)
            .await;
        tracing::info!(
            camera_id = %session.camera.camera_id,
            session_id = %session.session_id,
            "Session pipeline stopped"
        );
    }
}

/// Join a loop task, aborting it if it overstays the teardown bound
async fn join_bounded(name: &str, mut task: JoinHandle<()>, timeout: std::time::Duration) {
    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!(task = name, error = %e, "Session loop panicked");
        }
        Err(_) => {
            tracing::warn!(task = name, "Session loop missed teardown deadline, aborted");
            task.abort();
        }
    }
}

/// Rate-limited detection cycle
///
/// Reads the latest cached frame, runs the detection adapter, classifies
/// evidence, publishes evidence events and feeds the episode state machine.
/// An adapter failure counts as an empty detection cycle.
async fn detect_loop(
    session: Arc<Session>,
    detector: Arc<dyn DetectionAdapter>,
    events: Arc<EventPublisher>,
    config: AppConfig,
) {
    let mut classifier = AnomalyClassifier::new(config.rules.clone());
    let allowed = config.rules.allowed_labels();
    let mut ticker = tokio::time::interval(config.detect_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if !session.is_running().await {
            break;
        }
        let Some(frame) = session.cache.latest().await else {
            continue;
        };

        let regions = match detector.detect(&frame, &allowed).await {
            Ok(regions) => regions,
            Err(e) => {
                tracing::warn!(
                    camera_id = %session.camera.camera_id,
                    error = %e,
                    "Detection failed, cycle treated as empty"
                );
                Vec::new()
            }
        };
        session.cache.set_detection(regions.clone()).await;

        let now = Utc::now();
        let evidence = classifier.evaluate(&regions, now, Local::now().time());

        if !evidence.is_empty() {
            let clip = session
                .active_clip
                .read()
                .await
                .clone()
                .unwrap_or_default();
            for item in &evidence {
                events
                    .publish(EventRecord::new(
                        item.label(),
                        item.confidence(),
                        &session.camera,
                        clip.clone(),
                    ))
                    .await;
            }
        }

        session
            .machine
            .write()
            .await
            .observe(!evidence.is_empty(), now);
    }
    classifier.reset();
    tracing::debug!(camera_id = %session.camera.camera_id, "Detect loop stopped");
}

/// Annotated preview stream back to the transport
async fn preview_loop(session: Arc<Session>, mut sink: Box<dyn FrameSink>, config: AppConfig) {
    let annotator = StreamAnnotator::new(session.cache.clone(), config.jpeg_quality);
    let mut ticker = tokio::time::interval(config.preview_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if !session.is_running().await {
            break;
        }
        match annotator.render().await {
            Ok(Some(jpeg)) => {
                if let Err(e) = sink.send_frame(jpeg).await {
                    tracing::debug!(
                        camera_id = %session.camera.camera_id,
                        error = %e,
                        "Preview send failed, stopping session"
                    );
                    session.stop().await;
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    camera_id = %session.camera.camera_id,
                    error = %e,
                    "Preview render failed"
                );
            }
        }
    }
    tracing::debug!(camera_id = %session.camera.camera_id, "Preview loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotator::encode_jpeg;
    use crate::detection::testing::ScriptedDetector;
    use crate::event_sink::MemoryEventLog;
    use crate::record_queue::TakeResult;
    use crate::recorder::encoder::ClipEncoder;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    fn test_config(output_root: PathBuf) -> AppConfig {
        AppConfig {
            output_root,
            detect_interval: Duration::from_millis(10),
            preview_interval: Duration::from_millis(10),
            record_poll_timeout: Duration::from_millis(20),
            teardown_timeout: Duration::from_secs(2),
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn registry_rejects_duplicate_camera() {
        let registry = SessionRegistry::new();
        let config = AppConfig::default();
        registry
            .create(CameraInfo::new("cam1"), &config)
            .await
            .unwrap();
        let err = registry
            .create(CameraInfo::new("cam1"), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionExists(ref cam) if cam == "cam1"));
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn registry_stop_unknown_camera_fails() {
        let registry = SessionRegistry::new();
        let err = registry.stop("ghost").await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn stop_closes_queue_and_flips_running() {
        let registry = SessionRegistry::new();
        let config = AppConfig::default();
        let session = registry
            .create(CameraInfo::new("cam1"), &config)
            .await
            .unwrap();
        assert!(session.is_running().await);

        session.stop().await;
        assert!(!session.is_running().await);
        assert!(matches!(
            session.queue.take(Duration::from_millis(10)).await,
            TakeResult::Closed
        ));
        // A second stop is a no-op
        session.stop().await;
    }

    #[tokio::test]
    async fn remove_only_drops_the_identified_session() {
        let registry = SessionRegistry::new();
        let config = AppConfig::default();
        let first = registry
            .create(CameraInfo::new("cam1"), &config)
            .await
            .unwrap();
        registry.remove("cam1", first.session_id).await;
        assert_eq!(registry.count().await, 0);

        let second = registry
            .create(CameraInfo::new("cam1"), &config)
            .await
            .unwrap();
        // Removing with the first session's id must not evict the second
        registry.remove("cam1", first.session_id).await;
        assert!(registry.get("cam1").await.is_some());
        registry.remove("cam1", second.session_id).await;
        assert_eq!(registry.count().await, 0);
    }

    struct VecSource {
        frames: std::vec::IntoIter<Vec<u8>>,
    }

    #[async_trait]
    impl FrameSource for VecSource {
        async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
            match self.frames.next() {
                Some(bytes) => {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(Some(bytes))
                }
                None => Ok(None),
            }
        }
    }

    struct NullSink;

    #[async_trait]
    impl FrameSink for NullSink {
        async fn send_frame(&mut self, _jpeg: Vec<u8>) -> Result<()> {
            Ok(())
        }
    }

    struct NullEncoder {
        path: PathBuf,
    }

    #[async_trait]
    impl ClipEncoder for NullEncoder {
        async fn write_frame(&mut self, _frame: &Frame) -> Result<()> {
            Ok(())
        }

        async fn finish(self: Box<Self>) -> Result<()> {
            tokio::fs::write(&self.path, b"clip").await?;
            Ok(())
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }

    struct NullEncoderFactory;

    #[async_trait]
    impl EncoderFactory for NullEncoderFactory {
        async fn open(
            &self,
            path: &Path,
            _width: u32,
            _height: u32,
            _fps: u32,
        ) -> Result<Box<dyn ClipEncoder>> {
            Ok(Box::new(NullEncoder {
                path: path.to_path_buf(),
            }))
        }
    }

    fn jpeg_frame() -> Vec<u8> {
        let frame = Frame::new(16, 16, vec![40; 16 * 16 * 3], Utc::now()).unwrap();
        encode_jpeg(&frame, 80).unwrap()
    }

    #[tokio::test]
    async fn orchestrator_tears_down_after_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf());
        let registry = Arc::new(SessionRegistry::new());
        let log = Arc::new(MemoryEventLog::default());
        let events = Arc::new(EventPublisher::new(vec![log.clone()]));

        let session = registry
            .create(CameraInfo::new("cam1"), &config)
            .await
            .unwrap();
        let orchestrator = SessionOrchestrator::new(
            session.clone(),
            registry.clone(),
            Arc::new(ScriptedDetector::new(vec![])),
            events,
            Arc::new(NullEncoderFactory),
            config,
        );

        let source = VecSource {
            frames: vec![jpeg_frame(), jpeg_frame(), jpeg_frame()].into_iter(),
        };
        orchestrator.run(Box::new(source), Box::new(NullSink)).await;

        // The source ran dry, so the session unwound itself completely
        assert!(!session.is_running().await);
        assert_eq!(registry.count().await, 0);
        // No evidence was scripted: no events, no episode
        assert_eq!(log.count().await, 0);
        assert!(session.active_clip.read().await.is_none());
    }

    #[tokio::test]
    async fn orchestrator_honors_external_stop() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf());
        let registry = Arc::new(SessionRegistry::new());
        let events = Arc::new(EventPublisher::new(vec![]));

        let session = registry
            .create(CameraInfo::new("cam2"), &config)
            .await
            .unwrap();
        let orchestrator = SessionOrchestrator::new(
            session.clone(),
            registry.clone(),
            Arc::new(ScriptedDetector::new(vec![])),
            events,
            Arc::new(NullEncoderFactory),
            config,
        );

        struct EndlessSource;

        #[async_trait]
        impl FrameSource for EndlessSource {
            async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(Some(Vec::new()))
            }
        }

        let run = tokio::spawn(orchestrator.run(Box::new(EndlessSource), Box::new(NullSink)));
        tokio::time::sleep(Duration::from_millis(30)).await;
        registry.stop("cam2").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("session did not unwind after stop")
            .unwrap();
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn stop_before_ingest_parks_unwinds_a_stalled_source() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf());
        let registry = Arc::new(SessionRegistry::new());
        let events = Arc::new(EventPublisher::new(vec![]));

        let session = registry
            .create(CameraInfo::new("cam3"), &config)
            .await
            .unwrap();
        let orchestrator = SessionOrchestrator::new(
            session.clone(),
            registry.clone(),
            Arc::new(ScriptedDetector::new(vec![])),
            events,
            Arc::new(NullEncoderFactory),
            config,
        );

        struct StalledSource;

        #[async_trait]
        impl FrameSource for StalledSource {
            async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
                futures::future::pending().await
            }
        }

        // Stop lands before the ingest loop has parked on the stop signal;
        // the stored permit must still let the select break out
        registry.stop("cam3").await.unwrap();
        tokio::time::timeout(
            Duration::from_secs(5),
            orchestrator.run(Box::new(StalledSource), Box::new(NullSink)),
        )
        .await
        .expect("ingest stayed blocked on a stalled transport");
        assert!(!session.is_running().await);
        assert_eq!(registry.count().await, 0);
    }
}
