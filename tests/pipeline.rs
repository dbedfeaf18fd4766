//! Recorder pipeline integration tests
//!
//! Drives a ClipRecorder through a full episode with a stub encoder factory
//! and checks the pre-roll drain, clip layout and start/end event records.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use tokio::sync::{Mutex, RwLock};

use vigil_camserver::episode::{EpisodeStateMachine, Transition};
use vigil_camserver::error::{Error, Result};
use vigil_camserver::event_sink::{EventPublisher, EventSink, MemoryEventLog};
use vigil_camserver::frame_cache::FrameCache;
use vigil_camserver::models::{CameraInfo, Frame};
use vigil_camserver::pre_event_buffer::PreEventRingBuffer;
use vigil_camserver::record_queue::FrameRecordQueue;
use vigil_camserver::recorder::encoder::{ClipEncoder, EncoderFactory};
use vigil_camserver::recorder::{ClipRecorder, RecorderConfig};

/// Per-path written-frame counts shared with the test body
type FrameCounts = Arc<Mutex<HashMap<PathBuf, u64>>>;

struct CountingEncoder {
    path: PathBuf,
    counts: FrameCounts,
}

#[async_trait]
impl ClipEncoder for CountingEncoder {
    async fn write_frame(&mut self, _frame: &Frame) -> Result<()> {
        *self.counts.lock().await.entry(self.path.clone()).or_insert(0) += 1;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<()> {
        // Non-empty output so clip verification passes
        tokio::fs::write(&self.path, b"clip").await?;
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

struct CountingFactory {
    counts: FrameCounts,
}

#[async_trait]
impl EncoderFactory for CountingFactory {
    async fn open(
        &self,
        path: &Path,
        _width: u32,
        _height: u32,
        _fps: u32,
    ) -> Result<Box<dyn ClipEncoder>> {
        Ok(Box::new(CountingEncoder {
            path: path.to_path_buf(),
            counts: self.counts.clone(),
        }))
    }
}

struct Rig {
    queue: Arc<FrameRecordQueue>,
    machine: Arc<RwLock<EpisodeStateMachine>>,
    active_clip: Arc<RwLock<Option<String>>>,
    log: Arc<MemoryEventLog>,
    counts: FrameCounts,
    recorder: Option<ClipRecorder>,
}

fn rig_with_factory(
    output_root: &Path,
    end_delay: Duration,
    pre_roll_capacity: usize,
    factory: Arc<dyn EncoderFactory>,
    counts: FrameCounts,
) -> Rig {
    let camera = CameraInfo::with_names("cam-7", "dock", Some("warehouse".into()));
    let queue = Arc::new(FrameRecordQueue::new(300));
    let cache = Arc::new(FrameCache::new());
    let machine = Arc::new(RwLock::new(EpisodeStateMachine::new(end_delay)));
    let active_clip = Arc::new(RwLock::new(None));
    let log = Arc::new(MemoryEventLog::default());
    let events = Arc::new(EventPublisher::new(vec![log.clone() as Arc<dyn EventSink>]));

    let recorder = ClipRecorder::new(
        camera,
        RecorderConfig {
            output_root: output_root.to_path_buf(),
            output_fps: 30,
            poll_timeout: Duration::from_millis(20),
        },
        queue.clone(),
        cache,
        machine.clone(),
        factory,
        events,
        active_clip.clone(),
        PreEventRingBuffer::new(pre_roll_capacity),
    );

    Rig {
        queue,
        machine,
        active_clip,
        log,
        counts,
        recorder: Some(recorder),
    }
}

fn rig(output_root: &Path, end_delay: Duration, pre_roll_capacity: usize) -> Rig {
    let counts: FrameCounts = Arc::new(Mutex::new(HashMap::new()));
    rig_with_factory(
        output_root,
        end_delay,
        pre_roll_capacity,
        Arc::new(CountingFactory {
            counts: counts.clone(),
        }),
        counts,
    )
}

fn frame() -> Arc<Frame> {
    Arc::new(Frame::new(8, 8, vec![128; 8 * 8 * 3], Utc::now()).unwrap())
}

async fn settle(queue: &FrameRecordQueue) {
    while !queue.is_empty().await {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn episode_records_pre_roll_and_emits_start_end_events() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path(), Duration::from_millis(200), 10);
    let task = tokio::spawn(rig.recorder.take().unwrap().run());

    // Idle frames land in the pre-roll buffer, not in any clip
    for _ in 0..5 {
        rig.queue.offer(frame()).await;
    }
    settle(&rig.queue).await;
    assert!(rig.active_clip.read().await.is_none());
    assert_eq!(rig.log.count().await, 0);

    // Evidence appears: the next frame opens the episode and drains pre-roll
    rig.machine.write().await.observe(true, Utc::now());
    for _ in 0..3 {
        rig.queue.offer(frame()).await;
    }
    settle(&rig.queue).await;

    let clip = rig.active_clip.read().await.clone().expect("episode open");
    assert!(clip.contains("warehouse"));
    assert!(clip.contains("dock"));
    assert!(clip.ends_with("clean.mp4"));

    // No further evidence arrives; the quiet period closes the episode
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(rig.active_clip.read().await.is_none());

    rig.queue.close().await;
    task.await.unwrap();

    // abnormal_start then abnormal_end, both pointing at the clean clip
    let events = rig.log.latest(10).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].object_label, "abnormal_end");
    assert_eq!(events[1].object_label, "abnormal_start");
    assert_eq!(events[0].video_path, clip);
    assert_eq!(events[1].video_path, clip);
    assert_eq!(events[0].camera_id, "cam-7");
    assert_eq!(events[0].room_id.as_deref(), Some("warehouse"));

    // 5 pre-roll frames + 3 live frames in both streams
    let counts = rig.counts.lock().await;
    let clean_frames = counts.get(Path::new(&clip)).copied().unwrap_or(0);
    let annotated_path = clip.replace("clean.mp4", "annotated.mp4");
    let annotated_frames = counts.get(Path::new(&annotated_path)).copied().unwrap_or(0);
    assert_eq!(clean_frames, 8);
    assert_eq!(annotated_frames, 8);

    // Both clip files verified non-empty on disk
    assert!(tokio::fs::metadata(&clip).await.unwrap().len() > 0);
    assert!(tokio::fs::metadata(&annotated_path).await.unwrap().len() > 0);
}

#[tokio::test]
async fn queue_close_mid_episode_forces_clip_shut() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path(), Duration::from_secs(60), 4);
    let task = tokio::spawn(rig.recorder.take().unwrap().run());

    rig.machine.write().await.observe(true, Utc::now());
    for _ in 0..2 {
        rig.queue.offer(frame()).await;
    }
    settle(&rig.queue).await;
    let clip = rig.active_clip.read().await.clone().expect("episode open");

    // Teardown long before the 60s end delay could elapse
    rig.queue.close().await;
    task.await.unwrap();

    assert!(rig.active_clip.read().await.is_none());
    let events = rig.log.latest(10).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].object_label, "abnormal_end");
    assert_eq!(events[0].video_path, clip);
    assert!(tokio::fs::metadata(&clip).await.unwrap().len() > 0);
}

#[tokio::test]
async fn episode_closes_when_another_loop_consumed_the_end_transition() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path(), Duration::from_secs(3), 4);
    let task = tokio::spawn(rig.recorder.take().unwrap().run());

    rig.machine.write().await.observe(true, Utc::now());
    for _ in 0..2 {
        rig.queue.offer(frame()).await;
    }
    settle(&rig.queue).await;
    let clip = rig.active_clip.read().await.clone().expect("episode open");

    // The detect loop also applies end hysteresis: its observe call can
    // return the Ended edge and drop it. The recorder must still notice
    // the idle machine and close the episode.
    let late = Utc::now() + TimeDelta::seconds(4);
    let transition = rig.machine.write().await.observe(false, late);
    assert_eq!(transition, Transition::Ended);

    for _ in 0..3 {
        rig.queue.offer(frame()).await;
    }
    settle(&rig.queue).await;

    assert!(rig.active_clip.read().await.is_none());
    let events = rig.log.latest(10).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].object_label, "abnormal_end");
    assert_eq!(events[0].video_path, clip);

    rig.queue.close().await;
    task.await.unwrap();

    // The post-close frames buffered as pre-roll, not into the closed clip
    let counts = rig.counts.lock().await;
    assert_eq!(counts.get(Path::new(&clip)).copied(), Some(2));
}

struct FailingWriteEncoder {
    path: PathBuf,
}

#[async_trait]
impl ClipEncoder for FailingWriteEncoder {
    async fn write_frame(&mut self, _frame: &Frame) -> Result<()> {
        Err(Error::Encoder("write refused".into()))
    }

    async fn finish(self: Box<Self>) -> Result<()> {
        tokio::fs::write(&self.path, b"partial").await?;
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

struct FailingWriteFactory;

#[async_trait]
impl EncoderFactory for FailingWriteFactory {
    async fn open(
        &self,
        path: &Path,
        _width: u32,
        _height: u32,
        _fps: u32,
    ) -> Result<Box<dyn ClipEncoder>> {
        Ok(Box::new(FailingWriteEncoder {
            path: path.to_path_buf(),
        }))
    }
}

#[tokio::test]
async fn aborted_episode_start_leaves_no_partial_clips() {
    let dir = tempfile::tempdir().unwrap();
    let counts: FrameCounts = Arc::new(Mutex::new(HashMap::new()));
    let mut rig = rig_with_factory(
        dir.path(),
        Duration::from_secs(60),
        4,
        Arc::new(FailingWriteFactory),
        counts,
    );
    let task = tokio::spawn(rig.recorder.take().unwrap().run());

    // Idle frames fill the pre-roll so the failed start has frames to drain
    for _ in 0..3 {
        rig.queue.offer(frame()).await;
    }
    settle(&rig.queue).await;

    rig.machine.write().await.observe(true, Utc::now());
    rig.queue.offer(frame()).await;
    settle(&rig.queue).await;

    // Start aborted: no open episode, no start event
    assert!(rig.active_clip.read().await.is_none());
    assert_eq!(rig.log.count().await, 0);

    rig.queue.close().await;
    task.await.unwrap();

    // Only empty directories may remain under the output root
    let mut stack = vec![dir.path().to_path_buf()];
    while let Some(d) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&d).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let file_type = entry.file_type().await.unwrap();
            assert!(
                file_type.is_dir(),
                "partial clip left behind: {}",
                entry.path().display()
            );
            stack.push(entry.path());
        }
    }
}

#[tokio::test]
async fn pre_roll_keeps_only_most_recent_frames() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path(), Duration::from_millis(200), 4);
    let task = tokio::spawn(rig.recorder.take().unwrap().run());

    // 9 idle frames into a capacity-4 pre-roll buffer
    for _ in 0..9 {
        rig.queue.offer(frame()).await;
    }
    settle(&rig.queue).await;

    rig.machine.write().await.observe(true, Utc::now());
    rig.queue.offer(frame()).await;
    settle(&rig.queue).await;
    let clip = rig.active_clip.read().await.clone().expect("episode open");

    rig.queue.close().await;
    task.await.unwrap();

    // 4 retained pre-roll frames + 1 live frame
    let counts = rig.counts.lock().await;
    assert_eq!(counts.get(Path::new(&clip)).copied(), Some(5));
}
