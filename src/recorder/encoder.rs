//! Clip encoders backed by ffmpeg child processes
//!
//! Raw RGB frames are piped to ffmpeg stdin as rawvideo and muxed into an
//! H.264 MP4 at a fixed output frame rate. Opening is sized to the first
//! frame's dimensions; every subsequent frame must match.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};

use crate::error::{Error, Result};
use crate::models::Frame;

/// An open single-clip encoder
#[async_trait]
pub trait ClipEncoder: Send + Sync {
    async fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Close the input, wait for the muxer to flush and exit
    async fn finish(self: Box<Self>) -> Result<()>;

    fn path(&self) -> &Path;
}

/// Opens encoders for the recorder
#[async_trait]
pub trait EncoderFactory: Send + Sync {
    async fn open(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Box<dyn ClipEncoder>>;
}

/// ffmpeg-backed factory
pub struct FfmpegEncoderFactory;

#[async_trait]
impl EncoderFactory for FfmpegEncoderFactory {
    async fn open(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Box<dyn ClipEncoder>> {
        let encoder = FfmpegEncoder::spawn(path, width, height, fps)?;
        Ok(Box::new(encoder))
    }
}

struct FfmpegEncoder {
    child: Child,
    stdin: Option<ChildStdin>,
    path: PathBuf,
    frames: u64,
}

impl FfmpegEncoder {
    fn spawn(path: &Path, width: u32, height: u32, fps: u32) -> Result<Self> {
        let mut child = Command::new("ffmpeg")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-s")
            .arg(format!("{}x{}", width, height))
            .arg("-r")
            .arg(fps.to_string())
            .arg("-i")
            .arg("-")
            .arg("-an")
            .arg("-c:v")
            .arg("libx264")
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg("-preset")
            .arg("veryfast")
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Encoder(format!("failed to spawn ffmpeg: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Encoder("ffmpeg stdin unavailable".into()))?;

        tracing::debug!(
            path = %path.display(),
            width = width,
            height = height,
            fps = fps,
            "Encoder opened"
        );

        Ok(Self {
            child,
            stdin: Some(stdin),
            path: path.to_path_buf(),
            frames: 0,
        })
    }
}

#[async_trait]
impl ClipEncoder for FfmpegEncoder {
    async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Encoder("encoder already closed".into()))?;
        stdin
            .write_all(&frame.data)
            .await
            .map_err(|e| Error::Encoder(format!("frame write failed: {}", e)))?;
        self.frames += 1;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
            drop(stdin);
        }
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| Error::Encoder(format!("ffmpeg wait failed: {}", e)))?;
        if !status.success() {
            return Err(Error::Encoder(format!(
                "ffmpeg exited with {} after {} frames ({})",
                status,
                self.frames,
                self.path.display()
            )));
        }
        tracing::debug!(
            path = %self.path.display(),
            frames = self.frames,
            "Encoder closed"
        );
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
