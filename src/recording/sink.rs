//! Per-camera recording sink

use super::config::RecordingConfig;
use super::container::{ContainerFactory, ContainerWriter};
use crate::errors::{CameraError, CaptureError};
use crate::types::Frame;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How a camera's recording ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkStatus {
    /// Closed by `stop_recording`
    Completed,
    /// Closed early because the camera went away
    Disconnected,
    /// A write or close failed; the file was removed
    Failed,
}

/// Outcome for one camera's file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedFile {
    pub index: usize,
    pub path: PathBuf,
    pub status: SinkStatus,
    pub frames_written: u64,
    pub bytes_written: u64,
    /// Whether the file is still on disk
    pub kept: bool,
    pub error: Option<String>,
}

/// Writes one camera's frames, in order, to its own file.
pub struct RecordingSink {
    index: usize,
    path: PathBuf,
    writer: Option<Box<dyn ContainerWriter>>,
    frames_written: u64,
}

impl RecordingSink {
    pub fn create(
        index: usize,
        path: PathBuf,
        factory: &dyn ContainerFactory,
        config: &RecordingConfig,
    ) -> Result<Self, CameraError> {
        let writer = factory.create(&path, config)?;
        log::debug!("Camera {} recording to {:?}", index, path);
        Ok(Self {
            index,
            path,
            writer: Some(writer),
            frames_written: 0,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn write(&mut self, frame: &Frame) -> Result<(), CaptureError> {
        let writer = self.writer.as_mut().ok_or_else(|| CaptureError::WriteFailed {
            index: self.index,
            message: "writer already closed".to_string(),
        })?;
        writer
            .write(frame)
            .map_err(|e| CaptureError::WriteFailed {
                index: self.index,
                message: e.to_string(),
            })?;
        self.frames_written += 1;
        log::trace!("Camera {} wrote frame {}", self.index, frame.sequence);
        Ok(())
    }

    /// Close the writer and keep the file.
    pub fn finish(mut self, status: SinkStatus) -> RecordedFile {
        let result = match self.writer.take() {
            Some(writer) => writer.finish(),
            None => Err(CameraError::Stream("writer already closed".to_string())),
        };

        match result {
            Ok(stats) => {
                log::info!(
                    "Camera {} recording closed: {} frames, {} bytes",
                    self.index,
                    stats.frames_written,
                    stats.bytes_written
                );
                RecordedFile {
                    index: self.index,
                    path: self.path.clone(),
                    status,
                    frames_written: stats.frames_written,
                    bytes_written: stats.bytes_written,
                    kept: true,
                    error: None,
                }
            }
            Err(e) => {
                log::error!("Camera {} failed to close recording: {}", self.index, e);
                delete_recording(&self.path);
                self.failed(e.to_string())
            }
        }
    }

    /// Close the writer after a failure and remove the partial file.
    pub fn abort(mut self, reason: impl Into<String>) -> RecordedFile {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finish() {
                log::debug!("Camera {} close after failure: {}", self.index, e);
            }
        }
        delete_recording(&self.path);
        self.failed(reason.into())
    }

    fn failed(&self, error: String) -> RecordedFile {
        RecordedFile {
            index: self.index,
            path: self.path.clone(),
            status: SinkStatus::Failed,
            frames_written: self.frames_written,
            bytes_written: 0,
            kept: false,
            error: Some(error),
        }
    }
}

impl Drop for RecordingSink {
    fn drop(&mut self) {
        // A sink dropped without finish/abort still releases its file handle.
        if let Some(writer) = self.writer.take() {
            log::warn!("Camera {} recording sink dropped while open", self.index);
            if let Err(e) = writer.finish() {
                log::warn!("Camera {} close on drop failed: {}", self.index, e);
            }
        }
    }
}

/// Remove a recorded file; a file that is already gone is not an error.
pub fn delete_recording(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::debug!("Deleted {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to delete {:?}: {}", path, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PooledBuffer;
    use crate::recording::container::Y4mContainer;
    use crate::types::PixelLayout;

    fn frame(width: u32, height: u32) -> Frame {
        Frame::new(
            0,
            0,
            0,
            width,
            height,
            PixelLayout::Rgb8,
            PooledBuffer::detached(vec![90; (width * height * 3) as usize]),
        )
    }

    #[test]
    fn test_finish_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec_cam0.y4m");
        let mut sink =
            RecordingSink::create(0, path.clone(), &Y4mContainer, &RecordingConfig::new(8, 8, 30))
                .unwrap();
        sink.write(&frame(8, 8)).unwrap();
        sink.write(&frame(8, 8)).unwrap();

        let file = sink.finish(SinkStatus::Completed);
        assert_eq!(file.status, SinkStatus::Completed);
        assert_eq!(file.frames_written, 2);
        assert!(file.kept);
        assert!(path.exists());
    }

    #[test]
    fn test_write_failure_reports_camera() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = RecordingSink::create(
            3,
            dir.path().join("rec_cam3.y4m"),
            &Y4mContainer,
            &RecordingConfig::new(8, 8, 30),
        )
        .unwrap();

        let err = sink.write(&frame(4, 4)).unwrap_err();
        assert!(matches!(err, CaptureError::WriteFailed { index: 3, .. }));
    }

    #[test]
    fn test_abort_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec_cam1.y4m");
        let sink =
            RecordingSink::create(1, path.clone(), &Y4mContainer, &RecordingConfig::new(8, 8, 30))
                .unwrap();
        assert!(path.exists());

        let file = sink.abort("disk full");
        assert_eq!(file.status, SinkStatus::Failed);
        assert!(!file.kept);
        assert!(!path.exists());
    }

    #[test]
    fn test_unwritable_directory_fails_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("rec_cam0.y4m");
        let result =
            RecordingSink::create(0, path, &Y4mContainer, &RecordingConfig::new(8, 8, 30));
        assert!(result.is_err());
    }
}
