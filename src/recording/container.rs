//! Container writers
//!
//! A [`ContainerFactory`] creates one [`ContainerWriter`] per recorded file.
//! Writers take every frame they are handed; dropping frames is not allowed.

use super::config::{ContainerStats, RecordingConfig};
use super::yuv::{rgb_to_yuv420, yuv420_len};
use crate::errors::CameraError;
use crate::types::Frame;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// An open output file receiving frames in order.
pub trait ContainerWriter: Send {
    fn write(&mut self, frame: &Frame) -> Result<(), CameraError>;

    /// Flush and close the file.
    fn finish(self: Box<Self>) -> Result<ContainerStats, CameraError>;
}

/// Creates writers for one container format.
pub trait ContainerFactory: Send + Sync {
    /// File extension without the dot.
    fn extension(&self) -> &'static str;

    /// Create a new file at `path`. Fails if the file already exists.
    fn create(
        &self,
        path: &Path,
        config: &RecordingConfig,
    ) -> Result<Box<dyn ContainerWriter>, CameraError>;
}

/// Look up the factory for a container name from the configuration.
pub fn container_for(name: &str) -> Result<Arc<dyn ContainerFactory>, CameraError> {
    match name {
        "y4m" => Ok(Arc::new(Y4mContainer)),
        #[cfg(feature = "mp4")]
        "mp4" => Ok(Arc::new(super::mp4::Mp4Container)),
        #[cfg(not(feature = "mp4"))]
        "mp4" => Err(CameraError::Encoding(
            "mp4 container requested but crate built without the mp4 feature".to_string(),
        )),
        other => Err(CameraError::Encoding(format!("unknown container '{}'", other))),
    }
}

pub(crate) fn create_new_file(path: &Path) -> Result<File, CameraError> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(CameraError::Io)
}

pub(crate) fn check_geometry(frame: &Frame, config: &RecordingConfig) -> Result<(), CameraError> {
    if frame.width != config.width || frame.height != config.height {
        return Err(CameraError::Encoding(format!(
            "Frame dimensions {}x{} don't match recording config {}x{}",
            frame.width, frame.height, config.width, config.height
        )));
    }
    if frame.data().len() < frame.expected_len() {
        return Err(CameraError::Encoding(format!(
            "Frame {} is truncated: {} of {} bytes",
            frame.sequence,
            frame.data().len(),
            frame.expected_len()
        )));
    }
    Ok(())
}

/// Uncompressed YUV4MPEG2 (4:2:0) files, readable by ffmpeg and most players.
pub struct Y4mContainer;

impl ContainerFactory for Y4mContainer {
    fn extension(&self) -> &'static str {
        "y4m"
    }

    fn create(
        &self,
        path: &Path,
        config: &RecordingConfig,
    ) -> Result<Box<dyn ContainerWriter>, CameraError> {
        if config.width % 2 != 0 || config.height % 2 != 0 {
            return Err(CameraError::Encoding(format!(
                "4:2:0 needs even dimensions, got {}x{}",
                config.width, config.height
            )));
        }

        let mut writer = BufWriter::new(create_new_file(path)?);
        let header = format!(
            "YUV4MPEG2 W{} H{} F{}:1 Ip A1:1 C420jpeg\n",
            config.width, config.height, config.fps
        );
        writer.write_all(header.as_bytes())?;

        Ok(Box::new(Y4mWriter {
            writer,
            config: config.clone(),
            frames_written: 0,
            bytes_written: header.len() as u64,
        }))
    }
}

struct Y4mWriter {
    writer: BufWriter<File>,
    config: RecordingConfig,
    frames_written: u64,
    bytes_written: u64,
}

const FRAME_MARKER: &[u8] = b"FRAME\n";

impl ContainerWriter for Y4mWriter {
    fn write(&mut self, frame: &Frame) -> Result<(), CameraError> {
        check_geometry(frame, &self.config)?;

        let yuv = rgb_to_yuv420(&frame.rgb_bytes(), frame.width, frame.height);
        self.writer.write_all(FRAME_MARKER)?;
        self.writer.write_all(&yuv)?;

        self.frames_written += 1;
        self.bytes_written += (FRAME_MARKER.len() + yuv.len()) as u64;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<ContainerStats, CameraError> {
        let Y4mWriter {
            writer,
            config,
            frames_written,
            bytes_written,
        } = *self;

        let file = writer
            .into_inner()
            .map_err(|e| CameraError::Io(e.into_error()))?;
        file.sync_all()?;

        Ok(ContainerStats {
            frames_written,
            bytes_written,
            duration_secs: frames_written as f64 / f64::from(config.fps.max(1)),
        })
    }
}

/// Expected size of a y4m file holding `frames` pictures.
pub fn y4m_file_len(config: &RecordingConfig, frames: u64) -> u64 {
    let header = format!(
        "YUV4MPEG2 W{} H{} F{}:1 Ip A1:1 C420jpeg\n",
        config.width, config.height, config.fps
    );
    header.len() as u64
        + frames * (FRAME_MARKER.len() + yuv420_len(config.width, config.height)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PooledBuffer;
    use crate::types::PixelLayout;

    fn rgb_frame(sequence: u64, width: u32, height: u32) -> Frame {
        let data = vec![sequence as u8; (width * height * 3) as usize];
        Frame::new(
            0,
            sequence,
            0,
            width,
            height,
            PixelLayout::Rgb8,
            PooledBuffer::detached(data),
        )
    }

    #[test]
    fn test_y4m_header_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cam0.y4m");
        let config = RecordingConfig::new(16, 8, 30);

        let mut writer = Y4mContainer.create(&path, &config).unwrap();
        for seq in 0..3 {
            writer.write(&rgb_frame(seq, 16, 8)).unwrap();
        }
        let stats = writer.finish().unwrap();

        assert_eq!(stats.frames_written, 3);
        let contents = std::fs::read(&path).unwrap();
        assert!(contents.starts_with(b"YUV4MPEG2 W16 H8 F30:1"));
        assert_eq!(contents.len() as u64, stats.bytes_written);
        assert_eq!(stats.bytes_written, y4m_file_len(&config, 3));
    }

    #[test]
    fn test_y4m_rejects_wrong_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cam0.y4m");
        let mut writer = Y4mContainer
            .create(&path, &RecordingConfig::new(16, 8, 30))
            .unwrap();
        assert!(writer.write(&rgb_frame(0, 8, 8)).is_err());
    }

    #[test]
    fn test_y4m_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taken.y4m");
        std::fs::write(&path, b"keep me").unwrap();

        let result = Y4mContainer.create(&path, &RecordingConfig::new(16, 8, 30));
        assert!(result.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
    }

    #[test]
    fn test_odd_dimensions_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = Y4mContainer.create(&dir.path().join("odd.y4m"), &RecordingConfig::new(15, 8, 30));
        assert!(result.is_err());
        assert!(!dir.path().join("odd.y4m").exists());
    }

    #[test]
    fn test_container_lookup() {
        assert_eq!(container_for("y4m").unwrap().extension(), "y4m");
        assert!(container_for("avi").is_err());
    }
}
