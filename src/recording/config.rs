//! Recording configuration types

use crate::types::CameraFormat;
use serde::{Deserialize, Serialize};

/// Bitrate presets for compressed containers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingQuality {
    /// Lower bitrate, good for long sessions
    Low,
    /// Balanced quality
    Medium,
    /// High bitrate
    High,
}

impl RecordingQuality {
    /// Get recommended bitrate in bits per second
    pub fn bitrate(&self) -> u32 {
        match self {
            RecordingQuality::Low => 2_500_000,
            RecordingQuality::Medium => 5_000_000,
            RecordingQuality::High => 10_000_000,
        }
    }
}

impl Default for RecordingQuality {
    fn default() -> Self {
        RecordingQuality::High
    }
}

/// Parameters handed to a container when a file is created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Video width in pixels
    pub width: u32,
    /// Video height in pixels
    pub height: u32,
    /// Frames per second
    pub fps: u32,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// Enable fast-start for web playback (moov before mdat)
    pub fast_start: bool,
    /// Optional title metadata
    pub title: Option<String>,
}

impl RecordingConfig {
    /// Create a new recording configuration with explicit dimensions
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps,
            bitrate: RecordingQuality::default().bitrate(),
            fast_start: true,
            title: None,
        }
    }

    /// Configuration matching a camera format
    pub fn for_format(format: CameraFormat, quality: RecordingQuality) -> Self {
        Self::new(format.width, format.height, format.fps).with_bitrate(quality.bitrate())
    }

    /// Set the title metadata
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set custom bitrate
    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }
}

/// Statistics returned by a container when the file is finalized
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    /// Total number of frames written
    pub frames_written: u64,
    /// Total bytes written to file
    pub bytes_written: u64,
    /// Stream duration in seconds at the nominal frame rate
    pub duration_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_bitrates_are_ordered() {
        assert!(RecordingQuality::Low.bitrate() < RecordingQuality::Medium.bitrate());
        assert!(RecordingQuality::Medium.bitrate() < RecordingQuality::High.bitrate());
    }

    #[test]
    fn test_config_for_format() {
        let config = RecordingConfig::for_format(CameraFormat::new(640, 480, 25), RecordingQuality::Low)
            .with_title("bench");
        assert_eq!((config.width, config.height, config.fps), (640, 480, 25));
        assert_eq!(config.bitrate, 2_500_000);
        assert_eq!(config.title.as_deref(), Some("bench"));
    }

    #[test]
    fn test_quality_serializes_lowercase() {
        let json = serde_json::to_string(&RecordingQuality::Medium).unwrap();
        assert_eq!(json, "\"medium\"");
    }
}
