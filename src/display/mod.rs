//! Live preview
//!
//! A [`DisplaySink`] per camera scales frames down to the preview size and
//! hands them to a shared [`DisplaySurface`]. Preview is lossy: frames that
//! arrive faster than the configured refresh rate are skipped, and a surface
//! error only affects the camera it happened on.

mod surface;

pub use surface::{DisplaySurface, HeadlessSurface, SnapshotSurface};

use crate::config::DisplayConfig;
use crate::types::Frame;
use image::imageops::FilterType;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Consecutive surface failures after which a camera's preview is switched off.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Window name used for camera `index`.
pub fn surface_name(index: usize) -> String {
    format!("Camera {index}")
}

/// Per-camera preview counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayStats {
    pub shown: u64,
    pub skipped: u64,
    pub failures: u64,
}

pub struct DisplaySink {
    index: usize,
    name: String,
    surface: Arc<dyn DisplaySurface>,
    preview_size: (u32, u32),
    min_interval: Duration,
    last_shown: Option<Instant>,
    consecutive_failures: u32,
    disabled: bool,
    stats: DisplayStats,
}

impl DisplaySink {
    pub fn new(index: usize, surface: Arc<dyn DisplaySurface>, config: &DisplayConfig) -> Self {
        Self {
            index,
            name: surface_name(index),
            surface,
            preview_size: (config.preview_width, config.preview_height),
            min_interval: Duration::from_secs_f64(1.0 / f64::from(config.max_fps.max(1))),
            last_shown: None,
            consecutive_failures: 0,
            disabled: false,
            stats: DisplayStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> DisplayStats {
        self.stats
    }

    /// Render `frame` if the refresh budget allows. Returns whether it was shown.
    pub fn consume(&mut self, frame: &Frame) -> bool {
        if self.disabled {
            self.stats.skipped += 1;
            return false;
        }

        let now = Instant::now();
        if let Some(last) = self.last_shown {
            if now.duration_since(last) < self.min_interval {
                self.stats.skipped += 1;
                return false;
            }
        }

        let Some(image) = frame.to_rgb_image() else {
            log::warn!(
                "Camera {}: frame {} has no usable pixel data",
                self.index,
                frame.sequence
            );
            self.stats.skipped += 1;
            return false;
        };

        let (width, height) = self.preview_size;
        let preview = if image.dimensions() == (width, height) {
            image
        } else {
            image::imageops::resize(&image, width, height, FilterType::Triangle)
        };

        match self.surface.show(&self.name, &preview) {
            Ok(()) => {
                self.last_shown = Some(now);
                self.consecutive_failures = 0;
                self.stats.shown += 1;
                true
            }
            Err(e) => {
                self.stats.failures += 1;
                self.consecutive_failures += 1;
                log::warn!("Camera {}: preview failed: {}", self.index, e);
                if self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    log::error!(
                        "Camera {}: preview disabled after {} consecutive failures",
                        self.index,
                        self.consecutive_failures
                    );
                    self.disabled = true;
                }
                false
            }
        }
    }

    /// Tear down the preview surface.
    pub fn close(self) -> DisplayStats {
        self.surface.destroy(&self.name);
        log::debug!(
            "Camera {} preview closed: {} shown, {} skipped",
            self.index,
            self.stats.shown,
            self.stats.skipped
        );
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CameraError;
    use crate::pool::PooledBuffer;
    use crate::types::PixelLayout;

    fn frame(sequence: u64) -> Frame {
        Frame::new(
            0,
            sequence,
            0,
            64,
            48,
            PixelLayout::Rgb8,
            PooledBuffer::detached(vec![200; 64 * 48 * 3]),
        )
    }

    fn config(max_fps: u32) -> DisplayConfig {
        DisplayConfig {
            preview_width: 32,
            preview_height: 24,
            max_fps,
            ..DisplayConfig::default()
        }
    }

    #[test]
    fn test_frames_are_resized_and_shown() {
        let surface = Arc::new(HeadlessSurface::new());
        let mut sink = DisplaySink::new(0, surface.clone(), &config(1000));

        assert!(sink.consume(&frame(1)));
        assert_eq!(surface.frames_shown("Camera 0"), 1);
        assert_eq!(surface.last_size("Camera 0"), Some((32, 24)));
        assert_eq!(surface.open_surfaces(), vec!["Camera 0".to_string()]);

        sink.close();
        assert!(surface.open_surfaces().is_empty());
    }

    #[test]
    fn test_rate_limit_skips_frames() {
        let surface = Arc::new(HeadlessSurface::new());
        let mut sink = DisplaySink::new(0, surface.clone(), &config(1));

        assert!(sink.consume(&frame(1)));
        assert!(!sink.consume(&frame(2)));
        assert_eq!(sink.stats().skipped, 1);
        assert_eq!(surface.frames_shown("Camera 0"), 1);
    }

    struct BrokenSurface;

    impl DisplaySurface for BrokenSurface {
        fn show(&self, _name: &str, _image: &image::RgbImage) -> Result<(), CameraError> {
            Err(CameraError::Display("no display".to_string()))
        }

        fn destroy(&self, _name: &str) {}
    }

    #[test]
    fn test_repeated_failures_disable_preview() {
        let mut sink = DisplaySink::new(2, Arc::new(BrokenSurface), &config(1000));
        for seq in 0..MAX_CONSECUTIVE_FAILURES as u64 {
            assert!(!sink.consume(&frame(seq)));
        }
        assert_eq!(sink.stats().failures, u64::from(MAX_CONSECUTIVE_FAILURES));

        assert!(!sink.consume(&frame(99)));
        assert_eq!(sink.stats().failures, u64::from(MAX_CONSECUTIVE_FAILURES));
        assert_eq!(sink.stats().skipped, 1);
    }
}
