//! USB/UVC webcam backend built on nokhwa
//!
//! nokhwa delivers frames on its own capture thread through a callback. The
//! callback decodes each frame to RGB into a pooled buffer and hands it to
//! the frame signal, so the pump sees the same wait-for-frame contract as
//! with any other backend.

use super::{FrameSource, SourceSystem};
use crate::errors::CameraError;
use crate::pool::BufferPool;
use crate::signal::{frame_signal, FrameSignal, SignalWaiter};
use crate::timing::StreamClock;
use crate::types::{CameraFormat, Frame, PixelLayout};
use nokhwa::{
    pixel_format::RgbFormat,
    query,
    utils::{ApiBackend, CameraIndex, CameraInfo, FrameFormat, RequestedFormat, RequestedFormatType, Resolution},
    Buffer, CallbackCamera, NokhwaError,
};
use std::time::{Duration, Instant};

/// How long a stream may stay silent before the device list is checked.
const PRESENCE_CHECK_AFTER: Duration = Duration::from_secs(2);

pub struct WebcamSystem {
    cameras: Vec<CameraInfo>,
    buffer_count: usize,
}

impl WebcamSystem {
    pub fn new(buffer_count: usize) -> Self {
        Self {
            cameras: Vec::new(),
            buffer_count: buffer_count.max(2),
        }
    }
}

impl SourceSystem for WebcamSystem {
    fn camera_count(&mut self) -> Result<usize, CameraError> {
        self.cameras = query(ApiBackend::Auto)
            .map_err(|e| CameraError::Open(format!("Failed to query cameras: {}", e)))?;
        for info in &self.cameras {
            log::debug!("Found camera {}: {}", info.index(), info.human_name());
        }
        Ok(self.cameras.len())
    }

    fn create_source(&mut self, index: usize) -> Result<Box<dyn FrameSource>, CameraError> {
        let info = self
            .cameras
            .get(index)
            .ok_or_else(|| CameraError::Open(format!("no webcam at position {index}")))?;
        Ok(Box::new(WebcamSource {
            index,
            device: info.index().clone(),
            name: info.human_name(),
            buffer_count: self.buffer_count,
            opened: false,
            camera: None,
            waiter: None,
            watch: StallWatch::new(PRESENCE_CHECK_AFTER),
        }))
    }

    fn terminate(&mut self) {
        self.cameras.clear();
        log::debug!("Webcam system released");
    }
}

pub struct WebcamSource {
    index: usize,
    device: CameraIndex,
    name: String,
    buffer_count: usize,
    opened: bool,
    camera: Option<CallbackCamera>,
    waiter: Option<SignalWaiter>,
    watch: StallWatch,
}

fn device_present(device: &CameraIndex) -> bool {
    query(ApiBackend::Auto)
        .map(|cameras| cameras.iter().any(|c| c.index() == device))
        .unwrap_or(false)
}

/// Map a failure to build the camera to the setting that caused it.
fn build_error(error: NokhwaError) -> CameraError {
    match error {
        NokhwaError::OpenDeviceError(device, reason) => {
            CameraError::Open(format!("{}: {}", device, reason))
        }
        NokhwaError::SetPropertyError { property, error, .. }
        | NokhwaError::GetPropertyError { property, error } => {
            CameraError::configuration(property, error)
        }
        other => CameraError::configuration("Format", other.to_string()),
    }
}

/// First parameter whose negotiated value differs from the request.
fn format_mismatch(requested: &CameraFormat, width: u32, height: u32, fps: u32) -> Option<&'static str> {
    if width != requested.width {
        Some("Width")
    } else if height != requested.height {
        Some("Height")
    } else if fps != requested.fps {
        Some("AcquisitionFrameRate")
    } else {
        None
    }
}

/// Tracks time since the last frame and says when a presence check is due.
#[derive(Debug)]
struct StallWatch {
    last: Instant,
    after: Duration,
}

impl StallWatch {
    fn new(after: Duration) -> Self {
        Self {
            last: Instant::now(),
            after,
        }
    }

    fn frame(&mut self) {
        self.last = Instant::now();
    }

    /// True at most once per silent interval.
    fn check_due(&mut self) -> bool {
        if self.last.elapsed() >= self.after {
            self.last = Instant::now();
            true
        } else {
            false
        }
    }
}

impl FrameSource for WebcamSource {
    fn open(&mut self) -> Result<(), CameraError> {
        if !device_present(&self.device) {
            return Err(CameraError::Open(format!("{} is no longer present", self.name)));
        }
        self.opened = true;
        Ok(())
    }

    fn configure(&mut self, format: &CameraFormat) -> Result<(), CameraError> {
        if !self.opened {
            return Err(CameraError::Stream("camera is not open".to_string()));
        }

        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
            nokhwa::utils::CameraFormat::new(
                Resolution::new(format.width, format.height),
                FrameFormat::MJPEG,
                format.fps,
            ),
        ));

        let pool = BufferPool::new(
            self.buffer_count,
            format.width as usize * format.height as usize * 3,
        );
        let (signal, waiter) = frame_signal(self.buffer_count);
        let mut decoder = CallbackDecoder {
            index: self.index,
            format: *format,
            pool,
            signal,
            clock: StreamClock::new(),
            sequence: 0,
        };

        let camera = CallbackCamera::new(self.device.clone(), requested, move |buffer| {
            decoder.push(buffer)
        })
        .map_err(build_error)?;

        // The closest format may differ from the request.
        let negotiated = camera
            .camera_format()
            .map_err(|e| CameraError::configuration("Format", e.to_string()))?;
        let resolution = negotiated.resolution();
        if let Some(parameter) = format_mismatch(
            format,
            resolution.width(),
            resolution.height(),
            negotiated.frame_rate(),
        ) {
            return Err(CameraError::configuration(
                parameter,
                format!(
                    "{} offers {}x{}@{}, requested {}",
                    self.name,
                    resolution.width(),
                    resolution.height(),
                    negotiated.frame_rate(),
                    format
                ),
            ));
        }

        self.camera = Some(camera);
        self.waiter = Some(waiter);
        Ok(())
    }

    fn start_stream(&mut self) -> Result<(), CameraError> {
        let camera = self
            .camera
            .as_mut()
            .ok_or_else(|| CameraError::Stream("camera is not configured".to_string()))?;
        camera
            .open_stream()
            .map_err(|e| CameraError::Stream(format!("Failed to start stream: {}", e)))?;
        self.watch.frame();
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<(), CameraError> {
        if let Some(camera) = self.camera.as_mut() {
            camera
                .stop_stream()
                .map_err(|e| CameraError::Stream(format!("Failed to stop stream: {}", e)))?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), CameraError> {
        self.camera = None;
        self.waiter = None;
        self.opened = false;
        Ok(())
    }

    fn wait_for_frame(&mut self, timeout: Duration) -> Result<Frame, CameraError> {
        let result = match &self.waiter {
            Some(waiter) => waiter.wait(timeout),
            None => return Err(CameraError::Stream("camera is not streaming".to_string())),
        };
        match result {
            Ok(frame) => {
                self.watch.frame();
                Ok(frame)
            }
            // nokhwa drops read errors on its capture thread, so a pulled
            // cable only shows up as silence.
            Err(CameraError::Timeout) if self.watch.check_due() => {
                if device_present(&self.device) {
                    Err(CameraError::Timeout)
                } else {
                    Err(CameraError::Disconnected(format!("{} was unplugged", self.name)))
                }
            }
            other => other,
        }
    }

    fn dropped_frames(&self) -> u64 {
        self.waiter.as_ref().map(SignalWaiter::dropped).unwrap_or(0)
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.name, self.device)
    }
}

struct CallbackDecoder {
    index: usize,
    format: CameraFormat,
    pool: BufferPool,
    signal: FrameSignal,
    clock: StreamClock,
    sequence: u64,
}

impl CallbackDecoder {
    fn push(&mut self, buffer: Buffer) {
        self.sequence += 1;
        let image = match buffer.decode_image::<RgbFormat>() {
            Ok(image) => image,
            Err(e) => {
                self.signal.notify_error(
                    CameraError::Grab(format!("decode failed: {}", e)),
                    Duration::ZERO,
                );
                return;
            }
        };

        let (width, height) = (image.width(), image.height());
        if (width, height) != (self.format.width, self.format.height) {
            self.signal.notify_error(
                CameraError::Grab(format!(
                    "camera delivered {}x{}, expected {}x{}",
                    width, height, self.format.width, self.format.height
                )),
                Duration::ZERO,
            );
            return;
        }

        let Some(mut pooled) = self.pool.try_acquire() else {
            self.signal.record_drop();
            return;
        };
        let raw = image.into_raw();
        pooled.clear();
        pooled.extend_from_slice(&raw);

        self.signal.notify(Frame::new(
            self.index,
            self.sequence,
            self.clock.elapsed_us(),
            width,
            height,
            PixelLayout::Rgb8,
            pooled,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mismatch_names_parameter() {
        let requested = CameraFormat::new(1224, 1024, 30);
        assert_eq!(format_mismatch(&requested, 1224, 1024, 30), None);
        assert_eq!(format_mismatch(&requested, 1280, 720, 30), Some("Width"));
        assert_eq!(format_mismatch(&requested, 1224, 720, 30), Some("Height"));
        assert_eq!(format_mismatch(&requested, 1224, 1024, 15), Some("AcquisitionFrameRate"));
    }

    #[test]
    fn test_build_error_keeps_property_name() {
        let error = build_error(NokhwaError::SetPropertyError {
            property: "FrameRate".to_string(),
            value: "60".to_string(),
            error: "unsupported".to_string(),
        });
        assert!(matches!(error, CameraError::Configuration { ref parameter, .. } if parameter == "FrameRate"));

        let error = build_error(NokhwaError::OpenDeviceError("0".to_string(), "busy".to_string()));
        assert!(matches!(error, CameraError::Open(_)));
    }

    #[test]
    fn test_stall_watch_fires_once_per_silence() {
        let mut watch = StallWatch::new(Duration::from_millis(20));
        assert!(!watch.check_due());
        std::thread::sleep(Duration::from_millis(30));
        assert!(watch.check_due());
        assert!(!watch.check_due());

        std::thread::sleep(Duration::from_millis(30));
        watch.frame();
        assert!(!watch.check_due());
    }
}
