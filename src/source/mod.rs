//! Camera backends
//!
//! A [`SourceSystem`] enumerates cameras and owns whatever driver-wide state
//! the backend needs; each camera it creates is a [`FrameSource`]. The
//! orchestrator wraps every source in a [`CameraHandle`], which tracks what
//! has been opened so teardown never closes anything twice.

#[cfg(feature = "webcam")]
pub mod webcam;

use crate::errors::CameraError;
use crate::types::{CameraFormat, Frame};
use std::time::Duration;

/// Ordered camera parameters applied by `configure`, as named by GenICam.
pub const CONFIGURATION_PARAMETERS: [&str; 5] = [
    "TriggerMode",
    "Width",
    "Height",
    "AcquisitionFrameRateControl",
    "AcquisitionFrameRate",
];

/// One hardware camera stream.
pub trait FrameSource: Send {
    fn open(&mut self) -> Result<(), CameraError>;

    /// Apply resolution and frame rate. A rejection names the parameter
    /// through [`CameraError::Configuration`].
    fn configure(&mut self, format: &CameraFormat) -> Result<(), CameraError>;

    fn start_stream(&mut self) -> Result<(), CameraError>;

    fn stop_stream(&mut self) -> Result<(), CameraError>;

    /// Close the stream and the device, releasing the wait primitive.
    fn close(&mut self) -> Result<(), CameraError>;

    /// Block for at most `timeout` until the next frame is ready.
    fn wait_for_frame(&mut self, timeout: Duration) -> Result<Frame, CameraError>;

    /// Hand a consumed frame back. The default drops it, which returns its
    /// buffer to the pool.
    fn release(&mut self, frame: Frame) {
        drop(frame);
    }

    /// Frames discarded by the backend because no buffer or queue slot was free.
    fn dropped_frames(&self) -> u64 {
        0
    }

    fn describe(&self) -> String;
}

/// Camera enumeration plus the backend's shared resources.
pub trait SourceSystem: Send {
    fn camera_count(&mut self) -> Result<usize, CameraError>;

    fn create_source(&mut self, index: usize) -> Result<Box<dyn FrameSource>, CameraError>;

    /// Release backend-wide resources. Called once, after every camera is closed.
    fn terminate(&mut self);
}

/// Orchestrator-side wrapper around one camera.
pub struct CameraHandle {
    index: usize,
    format: CameraFormat,
    source: Box<dyn FrameSource>,
    opened: bool,
    streaming: bool,
    disconnected: bool,
}

impl CameraHandle {
    pub fn new(index: usize, format: CameraFormat, source: Box<dyn FrameSource>) -> Self {
        Self {
            index,
            format,
            source,
            opened: false,
            streaming: false,
            disconnected: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn format(&self) -> CameraFormat {
        self.format
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    pub fn mark_disconnected(&mut self) {
        self.disconnected = true;
    }

    pub fn describe(&self) -> String {
        self.source.describe()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.source.dropped_frames()
    }

    /// Open, configure and start streaming.
    pub fn bring_up(&mut self) -> Result<(), CameraError> {
        self.source.open()?;
        self.opened = true;
        log::debug!("Camera {} opened: {}", self.index, self.source.describe());

        self.source.configure(&self.format)?;
        log::debug!("Camera {} configured for {}", self.index, self.format);

        self.source.start_stream()?;
        self.streaming = true;
        log::info!("Camera {} streaming at {}", self.index, self.format);
        Ok(())
    }

    pub fn wait_for_frame(&mut self, timeout: Duration) -> Result<Frame, CameraError> {
        self.source.wait_for_frame(timeout)
    }

    pub fn release(&mut self, frame: Frame) {
        self.source.release(frame);
    }

    /// Stop the stream if running and close the device if open. Safe to
    /// call repeatedly.
    pub fn shut_down(&mut self) {
        if self.streaming {
            if let Err(e) = self.source.stop_stream() {
                log::warn!("Camera {}: failed to stop stream: {}", self.index, e);
            }
            self.streaming = false;
        }
        if self.opened {
            if let Err(e) = self.source.close() {
                log::warn!("Camera {}: failed to close: {}", self.index, e);
            }
            self.opened = false;
            log::debug!("Camera {} closed", self.index);
        }
    }
}

impl Drop for CameraHandle {
    fn drop(&mut self) {
        self.shut_down();
    }
}
