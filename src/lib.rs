//! multicam: synchronized preview and recording for several cameras
//!
//! Every camera gets its own pump thread that waits for frames and fans them
//! out to a live preview, a per-camera recording file, or both. A single
//! [`CaptureOrchestrator`] owns the cameras and drives the lifecycle:
//! initialize, start/stop preview, start/stop recording, shut down.
//!
//! # Features
//! - `webcam`: USB/UVC cameras through nokhwa
//! - `mp4`: H.264/MP4 recording through openh264 and muxide
//!
//! Without features the crate records YUV4MPEG2 files and ships a synthetic
//! camera backend, which is enough to run the whole pipeline offline.
//!
//! ```rust,no_run
//! use multicam::{CaptureOrchestrator, MulticamConfig};
//! use multicam::testing::SyntheticSystem;
//!
//! # fn main() -> Result<(), multicam::CaptureError> {
//! multicam::init_logging();
//! let mut orchestrator = CaptureOrchestrator::builder(SyntheticSystem::new(3))
//!     .config(MulticamConfig::default())
//!     .initialize()?;
//! orchestrator.start_recording()?;
//! std::thread::sleep(std::time::Duration::from_secs(2));
//! orchestrator.stop_recording(true)?;
//! orchestrator.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod display;
pub mod errors;
pub mod orchestrator;
pub mod pool;
pub mod recording;
pub mod signal;
pub mod source;
pub mod timing;
pub mod types;

// Testing utilities - synthetic cameras for offline runs
pub mod testing;

pub use config::MulticamConfig;
pub use errors::{CameraError, CaptureError};
pub use orchestrator::{
    CaptureOrchestrator, OrchestratorBuilder, OrchestratorState, RecordingSession,
    RecordingSummary, StatusReport,
};
pub use source::{CameraHandle, FrameSource, SourceSystem};
pub use types::{CameraFormat, Frame, PixelLayout};

/// Initialize logging. `RUST_LOG` wins when set; otherwise this crate logs
/// at info level.
pub fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("multicam=info");
    let _ = env_logger::Builder::from_env(env).try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
