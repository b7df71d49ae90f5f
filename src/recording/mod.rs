//! Recording sinks and containers
//!
//! Each camera of a recording session gets its own [`RecordingSink`] writing
//! to `{prefix}_cam{index}_{timestamp}.{ext}` through a [`ContainerWriter`]:
//! - y4m: uncompressed YUV4MPEG2, always available
//! - mp4: H.264 via openh264, muxed by muxide (feature `mp4`)
//!
//! # Example
//! ```rust,ignore
//! use multicam::recording::{container_for, RecordingConfig, RecordingSink, SinkStatus};
//!
//! let factory = container_for("y4m")?;
//! let config = RecordingConfig::new(1224, 1024, 30);
//! let mut sink = RecordingSink::create(0, "cam0.y4m".into(), factory.as_ref(), &config)?;
//!
//! // In the pump loop:
//! sink.write(&frame)?;
//!
//! // When the session ends:
//! let file = sink.finish(SinkStatus::Completed);
//! ```

mod config;
mod container;
#[cfg(feature = "mp4")]
mod mp4;
pub mod naming;
mod sink;
mod yuv;

pub use config::{ContainerStats, RecordingConfig, RecordingQuality};
pub use container::{container_for, y4m_file_len, ContainerFactory, ContainerWriter, Y4mContainer};
#[cfg(feature = "mp4")]
pub use mp4::Mp4Container;
pub use sink::{delete_recording, RecordedFile, RecordingSink, SinkStatus};
pub use yuv::{rgb_to_yuv420, yuv420_len};
