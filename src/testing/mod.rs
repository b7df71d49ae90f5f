//! Testing utilities for multicam
//!
//! A synthetic camera backend with fault injection, for offline tests and
//! for running the CLI without hardware.

pub mod synthetic;

pub use synthetic::{
    synthetic_video_frame, SourceScript, SyntheticProbe, SyntheticSource, SyntheticSystem,
};
