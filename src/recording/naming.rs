//! Recorded file naming
//!
//! Every camera of a session shares one timestamp:
//! `{prefix}_cam{index}_{timestamp}.{ext}`.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub fn recording_file_name(prefix: &str, index: usize, timestamp: &str, extension: &str) -> String {
    format!("{prefix}_cam{index}_{timestamp}.{extension}")
}

pub fn manifest_file_name(prefix: &str, timestamp: &str) -> String {
    format!("{prefix}_{timestamp}.json")
}

/// Pick the session timestamp for `started_at`. When any camera's file for
/// that second already exists, a `_1`, `_2`, ... suffix is appended so all
/// cameras still share one stamp.
pub fn session_timestamp(
    directory: &Path,
    prefix: &str,
    extension: &str,
    indices: &[usize],
    started_at: DateTime<Local>,
) -> String {
    let base = started_at.format(TIMESTAMP_FORMAT).to_string();
    let taken = |stamp: &str| {
        directory.join(manifest_file_name(prefix, stamp)).exists()
            || indices.iter().any(|&index| {
                directory
                    .join(recording_file_name(prefix, index, stamp, extension))
                    .exists()
            })
    };

    if !taken(&base) {
        return base;
    }
    (1u32..)
        .map(|n| format!("{base}_{n}"))
        .find(|stamp| !taken(stamp))
        .unwrap_or(base)
}

pub fn recording_path(
    directory: &Path,
    prefix: &str,
    index: usize,
    timestamp: &str,
    extension: &str,
) -> PathBuf {
    directory.join(recording_file_name(prefix, index, timestamp, extension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 17, 9, 30, 5).unwrap()
    }

    #[test]
    fn test_file_name_convention() {
        assert_eq!(
            recording_file_name("recording", 2, "20240517_093005", "mp4"),
            "recording_cam2_20240517_093005.mp4"
        );
    }

    #[test]
    fn test_fresh_directory_uses_plain_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let stamp = session_timestamp(dir.path(), "rec", "y4m", &[0, 1], at());
        assert_eq!(stamp, "20240517_093005");
    }

    #[test]
    fn test_collision_on_any_camera_bumps_stamp() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rec_cam1_20240517_093005.y4m"), b"").unwrap();
        std::fs::write(dir.path().join("rec_cam0_20240517_093005_1.y4m"), b"").unwrap();

        let stamp = session_timestamp(dir.path(), "rec", "y4m", &[0, 1], at());
        assert_eq!(stamp, "20240517_093005_2");
    }
}
