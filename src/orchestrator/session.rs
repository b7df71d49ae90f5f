use crate::errors::CaptureError;
use crate::recording::naming::manifest_file_name;
use crate::recording::{RecordedFile, SinkStatus};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Lifecycle state. Preview and recording are independent; while both are
/// active the state reads `Recording`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorState {
    Idle,
    Displaying,
    Recording,
    /// Closing the recording files
    Stopping,
}

impl OrchestratorState {
    pub(crate) fn from_sessions(displaying: bool, recording: bool) -> Self {
        match (displaying, recording) {
            (_, true) => OrchestratorState::Recording,
            (true, false) => OrchestratorState::Displaying,
            (false, false) => OrchestratorState::Idle,
        }
    }
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OrchestratorState::Idle => "idle",
            OrchestratorState::Displaying => "displaying",
            OrchestratorState::Recording => "recording",
            OrchestratorState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// An active recording: one file per camera, all sharing one timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingSession {
    pub id: Uuid,
    pub timestamp: String,
    pub started_at: DateTime<Local>,
    pub directory: PathBuf,
    pub prefix: String,
    /// `(camera index, file path)` in index order
    pub files: Vec<(usize, PathBuf)>,
}

impl RecordingSession {
    pub fn elapsed_secs(&self) -> f64 {
        (Local::now() - self.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.directory
            .join(manifest_file_name(&self.prefix, &self.timestamp))
    }
}

/// What `stop_recording` produced.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingSummary {
    pub session_id: Uuid,
    pub timestamp: String,
    pub started_at: DateTime<Local>,
    pub stopped_at: DateTime<Local>,
    pub duration_secs: f64,
    pub saved: bool,
    pub files: Vec<RecordedFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
}

impl RecordingSummary {
    pub(crate) fn new(session: &RecordingSession, saved: bool, mut files: Vec<RecordedFile>) -> Self {
        files.sort_by_key(|f| f.index);
        let stopped_at = Local::now();
        let duration_secs = (stopped_at - session.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Self {
            session_id: session.id,
            timestamp: session.timestamp.clone(),
            started_at: session.started_at,
            stopped_at,
            duration_secs,
            saved,
            files,
            manifest: None,
        }
    }

    /// Files still on disk.
    pub fn kept_files(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().filter(|f| f.kept).map(|f| f.path.as_path())
    }

    pub fn total_frames(&self) -> u64 {
        self.files.iter().map(|f| f.frames_written).sum()
    }

    /// Cameras whose recording did not complete normally.
    pub fn incomplete(&self) -> impl Iterator<Item = &RecordedFile> {
        self.files
            .iter()
            .filter(|f| f.status != SinkStatus::Completed)
    }
}

pub(crate) fn write_manifest(summary: &RecordingSummary, path: &Path) -> Result<(), CaptureError> {
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, json)?;
    log::info!("Recording manifest written to {:?}", path);
    Ok(())
}
