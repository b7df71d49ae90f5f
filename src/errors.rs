use thiserror::Error;

/// Errors reported by a camera backend, a display surface or a container writer.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("timed out waiting for frame")]
    Timeout,
    #[error("source disconnected: {0}")]
    Disconnected(String),
    #[error("grab error: {0}")]
    Grab(String),
    #[error("cannot set {parameter}: {message}")]
    Configuration { parameter: String, message: String },
    #[error("failed to open device: {0}")]
    Open(String),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("display error: {0}")]
    Display(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CameraError {
    pub fn configuration(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        CameraError::Configuration {
            parameter: parameter.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by the capture orchestrator.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no cameras found")]
    NoSourcesFound,
    #[error("camera {index}: cannot set {parameter}: {message}")]
    SourceConfiguration {
        index: usize,
        parameter: String,
        message: String,
    },
    #[error("camera {index}: {source}")]
    SourceOpen {
        index: usize,
        #[source]
        source: CameraError,
    },
    #[error("camera {index} disconnected")]
    SourceDisconnected { index: usize },
    #[error("already recording")]
    AlreadyRecording,
    #[error("already displaying")]
    AlreadyDisplaying,
    #[error("not recording")]
    NotRecording,
    #[error("failed to start recording{}: {message}", fmt_index(.index))]
    RecordingStartFailed {
        index: Option<usize>,
        message: String,
    },
    #[error("camera {index}: write failed: {message}")]
    WriteFailed { index: usize, message: String },
    #[error("orchestrator has been shut down")]
    ShutDown,
    #[error("camera system error: {0}")]
    Backend(#[source] CameraError),
    #[error("pump thread error: {0}")]
    Thread(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn fmt_index(index: &Option<usize>) -> String {
    index.map(|i| format!(" on camera {i}")).unwrap_or_default()
}

impl CaptureError {
    /// Whether the error aborts startup. Everything else is reported and
    /// the orchestrator keeps running.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CaptureError::NoSourcesFound
                | CaptureError::SourceConfiguration { .. }
                | CaptureError::SourceOpen { .. }
                | CaptureError::Backend(_)
                | CaptureError::Config(_)
        )
    }

    /// Map a failure raised while bringing camera `index` up.
    pub(crate) fn from_init(index: usize, error: CameraError) -> Self {
        match error {
            CameraError::Configuration { parameter, message } => CaptureError::SourceConfiguration {
                index,
                parameter,
                message,
            },
            other => CaptureError::SourceOpen {
                index,
                source: other,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_names_parameter() {
        let error = CaptureError::from_init(1, CameraError::configuration("Width", "out of range"));
        assert_eq!(error.to_string(), "camera 1: cannot set Width: out of range");
        assert!(error.is_fatal());
    }

    #[test]
    fn test_open_error_keeps_source() {
        let error = CaptureError::from_init(2, CameraError::Open("busy".to_string()));
        assert!(matches!(error, CaptureError::SourceOpen { index: 2, .. }));
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_recording_start_failed_display() {
        let error = CaptureError::RecordingStartFailed {
            index: Some(0),
            message: "permission denied".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "failed to start recording on camera 0: permission denied"
        );

        let error = CaptureError::RecordingStartFailed {
            index: None,
            message: "no live cameras".to_string(),
        };
        assert_eq!(error.to_string(), "failed to start recording: no live cameras");
    }

    #[test]
    fn test_runtime_errors_are_not_fatal() {
        assert!(!CaptureError::AlreadyRecording.is_fatal());
        assert!(!CaptureError::AlreadyDisplaying.is_fatal());
        assert!(!CaptureError::NotRecording.is_fatal());
        assert!(!CaptureError::SourceDisconnected { index: 0 }.is_fatal());
        assert!(!CaptureError::WriteFailed {
            index: 0,
            message: "disk full".to_string()
        }
        .is_fatal());
    }
}
