//! Configuration management for multicam
//!
//! Camera format, preview and recording settings are read from a TOML file.
//! [`MulticamConfig::load_layered`] additionally overlays environment variables
//! of the form `MULTICAM_<SECTION>__<KEY>` (e.g. `MULTICAM_CAMERA__FPS=15`).

use crate::errors::CaptureError;
use crate::recording::RecordingQuality;
use crate::types::CameraFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MulticamConfig {
    pub camera: CameraConfig,
    pub display: DisplayConfig,
    pub recording: StorageConfig,
}

/// Acquisition settings applied identically to every camera
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Acquisition frame rate
    pub fps: u32,
    /// Upper bound for one wait-for-frame call, and so for stop latency
    pub wait_timeout_ms: u64,
    /// Frame buffers owned by each camera
    pub buffer_count: usize,
    /// Open at most this many cameras (all enumerated cameras when unset)
    pub max_sources: Option<usize>,
}

/// Preview settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Start the preview right after initialization
    pub enabled_on_startup: bool,
    pub preview_width: u32,
    pub preview_height: u32,
    /// Preview refresh cap per camera; faster frames are skipped
    pub max_fps: u32,
    /// Write previews as PNG files here instead of keeping them in memory
    pub snapshot_directory: Option<String>,
}

/// Recording output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory receiving recorded files
    pub output_directory: String,
    /// File name prefix, as in `{prefix}_cam{index}_{timestamp}.{ext}`
    pub file_prefix: String,
    /// Container format: "y4m" or "mp4"
    pub container: String,
    /// Bitrate preset for compressed containers
    pub quality: RecordingQuality,
    /// Keep an active recording when shutting down without an explicit stop
    pub save_on_shutdown: bool,
    /// Write a JSON manifest next to saved recordings
    pub write_manifest: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 1224,
            height: 1024,
            fps: 30,
            wait_timeout_ms: 50,
            buffer_count: 8,
            max_sources: None,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            enabled_on_startup: true,
            preview_width: 320,
            preview_height: 240,
            max_fps: 30,
            snapshot_directory: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_directory: "output".to_string(),
            file_prefix: "recording".to_string(),
            container: "y4m".to_string(),
            quality: RecordingQuality::High,
            save_on_shutdown: true,
            write_manifest: true,
        }
    }
}

impl CameraConfig {
    pub fn format(&self) -> CameraFormat {
        CameraFormat::new(self.width, self.height, self.fps)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

impl MulticamConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CaptureError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| CaptureError::Config(format!("Failed to read config file: {}", e)))?;

        let config: MulticamConfig = toml::from_str(&contents)
            .map_err(|e| CaptureError::Config(format!("Failed to parse config file: {}", e)))?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load the file (if present) and overlay `MULTICAM_*` environment variables
    pub fn load_layered<P: AsRef<Path>>(path: P) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path.to_path_buf()).required(false))
            .add_source(
                config::Environment::with_prefix("MULTICAM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| CaptureError::Config(format!("Failed to load configuration: {}", e)))?;

        let config: MulticamConfig = settings
            .try_deserialize()
            .map_err(|e| CaptureError::Config(format!("Invalid configuration: {}", e)))?;

        log::debug!("Layered configuration resolved from {:?} and environment", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), CaptureError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    CaptureError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| CaptureError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| CaptureError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("multicam.toml")
    }

    /// Load from default location, falling back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        let camera = &self.camera;
        if camera.width == 0 || camera.height == 0 {
            return Err("Invalid camera resolution".to_string());
        }
        if camera.width % 2 != 0 || camera.height % 2 != 0 {
            return Err("Camera width and height must be even for 4:2:0 recording".to_string());
        }
        if camera.fps == 0 || camera.fps > 240 {
            return Err("Invalid FPS (must be 1-240)".to_string());
        }
        if camera.wait_timeout_ms == 0 || camera.wait_timeout_ms > 1000 {
            return Err("Wait timeout must be between 1 and 1000 ms".to_string());
        }
        if camera.buffer_count < 2 {
            return Err("At least two frame buffers per camera are required".to_string());
        }
        if camera.max_sources == Some(0) {
            return Err("max_sources must be at least 1 when set".to_string());
        }

        let display = &self.display;
        if display.preview_width == 0 || display.preview_height == 0 {
            return Err("Invalid preview size".to_string());
        }
        if display.max_fps == 0 {
            return Err("Preview FPS must be at least 1".to_string());
        }

        let recording = &self.recording;
        if recording.file_prefix.is_empty() {
            return Err("Recording file prefix must not be empty".to_string());
        }
        if !matches!(recording.container.as_str(), "y4m" | "mp4") {
            return Err(format!("Unknown container '{}'", recording.container));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MulticamConfig::default();
        assert_eq!(config.camera.format(), CameraFormat::new(1224, 1024, 30));
        assert_eq!(config.display.preview_width, 320);
        assert_eq!(config.display.preview_height, 240);
        assert_eq!(config.recording.output_directory, "output");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut bad = MulticamConfig::default();
        bad.camera.width = 1223;
        assert!(bad.validate().is_err());

        let mut bad = MulticamConfig::default();
        bad.camera.wait_timeout_ms = 0;
        assert!(bad.validate().is_err());

        let mut bad = MulticamConfig::default();
        bad.recording.container = "avi".to_string();
        assert!(bad.validate().is_err());

        let mut bad = MulticamConfig::default();
        bad.camera.max_sources = Some(0);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("multicam.toml");

        let mut config = MulticamConfig::default();
        config.camera.fps = 15;
        config.recording.file_prefix = "bench".to_string();
        config.save_to_file(&path).unwrap();

        let loaded = MulticamConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.camera.fps, 15);
        assert_eq!(loaded.recording.file_prefix, "bench");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        fs::write(&path, "[camera]\nwidth = 640\nheight = 480\n").unwrap();

        let loaded = MulticamConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.camera.width, 640);
        assert_eq!(loaded.camera.fps, 30);
        assert_eq!(loaded.display.max_fps, 30);
    }

    #[test]
    fn test_config_toml_format() {
        let toml_string = toml::to_string_pretty(&MulticamConfig::default()).unwrap();
        assert!(toml_string.contains("[camera]"));
        assert!(toml_string.contains("[display]"));
        assert!(toml_string.contains("[recording]"));
        assert!(toml_string.contains("wait_timeout_ms"));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = MulticamConfig::load_from_file("nonexistent_multicam.toml");
        assert_eq!(result.unwrap().camera.fps, 30);
    }

    #[test]
    fn test_layered_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layered.toml");
        fs::write(&path, "[display]\nmax_fps = 12\n").unwrap();

        let loaded = MulticamConfig::load_layered(&path).unwrap();
        assert_eq!(loaded.display.max_fps, 12);
        assert_eq!(loaded.camera.width, 1224);
    }

    #[test]
    fn test_layered_environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.toml");
        fs::write(&path, "[recording]\nfile_prefix = \"from_file\"\n").unwrap();

        std::env::set_var("MULTICAM_RECORDING__FILE_PREFIX", "from_env");
        std::env::set_var("MULTICAM_CAMERA__BUFFER_COUNT", "7");
        let loaded = MulticamConfig::load_layered(&path);
        std::env::remove_var("MULTICAM_RECORDING__FILE_PREFIX");
        std::env::remove_var("MULTICAM_CAMERA__BUFFER_COUNT");

        let loaded = loaded.unwrap();
        assert_eq!(loaded.recording.file_prefix, "from_env");
        assert_eq!(loaded.camera.buffer_count, 7);
        assert_eq!(loaded.display.max_fps, DisplayConfig::default().max_fps);
    }
}
