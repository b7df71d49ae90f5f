use crate::errors::CameraError;
use image::RgbImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Somewhere previews can be drawn. Shared by every camera's pump, so
/// implementations must tolerate concurrent calls for different names.
pub trait DisplaySurface: Send + Sync {
    /// Show `image` in the surface called `name`, creating it on first use.
    fn show(&self, name: &str, image: &RgbImage) -> Result<(), CameraError>;

    /// Release the surface called `name`. Unknown names are ignored.
    fn destroy(&self, name: &str);
}

#[derive(Debug, Default)]
struct SurfaceState {
    shown: u64,
    last_size: (u32, u32),
}

/// In-memory surface that only keeps track of what was shown.
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    surfaces: Mutex<HashMap<String, SurfaceState>>,
    total_shown: Mutex<HashMap<String, u64>>,
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of surfaces currently open, sorted.
    pub fn open_surfaces(&self) -> Vec<String> {
        let surfaces = self.surfaces.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = surfaces.keys().cloned().collect();
        names.sort();
        names
    }

    /// Frames shown under `name` over the surface's lifetime.
    pub fn frames_shown(&self, name: &str) -> u64 {
        self.total_shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn last_size(&self, name: &str) -> Option<(u32, u32)> {
        self.surfaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|s| s.last_size)
    }
}

impl DisplaySurface for HeadlessSurface {
    fn show(&self, name: &str, image: &RgbImage) -> Result<(), CameraError> {
        {
            let mut surfaces = self.surfaces.lock().unwrap_or_else(PoisonError::into_inner);
            let state = surfaces.entry(name.to_string()).or_default();
            state.shown += 1;
            state.last_size = image.dimensions();
        }
        *self
            .total_shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_default() += 1;
        Ok(())
    }

    fn destroy(&self, name: &str) {
        let removed = self
            .surfaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        if let Some(state) = removed {
            log::debug!("Surface {:?} destroyed after {} frames", name, state.shown);
        }
    }
}

/// Writes the latest preview of each camera to `<directory>/<name>.png`.
pub struct SnapshotSurface {
    directory: PathBuf,
}

impl SnapshotSurface {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, CameraError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    pub fn snapshot_path(&self, name: &str) -> PathBuf {
        self.directory
            .join(format!("{}.png", name.to_lowercase().replace(' ', "_")))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl DisplaySurface for SnapshotSurface {
    fn show(&self, name: &str, image: &RgbImage) -> Result<(), CameraError> {
        let path = self.snapshot_path(name);
        // Write beside the target and rename so readers never see half a PNG.
        let partial = path.with_extension("png.part");
        image
            .save_with_format(&partial, image::ImageFormat::Png)
            .map_err(|e| CameraError::Display(format!("{}: {}", name, e)))?;
        std::fs::rename(&partial, &path)?;
        Ok(())
    }

    fn destroy(&self, name: &str) {
        log::debug!(
            "Snapshot surface {:?} released, last preview kept at {:?}",
            name,
            self.snapshot_path(name)
        );
    }
}
