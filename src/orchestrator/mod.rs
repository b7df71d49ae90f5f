//! Capture orchestration
//!
//! [`CaptureOrchestrator`] brings every camera up, runs one pump thread per
//! camera while preview or recording is active, and tears everything down
//! in order. All control operations run on the caller's thread; frames never
//! pass through it.
//!
//! ```rust,no_run
//! use multicam::orchestrator::CaptureOrchestrator;
//! use multicam::testing::SyntheticSystem;
//!
//! # fn main() -> Result<(), multicam::CaptureError> {
//! let mut orchestrator = CaptureOrchestrator::builder(SyntheticSystem::new(2)).initialize()?;
//! orchestrator.start_display()?;
//! orchestrator.start_recording()?;
//! let summary = orchestrator.stop_recording(true)?;
//! println!("{} frames recorded", summary.total_frames());
//! orchestrator.shutdown();
//! # Ok(())
//! # }
//! ```

mod pump;
mod session;

pub use pump::{SourceTelemetry, TelemetrySnapshot};
pub use session::{OrchestratorState, RecordingSession, RecordingSummary};

use crate::config::MulticamConfig;
use crate::display::{DisplaySink, DisplaySurface, HeadlessSurface, SnapshotSurface};
use crate::errors::CaptureError;
use crate::recording::naming::{recording_path, session_timestamp};
use crate::recording::{
    container_for, delete_recording, ContainerFactory, RecordedFile, RecordingConfig,
    RecordingSink, SinkStatus,
};
use crate::source::{CameraHandle, SourceSystem};
use crate::types::CameraFormat;
use chrono::Local;
use crossbeam_channel::{Receiver, Sender};
use pump::{Pump, PumpContext, SessionFlags};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Static facts about one camera, kept on the control thread.
struct SourceInfo {
    index: usize,
    description: String,
    format: CameraFormat,
    telemetry: Arc<SourceTelemetry>,
}

/// Per-camera line of a [`StatusReport`].
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub index: usize,
    pub description: String,
    pub format: String,
    #[serde(flatten)]
    pub telemetry: TelemetrySnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub state: OrchestratorState,
    pub displaying: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording: Option<RecordingSession>,
    pub sources: Vec<SourceStatus>,
}

/// Configures and initializes a [`CaptureOrchestrator`].
pub struct OrchestratorBuilder {
    system: Box<dyn SourceSystem>,
    config: MulticamConfig,
    surface: Option<Arc<dyn DisplaySurface>>,
    container: Option<Arc<dyn ContainerFactory>>,
    sources: Option<usize>,
}

impl OrchestratorBuilder {
    pub fn new(system: impl SourceSystem + 'static) -> Self {
        Self::from_boxed(Box::new(system))
    }

    pub fn from_boxed(system: Box<dyn SourceSystem>) -> Self {
        Self {
            system,
            config: MulticamConfig::default(),
            surface: None,
            container: None,
            sources: None,
        }
    }

    pub fn config(mut self, config: MulticamConfig) -> Self {
        self.config = config;
        self
    }

    /// Where previews are drawn. Defaults to a [`SnapshotSurface`] when
    /// `display.snapshot_directory` is set, otherwise a [`HeadlessSurface`].
    pub fn surface(mut self, surface: Arc<dyn DisplaySurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    /// Container for recordings. Defaults to `recording.container`.
    pub fn container(mut self, container: Arc<dyn ContainerFactory>) -> Self {
        self.container = Some(container);
        self
    }

    /// Open this many cameras instead of `camera.max_sources`.
    pub fn sources(mut self, count: usize) -> Self {
        self.sources = Some(count);
        self
    }

    /// Enumerate, open, configure and start every camera. On failure every
    /// camera opened so far is closed and the camera system is terminated.
    pub fn initialize(self) -> Result<CaptureOrchestrator, CaptureError> {
        let OrchestratorBuilder {
            mut system,
            config,
            surface,
            container,
            sources,
        } = self;

        let prepared = prepare(&config, surface, container, sources);
        let (surface, container) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                system.terminate();
                return Err(e);
            }
        };

        let handles = match open_sources(system.as_mut(), &config, sources) {
            Ok(handles) => handles,
            Err(e) => {
                system.terminate();
                return Err(e);
            }
        };

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let mut infos = Vec::with_capacity(handles.len());
        let mut parked = Vec::with_capacity(handles.len());
        for handle in handles {
            let telemetry = Arc::new(SourceTelemetry::default());
            infos.push(SourceInfo {
                index: handle.index(),
                description: handle.describe(),
                format: handle.format(),
                telemetry: telemetry.clone(),
            });
            parked.push(PumpContext::new(handle, telemetry));
        }

        log::info!(
            "Capture orchestrator ready with {} camera(s) at {}",
            infos.len(),
            config.camera.format()
        );

        Ok(CaptureOrchestrator {
            config,
            system,
            surface,
            container,
            sources: infos,
            parked,
            running: Vec::new(),
            flags: Arc::new(SessionFlags::default()),
            events_tx,
            events_rx,
            recording: None,
            lost_recordings: Vec::new(),
            displaying: false,
            state: OrchestratorState::Idle,
            shut_down: false,
        })
    }
}

type Prepared = (Arc<dyn DisplaySurface>, Arc<dyn ContainerFactory>);

fn prepare(
    config: &MulticamConfig,
    surface: Option<Arc<dyn DisplaySurface>>,
    container: Option<Arc<dyn ContainerFactory>>,
    sources: Option<usize>,
) -> Result<Prepared, CaptureError> {
    config.validate().map_err(CaptureError::Config)?;
    if sources == Some(0) {
        return Err(CaptureError::Config("at least one camera must be requested".to_string()));
    }

    let container = match container {
        Some(container) => container,
        None => container_for(&config.recording.container)
            .map_err(|e| CaptureError::Config(e.to_string()))?,
    };

    let surface: Arc<dyn DisplaySurface> = match (surface, &config.display.snapshot_directory) {
        (Some(surface), _) => surface,
        (None, Some(dir)) => Arc::new(
            SnapshotSurface::new(dir).map_err(|e| CaptureError::Config(e.to_string()))?,
        ),
        (None, None) => Arc::new(HeadlessSurface::new()),
    };

    Ok((surface, container))
}

fn open_sources(
    system: &mut dyn SourceSystem,
    config: &MulticamConfig,
    requested: Option<usize>,
) -> Result<Vec<CameraHandle>, CaptureError> {
    let available = system.camera_count().map_err(CaptureError::Backend)?;
    if available == 0 {
        log::error!("No cameras found");
        return Err(CaptureError::NoSourcesFound);
    }

    let wanted = requested.or(config.camera.max_sources).unwrap_or(available);
    if wanted > available {
        log::warn!(
            "{} camera(s) requested but only {} found; using {}",
            wanted,
            available,
            available
        );
    }
    let count = wanted.min(available);
    log::info!("Opening {} of {} camera(s)", count, available);

    let format = config.camera.format();
    let mut handles: Vec<CameraHandle> = Vec::with_capacity(count);
    for index in 0..count {
        let result = system.create_source(index).and_then(|source| {
            let mut handle = CameraHandle::new(index, format, source);
            match handle.bring_up() {
                Ok(()) => Ok(handle),
                Err(e) => {
                    handle.shut_down();
                    Err(e)
                }
            }
        });

        match result {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                let error = CaptureError::from_init(index, e);
                log::error!("Initialization failed: {}", error);
                while let Some(mut handle) = handles.pop() {
                    handle.shut_down();
                }
                return Err(error);
            }
        }
    }
    Ok(handles)
}

pub struct CaptureOrchestrator {
    config: MulticamConfig,
    system: Box<dyn SourceSystem>,
    surface: Arc<dyn DisplaySurface>,
    container: Arc<dyn ContainerFactory>,
    sources: Vec<SourceInfo>,
    /// Contexts of cameras without a running pump
    parked: Vec<PumpContext>,
    running: Vec<Pump>,
    flags: Arc<SessionFlags>,
    events_tx: Sender<CaptureError>,
    events_rx: Receiver<CaptureError>,
    recording: Option<RecordingSession>,
    /// Recordings lost together with their pump thread
    lost_recordings: Vec<RecordedFile>,
    displaying: bool,
    state: OrchestratorState,
    shut_down: bool,
}

impl CaptureOrchestrator {
    pub fn builder(system: impl SourceSystem + 'static) -> OrchestratorBuilder {
        OrchestratorBuilder::new(system)
    }

    pub fn config(&self) -> &MulticamConfig {
        &self.config
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Cameras that have not disconnected.
    pub fn live_sources(&self) -> Vec<usize> {
        self.sources
            .iter()
            .filter(|s| !s.telemetry.is_disconnected())
            .map(|s| s.index)
            .collect()
    }

    pub fn is_displaying(&self) -> bool {
        self.displaying
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn recording_session(&self) -> Option<&RecordingSession> {
        self.recording.as_ref()
    }

    pub fn telemetry(&self, index: usize) -> Option<Arc<SourceTelemetry>> {
        self.sources
            .iter()
            .find(|s| s.index == index)
            .map(|s| s.telemetry.clone())
    }

    /// Runtime errors raised by pumps since the last call: disconnects and
    /// write failures.
    pub fn drain_events(&self) -> Vec<CaptureError> {
        self.events_rx.try_iter().collect()
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            state: self.state,
            displaying: self.displaying,
            recording: self.recording.clone(),
            sources: self
                .sources
                .iter()
                .map(|s| SourceStatus {
                    index: s.index,
                    description: s.description.clone(),
                    format: s.format.to_string(),
                    telemetry: s.telemetry.snapshot(),
                })
                .collect(),
        }
    }

    pub fn start_display(&mut self) -> Result<(), CaptureError> {
        self.ensure_running()?;
        if self.displaying {
            log::warn!("Preview is already running");
            return Err(CaptureError::AlreadyDisplaying);
        }

        self.park();
        for ctx in self.parked.iter_mut().filter(|c| c.is_live()) {
            ctx.display = Some(DisplaySink::new(
                ctx.index(),
                self.surface.clone(),
                &self.config.display,
            ));
        }
        self.displaying = true;
        self.flags.set_displaying(true);
        self.respawn();
        self.set_state(OrchestratorState::from_sessions(true, self.is_recording()));
        log::info!("Preview started");
        Ok(())
    }

    /// Close every preview surface. Does nothing when no preview is running.
    pub fn stop_display(&mut self) -> Result<(), CaptureError> {
        self.ensure_running()?;
        if !self.displaying {
            return Ok(());
        }

        self.flags.set_displaying(false);
        self.park();
        for ctx in self.parked.iter_mut() {
            if let Some(display) = ctx.display.take() {
                display.close();
            }
        }
        self.displaying = false;
        self.respawn();
        self.set_state(OrchestratorState::from_sessions(false, self.is_recording()));
        log::info!("Preview stopped");
        Ok(())
    }

    /// Open one file per live camera and start writing frames to them. If
    /// any file cannot be created the files already created are removed and
    /// nothing changes.
    pub fn start_recording(&mut self) -> Result<RecordingSession, CaptureError> {
        self.ensure_running()?;
        if self.recording.is_some() {
            log::warn!("Recording is already running");
            return Err(CaptureError::AlreadyRecording);
        }

        let live = self.live_sources();
        if live.is_empty() {
            return Err(CaptureError::RecordingStartFailed {
                index: None,
                message: "no live cameras".to_string(),
            });
        }

        let storage = &self.config.recording;
        let directory = PathBuf::from(&storage.output_directory);
        std::fs::create_dir_all(&directory).map_err(|e| CaptureError::RecordingStartFailed {
            index: None,
            message: format!("cannot create {:?}: {}", directory, e),
        })?;

        let started_at = Local::now();
        let extension = self.container.extension();
        let timestamp =
            session_timestamp(&directory, &storage.file_prefix, extension, &live, started_at);
        let base_config = RecordingConfig::for_format(self.config.camera.format(), storage.quality);

        let mut sinks: Vec<RecordingSink> = Vec::with_capacity(live.len());
        for &index in &live {
            let path = recording_path(&directory, &storage.file_prefix, index, &timestamp, extension);
            let config = base_config
                .clone()
                .with_title(format!("{} camera {}", storage.file_prefix, index));
            match RecordingSink::create(index, path.clone(), self.container.as_ref(), &config) {
                Ok(sink) => sinks.push(sink),
                Err(e) => {
                    log::error!("Camera {}: cannot create {:?}: {}", index, path, e);
                    for sink in sinks {
                        sink.abort("recording start rolled back");
                    }
                    return Err(CaptureError::RecordingStartFailed {
                        index: Some(index),
                        message: e.to_string(),
                    });
                }
            }
        }

        let session = RecordingSession {
            id: Uuid::new_v4(),
            timestamp,
            started_at,
            directory,
            prefix: storage.file_prefix.clone(),
            files: sinks.iter().map(|s| (s.index(), s.path().to_path_buf())).collect(),
        };

        self.park();
        self.lost_recordings.clear();
        for sink in sinks {
            let index = sink.index();
            match self.parked.iter_mut().find(|c| c.index() == index) {
                Some(ctx) if ctx.is_live() => {
                    ctx.telemetry.reset_written();
                    ctx.closed_recording = None;
                    ctx.recording = Some(sink);
                }
                Some(ctx) => {
                    ctx.closed_recording = Some(sink.abort("camera disconnected"));
                }
                None => {
                    self.lost_recordings.push(sink.abort("camera unavailable"));
                }
            }
        }
        self.flags.set_recording(true);
        self.respawn();

        log::info!(
            "Recording {} camera(s) to {:?} ({})",
            session.files.len(),
            session.directory,
            session.timestamp
        );
        self.recording = Some(session.clone());
        self.set_state(OrchestratorState::Recording);
        Ok(session)
    }

    /// Close every recording file. With `save == false` the files are
    /// deleted. Returns once no frame can be written any more.
    pub fn stop_recording(&mut self, save: bool) -> Result<RecordingSummary, CaptureError> {
        self.ensure_running()?;
        if self.recording.is_none() {
            log::warn!("Not recording");
            return Err(CaptureError::NotRecording);
        }

        self.set_state(OrchestratorState::Stopping);
        self.flags.set_recording(false);
        self.park();
        let Some(session) = self.recording.take() else {
            return Err(CaptureError::NotRecording);
        };

        let mut files: Vec<RecordedFile> = self.lost_recordings.drain(..).collect();
        for ctx in self.parked.iter_mut() {
            if let Some(file) = ctx.closed_recording.take() {
                files.push(file);
            }
            if let Some(sink) = ctx.recording.take() {
                files.push(sink.finish(SinkStatus::Completed));
            }
        }

        if !save {
            for (_, path) in &session.files {
                delete_recording(path);
            }
            for file in files.iter_mut() {
                file.kept = false;
            }
            log::info!("Recording {} discarded", session.timestamp);
        }

        let mut summary = RecordingSummary::new(&session, save, files);
        if save {
            log::info!(
                "Recording {} saved: {} file(s), {} frames",
                session.timestamp,
                summary.kept_files().count(),
                summary.total_frames()
            );
            if self.config.recording.write_manifest {
                let path = session.manifest_path();
                match session::write_manifest(&summary, &path) {
                    Ok(()) => summary.manifest = Some(path),
                    Err(e) => log::warn!("Failed to write manifest {:?}: {}", path, e),
                }
            }
        }

        self.respawn();
        self.set_state(OrchestratorState::from_sessions(self.displaying, false));
        Ok(summary)
    }

    /// Stop everything, close every camera, then release the camera system.
    /// An active recording is kept or discarded per
    /// `recording.save_on_shutdown`. Safe to call more than once.
    pub fn shutdown(&mut self) -> Option<RecordingSummary> {
        if self.shut_down {
            return None;
        }
        log::info!("Shutting down capture orchestrator");

        if let Err(e) = self.stop_display() {
            log::warn!("Failed to stop preview: {}", e);
        }

        let summary = if self.recording.is_some() {
            let save = self.config.recording.save_on_shutdown;
            log::warn!(
                "Recording still active at shutdown; {}",
                if save { "saving" } else { "discarding" }
            );
            match self.stop_recording(save) {
                Ok(summary) => Some(summary),
                Err(e) => {
                    log::error!("Failed to stop recording: {}", e);
                    None
                }
            }
        } else {
            None
        };

        self.flags.set_displaying(false);
        self.flags.set_recording(false);
        self.park();
        while let Some(mut ctx) = self.parked.pop() {
            ctx.handle.shut_down();
        }
        self.system.terminate();

        self.shut_down = true;
        self.set_state(OrchestratorState::Idle);
        log::info!("Capture orchestrator shut down");
        summary
    }

    fn ensure_running(&self) -> Result<(), CaptureError> {
        if self.shut_down {
            Err(CaptureError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn set_state(&mut self, state: OrchestratorState) {
        if self.state != state {
            log::debug!("State {} -> {}", self.state, state);
            self.state = state;
        }
    }

    /// Stop every pump and take the contexts back. After this returns no
    /// sink is in use by another thread.
    fn park(&mut self) {
        for pump in &self.running {
            pump.request_stop();
        }
        let pumps: Vec<Pump> = self.running.drain(..).collect();
        for pump in pumps {
            let index = pump.index();
            match pump.join() {
                Some(ctx) => self.parked.push(ctx),
                None => self.lose_source(index, "pump thread panicked"),
            }
        }
        self.parked.sort_by_key(|c| c.index());
    }

    /// A camera's context is gone with its thread. Mark the camera
    /// disconnected and remove whatever its recording left on disk.
    fn lose_source(&mut self, index: usize, reason: &str) {
        let mut frames_written = 0;
        if let Some(info) = self.sources.iter().find(|s| s.index == index) {
            info.telemetry.mark_disconnected();
            frames_written = info.telemetry.frames_written();
        }

        let path = self
            .recording
            .as_ref()
            .and_then(|session| session.files.iter().find(|(i, _)| *i == index))
            .map(|(_, path)| path.clone());
        if let Some(path) = path {
            delete_recording(&path);
            self.lost_recordings.push(RecordedFile {
                index,
                path,
                status: SinkStatus::Failed,
                frames_written,
                bytes_written: 0,
                kept: false,
                error: Some(reason.to_string()),
            });
        }

        let _ = self
            .events_tx
            .send(CaptureError::SourceDisconnected { index });
    }

    /// Start pumps for live cameras if a session is active.
    fn respawn(&mut self) {
        if !self.flags.any() {
            return;
        }
        let timeout = self.config.camera.wait_timeout();
        let mut idle = Vec::new();
        for ctx in std::mem::take(&mut self.parked) {
            if !ctx.is_live() {
                idle.push(ctx);
                continue;
            }
            let index = ctx.index();
            match pump::spawn(ctx, self.flags.clone(), self.events_tx.clone(), timeout) {
                Ok(pump) => self.running.push(pump),
                Err(e) => {
                    log::error!("{}", e);
                    self.lose_source(index, "pump thread could not be started");
                }
            }
        }
        self.parked = idle;
    }
}

impl Drop for CaptureOrchestrator {
    fn drop(&mut self) {
        if !self.shut_down {
            self.shutdown();
        }
    }
}
