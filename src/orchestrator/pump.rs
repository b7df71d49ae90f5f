//! Per-camera pump threads
//!
//! A pump owns one camera and whatever sinks are attached to it for as long
//! as it runs. The orchestrator never touches a camera while its pump is
//! alive: to change sinks it stops the pump, joins it to get the context
//! back, edits the context and spawns a new pump.

use crate::display::DisplaySink;
use crate::errors::{CameraError, CaptureError};
use crate::recording::{RecordedFile, RecordingSink, SinkStatus};
use crate::source::CameraHandle;
use crate::types::Frame;
use crossbeam_channel::Sender;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Which sessions are active. Pumps check these before every fan-out, so
/// clearing a flag stops delivery before the pump is joined.
#[derive(Debug, Default)]
pub(crate) struct SessionFlags {
    displaying: AtomicBool,
    recording: AtomicBool,
}

impl SessionFlags {
    pub fn displaying(&self) -> bool {
        self.displaying.load(Ordering::Acquire)
    }

    pub fn recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    pub fn set_displaying(&self, on: bool) {
        self.displaying.store(on, Ordering::Release);
    }

    pub fn set_recording(&self, on: bool) {
        self.recording.store(on, Ordering::Release);
    }

    pub fn any(&self) -> bool {
        self.displaying() || self.recording()
    }
}

/// Counters a pump publishes while it runs.
#[derive(Debug, Default)]
pub struct SourceTelemetry {
    captured: AtomicU64,
    written: AtomicU64,
    shown: AtomicU64,
    grab_errors: AtomicU64,
    dropped: AtomicU64,
    disconnected: AtomicBool,
}

impl SourceTelemetry {
    pub fn frames_captured(&self) -> u64 {
        self.captured.load(Ordering::Relaxed)
    }

    /// Frames written in the current (or last) recording.
    pub fn frames_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn frames_shown(&self) -> u64 {
        self.shown.load(Ordering::Relaxed)
    }

    pub fn grab_errors(&self) -> u64 {
        self.grab_errors.load(Ordering::Relaxed)
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    pub(crate) fn reset_written(&self) {
        self.written.store(0, Ordering::Relaxed);
    }

    pub(crate) fn mark_disconnected(&self) {
        self.disconnected.store(true, Ordering::Release);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            frames_captured: self.frames_captured(),
            frames_written: self.frames_written(),
            frames_shown: self.frames_shown(),
            grab_errors: self.grab_errors(),
            dropped_frames: self.dropped_frames(),
            disconnected: self.is_disconnected(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    pub frames_captured: u64,
    pub frames_written: u64,
    pub frames_shown: u64,
    pub grab_errors: u64,
    pub dropped_frames: u64,
    pub disconnected: bool,
}

/// Everything a pump owns.
pub(crate) struct PumpContext {
    pub handle: CameraHandle,
    pub display: Option<DisplaySink>,
    pub recording: Option<RecordingSink>,
    /// Outcome of a recording that ended before `stop_recording`
    pub closed_recording: Option<RecordedFile>,
    pub telemetry: Arc<SourceTelemetry>,
}

impl PumpContext {
    pub fn new(handle: CameraHandle, telemetry: Arc<SourceTelemetry>) -> Self {
        Self {
            handle,
            display: None,
            recording: None,
            closed_recording: None,
            telemetry,
        }
    }

    pub fn index(&self) -> usize {
        self.handle.index()
    }

    pub fn is_live(&self) -> bool {
        !self.handle.is_disconnected()
    }

    fn dispatch(&mut self, frame: &Frame, flags: &SessionFlags, events: &Sender<CaptureError>) {
        self.telemetry.captured.fetch_add(1, Ordering::Relaxed);

        if flags.displaying() {
            if let Some(display) = self.display.as_mut() {
                if display.consume(frame) {
                    self.telemetry.shown.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if flags.recording() {
            if let Some(sink) = self.recording.as_mut() {
                match sink.write(frame) {
                    Ok(()) => {
                        self.telemetry.written.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        log::error!("{}; recording stopped for this camera", e);
                        if let Some(sink) = self.recording.take() {
                            self.closed_recording = Some(sink.abort(e.to_string()));
                        }
                        let _ = events.send(e);
                    }
                }
            }
        }
    }

    /// The camera is gone: release its sinks and keep what was recorded.
    fn close_after_disconnect(&mut self) {
        self.handle.mark_disconnected();
        self.telemetry.mark_disconnected();
        if let Some(display) = self.display.take() {
            display.close();
        }
        if let Some(sink) = self.recording.take() {
            self.closed_recording = Some(sink.finish(SinkStatus::Disconnected));
        }
    }
}

pub(crate) struct Pump {
    index: usize,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<PumpContext>,
}

impl Pump {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Wait for the pump to exit and take its context back. `None` when the
    /// thread panicked, in which case the camera was dropped with it.
    pub fn join(self) -> Option<PumpContext> {
        self.request_stop();
        match self.thread.join() {
            Ok(context) => Some(context),
            Err(_) => {
                log::error!("Camera {} pump panicked", self.index);
                None
            }
        }
    }
}

pub(crate) fn spawn(
    context: PumpContext,
    flags: Arc<SessionFlags>,
    events: Sender<CaptureError>,
    timeout: Duration,
) -> Result<Pump, CaptureError> {
    let index = context.index();
    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = stop.clone();
    let thread = std::thread::Builder::new()
        .name(format!("pump-cam{index}"))
        .spawn(move || run(context, &flags, &events, &thread_stop, timeout))
        .map_err(|e| CaptureError::Thread(format!("camera {index}: {e}")))?;
    Ok(Pump {
        index,
        stop,
        thread,
    })
}

fn run(
    mut context: PumpContext,
    flags: &SessionFlags,
    events: &Sender<CaptureError>,
    stop: &AtomicBool,
    timeout: Duration,
) -> PumpContext {
    let index = context.index();
    log::debug!("Camera {} pump started", index);

    while !stop.load(Ordering::Acquire) {
        match context.handle.wait_for_frame(timeout) {
            Ok(frame) => {
                context.dispatch(&frame, flags, events);
                context.handle.release(frame);
                context
                    .telemetry
                    .dropped
                    .store(context.handle.dropped_frames(), Ordering::Relaxed);
            }
            Err(CameraError::Timeout) => {}
            Err(CameraError::Grab(reason)) => {
                context.telemetry.grab_errors.fetch_add(1, Ordering::Relaxed);
                log::warn!("Camera {}: grab error: {}", index, reason);
            }
            Err(e) => {
                log::error!("Camera {} lost: {}", index, e);
                context.close_after_disconnect();
                let _ = events.send(CaptureError::SourceDisconnected { index });
                break;
            }
        }
    }

    log::debug!("Camera {} pump stopped", index);
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceSystem;
    use crate::testing::{SourceScript, SyntheticSystem};
    use crate::types::CameraFormat;
    use std::time::Instant;

    fn context(script: SourceScript) -> (SyntheticSystem, PumpContext) {
        let mut system = SyntheticSystem::with_scripts(vec![script]);
        let source = system.create_source(0).unwrap();
        let mut handle = CameraHandle::new(0, CameraFormat::new(8, 8, 200), source);
        handle.bring_up().unwrap();
        (system, PumpContext::new(handle, Arc::new(SourceTelemetry::default())))
    }

    #[test]
    fn test_flags_default_off() {
        let flags = SessionFlags::default();
        assert!(!flags.any());
        flags.set_recording(true);
        assert!(flags.any() && flags.recording() && !flags.displaying());
    }

    #[test]
    fn test_pump_returns_context_on_stop() {
        let (_system, ctx) = context(SourceScript::healthy());
        let telemetry = ctx.telemetry.clone();
        let (tx, _rx) = crossbeam_channel::unbounded();
        let pump = spawn(ctx, Arc::new(SessionFlags::default()), tx, Duration::from_millis(20)).unwrap();

        std::thread::sleep(Duration::from_millis(50));
        let ctx = pump.join().unwrap();
        assert!(ctx.is_live());
        assert!(telemetry.frames_captured() > 0);
    }

    #[test]
    fn test_disconnect_ends_pump_and_reports() {
        let (_system, ctx) = context(SourceScript::healthy().disconnect_after(3));
        let (tx, rx) = crossbeam_channel::unbounded();
        let pump = spawn(ctx, Arc::new(SessionFlags::default()), tx, Duration::from_millis(20)).unwrap();

        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(event, CaptureError::SourceDisconnected { index: 0 }));

        let started = Instant::now();
        let ctx = pump.join().unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!ctx.is_live());
        assert!(ctx.telemetry.is_disconnected());
    }

    #[test]
    fn test_grab_errors_are_counted_not_fatal() {
        let (_system, ctx) = context(SourceScript::healthy().grab_error_every(2));
        let telemetry = ctx.telemetry.clone();
        let (tx, rx) = crossbeam_channel::unbounded();
        let pump = spawn(ctx, Arc::new(SessionFlags::default()), tx, Duration::from_millis(20)).unwrap();

        std::thread::sleep(Duration::from_millis(80));
        let ctx = pump.join().unwrap();
        assert!(ctx.is_live());
        assert!(telemetry.grab_errors() > 0);
        assert!(rx.try_recv().is_err());
    }
}
