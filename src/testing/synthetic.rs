//! Synthetic camera backend
//!
//! Produces moving RGB gradients at the configured frame rate from one thread
//! per camera, through the same buffer pool and frame signal a hardware
//! backend uses. Each camera follows a [`SourceScript`] that can inject the
//! failures real cameras show: a rejected configuration parameter, a device
//! that cannot be opened, an unplugged cable, a stalled stream or periodic
//! grab errors. A shared [`SyntheticProbe`] exposes what is open, so tests
//! can check that nothing leaks.

use crate::errors::CameraError;
use crate::pool::{BufferPool, PooledBuffer};
use crate::signal::{frame_signal, FrameSignal, SignalWaiter};
use crate::source::{FrameSource, SourceSystem, CONFIGURATION_PARAMETERS};
use crate::timing::StreamClock;
use crate::types::{CameraFormat, Frame, PixelLayout};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Behaviour of one synthetic camera.
#[derive(Debug, Clone, Default)]
pub struct SourceScript {
    pub fail_open: bool,
    pub reject_parameter: Option<String>,
    /// Report a disconnect instead of frame `n + 1`
    pub disconnect_after: Option<u64>,
    /// Never deliver a frame
    pub stalled: bool,
    /// Report a grab error instead of every `n`-th frame
    pub grab_error_every: Option<u64>,
    /// Override the frame interval derived from the configured fps
    pub frame_interval: Option<Duration>,
}

impl SourceScript {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn reject(mut self, parameter: impl Into<String>) -> Self {
        self.reject_parameter = Some(parameter.into());
        self
    }

    pub fn disconnect_after(mut self, frames: u64) -> Self {
        self.disconnect_after = Some(frames);
        self
    }

    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    pub fn grab_error_every(mut self, n: u64) -> Self {
        self.grab_error_every = Some(n.max(1));
        self
    }

    pub fn frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }
}

/// Live counters shared by a synthetic system and its cameras.
#[derive(Debug, Default)]
pub struct SyntheticProbe {
    created: AtomicUsize,
    open: AtomicUsize,
    streaming: AtomicUsize,
    closed: AtomicUsize,
    terminated: AtomicBool,
}

impl SyntheticProbe {
    pub fn created_sources(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Cameras currently open.
    pub fn open_sources(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Cameras currently streaming.
    pub fn streaming_sources(&self) -> usize {
        self.streaming.load(Ordering::SeqCst)
    }

    pub fn closed_sources(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

pub struct SyntheticSystem {
    scripts: Vec<SourceScript>,
    buffer_count: usize,
    probe: Arc<SyntheticProbe>,
}

impl SyntheticSystem {
    /// `count` healthy cameras.
    pub fn new(count: usize) -> Self {
        Self::with_scripts(vec![SourceScript::healthy(); count])
    }

    pub fn with_scripts(scripts: Vec<SourceScript>) -> Self {
        Self {
            scripts,
            buffer_count: 8,
            probe: Arc::new(SyntheticProbe::default()),
        }
    }

    pub fn with_buffer_count(mut self, buffer_count: usize) -> Self {
        self.buffer_count = buffer_count.max(1);
        self
    }

    pub fn probe(&self) -> Arc<SyntheticProbe> {
        self.probe.clone()
    }
}

impl SourceSystem for SyntheticSystem {
    fn camera_count(&mut self) -> Result<usize, CameraError> {
        Ok(self.scripts.len())
    }

    fn create_source(&mut self, index: usize) -> Result<Box<dyn FrameSource>, CameraError> {
        let script = self
            .scripts
            .get(index)
            .cloned()
            .ok_or_else(|| CameraError::Open(format!("no synthetic camera {index}")))?;
        self.probe.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticSource {
            index,
            script,
            buffer_count: self.buffer_count,
            format: None,
            opened: false,
            waiter: None,
            producer: None,
            probe: self.probe.clone(),
        }))
    }

    fn terminate(&mut self) {
        self.probe.terminated.store(true, Ordering::SeqCst);
        log::debug!("Synthetic camera system terminated");
    }
}

struct Producer {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct SyntheticSource {
    index: usize,
    script: SourceScript,
    buffer_count: usize,
    format: Option<CameraFormat>,
    opened: bool,
    waiter: Option<SignalWaiter>,
    producer: Option<Producer>,
    probe: Arc<SyntheticProbe>,
}

impl SyntheticSource {
    fn stop_producer(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.stop.store(true, Ordering::Release);
            if producer.handle.join().is_err() {
                log::warn!("Synthetic camera {} producer panicked", self.index);
            }
            self.probe.streaming.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self) -> Result<(), CameraError> {
        if self.script.fail_open {
            return Err(CameraError::Open(format!(
                "synthetic camera {} is busy",
                self.index
            )));
        }
        if !self.opened {
            self.opened = true;
            self.probe.open.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn configure(&mut self, format: &CameraFormat) -> Result<(), CameraError> {
        if !self.opened {
            return Err(CameraError::Stream("camera is not open".to_string()));
        }
        for parameter in CONFIGURATION_PARAMETERS {
            if self.script.reject_parameter.as_deref() == Some(parameter) {
                return Err(CameraError::configuration(parameter, "rejected by device"));
            }
        }
        self.format = Some(*format);
        Ok(())
    }

    fn start_stream(&mut self) -> Result<(), CameraError> {
        if self.producer.is_some() {
            return Ok(());
        }
        let format = self
            .format
            .ok_or_else(|| CameraError::Stream("camera is not configured".to_string()))?;

        let buffer_len = format.width as usize * format.height as usize * 3;
        let pool = BufferPool::new(self.buffer_count, buffer_len);
        let (signal, waiter) = frame_signal(self.buffer_count);
        let stop = Arc::new(AtomicBool::new(false));

        let worker = ProducerLoop {
            index: self.index,
            format,
            interval: self
                .script
                .frame_interval
                .unwrap_or_else(|| format.frame_interval()),
            script: self.script.clone(),
            pool,
            signal,
            stop: stop.clone(),
        };
        let handle = std::thread::Builder::new()
            .name(format!("synthetic-cam-{}", self.index))
            .spawn(move || worker.run())
            .map_err(|e| CameraError::Stream(format!("spawn failed: {e}")))?;

        self.waiter = Some(waiter);
        self.producer = Some(Producer { stop, handle });
        self.probe.streaming.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop_stream(&mut self) -> Result<(), CameraError> {
        self.stop_producer();
        self.waiter = None;
        Ok(())
    }

    fn close(&mut self) -> Result<(), CameraError> {
        self.stop_stream()?;
        if self.opened {
            self.opened = false;
            self.probe.open.fetch_sub(1, Ordering::SeqCst);
            self.probe.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn wait_for_frame(&mut self, timeout: Duration) -> Result<Frame, CameraError> {
        match &self.waiter {
            Some(waiter) => waiter.wait(timeout),
            None => Err(CameraError::Stream("camera is not streaming".to_string())),
        }
    }

    fn dropped_frames(&self) -> u64 {
        self.waiter.as_ref().map(SignalWaiter::dropped).unwrap_or(0)
    }

    fn describe(&self) -> String {
        format!("synthetic camera {}", self.index)
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.stop_producer();
        if self.opened {
            self.opened = false;
            self.probe.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

struct ProducerLoop {
    index: usize,
    format: CameraFormat,
    interval: Duration,
    script: SourceScript,
    pool: BufferPool,
    signal: FrameSignal,
    stop: Arc<AtomicBool>,
}

impl ProducerLoop {
    fn run(self) {
        let clock = StreamClock::new();
        let mut sequence = 0u64;

        while !self.stop.load(Ordering::Acquire) {
            std::thread::sleep(self.interval);
            if self.script.stalled {
                continue;
            }
            sequence += 1;

            if self.script.disconnect_after.is_some_and(|n| sequence > n) {
                log::debug!("Synthetic camera {} unplugged", self.index);
                self.signal.notify_error(
                    CameraError::Disconnected(format!("synthetic camera {} unplugged", self.index)),
                    self.interval,
                );
                // Dropping the signal closes the queue for the waiter.
                return;
            }

            if self
                .script
                .grab_error_every
                .is_some_and(|n| sequence % n == 0)
            {
                self.signal.notify_error(
                    CameraError::Grab(format!("incomplete frame {sequence}")),
                    self.interval,
                );
                continue;
            }

            let Some(mut buffer) = self.pool.try_acquire() else {
                // Every buffer is still held downstream.
                self.signal.record_drop();
                continue;
            };
            fill_gradient(&mut buffer, self.format.width, self.format.height, sequence);
            let frame = Frame::new(
                self.index,
                sequence,
                clock.elapsed_us(),
                self.format.width,
                self.format.height,
                PixelLayout::Rgb8,
                buffer,
            );
            self.signal.notify(frame);
        }
    }
}

/// Gradient that shifts with every frame, so consecutive frames differ.
fn fill_gradient(data: &mut [u8], width: u32, height: u32, frame_number: u64) {
    let base = (frame_number % 256) as u8;
    let w = width as usize;
    for (y, row) in data.chunks_exact_mut(w * 3).take(height as usize).enumerate() {
        for (x, px) in row.chunks_exact_mut(3).enumerate() {
            px[0] = base.wrapping_add((x % 256) as u8);
            px[1] = base.wrapping_add((y % 256) as u8);
            px[2] = base.wrapping_add(((x + y) % 256) as u8);
        }
    }
}

/// A standalone synthetic RGB frame, outside any pool.
pub fn synthetic_video_frame(frame_number: u64, width: u32, height: u32) -> Frame {
    let mut data = vec![0u8; width as usize * height as usize * 3];
    fill_gradient(&mut data, width, height, frame_number);
    Frame::new(
        0,
        frame_number,
        0,
        width,
        height,
        PixelLayout::Rgb8,
        PooledBuffer::detached(data),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn started(script: SourceScript) -> (SyntheticSystem, Box<dyn FrameSource>) {
        let mut system = SyntheticSystem::with_scripts(vec![script]);
        let mut source = system.create_source(0).unwrap();
        source.open().unwrap();
        source.configure(&CameraFormat::new(16, 8, 200)).unwrap();
        source.start_stream().unwrap();
        (system, source)
    }

    #[test]
    fn test_synthetic_video_frame_correct_size() {
        let frame = synthetic_video_frame(0, 32, 16);
        assert_eq!((frame.width, frame.height), (32, 16));
        assert_eq!(frame.data().len(), 32 * 16 * 3);
    }

    #[test]
    fn test_synthetic_video_frames_differ() {
        let frame0 = synthetic_video_frame(0, 8, 8);
        let frame1 = synthetic_video_frame(1, 8, 8);
        assert_ne!(frame0.data()[0], frame1.data()[0]);
    }

    #[test]
    fn test_frames_are_delivered_in_order() {
        let (system, mut source) = started(SourceScript::healthy());
        let first = source.wait_for_frame(Duration::from_secs(1)).unwrap();
        let second = source.wait_for_frame(Duration::from_secs(1)).unwrap();
        assert!(second.sequence > first.sequence);
        assert_eq!(first.data().len(), 16 * 8 * 3);

        source.close().unwrap();
        assert_eq!(system.probe().open_sources(), 0);
        assert_eq!(system.probe().streaming_sources(), 0);
    }

    #[test]
    fn test_rejected_parameter_is_named() {
        let mut system = SyntheticSystem::with_scripts(vec![SourceScript::healthy().reject("Height")]);
        let mut source = system.create_source(0).unwrap();
        source.open().unwrap();
        let err = source.configure(&CameraFormat::new(16, 8, 30)).unwrap_err();
        assert!(matches!(err, CameraError::Configuration { ref parameter, .. } if parameter == "Height"));
    }

    #[test]
    fn test_disconnect_is_reported() {
        let (_system, mut source) = started(SourceScript::healthy().disconnect_after(2));
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut frames = 0;
        loop {
            match source.wait_for_frame(Duration::from_millis(100)) {
                Ok(_) => frames += 1,
                Err(CameraError::Disconnected(_)) => break,
                Err(_) => {}
            }
            assert!(Instant::now() < deadline, "disconnect never reported");
        }
        assert_eq!(frames, 2);
    }

    #[test]
    fn test_stalled_source_times_out() {
        let (_system, mut source) = started(SourceScript::healthy().stalled());
        assert!(matches!(
            source.wait_for_frame(Duration::from_millis(30)),
            Err(CameraError::Timeout)
        ));
    }

    #[test]
    fn test_held_buffers_stall_producer() {
        let mut system = SyntheticSystem::new(1).with_buffer_count(2);
        let mut source = system.create_source(0).unwrap();
        source.open().unwrap();
        source.configure(&CameraFormat::new(8, 8, 500)).unwrap();
        source.start_stream().unwrap();

        let held: Vec<Frame> = (0..2)
            .map(|_| source.wait_for_frame(Duration::from_secs(1)).unwrap())
            .collect();
        std::thread::sleep(Duration::from_millis(30));
        assert!(source.dropped_frames() > 0);

        drop(held);
        assert!(source.wait_for_frame(Duration::from_secs(1)).is_ok());
    }
}
