//! Frame-ready signalling between a camera backend and its pump
//!
//! Backends deliver frames from their own threads or driver callbacks. A
//! [`FrameSignal`] turns each delivery into an event on a bounded queue and a
//! [`SignalWaiter`] lets the pump block on that queue for at most a given
//! timeout, so a pump never spins and always gets back to its stop check.

use crate::errors::CameraError;
use crate::types::Frame;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

enum SignalEvent {
    Frame(Frame),
    Error(CameraError),
}

/// Create a connected signal/waiter pair holding at most `capacity` pending events.
pub fn frame_signal(capacity: usize) -> (FrameSignal, SignalWaiter) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        FrameSignal {
            tx,
            dropped: dropped.clone(),
        },
        SignalWaiter { rx, dropped },
    )
}

/// Producer half, owned by the backend.
#[derive(Clone)]
pub struct FrameSignal {
    tx: Sender<SignalEvent>,
    dropped: Arc<AtomicU64>,
}

impl FrameSignal {
    /// Queue a frame without blocking. Returns `false` when the frame was
    /// dropped because the queue is full or the waiter is gone.
    pub fn notify(&self, frame: Frame) -> bool {
        match self.tx.try_send(SignalEvent::Frame(frame)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Queue a backend error for the waiter. Errors are never dropped
    /// silently; a full queue blocks the producer for at most `timeout`.
    pub fn notify_error(&self, error: CameraError, timeout: Duration) -> bool {
        self.tx
            .send_timeout(SignalEvent::Error(error), timeout)
            .is_ok()
    }

    /// Count a frame the backend had to discard before it reached the queue.
    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer half, owned by the pump through its frame source.
pub struct SignalWaiter {
    rx: Receiver<SignalEvent>,
    dropped: Arc<AtomicU64>,
}

impl SignalWaiter {
    /// Wait for the next frame. Returns [`CameraError::Timeout`] when nothing
    /// arrived in time and [`CameraError::Disconnected`] once every producer
    /// has gone away and the queue is drained.
    pub fn wait(&self, timeout: Duration) -> Result<Frame, CameraError> {
        let event = if timeout.is_zero() {
            self.rx.try_recv().map_err(|e| match e {
                crossbeam_channel::TryRecvError::Empty => CameraError::Timeout,
                crossbeam_channel::TryRecvError::Disconnected => {
                    CameraError::Disconnected("frame signal closed".to_string())
                }
            })?
        } else {
            self.rx.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => CameraError::Timeout,
                RecvTimeoutError::Disconnected => {
                    CameraError::Disconnected("frame signal closed".to_string())
                }
            })?
        };

        match event {
            SignalEvent::Frame(frame) => Ok(frame),
            SignalEvent::Error(error) => Err(error),
        }
    }

    /// Frames queued and not yet waited for.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Frames dropped on the producer side so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PooledBuffer;
    use crate::types::PixelLayout;
    use std::time::Instant;

    fn frame(sequence: u64) -> Frame {
        Frame::new(
            0,
            sequence,
            0,
            1,
            1,
            PixelLayout::Mono8,
            PooledBuffer::detached(vec![0]),
        )
    }

    #[test]
    fn test_frames_arrive_in_order() {
        let (signal, waiter) = frame_signal(4);
        for seq in 1..=3 {
            assert!(signal.notify(frame(seq)));
        }
        for seq in 1..=3 {
            let f = waiter.wait(Duration::from_millis(10)).unwrap();
            assert_eq!(f.sequence, seq);
        }
    }

    #[test]
    fn test_wait_times_out() {
        let (_signal, waiter) = frame_signal(1);
        let start = Instant::now();
        let result = waiter.wait(Duration::from_millis(20));
        assert!(matches!(result, Err(CameraError::Timeout)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_zero_timeout_polls() {
        let (signal, waiter) = frame_signal(1);
        assert!(matches!(waiter.wait(Duration::ZERO), Err(CameraError::Timeout)));
        signal.notify(frame(1));
        assert!(waiter.wait(Duration::ZERO).is_ok());
    }

    #[test]
    fn test_full_queue_drops_newest() {
        let (signal, waiter) = frame_signal(1);
        assert!(signal.notify(frame(1)));
        assert!(!signal.notify(frame(2)));
        assert_eq!(waiter.dropped(), 1);
        assert_eq!(waiter.wait(Duration::ZERO).unwrap().sequence, 1);
    }

    #[test]
    fn test_producer_gone_reports_disconnect_after_drain() {
        let (signal, waiter) = frame_signal(2);
        signal.notify(frame(1));
        drop(signal);
        assert!(waiter.wait(Duration::from_millis(10)).is_ok());
        assert!(matches!(
            waiter.wait(Duration::from_millis(10)),
            Err(CameraError::Disconnected(_))
        ));
    }

    #[test]
    fn test_error_events_reach_waiter() {
        let (signal, waiter) = frame_signal(1);
        assert!(signal.notify_error(CameraError::Grab("crc".to_string()), Duration::from_millis(10)));
        assert!(matches!(
            waiter.wait(Duration::from_millis(10)),
            Err(CameraError::Grab(_))
        ));
    }
}
