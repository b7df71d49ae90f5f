//! Monotonic clock for frame timestamps
//!
//! Each stream stamps its frames relative to the instant streaming started.

use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct StreamClock {
    start: Arc<Instant>,
}

impl StreamClock {
    /// Start a clock at the current instant.
    pub fn new() -> Self {
        Self {
            start: Arc::new(Instant::now()),
        }
    }

    /// Microseconds since the clock started.
    #[inline]
    pub fn elapsed_us(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    pub fn start_instant(&self) -> Instant {
        *self.start
    }
}

impl Default for StreamClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_clock_is_monotonic() {
        let clock = StreamClock::new();
        let a = clock.elapsed_us();
        std::thread::sleep(Duration::from_millis(2));
        let b = clock.elapsed_us();
        assert!(b > a);
    }

    #[test]
    fn test_clones_share_start() {
        let clock = StreamClock::new();
        let other = clock.clone();
        assert_eq!(clock.start_instant(), other.start_instant());
    }
}
