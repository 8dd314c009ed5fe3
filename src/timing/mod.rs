//! Monotonic timing for frames and alignment runs
//!
//! Frame timestamps and per-tool elapsed times all derive from one
//! [`SessionClock`] so they order consistently across stages.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic clock shared by the frame source and the session driver.
#[derive(Debug, Clone)]
pub struct SessionClock {
    start: Arc<Instant>,
}

impl SessionClock {
    /// Create a new clock with the current instant as time zero
    pub fn new() -> Self {
        Self {
            start: Arc::new(Instant::now()),
        }
    }

    /// Share the same timebase between components.
    pub fn from_instant(start: Instant) -> Self {
        Self {
            start: Arc::new(start),
        }
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Elapsed time in whole microseconds, used as the frame timestamp.
    #[inline]
    pub fn timestamp_us(&self) -> u64 {
        self.elapsed().as_micros() as u64
    }

    pub fn start_instant(&self) -> Instant {
        *self.start
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Stopwatch for a single tool's alignment, started when the tool is
/// confirmed at the controlled point.
#[derive(Debug, Clone, Copy)]
pub struct ToolTimer {
    started: Instant,
}

impl ToolTimer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Format a duration as `"{m}m {s}s"`, the way per-tool run times are reported.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_monotonic() {
        let clock = SessionClock::new();
        let a = clock.timestamp_us();
        std::thread::sleep(Duration::from_millis(2));
        let b = clock.timestamp_us();
        assert!(b > a);
    }

    #[test]
    fn test_shared_timebase() {
        let clock = SessionClock::new();
        let shared = SessionClock::from_instant(clock.start_instant());
        assert_eq!(clock.start_instant(), shared.start_instant());
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "0m 0s");
        assert_eq!(format_elapsed(Duration::from_secs(125)), "2m 5s");
    }
}
