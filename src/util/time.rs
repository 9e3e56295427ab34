//! Time utilities for the simulation loops

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in nanoseconds (wire timestamps and pings)
pub fn unix_nanos() -> i64 {
    i64::try_from(unix_duration().as_nanos()).unwrap_or(i64::MAX)
}

fn unix_duration() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Measures wall-clock time between loop iterations
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Elapsed milliseconds since the last lap, restarting the timer.
    pub fn lap_ms(&mut self) -> f64 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.start).as_secs_f64() * 1000.0;
        self.start = now;
        elapsed
    }

    pub fn reset(&mut self) {
        self.start = Instant::now();
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lap_restarts_the_timer() {
        let mut timer = Timer::new();
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.lap_ms() >= 5.0);
        assert!(timer.elapsed_ms() < 5.0);
    }

    #[test]
    fn wall_clock_is_after_2020() {
        assert!(unix_nanos() > 1_577_836_800_000_000_000);
    }
}
