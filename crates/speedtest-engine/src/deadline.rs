/// Test-duration arithmetic. Pure; no state beyond its two inputs.

use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_DURATION_SECS: i64 = 10;
pub const MIN_DURATION_SECS: i64 = 1;
pub const MAX_DURATION_SECS: i64 = 30;

/// Clamp a requested duration to `[1, 30]` seconds.
pub fn clamp_duration_secs(requested: i64) -> u64 {
    requested.clamp(MIN_DURATION_SECS, MAX_DURATION_SECS) as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineController {
    start: Instant,
    max_duration: Duration,
}

impl DeadlineController {
    /// `max_duration` is clamped to the same `[1, 30]` second window.
    pub fn new(start: Instant, max_duration: Duration) -> Self {
        let max_duration = max_duration.clamp(
            Duration::from_secs(MIN_DURATION_SECS as u64),
            Duration::from_secs(MAX_DURATION_SECS as u64),
        );
        Self {
            start,
            max_duration,
        }
    }

    pub fn from_requested_secs(start: Instant, requested: i64) -> Self {
        Self::new(start, Duration::from_secs(clamp_duration_secs(requested)))
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    pub fn deadline(&self) -> Instant {
        self.start + self.max_duration
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline()
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline().saturating_duration_since(now)
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_clamp() {
        assert_eq!(clamp_duration_secs(0), 1);
        assert_eq!(clamp_duration_secs(-5), 1);
        assert_eq!(clamp_duration_secs(100), 30);
        assert_eq!(clamp_duration_secs(DEFAULT_DURATION_SECS), 10);
    }

    #[test]
    fn constructor_clamps_too() {
        let start = Instant::now();
        assert_eq!(
            DeadlineController::new(start, Duration::ZERO).max_duration(),
            Duration::from_secs(1)
        );
        assert_eq!(
            DeadlineController::new(start, Duration::from_secs(3600)).max_duration(),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn expiry_is_inclusive() {
        let start = Instant::now();
        let deadline = DeadlineController::from_requested_secs(start, 2);

        assert!(!deadline.is_expired(start));
        assert!(!deadline.is_expired(start + Duration::from_millis(1999)));
        assert!(deadline.is_expired(start + Duration::from_secs(2)));
        assert_eq!(deadline.remaining(start + Duration::from_millis(500)), Duration::from_millis(1500));
        assert_eq!(deadline.remaining(start + Duration::from_secs(5)), Duration::ZERO);
        assert_eq!(deadline.elapsed(start + Duration::from_secs(5)), Duration::from_secs(5));
    }
}
