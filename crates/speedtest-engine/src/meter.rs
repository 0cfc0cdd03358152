/// Byte counting with periodic rate notifications.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::engine::TransferReport;
use crate::sampler::RateSampler;

/// How often a meter offers its running rate to the sampler.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// `bytes * 8 / (seconds * 1_000_000)`.
pub fn speed_mbps(bytes: u64, seconds: f64) -> f64 {
    (bytes as f64 * 8.0) / (seconds * 1_000_000.0)
}

pub fn bps_to_mbps(bytes_per_sec: f64) -> f64 {
    bytes_per_sec * 8.0 / 1_000_000.0
}

fn rate_bps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { bytes as f64 / secs } else { 0.0 }
}

/// Counts transferred bytes and notifies a [`RateSampler`] with the average
/// rate at most once per interval.
///
/// All methods take `&self`, so a meter can be shared (`Arc`) between the
/// task driving a transfer and a body stream polled elsewhere.
pub struct RateMeter {
    sampler: RateSampler,
    started: Instant,
    interval_ms: u64,
    bytes: AtomicU64,
    last_sample_ms: AtomicU64,
}

impl RateMeter {
    pub fn new(sampler: RateSampler) -> Self {
        Self::with_interval(sampler, SAMPLE_INTERVAL)
    }

    pub fn with_interval(sampler: RateSampler, interval: Duration) -> Self {
        Self {
            sampler,
            started: Instant::now(),
            interval_ms: interval.as_millis() as u64,
            bytes: AtomicU64::new(0),
            last_sample_ms: AtomicU64::new(0),
        }
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn record(&self, n: usize) {
        let total = self.bytes.fetch_add(n as u64, Ordering::Relaxed) + n as u64;
        let elapsed = self.started.elapsed();
        let now_ms = elapsed.as_millis() as u64;
        let last = self.last_sample_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < self.interval_ms {
            return;
        }
        // One notification per interval even with concurrent recorders.
        if self
            .last_sample_ms
            .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            self.sampler.notify(rate_bps(total, elapsed));
        }
    }

    /// Totals so far. A zero elapsed time yields a zero rate.
    pub fn report(&self) -> TransferReport {
        let elapsed = self.started.elapsed();
        let bytes = self.bytes();
        TransferReport {
            bytes,
            elapsed,
            final_rate_bps: rate_bps(bytes, elapsed),
        }
    }
}
