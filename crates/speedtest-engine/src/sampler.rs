/// Lossy hand-off of instantaneous rates from a transfer to the pump.
///
/// The transfer side never waits: when the queue is full the new sample is
/// dropped and counted. Freshness matters more than completeness here.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;

use crate::meter::bps_to_mbps;

/// Pending samples allowed before new ones are dropped.
pub const SAMPLE_QUEUE_CAPACITY: usize = 100;

/// One throughput observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSample {
    pub speed_mbps: f64,
    pub observed_at: Instant,
}

/// Write end, held by whatever mechanism performs the transfer.
#[derive(Clone)]
pub struct RateSampler {
    tx: mpsc::Sender<RateSample>,
    dropped: Arc<AtomicU64>,
}

/// Read end, owned by the progress pump.
pub struct SampleReceiver {
    rx: mpsc::Receiver<RateSample>,
    dropped: Arc<AtomicU64>,
}

/// Create a bounded sample queue.
pub fn rate_channel(capacity: usize) -> (RateSampler, SampleReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        RateSampler {
            tx,
            dropped: dropped.clone(),
        },
        SampleReceiver { rx, dropped },
    )
}

impl RateSampler {
    /// Offer a raw rate in bytes/second. Returns whether it was queued.
    pub fn notify(&self, bytes_per_sec: f64) -> bool {
        let sample = RateSample {
            speed_mbps: bps_to_mbps(bytes_per_sec),
            observed_at: Instant::now(),
        };
        match self.tx.try_send(sample) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            // Pump is gone; the transfer will be told to stop separately.
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl SampleReceiver {
    /// Next sample, or `None` once every sampler has been dropped and the
    /// queue is empty.
    pub async fn recv(&mut self) -> Option<RateSample> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RateSample> {
        self.rx.try_recv().ok()
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_to_mbps() {
        let (sampler, mut samples) = rate_channel(4);
        assert!(sampler.notify(1_000_000.0));
        assert_eq!(samples.try_recv().unwrap().speed_mbps, 8.0);
    }

    #[test]
    fn burst_past_capacity_never_blocks_and_stays_bounded() {
        let (sampler, mut samples) = rate_channel(SAMPLE_QUEUE_CAPACITY);
        let burst = SAMPLE_QUEUE_CAPACITY * 5;

        let accepted = (0..burst)
            .filter(|&i| sampler.notify(i as f64 * 125_000.0))
            .count();

        assert_eq!(accepted, SAMPLE_QUEUE_CAPACITY);
        assert_eq!(samples.pending(), SAMPLE_QUEUE_CAPACITY);
        assert_eq!(samples.dropped(), (burst - SAMPLE_QUEUE_CAPACITY) as u64);

        let mut drained = 0;
        while samples.try_recv().is_some() {
            drained += 1;
        }
        assert_eq!(drained, SAMPLE_QUEUE_CAPACITY);

        // Space frees up once the consumer catches up.
        assert!(sampler.notify(125_000.0));
        assert_eq!(samples.try_recv().unwrap().speed_mbps, 1.0);
    }

    #[tokio::test]
    async fn closed_pump_does_not_count_as_drop() {
        let (sampler, samples) = rate_channel(2);
        drop(samples);
        assert!(!sampler.notify(1.0));
        assert_eq!(sampler.dropped(), 0);
    }

    #[tokio::test]
    async fn recv_ends_when_samplers_are_gone() {
        let (sampler, mut samples) = rate_channel(2);
        sampler.notify(125_000.0);
        drop(sampler);
        assert!(samples.recv().await.is_some());
        assert!(samples.recv().await.is_none());
    }
}
