/// Transfer mechanisms a session can delegate to.
///
/// ```text
/// HttpTransferEngine   peer /download  --bytes-->  RateMeter --> RateSampler
///                      ChunkGenerator  --POST-->   peer /upload
/// LoopbackEngine       ChunkGenerator --pipe--> ByteSink (in process)
/// ```
///
/// Every engine stops on its own once `max_duration` has elapsed and reports
/// an average rate; the pump usually ends the session first from a sample.

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::chunk::{CHUNK_SIZE, ChunkGenerator, ChunkPlan, MAX_DOWNLOAD_MB};
use crate::endpoint::Endpoint;
use crate::error::TransferError;
use crate::meter::{RateMeter, bps_to_mbps};
use crate::sampler::RateSampler;
use crate::sink::ByteSink;

/// Size of each POST body during a delegated upload.
pub const UPLOAD_PAYLOAD_MB: i64 = 25;
/// In-memory pipe capacity for the loopback engine.
pub const PIPE_CAPACITY: usize = 4 * CHUNK_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download => f.write_str("download"),
            Self::Upload => f.write_str("upload"),
        }
    }
}

/// Totals reported by an engine when it finishes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferReport {
    pub bytes: u64,
    pub elapsed: Duration,
    /// Zero when the engine could not compute a rate.
    pub final_rate_bps: f64,
}

impl TransferReport {
    pub fn final_mbps(&self) -> f64 {
        bps_to_mbps(self.final_rate_bps)
    }
}

/// Everything an engine needs for one run.
pub struct TransferJob {
    pub endpoint: Endpoint,
    pub direction: Direction,
    pub max_duration: Duration,
    pub sampler: RateSampler,
    /// Cancelled when the session no longer wants the transfer.
    pub cancel: CancellationToken,
}

/// A mechanism that moves bytes and reports rates through the job's sampler.
///
/// The returned future is spawned on its own task.
pub trait TransferEngine: Send + Sync + 'static {
    fn run(
        &self,
        job: TransferJob,
    ) -> impl Future<Output = Result<TransferReport, TransferError>> + Send + 'static;
}

// ── HTTP peer engine ────────────────────────────────────────────────────

/// Measures against a peer speed-test server over HTTP.
#[derive(Clone)]
pub struct HttpTransferEngine {
    client: reqwest::Client,
    upload_payload: ChunkPlan,
}

impl HttpTransferEngine {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            upload_payload: ChunkPlan::from_size_mb(UPLOAD_PAYLOAD_MB, MAX_DOWNLOAD_MB),
        }
    }
}

impl TransferEngine for HttpTransferEngine {
    fn run(
        &self,
        job: TransferJob,
    ) -> impl Future<Output = Result<TransferReport, TransferError>> + Send + 'static {
        let client = self.client.clone();
        let payload = self.upload_payload;
        async move {
            match job.direction {
                Direction::Download => http_download(client, job).await,
                Direction::Upload => http_upload(client, job, payload).await,
            }
        }
    }
}

/// Repeatedly pull the peer's largest download until time is up.
async fn http_download(
    client: reqwest::Client,
    job: TransferJob,
) -> Result<TransferReport, TransferError> {
    let meter = RateMeter::new(job.sampler);
    let stop = tokio::time::sleep_until(meter.started() + job.max_duration);
    tokio::pin!(stop);
    let url = format!("{}/download?size={}", job.endpoint.url, MAX_DOWNLOAD_MB);

    loop {
        let response = tokio::select! {
            biased;
            _ = job.cancel.cancelled() => return Err(TransferError::Aborted),
            _ = &mut stop => return Ok(meter.report()),
            response = client.get(&url).send() => response?,
        };
        if !response.status().is_success() {
            return Err(TransferError::Status(response.status().as_u16()));
        }

        let mut body = response.bytes_stream();
        loop {
            tokio::select! {
                biased;
                _ = job.cancel.cancelled() => return Err(TransferError::Aborted),
                _ = &mut stop => return Ok(meter.report()),
                chunk = body.next() => match chunk {
                    Some(chunk) => meter.record(chunk?.len()),
                    None => break,
                },
            }
        }
    }
}

/// Repeatedly POST generated payloads to the peer until time is up.
async fn http_upload(
    client: reqwest::Client,
    job: TransferJob,
    payload: ChunkPlan,
) -> Result<TransferReport, TransferError> {
    let meter = Arc::new(RateMeter::new(job.sampler));
    let stop_at = meter.started() + job.max_duration;
    let stop = tokio::time::sleep_until(stop_at);
    tokio::pin!(stop);
    let url = format!("{}/upload", job.endpoint.url);

    loop {
        let body = metered_body(payload, meter.clone(), stop_at, job.cancel.clone());
        let response = tokio::select! {
            biased;
            _ = job.cancel.cancelled() => return Err(TransferError::Aborted),
            _ = &mut stop => return Ok(meter.report()),
            response = client.post(&url).body(reqwest::Body::wrap_stream(body)).send() => response?,
        };
        if !response.status().is_success() {
            return Err(TransferError::Status(response.status().as_u16()));
        }
    }
}

/// Upload body: generated chunks, counted as they are handed to the client,
/// ending early at `stop_at` or on cancellation.
fn metered_body(
    plan: ChunkPlan,
    meter: Arc<RateMeter>,
    stop_at: Instant,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + 'static {
    async_stream::stream! {
        for chunk in ChunkGenerator::new(plan) {
            if cancel.is_cancelled() || Instant::now() >= stop_at {
                break;
            }
            meter.record(chunk.len());
            yield Ok::<Bytes, io::Error>(chunk);
        }
    }
}

// ── Loopback engine ─────────────────────────────────────────────────────

/// Generator and sink joined by an in-memory pipe. Measures the host, not a
/// network; useful without peers and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopbackEngine;

impl TransferEngine for LoopbackEngine {
    fn run(
        &self,
        job: TransferJob,
    ) -> impl Future<Output = Result<TransferReport, TransferError>> + Send + 'static {
        async move {
            let meter = Arc::new(RateMeter::new(job.sampler.clone()));
            let stop_at = meter.started() + job.max_duration;
            let (tx, mut rx) = tokio::io::duplex(PIPE_CAPACITY);

            let writer = tokio::spawn(feed_pipe(
                tx,
                (job.direction == Direction::Upload).then(|| meter.clone()),
                stop_at,
                job.cancel.clone(),
            ));

            let read_meter = (job.direction == Direction::Download).then(|| meter.clone());
            ByteSink::new()
                .consume(&mut rx, |n| {
                    if let Some(m) = &read_meter {
                        m.record(n);
                    }
                })
                .await?;
            writer.await.map_err(io::Error::other)??;

            if job.cancel.is_cancelled() {
                return Err(TransferError::Aborted);
            }
            Ok(meter.report())
        }
    }
}

/// Write generated chunks into the pipe until time is up; dropping `tx`
/// signals end-of-stream to the reader.
async fn feed_pipe(
    mut tx: DuplexStream,
    meter: Option<Arc<RateMeter>>,
    stop_at: Instant,
    cancel: CancellationToken,
) -> io::Result<()> {
    let plan = ChunkPlan::from_size_mb(MAX_DOWNLOAD_MB, MAX_DOWNLOAD_MB);
    loop {
        let mut generator = ChunkGenerator::new(plan);
        while let Some(chunk) = generator.next_chunk() {
            if cancel.is_cancelled() || Instant::now() >= stop_at {
                return tx.shutdown().await;
            }
            tx.write_all(chunk).await?;
            if let Some(meter) = &meter {
                meter.record(chunk.len());
            }
        }
    }
}
