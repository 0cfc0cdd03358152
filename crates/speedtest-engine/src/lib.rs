/// Speed-test engine: transfer sampling and realtime progress streaming.
///
/// Provides:
/// - Chunked random-byte generation with flush-per-chunk writes
/// - Byte sink with wall-clock timing
/// - Rate metering and a lossy, never-blocking sample queue
/// - Deadline arithmetic for duration-bounded tests
/// - A progress pump multiplexing cancellation, completion, samples and
///   a deadline poll into one ordered event stream
/// - Endpoint discovery over peer `/ping` and HTTP/loopback transfer engines

pub mod chunk;
pub mod deadline;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod logging;
pub mod meter;
pub mod pump;
pub mod sampler;
pub mod session;
pub mod sink;

// Re-export key types for convenience.
pub use chunk::{
    CHUNK_SIZE, ChunkGenerator, ChunkPlan, DEFAULT_DOWNLOAD_MB, MAX_DOWNLOAD_MB, MB, WriteOutcome,
};
pub use deadline::{
    DEFAULT_DURATION_SECS, DeadlineController, MAX_DURATION_SECS, MIN_DURATION_SECS,
    clamp_duration_secs,
};
pub use endpoint::{
    DEFAULT_PROBE_TIMEOUT, Endpoint, EndpointSelector, LocalEndpoint, Peer, PeerDirectory,
    parse_peers,
};
pub use engine::{
    Direction, HttpTransferEngine, LoopbackEngine, TransferEngine, TransferJob, TransferReport,
};
pub use error::{SessionError, TransferError};
pub use logging::{NullLogger, SessionEvent, SessionLog, SessionLogger, TracingLogger};
pub use meter::{RateMeter, SAMPLE_INTERVAL, bps_to_mbps, speed_mbps};
pub use pump::{POLL_INTERVAL, ProgressPump};
pub use sampler::{RateSample, RateSampler, SAMPLE_QUEUE_CAPACITY, SampleReceiver, rate_channel};
pub use session::{SessionConfig, SessionState, TransferSession, run_session};
pub use sink::{ByteSink, SinkReport};
