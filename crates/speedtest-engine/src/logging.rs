/// Structured logging for speed-test sessions.
///
/// The pump and the session driver report lifecycle milestones through a
/// [`SessionLogger`] so tests can run silently and production goes through
/// `tracing`.

use std::fmt;

use uuid::Uuid;

/// One log entry.
#[derive(Debug, Clone)]
pub struct SessionLog {
    pub component: &'static str,
    pub session_id: Uuid,
    pub event: SessionEvent,
}

/// Session milestones that get logged.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Endpoint chosen and probed; `start` emitted
    Started {
        endpoint_id: String,
        endpoint_name: String,
        latency_ms: f64,
        max_duration_secs: u64,
    },
    /// Progress tick forwarded to the client
    Sample { speed_mbps: f64, elapsed_sec: f64 },
    /// Deadline reached before the transfer finished
    ForcedStop { speed_mbps: f64, elapsed_sec: f64 },
    /// Transfer finished on its own
    Completed {
        speed_mbps: f64,
        elapsed_sec: f64,
        bytes: u64,
    },
    /// Final rate was zero; last sampled rate reported instead
    FallbackRate { speed_mbps: f64 },
    /// Samples discarded because the queue was full
    SamplesDropped { count: u64 },
    /// Client went away or the server is shutting down
    Cancelled { elapsed_sec: f64 },
    /// Terminal failure
    Failed { kind: &'static str, message: String },
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started { endpoint_id, endpoint_name, latency_ms, max_duration_secs } => {
                write!(
                    f,
                    "session_started endpoint={} ({}) latency_ms={:.1} max_duration={}s",
                    endpoint_id, endpoint_name, latency_ms, max_duration_secs
                )
            }
            Self::Sample { speed_mbps, elapsed_sec } => {
                write!(f, "sample speed={:.2}Mbps elapsed={:.2}s", speed_mbps, elapsed_sec)
            }
            Self::ForcedStop { speed_mbps, elapsed_sec } => {
                write!(f, "forced_stop speed={:.2}Mbps elapsed={:.2}s", speed_mbps, elapsed_sec)
            }
            Self::Completed { speed_mbps, elapsed_sec, bytes } => {
                write!(
                    f,
                    "transfer_complete speed={:.2}Mbps elapsed={:.2}s bytes={}",
                    speed_mbps, elapsed_sec, bytes
                )
            }
            Self::FallbackRate { speed_mbps } => {
                write!(f, "final_rate_zero using_last_sample={:.2}Mbps", speed_mbps)
            }
            Self::SamplesDropped { count } => write!(f, "samples_dropped count={}", count),
            Self::Cancelled { elapsed_sec } => write!(f, "cancelled elapsed={:.2}s", elapsed_sec),
            Self::Failed { kind, message } => write!(f, "failed kind={} error: {}", kind, message),
        }
    }
}

/// Sink for session logs.
pub trait SessionLogger: Send + Sync {
    fn log(&self, entry: SessionLog);
}

/// Logger that uses the `tracing` crate.
pub struct TracingLogger;

impl SessionLogger for TracingLogger {
    fn log(&self, entry: SessionLog) {
        let sid = entry.session_id;
        match &entry.event {
            SessionEvent::Sample { .. } => {
                tracing::debug!(component = entry.component, session_id = %sid, "{}", entry.event);
            }
            SessionEvent::Failed { .. } | SessionEvent::FallbackRate { .. } => {
                tracing::warn!(component = entry.component, session_id = %sid, "{}", entry.event);
            }
            _ => {
                tracing::info!(component = entry.component, session_id = %sid, "{}", entry.event);
            }
        }
    }
}

/// No-op logger that discards all log entries.
pub struct NullLogger;

impl SessionLogger for NullLogger {
    fn log(&self, _entry: SessionLog) {}
}
