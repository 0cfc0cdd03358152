use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Events streamed to a client during a realtime speed test.
///
/// Serialized as a flat JSON object with a `type` tag, e.g.
/// `{"type":"progress","speed_mbps":93.4,"elapsed_sec":2.6}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    /// Measurement endpoint selected and probed
    Start {
        server_id: String,
        server_name: String,
        latency_ms: f64,
    },

    /// Instantaneous rate observed while the transfer runs
    Progress { speed_mbps: f64, elapsed_sec: f64 },

    /// Final figure: natural completion or forced stop at the deadline
    Complete { speed_mbps: f64, elapsed_sec: f64 },

    /// Session failed; no further events follow
    Error {
        #[serde(skip)]
        kind: ErrorKind,
        message: String,
    },
}

impl ProgressEvent {
    /// `complete` and `error` close a session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    pub fn elapsed_sec(&self) -> Option<f64> {
        match self {
            Self::Progress { elapsed_sec, .. } | Self::Complete { elapsed_sec, .. } => {
                Some(*elapsed_sec)
            }
            _ => None,
        }
    }
}

/// Failure class carried alongside an `error` event. Not part of the wire
/// format; used when a session result is mapped to an HTTP status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorKind {
    Discovery,
    Probe,
    Transfer,
    #[default]
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Probe => "probe",
            Self::Transfer => "transfer",
            Self::Internal => "internal",
        }
    }
}

/// Frame one event for the text event protocol: `data: <json>\n\n`.
pub fn sse_frame(event: &ProgressEvent) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_string(event)?;
    Ok(Bytes::from(format!("data: {}\n\n", json)))
}
