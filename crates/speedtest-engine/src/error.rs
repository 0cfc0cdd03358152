use std::io;

use speedtest_types::{ErrorKind, ProgressEvent};
use thiserror::Error;

/// Fault raised by a transfer mechanism.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint returned HTTP {0}")]
    Status(u16),

    #[error("transfer aborted")]
    Aborted,
}

/// Anything that ends a session with an `error` event.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("endpoint discovery failed: {0}")]
    Discovery(String),

    #[error("latency probe failed: {0}")]
    Probe(String),

    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Discovery(_) => ErrorKind::Discovery,
            Self::Probe(_) => ErrorKind::Probe,
            Self::Transfer(_) => ErrorKind::Transfer,
        }
    }

    pub fn to_event(&self) -> ProgressEvent {
        ProgressEvent::Error {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}
