use std::io;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use speedtest_types::{ErrorBody, ErrorKind};
use thiserror::Error;
use tracing::warn;

/// Failures of non-streaming endpoints. Streaming endpoints never use these
/// once headers are out; they emit an `error` event instead.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("read error: {0}")]
    Read(#[source] io::Error),

    #[error("{message}")]
    Session { kind: ErrorKind, message: String },

    #[error("test ended before producing a result")]
    Cancelled,
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Read(_) => "read",
            Self::Session { kind, .. } => kind.as_str(),
            Self::Cancelled => "cancelled",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Read(_) => StatusCode::BAD_REQUEST,
            Self::Session { kind, .. } => match kind {
                ErrorKind::Discovery | ErrorKind::Probe | ErrorKind::Transfer => {
                    StatusCode::BAD_GATEWAY
                }
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        warn!("{} -> {}: {}", self.kind(), status, self);
        let body = Json(ErrorBody {
            error_kind: self.kind().to_string(),
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}
