use serde::{Deserialize, Serialize};

/// GET / response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub service: String,
    pub version: String,
    pub status: String,
}

/// GET /ping response. Also parsed by peers probing this server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub status: String,
    pub timestamp: i64,
    pub server_id: String,
}

/// POST /upload response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub bytes: u64,
    pub duration_ms: u64,
    pub speed_mbps: f64,
}

/// Result of a non-streaming delegated test (GET /test/*).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub speed_mbps: f64,
    pub elapsed_ms: u64,
    pub server_id: String,
    pub server_name: String,
    pub latency_ms: f64,
}

/// Body of every non-streaming error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error_kind: String,
    pub message: String,
}
