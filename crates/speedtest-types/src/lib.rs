pub mod api;
pub mod events;

pub use api::{ErrorBody, PingResponse, ServiceStatus, TestResult, UploadResponse};
pub use events::{ErrorKind, ProgressEvent, sse_frame};
