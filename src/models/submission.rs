use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::JobStatus;

/// An upload as it reaches the job service, already read off the wire.
#[derive(Debug, Clone, Default, Validate)]
pub struct SubmitRequest {
    /// Raw job type as sent by the client; parsed by the service.
    #[garde(skip)]
    pub job_type: String,

    #[garde(length(max = 512))]
    pub filename: String,

    #[garde(length(max = 255))]
    pub content_type: Option<String>,

    #[garde(skip)]
    pub data: Vec<u8>,

    #[garde(range(min = 0.0))]
    pub media_duration_sec: Option<f64>,

    #[garde(skip)]
    pub idempotency_key: Option<String>,
}

/// Response after submitting a job.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SubmitResponse {
    pub job_id: String,
    pub request_id: String,
    pub reused: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CancelResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct RetryResponse {
    pub job_id: String,
    pub request_id: String,
    pub retry_of_job_id: String,
}
