use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::services::identity::AuthError;
use crate::services::queue::QueueError;
use crate::services::state_store::StoreError;
use crate::services::status_machine::TransitionError;
use crate::services::storage::StorageError;

/// Collaborator failure behind an [`JobError::Infrastructure`].
#[derive(Debug, thiserror::Error)]
pub enum InfraError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failure taxonomy of the job lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("{message}")]
    Validation { code: &'static str, message: String },

    #[error("Job not found")]
    NotFound,

    #[error("Forbidden")]
    Forbidden,

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    PolicyBlocked(String),

    #[error("{message}")]
    QuotaExceeded { code: &'static str, message: String },

    #[error("{0} is disabled")]
    FeatureDisabled(&'static str),

    #[error("{stage} failed: {source}")]
    Infrastructure {
        stage: &'static str,
        #[source]
        source: InfraError,
    },

    #[error("{0}")]
    Unauthorized(#[from] AuthError),
}

impl JobError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        JobError::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn quota(code: &'static str, message: impl Into<String>) -> Self {
        JobError::QuotaExceeded {
            code,
            message: message.into(),
        }
    }

    /// Machine-readable code returned to clients as `error_code`.
    pub fn code(&self) -> &'static str {
        match self {
            JobError::Validation { code, .. } => code,
            JobError::NotFound => "JOB_NOT_FOUND",
            JobError::Forbidden => "FORBIDDEN",
            JobError::Conflict(_) => "CONFLICT",
            JobError::PolicyBlocked(_) => "POLICY_BLOCKED",
            JobError::QuotaExceeded { code, .. } => code,
            JobError::FeatureDisabled(_) => "FEATURE_DISABLED",
            JobError::Infrastructure { .. } => "SERVICE_UNAVAILABLE",
            JobError::Unauthorized(_) => "UNAUTHORIZED",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            JobError::Validation { .. } => StatusCode::BAD_REQUEST,
            JobError::NotFound => StatusCode::NOT_FOUND,
            JobError::Forbidden => StatusCode::FORBIDDEN,
            JobError::Conflict(_) => StatusCode::CONFLICT,
            JobError::PolicyBlocked(_) => StatusCode::UNPROCESSABLE_ENTITY,
            JobError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            JobError::FeatureDisabled(_) => StatusCode::NOT_FOUND,
            JobError::Infrastructure { .. } => StatusCode::SERVICE_UNAVAILABLE,
            JobError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<TransitionError> for JobError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::Store(source) => JobError::Infrastructure {
                stage: "JOB_METADATA",
                source: source.into(),
            },
            other => JobError::Conflict(other.to_string()),
        }
    }
}

/// Attach the lifecycle stage to a collaborator failure.
pub trait StageContext<T> {
    fn stage(self, stage: &'static str) -> Result<T, JobError>;
}

impl<T, E> StageContext<T> for Result<T, E>
where
    E: Into<InfraError>,
{
    fn stage(self, stage: &'static str) -> Result<T, JobError> {
        self.map_err(|e| JobError::Infrastructure {
            stage,
            source: e.into(),
        })
    }
}

/// JSON error body returned by every API route.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error_code: String,
    pub error_message: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// A [`JobError`] bound to the request it happened in.
#[derive(Debug)]
pub struct ApiError {
    pub error: JobError,
    pub request_id: String,
    pub job_id: Option<String>,
}

impl ApiError {
    pub fn new(error: JobError, request_id: &str) -> Self {
        Self {
            error,
            request_id: request_id.to_string(),
            job_id: None,
        }
    }

    pub fn for_job(error: JobError, request_id: &str, job_id: &str) -> Self {
        Self {
            error,
            request_id: request_id.to_string(),
            job_id: Some(job_id.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status_code();
        let job_id = self.job_id.as_deref().unwrap_or_default();

        if status.is_server_error() {
            tracing::error!(
                error = %self.error,
                error_code = self.error.code(),
                job_id,
                request_id = %self.request_id,
                "request failed"
            );
        } else {
            tracing::warn!(
                error = %self.error,
                error_code = self.error.code(),
                job_id,
                request_id = %self.request_id,
                "request rejected"
            );
        }

        // Infrastructure detail stays in the log; clients get a retriable message.
        let error_message = match &self.error {
            JobError::Infrastructure { .. } => {
                "Service temporarily unavailable. Please retry.".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorBody {
            error_code: self.error.code().to_string(),
            error_message,
            request_id: self.request_id,
            job_id: self.job_id,
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
