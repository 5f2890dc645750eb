use axum::extract::multipart::MultipartError;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult, JobError};
use crate::models::listing::{JobView, ListQuery, ListingResponse};
use crate::models::submission::{CancelResponse, RetryResponse, SubmitRequest, SubmitResponse};
use crate::routes::auth::AuthUser;

const IDEMPOTENCY_HEADER: &str = "idempotency-key";

fn malformed_upload(e: MultipartError) -> JobError {
    JobError::validation("INVALID_UPLOAD", format!("Malformed multipart body: {e}"))
}

/// Read the multipart form into a [`SubmitRequest`].
async fn read_upload(multipart: &mut Multipart) -> Result<SubmitRequest, JobError> {
    let mut request = SubmitRequest::default();
    let mut has_file = false;

    while let Some(field) = multipart.next_field().await.map_err(malformed_upload)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                request.filename = field.file_name().unwrap_or_default().to_string();
                request.content_type = field.content_type().map(str::to_string);
                request.data = field.bytes().await.map_err(malformed_upload)?.to_vec();
                has_file = true;
            }
            Some("job_type") => {
                request.job_type = field.text().await.map_err(malformed_upload)?;
            }
            Some("media_duration_sec") => {
                let raw = field.text().await.map_err(malformed_upload)?;
                let raw = raw.trim();
                if !raw.is_empty() {
                    let duration = raw.parse::<f64>().map_err(|_| {
                        JobError::validation("INVALID_METADATA", "media_duration_sec must be a number")
                    })?;
                    request.media_duration_sec = Some(duration);
                }
            }
            Some("idempotency_key") => {
                request.idempotency_key = Some(field.text().await.map_err(malformed_upload)?);
            }
            _ => {}
        }
    }

    if !has_file {
        return Err(JobError::validation("INVALID_FILENAME", "A file upload is required"));
    }
    Ok(request)
}

/// POST /api/v1/jobs: Upload a file and queue it for processing.
pub async fn submit_job(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Json<SubmitResponse>> {
    let rid = user.ctx.request_id.clone();
    let mut request = read_upload(&mut multipart)
        .await
        .map_err(|e| ApiError::new(e, &rid))?;

    if request.idempotency_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
        request.idempotency_key = headers
            .get(IDEMPOTENCY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
    }

    let response = state
        .jobs
        .submit(&user.ctx, request)
        .await
        .map_err(|e| ApiError::new(e, &rid))?;
    Ok(Json(response))
}

/// GET /api/v1/jobs: The caller's jobs, newest first.
pub async fn list_jobs(
    State(state): State<AppState>,
    user: AuthUser,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<ListingResponse>> {
    let rid = user.ctx.request_id.clone();
    let Query(query) = query.map_err(|e| {
        ApiError::new(JobError::validation("INVALID_QUERY", e.body_text()), &rid)
    })?;

    let listing = state
        .jobs
        .list(&user.ctx, &query)
        .await
        .map_err(|e| ApiError::new(e, &rid))?;
    Ok(Json(listing))
}

/// GET /api/v1/jobs/{job_id}
pub async fn get_job_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobView>> {
    let view = state
        .jobs
        .status(&user.ctx, &job_id)
        .await
        .map_err(|e| ApiError::for_job(e, &user.ctx.request_id, &job_id))?;
    Ok(Json(view))
}

/// POST /api/v1/jobs/{job_id}/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    let response = state
        .jobs
        .cancel(&user.ctx, &job_id)
        .await
        .map_err(|e| ApiError::for_job(e, &user.ctx.request_id, &job_id))?;
    Ok(Json(response))
}

/// POST /api/v1/jobs/{job_id}/retry
pub async fn retry_job(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<RetryResponse>> {
    let response = state
        .jobs
        .retry(&user.ctx, &job_id)
        .await
        .map_err(|e| ApiError::for_job(e, &user.ctx.request_id, &job_id))?;
    Ok(Json(response))
}
