pub mod auth;
pub mod correlation;
pub mod health;
pub mod intake;
pub mod jobs;
pub mod metrics;
pub mod queue_health;

use axum::routing::{get, post};
use axum::{middleware, Router};

use crate::app_state::AppState;

/// Health and job API routes, with request-id propagation on every response.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/jobs", post(jobs::submit_job).get(jobs::list_jobs))
        .route("/api/v1/jobs/{job_id}", get(jobs::get_job_status))
        .route("/api/v1/jobs/{job_id}/cancel", post(jobs::cancel_job))
        .route("/api/v1/jobs/{job_id}/retry", post(jobs::retry_job))
        .route("/api/v1/intake/precheck", post(intake::precheck))
        .route("/api/v1/queue/health", get(queue_health::queue_health))
        .with_state(state)
        .layer(middleware::from_fn(correlation::propagate_request_id))
}
