use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics: Job lifecycle counters in Prometheus text format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register help text for every counter the job service emits.
pub fn describe_job_metrics() {
    metrics::describe_counter!("api_jobs_submitted_total", "Jobs accepted and queued");
    metrics::describe_counter!(
        "api_jobs_submit_failed_total",
        "Job submissions rejected or failed, by error code"
    );
    metrics::describe_counter!(
        "api_jobs_idempotent_reused_total",
        "Submissions answered with an existing job"
    );
    metrics::describe_counter!("api_jobs_cancel_requested_total", "Jobs cancelled by their owner");
    metrics::describe_counter!(
        "api_jobs_cancel_noop_total",
        "Cancel requests for jobs that had already finished"
    );
    metrics::describe_counter!("api_jobs_cancel_failed_total", "Cancel requests that failed");
    metrics::describe_counter!("api_jobs_retry_requested_total", "Retry jobs created");
    metrics::describe_counter!("api_jobs_retry_failed_total", "Retry requests that failed");
    metrics::describe_counter!("api_jobs_list_total", "Job listing requests");
    metrics::describe_counter!(
        "intake_precheck_decisions_total",
        "Intake precheck results by route and policy decision"
    );
    metrics::describe_counter!(
        "intake_precheck_warnings_total",
        "Advisory warnings returned by intake precheck"
    );
    metrics::describe_counter!(
        "intake_precheck_eta_bucket_total",
        "Intake precheck ETA estimates by bucket"
    );
}
