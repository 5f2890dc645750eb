//! Job lifecycle through the service layer over in-process backends.

mod helpers;

use std::sync::Arc;

use doc_jobs::config::JobSettings;
use doc_jobs::error::JobError;
use doc_jobs::models::job::{FieldMap, JobRecord, JobStatus, JobType};
use doc_jobs::models::listing::{ListQuery, ListingResponse};
use doc_jobs::models::submission::SubmitRequest;
use doc_jobs::services::idempotency;
use doc_jobs::services::jobs::{JobService, RequestContext};
use doc_jobs::services::memory::{MemoryBlobStore, MemoryJobQueue, MemoryStateStore};
use doc_jobs::services::state_store::{keys, StateStore};
use doc_jobs::services::status_machine::StatusMachine;
use helpers::{pdf_with_pages, ScriptedStore};

struct Backends {
    store: Arc<MemoryStateStore>,
    queue: Arc<MemoryJobQueue>,
    service: Arc<JobService>,
}

fn backends(settings: JobSettings) -> Backends {
    let store = Arc::new(MemoryStateStore::new());
    let queue = Arc::new(MemoryJobQueue::new());
    let blobs = Arc::new(MemoryBlobStore::new("bucket"));
    Backends {
        service: Arc::new(JobService::new(store.clone(), queue.clone(), blobs, settings)),
        store,
        queue,
    }
}

struct ScriptedBackends {
    store: Arc<ScriptedStore>,
    queue: Arc<MemoryJobQueue>,
    service: Arc<JobService>,
}

fn scripted_backends(settings: JobSettings) -> ScriptedBackends {
    let store = Arc::new(ScriptedStore::new());
    let queue = Arc::new(MemoryJobQueue::new());
    let blobs = Arc::new(MemoryBlobStore::new("bucket"));
    ScriptedBackends {
        service: Arc::new(JobService::new(store.clone(), queue.clone(), blobs, settings)),
        store,
        queue,
    }
}

fn ctx(owner: &str, request_id: &str) -> RequestContext {
    RequestContext {
        request_id: request_id.to_string(),
        owner: owner.to_string(),
    }
}

fn pdf_upload(key: Option<&str>) -> SubmitRequest {
    SubmitRequest {
        job_type: "OCR".into(),
        filename: "contract.pdf".into(),
        content_type: Some("application/pdf".into()),
        data: pdf_with_pages(2),
        media_duration_sec: None,
        idempotency_key: key.map(str::to_string),
    }
}

async fn stored_record(store: &MemoryStateStore, job_id: &str) -> JobRecord {
    let map = store.get_fields(&keys::job(job_id)).await.unwrap();
    JobRecord::from_fields(job_id, &map).expect("record should exist")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_with_one_token_converge() {
    let b = scripted_backends(JobSettings::default());

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let service = b.service.clone();
            let caller = ctx("dana@example.com", &format!("req-concurrent-{n:02}"));
            tokio::spawn(async move { service.submit(&caller, pdf_upload(Some("same-token"))).await })
        })
        .collect();

    let mut responses = Vec::new();
    for handle in handles {
        responses.push(handle.await.unwrap().expect("every submission should succeed"));
    }

    assert!(responses.windows(2).all(|w| w[0].job_id == w[1].job_id));
    assert_eq!(responses.iter().filter(|r| !r.reused).count(), 1);
    assert_eq!(b.queue.messages("doc_jobs").len(), 1);
    assert_eq!(
        b.store.list_length(&keys::user_jobs("dana@example.com")).await.unwrap(),
        1
    );
    let record = stored_record(b.store.inner(), &responses[0].job_id).await;
    assert_eq!(record.total_pages, Some(2));
    assert_eq!(record.version, 1);
}

#[tokio::test]
async fn test_submission_that_loses_creation_race_finishes_winners_job() {
    let b = scripted_backends(JobSettings::default());
    let job_id = idempotency::derive_job_id("dana@example.com", JobType::Ocr, "race-token");
    let winner = JobRecord {
        job_id: job_id.clone(),
        status: Some(JobStatus::Queued),
        job_type: Some(JobType::Ocr),
        stage: "Queued".into(),
        owner: "dana@example.com".into(),
        source: "ocr".into(),
        input_filename: "contract.pdf".into(),
        input_storage_uri: Some(format!("s3://bucket/jobs/{job_id}/input/contract.pdf")),
        output_filename: "contract.txt".into(),
        request_id: Some("req-winner".into()),
        ..Default::default()
    };
    let mut competing = winner.to_fields();
    competing.insert("version".into(), "1".into());
    b.store.race_next_version_write(competing);

    let response = b
        .service
        .submit(&ctx("dana@example.com", "req-loser"), pdf_upload(Some("race-token")))
        .await
        .unwrap();

    assert_eq!(response.job_id, job_id);
    assert!(response.reused);
    assert_eq!(response.request_id, "req-winner");
    assert_eq!(b.store.lost_version_writes(), 1);
    assert_eq!(b.queue.messages("doc_jobs").len(), 1);
    assert_eq!(
        b.store.list_length(&keys::user_jobs("dana@example.com")).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_status_write_that_loses_a_race_rereads_and_retries() {
    let b = scripted_backends(JobSettings::default());
    let owner = ctx("erin@example.com", "req-race-01");
    let job_id = b.service.submit(&owner, pdf_upload(None)).await.unwrap().job_id;

    let worker: FieldMap = [("status", "PROCESSING"), ("stage", "Running OCR"), ("version", "7")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    b.store.race_next_version_write(worker);

    let updates: FieldMap = [("status", "COMPLETED"), ("stage", "Done")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let applied = StatusMachine::new(b.store.clone())
        .apply(&keys::job(&job_id), &updates, "WORKER", "req-worker")
        .await
        .unwrap();

    assert_eq!(applied.previous, Some(JobStatus::Processing));
    assert_eq!(b.store.lost_version_writes(), 1);
    let record = stored_record(b.store.inner(), &job_id).await;
    assert_eq!(record.status, Some(JobStatus::Completed));
    assert_eq!(record.version, 8);
}

#[tokio::test]
async fn test_cancel_racing_completion_leaves_job_completed() {
    let b = scripted_backends(JobSettings::default());
    let owner = ctx("erin@example.com", "req-race-02");
    let job_id = b.service.submit(&owner, pdf_upload(None)).await.unwrap().job_id;

    let worker: FieldMap = [("status", "COMPLETED"), ("stage", "Done"), ("version", "2")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    b.store.race_next_version_write(worker);

    let err = b.service.cancel(&owner, &job_id).await.unwrap_err();
    assert!(matches!(err, JobError::Conflict(_)));

    let record = stored_record(b.store.inner(), &job_id).await;
    assert_eq!(record.status, Some(JobStatus::Completed));
    assert!(!record.cancel_requested);
}

#[tokio::test]
async fn test_interrupted_submission_is_finished_by_client_retry() {
    let b = scripted_backends(JobSettings::default());
    let owner = ctx("kim@example.com", "req-resume-01");
    b.store.fail_next("list_append");

    let err = b
        .service
        .submit(&owner, pdf_upload(Some("tok-resume")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SERVICE_UNAVAILABLE");
    assert_eq!(b.store.list_length(&keys::user_jobs("kim@example.com")).await.unwrap(), 0);
    assert!(b.queue.messages("doc_jobs").is_empty());

    let retried = b
        .service
        .submit(&ctx("kim@example.com", "req-resume-02"), pdf_upload(Some("tok-resume")))
        .await
        .unwrap();
    assert!(retried.reused);
    assert_eq!(retried.request_id, "req-resume-01");
    assert_eq!(b.store.list_length(&keys::user_jobs("kim@example.com")).await.unwrap(), 1);
    assert_eq!(b.queue.messages("doc_jobs").len(), 1);

    let listing = b
        .service
        .list(&owner, &ListQuery::default())
        .await
        .unwrap();
    let ListingResponse::All(items) = listing else {
        panic!("expected a bare list");
    };
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].record.job_id, retried.job_id);

    // A further retry changes nothing.
    let again = b
        .service
        .submit(&ctx("kim@example.com", "req-resume-03"), pdf_upload(Some("tok-resume")))
        .await
        .unwrap();
    assert_eq!(again.job_id, retried.job_id);
    assert_eq!(b.store.list_length(&keys::user_jobs("kim@example.com")).await.unwrap(), 1);
    assert_eq!(b.queue.messages("doc_jobs").len(), 1);
}

#[tokio::test]
async fn test_resubmitting_a_finished_job_does_not_requeue_it() {
    let b = backends(JobSettings::default());
    let owner = ctx("lee@example.com", "req-finished-01");
    let job_id = b
        .service
        .submit(&owner, pdf_upload(Some("tok-finished")))
        .await
        .unwrap()
        .job_id;

    let updates: FieldMap = [("status", "COMPLETED")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    StatusMachine::new(b.store.clone())
        .apply(&keys::job(&job_id), &updates, "WORKER", "req-worker")
        .await
        .unwrap();
    b.store.delete(&keys::enqueue_guard(&job_id)).await.unwrap();

    let again = b
        .service
        .submit(&owner, pdf_upload(Some("tok-finished")))
        .await
        .unwrap();
    assert!(again.reused);
    assert_eq!(again.job_id, job_id);
    assert_eq!(b.queue.messages("doc_jobs").len(), 1);
    assert_eq!(b.store.list_length(&keys::user_jobs("lee@example.com")).await.unwrap(), 1);
}

#[tokio::test]
async fn test_worker_progress_then_cancel_is_rejected_after_completion() {
    let b = backends(JobSettings::default());
    let owner = ctx("erin@example.com", "req-lifecycle-01");
    let job_id = b.service.submit(&owner, pdf_upload(None)).await.unwrap().job_id;

    // Drive the record the way a worker would.
    let machine = StatusMachine::new(b.store.clone());
    let key = keys::job(&job_id);
    for (status, stage) in [("PROCESSING", "Running OCR"), ("COMPLETED", "Done")] {
        let updates: FieldMap = [("status", status), ("stage", stage)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        machine.apply(&key, &updates, "WORKER", "req-worker").await.unwrap();
    }

    let cancelled = b.service.cancel(&owner, &job_id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Completed);
    assert_eq!(cancelled.message, "Job already finished");

    let record = stored_record(&b.store, &job_id).await;
    assert_eq!(record.status, Some(JobStatus::Completed));
    assert!(!record.cancel_requested);
    assert_eq!(record.version, 3);

    let err = b.service.retry(&owner, &job_id).await.unwrap_err();
    assert!(matches!(err, JobError::Conflict(_)));
}

#[tokio::test]
async fn test_completed_job_links_output() {
    let b = backends(JobSettings::default());
    let owner = ctx("erin@example.com", "req-lifecycle-02");
    let job_id = b.service.submit(&owner, pdf_upload(None)).await.unwrap().job_id;

    let mut updates = FieldMap::new();
    updates.insert("status".to_string(), "COMPLETED".to_string());
    updates.insert(
        "output_path".to_string(),
        format!("s3://bucket/jobs/{job_id}/output/contract.txt"),
    );
    StatusMachine::new(b.store.clone())
        .apply(&keys::job(&job_id), &updates, "WORKER", "req-worker")
        .await
        .unwrap();

    let view = b.service.status(&owner, &job_id).await.unwrap();
    let link = view.download_url.expect("completed job should carry a link");
    assert!(link.starts_with("memory://bucket/jobs/"));
    assert!(link.contains("filename=contract.txt"));
    assert_eq!(
        view.record.output_path.as_deref(),
        Some(format!("s3://bucket/jobs/{job_id}/output/contract.txt").as_str())
    );
}

#[tokio::test]
async fn test_failed_status_read_is_normalized() {
    let b = backends(JobSettings::default());
    let owner = ctx("frank@example.com", "req-lifecycle-03");
    let job_id = b.service.submit(&owner, pdf_upload(None)).await.unwrap().job_id;

    let updates: FieldMap = [("status", "FAILED"), ("error", "OCR engine timed out")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    StatusMachine::new(b.store.clone())
        .apply(&keys::job(&job_id), &updates, "WORKER", "req-worker")
        .await
        .unwrap();

    let view = b.service.status(&owner, &job_id).await.unwrap();
    assert_eq!(view.record.error_code.as_deref(), Some("PROCESSING_FAILED"));
    assert_eq!(view.record.error_message.as_deref(), Some("OCR engine timed out"));
}

#[tokio::test]
async fn test_queue_outage_leaves_retryable_failed_job() {
    let b = backends(JobSettings::default());
    let owner = ctx("gina@example.com", "req-lifecycle-04");
    b.queue.set_unavailable(true);

    let err = b.service.submit(&owner, pdf_upload(None)).await.unwrap_err();
    assert_eq!(err.code(), "SERVICE_UNAVAILABLE");

    let ids = b
        .store
        .list_range(&keys::user_jobs("gina@example.com"), 0, -1)
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);
    let record = stored_record(&b.store, &ids[0]).await;
    assert_eq!(record.status, Some(JobStatus::Failed));
    assert_eq!(record.error_code.as_deref(), Some("QUEUE_PUSH_FAILED"));

    b.queue.set_unavailable(false);
    let retried = b.service.retry(&owner, &ids[0]).await.unwrap();
    let retry_record = stored_record(&b.store, &retried.job_id).await;
    assert_eq!(retry_record.status, Some(JobStatus::Queued));
    assert_eq!(retry_record.retry_of_job_id.as_deref(), Some(ids[0].as_str()));
    assert_eq!(retry_record.input_storage_uri, record.input_storage_uri);
    assert_eq!(b.queue.messages("doc_jobs").len(), 1);
}

#[tokio::test]
async fn test_daily_quota_blocks_second_upload() {
    let mut settings = JobSettings::default();
    settings.features.upload_quotas = true;
    settings.quotas.daily_job_limit = 1;
    let b = backends(settings);
    let owner = ctx("hank@example.com", "req-lifecycle-05");

    b.service.submit(&owner, pdf_upload(None)).await.unwrap();
    let err = b.service.submit(&owner, pdf_upload(None)).await.unwrap_err();

    assert_eq!(err.code(), "USER_DAILY_QUOTA_EXCEEDED");
    assert_eq!(b.queue.messages("doc_jobs").len(), 1);
}

#[tokio::test]
async fn test_active_quota_counts_unfinished_jobs() {
    let mut settings = JobSettings::default();
    settings.features.upload_quotas = true;
    settings.quotas.active_job_limit = 1;
    let b = backends(settings);
    let owner = ctx("ivy@example.com", "req-lifecycle-06");

    let first = b.service.submit(&owner, pdf_upload(None)).await.unwrap();
    let err = b.service.submit(&owner, pdf_upload(None)).await.unwrap_err();
    assert_eq!(err.code(), "USER_ACTIVE_QUOTA_EXCEEDED");

    b.service.cancel(&owner, &first.job_id).await.unwrap();
    b.service.submit(&owner, pdf_upload(None)).await.unwrap();
}

#[tokio::test]
async fn test_page_limit_applies_only_when_enabled() {
    let mut settings = JobSettings::default();
    settings.intake.max_ocr_pages = 1;
    let relaxed = backends(settings.clone());
    let owner = ctx("jo@example.com", "req-lifecycle-07");
    relaxed.service.submit(&owner, pdf_upload(None)).await.unwrap();

    settings.features.duration_page_limits = true;
    let strict = backends(settings);
    let err = strict.service.submit(&owner, pdf_upload(None)).await.unwrap_err();
    assert_eq!(err.code(), "PAGE_LIMIT_EXCEEDED");
}
