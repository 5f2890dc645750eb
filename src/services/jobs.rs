use chrono::Utc;
use garde::Validate;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::JobSettings;
use crate::error::{JobError, StageContext};
use crate::models::intake::{PolicyDecision, PrecheckRequest, PrecheckResponse};
use crate::models::job::{fields, FieldMap, JobRecord, JobStatus, JobType, QueuePayload};
use crate::models::listing::{JobView, ListQuery, ListingResponse};
use crate::models::submission::{CancelResponse, RetryResponse, SubmitRequest, SubmitResponse};
use crate::services::cost_guardrail;
use crate::services::idempotency::{self, IdempotencyGuard};
use crate::services::intake_precheck;
use crate::services::intake_router;
use crate::services::listing::{JobListing, RecordEnricher};
use crate::services::queue::JobQueue;
use crate::services::queue_router::{QueueHealth, QueueRouter};
use crate::services::quota::QuotaGuard;
use crate::services::state_store::{keys, StateStore};
use crate::services::status_machine::{Bootstrap, StatusMachine};
use crate::services::storage::BlobStore;
use crate::services::upload_rules::{self, DEFAULT_OUTPUT_FILENAME};

const QUEUED_STAGE: &str = "Queued";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const INDEX_CLAIMED: &str = "1";
const INDEX_RELEASED: &str = "";
const GENERIC_FAILURE_MESSAGE: &str = "Processing failed. Please try again.";

/// Who is asking, and under which correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: String,
    pub owner: String,
}

/// Fill the failure fields clients rely on for FAILED jobs written by older workers.
pub fn normalize_failure_fields(record: &mut JobRecord) {
    if record.status != Some(JobStatus::Failed) {
        return;
    }
    if record.error_code.is_none() {
        record.error_code = Some("PROCESSING_FAILED".to_string());
    }
    if record.error_message.is_none() {
        let stage = Some(record.stage.trim()).filter(|s| !s.is_empty());
        let fallback = record
            .error
            .as_deref()
            .or(stage)
            .unwrap_or(GENERIC_FAILURE_MESSAGE);
        record.error_message = Some(fallback.to_string());
    }
}

/// Submission, status, listing, cancel and retry over the shared state store.
pub struct JobService {
    store: Arc<dyn StateStore>,
    queue: Arc<dyn JobQueue>,
    blobs: Arc<dyn BlobStore>,
    router: QueueRouter,
    machine: StatusMachine,
    idempotency: IdempotencyGuard,
    quotas: QuotaGuard,
    enricher: Arc<RecordEnricher>,
    listing: JobListing,
    settings: JobSettings,
}

impl JobService {
    pub fn new(
        store: Arc<dyn StateStore>,
        queue: Arc<dyn JobQueue>,
        blobs: Arc<dyn BlobStore>,
        settings: JobSettings,
    ) -> Self {
        let enricher = Arc::new(RecordEnricher::new(blobs.clone(), settings.signed_url_ttl));
        Self {
            router: QueueRouter::new(queue.clone(), settings.queues.clone()),
            machine: StatusMachine::new(store.clone()),
            idempotency: IdempotencyGuard::new(
                store.clone(),
                settings.idempotency_ttl,
                settings.enqueue_guard_ttl,
            ),
            quotas: QuotaGuard::new(store.clone(), settings.quotas.clone()),
            listing: JobListing::new(store.clone(), enricher.clone()),
            enricher,
            store,
            queue,
            blobs,
            settings,
        }
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    /// Admit a new job, or return the job an earlier submission with the
    /// same idempotency token created.
    pub async fn submit(&self, ctx: &RequestContext, request: SubmitRequest) -> Result<SubmitResponse, JobError> {
        let job_type_label = request.job_type.trim().to_uppercase();
        let result = self.submit_upload(ctx, request).await;
        if let Err(e) = &result {
            metrics::counter!(
                "api_jobs_submit_failed_total",
                "reason" => e.code(),
                "job_type" => job_type_label.clone()
            )
            .increment(1);
            warn!(
                stage = "UPLOAD_REQUEST",
                event = "FAILED",
                owner = %ctx.owner,
                job_type = %job_type_label,
                request_id = %ctx.request_id,
                error = %e,
                "job submission failed"
            );
        }
        result
    }

    async fn submit_upload(&self, ctx: &RequestContext, request: SubmitRequest) -> Result<SubmitResponse, JobError> {
        let job_type = JobType::from_str(request.job_type.trim())
            .map_err(|_| JobError::validation("INVALID_JOB_TYPE", "Invalid job type"))?;
        request
            .validate()
            .map_err(|report| JobError::validation("INVALID_METADATA", report.to_string()))?;

        let owner = ctx.owner.as_str();
        let request_id = ctx.request_id.as_str();
        let queue_name = self.router.resolve(job_type).to_string();
        let token = idempotency::normalize_token(request.idempotency_key.as_deref());

        if let Some(token) = &token {
            info!(
                job_id = "idempotency-check",
                stage = "UPLOAD_IDEMPOTENCY",
                event = "STARTED",
                owner,
                job_type = %job_type,
                request_id,
                "idempotency check"
            );
            let reused = self
                .idempotency
                .try_reuse(owner, job_type, token, request_id)
                .await
                .stage("UPLOAD_IDEMPOTENCY")?;
            if let Some(reused) = reused {
                self.complete_submission(&reused.record, &queue_name, true, request_id)
                    .await?;
                return Ok(SubmitResponse {
                    job_id: reused.job_id,
                    request_id: reused.request_id,
                    reused: true,
                });
            }
        }

        let job_id = match &token {
            Some(token) => idempotency::derive_job_id(owner, job_type, token),
            None => Uuid::new_v4().simple().to_string(),
        };
        let filename = request.filename.trim().to_string();
        let mime_type = request.content_type.as_deref();

        info!(
            job_id = %job_id,
            stage = "UPLOAD_REQUEST",
            event = "STARTED",
            owner,
            job_type = %job_type,
            filename = %filename,
            queue = %queue_name,
            request_id,
            "job submission started"
        );

        if self.settings.features.upload_quotas {
            self.quotas.enforce(owner, job_type, request_id).await?;
        }

        let detection = intake_router::detect_route(&filename, mime_type);
        info!(
            job_id = %job_id,
            stage = "UPLOAD_ROUTE_DETECT",
            event = "COMPLETED",
            owner,
            job_type = %job_type,
            detected_job_type = %detection.detected_job_type,
            confidence = detection.confidence,
            reasons = %detection.reasons.join("|"),
            request_id,
            "route detected"
        );

        let input_size_bytes = request.data.len() as u64;
        let total_pages = upload_rules::derive_total_pages(job_type, &filename, &request.data);

        let warnings = intake_precheck::build_warnings(
            &self.settings.intake,
            job_type,
            &filename,
            mime_type,
            Some(input_size_bytes),
            request.media_duration_sec,
            total_pages,
        );
        if !warnings.is_empty() {
            let codes: Vec<&str> = warnings.iter().map(|w| w.code).collect();
            info!(
                job_id = %job_id,
                stage = "UPLOAD_PRECHECK_WARNINGS",
                event = "COMPLETED",
                owner,
                job_type = %job_type,
                warning_codes = %codes.join("|"),
                warning_count = warnings.len(),
                request_id,
                "advisory intake warnings"
            );
        }

        if self.settings.features.duration_page_limits {
            upload_rules::enforce_page_and_duration_limits(
                &self.settings.intake,
                job_type,
                total_pages,
                request.media_duration_sec,
            )?;
        }
        upload_rules::validate_upload(&self.settings.intake, job_type, &filename, mime_type, input_size_bytes)?;

        if self.settings.features.cost_guardrail {
            let assessment = cost_guardrail::evaluate(
                &self.settings.cost,
                job_type,
                Some(input_size_bytes),
                request.media_duration_sec,
                total_pages,
            );
            match assessment.policy_decision {
                PolicyDecision::Block => return Err(JobError::PolicyBlocked(assessment.policy_reason)),
                PolicyDecision::Warn => warn!(
                    job_id = %job_id,
                    stage = "UPLOAD_COST_GUARDRAIL",
                    owner,
                    job_type = %job_type,
                    projected_cost_usd = assessment.projected_cost_usd,
                    request_id,
                    "projected cost above warn threshold"
                ),
                PolicyDecision::Allow => {}
            }
        }

        let input_storage_uri = self
            .blobs
            .store(
                &request.data,
                &format!("jobs/{job_id}/input/{filename}"),
                mime_type.unwrap_or(DEFAULT_CONTENT_TYPE),
            )
            .await
            .stage("INPUT_STORED")?;
        info!(
            job_id = %job_id,
            stage = "INPUT_STORED",
            event = "COMPLETED",
            owner,
            job_type = %job_type,
            input_storage_uri = %input_storage_uri,
            input_size_bytes,
            request_id,
            "input stored"
        );

        let now = Utc::now();
        let record = JobRecord {
            job_id: job_id.clone(),
            status: Some(JobStatus::Queued),
            job_type: Some(job_type),
            stage: QUEUED_STAGE.to_string(),
            progress: 0,
            owner: owner.to_string(),
            source: job_type.upload_source().to_string(),
            output_filename: upload_rules::output_filename(&filename),
            input_filename: filename,
            input_size_bytes,
            input_storage_uri: Some(input_storage_uri),
            total_pages,
            duration_sec: request.media_duration_sec,
            created_at: Some(now),
            updated_at: Some(now),
            request_id: Some(request_id.to_string()),
            ..Default::default()
        };

        let key = keys::job(&job_id);
        match self
            .machine
            .create(&key, &record.to_fields(), "UPLOAD_INIT", request_id)
            .await?
        {
            Bootstrap::Created => {}
            Bootstrap::Existing(existing) => {
                // A concurrent submission with the same token won the creation race.
                let winner = JobRecord::from_fields(&job_id, &existing)
                    .filter(|r| r.is_owned_by(owner) && r.job_type == Some(job_type))
                    .ok_or_else(|| JobError::Conflict(format!("Job {job_id} already exists")))?;
                self.complete_submission(&winner, &queue_name, token.is_some(), request_id)
                    .await?;
                metrics::counter!("api_jobs_idempotent_reused_total", "job_type" => job_type.to_string())
                    .increment(1);
                return Ok(SubmitResponse {
                    job_id,
                    request_id: winner.request_id.unwrap_or_else(|| request_id.to_string()),
                    reused: true,
                });
            }
        }

        if let Some(token) = &token {
            self.idempotency
                .remember(owner, job_type, token, &job_id)
                .await
                .stage("JOB_METADATA")?;
        }
        self.index_once(&record, request_id).await?;
        info!(
            job_id = %job_id,
            stage = "JOB_METADATA",
            event = "COMPLETED",
            owner,
            job_type = %job_type,
            source = %record.source,
            request_id,
            "job record created"
        );

        self.enqueue_once(&record, &queue_name, token.is_some(), request_id)
            .await?;

        metrics::counter!(
            "api_jobs_submitted_total",
            "job_type" => job_type.to_string(),
            "source" => record.source.clone()
        )
        .increment(1);
        info!(
            job_id = %job_id,
            stage = "UPLOAD_REQUEST",
            event = "COMPLETED",
            owner,
            job_type = %job_type,
            request_id,
            "job submitted"
        );

        Ok(SubmitResponse {
            job_id,
            request_id: request_id.to_string(),
            reused: false,
        })
    }

    /// Finish a submission that an earlier request may have cut short: file
    /// the job in its owner's index, and queue it while it is still QUEUED.
    async fn complete_submission(
        &self,
        record: &JobRecord,
        queue_name: &str,
        tokenized: bool,
        request_id: &str,
    ) -> Result<(), JobError> {
        self.index_once(record, request_id).await?;
        if record.status != Some(JobStatus::Queued) {
            return Ok(());
        }
        self.enqueue_once(record, queue_name, tokenized, request_id)
            .await
    }

    /// Append the job to its owner's index exactly once and count it against
    /// the daily quota. The claim is a field on the record, so it lives as
    /// long as the job does.
    async fn index_once(&self, record: &JobRecord, request_id: &str) -> Result<(), JobError> {
        let job_id = record.job_id.as_str();
        let key = keys::job(job_id);
        let claim = FieldMap::from([(fields::USER_INDEXED.to_string(), INDEX_CLAIMED.to_string())]);

        let mut claimed = self
            .store
            .compare_and_set_fields(&key, fields::USER_INDEXED, None, &claim)
            .await
            .stage("JOB_METADATA")?;
        if !claimed {
            // A previous claim was given back after a failed append.
            claimed = self
                .store
                .compare_and_set_fields(&key, fields::USER_INDEXED, Some(INDEX_RELEASED), &claim)
                .await
                .stage("JOB_METADATA")?;
        }
        if !claimed {
            debug!(job_id, stage = "JOB_METADATA", request_id, "job already indexed");
            return Ok(());
        }

        if let Err(append_error) = self
            .store
            .list_append(&keys::user_jobs(&record.owner), job_id)
            .await
        {
            let release = FieldMap::from([(fields::USER_INDEXED.to_string(), INDEX_RELEASED.to_string())]);
            if let Err(e) = self
                .store
                .compare_and_set_fields(&key, fields::USER_INDEXED, Some(INDEX_CLAIMED), &release)
                .await
            {
                warn!(job_id, error = %e, request_id, "index claim release failed");
            }
            return Err(append_error).stage("JOB_METADATA");
        }

        if self.settings.features.upload_quotas {
            self.quotas.register(&record.owner).await?;
        }
        Ok(())
    }

    /// Push `record` onto `queue_name` unless another request already did.
    ///
    /// A failed push gives the guard back and marks the record FAILED so the
    /// owner can retry it.
    async fn enqueue_once(
        &self,
        record: &JobRecord,
        queue_name: &str,
        tokenized: bool,
        request_id: &str,
    ) -> Result<(), JobError> {
        let job_id = record.job_id.as_str();
        let payload = QueuePayload::project(record, queue_name)
            .map_err(|e| JobError::validation("INVALID_JOB_RECORD", e.to_string()))?;

        let claimed = self
            .idempotency
            .claim_enqueue(job_id, tokenized)
            .await
            .stage("QUEUE_ENQUEUE")?;
        if !claimed {
            info!(
                job_id,
                stage = "QUEUE_ENQUEUE",
                event = "COMPLETED",
                queue = queue_name,
                request_id,
                "duplicate_enqueue_skipped"
            );
            return Ok(());
        }

        if let Err(push_error) = self.queue.push(queue_name, &payload).await {
            warn!(
                job_id,
                stage = "QUEUE_ENQUEUE",
                event = "FAILED",
                queue = queue_name,
                error = %push_error,
                request_id,
                "queue push failed"
            );
            if let Err(e) = self.idempotency.release_enqueue(job_id).await {
                warn!(job_id, error = %e, request_id, "enqueue guard release failed");
            }
            self.mark_push_failed(job_id, request_id).await;
            return Err(JobError::Infrastructure {
                stage: "QUEUE_ENQUEUE",
                source: push_error.into(),
            });
        }

        let depth = self.queue.depth(queue_name).await.ok();
        info!(
            job_id,
            stage = "QUEUE_ENQUEUE",
            event = "COMPLETED",
            queue = queue_name,
            queue_depth = ?depth,
            request_id,
            "job enqueued"
        );
        Ok(())
    }

    async fn mark_push_failed(&self, job_id: &str, request_id: &str) {
        let mut updates = FieldMap::new();
        updates.insert(fields::STATUS.into(), JobStatus::Failed.to_string());
        updates.insert(fields::STAGE.into(), "Queue push failed".into());
        updates.insert(fields::ERROR_CODE.into(), "QUEUE_PUSH_FAILED".into());
        updates.insert(
            fields::ERROR_MESSAGE.into(),
            "The job could not be queued. Please retry.".into(),
        );
        updates.insert(fields::UPDATED_AT.into(), Utc::now().to_rfc3339());

        if let Err(e) = self
            .machine
            .apply(&keys::job(job_id), &updates, "QUEUE_ENQUEUE", request_id)
            .await
        {
            warn!(job_id, error = %e, request_id, "could not mark unqueued job as failed");
        }
    }

    async fn load_owned(&self, ctx: &RequestContext, job_id: &str, stage: &'static str) -> Result<JobRecord, JobError> {
        let stored = self.store.get_fields(&keys::job(job_id)).await.stage(stage)?;
        let record = JobRecord::from_fields(job_id, &stored).ok_or(JobError::NotFound)?;
        if !record.is_owned_by(&ctx.owner) {
            return Err(JobError::Forbidden);
        }
        Ok(record)
    }

    /// Current view of one job, for its owner only.
    pub async fn status(&self, ctx: &RequestContext, job_id: &str) -> Result<JobView, JobError> {
        info!(job_id, stage = "STATUS_READ", event = "STARTED", owner = %ctx.owner, "status read");
        let record = match self.load_owned(ctx, job_id, "STATUS_READ").await {
            Ok(record) => record,
            Err(e) => {
                warn!(job_id, stage = "STATUS_READ", event = "FAILED", owner = %ctx.owner, error = %e, "status read failed");
                return Err(e);
            }
        };

        let mut view = self.enricher.enrich(record, &ctx.request_id).await?;
        normalize_failure_fields(&mut view.record);

        info!(
            job_id,
            stage = "STATUS_READ",
            event = "COMPLETED",
            owner = %ctx.owner,
            status = ?view.record.status,
            worker_stage = %view.record.stage,
            progress = view.record.progress,
            error_code = ?view.record.error_code,
            request_id = %ctx.request_id,
            "status read"
        );
        Ok(view)
    }

    pub async fn list(&self, ctx: &RequestContext, query: &ListQuery) -> Result<ListingResponse, JobError> {
        query
            .validate()
            .map_err(|report| JobError::validation("INVALID_QUERY", report.to_string()))?;
        self.listing.list(&ctx.owner, query, &ctx.request_id).await
    }

    /// Mark a job CANCELLED. Finished jobs are left as they are.
    pub async fn cancel(&self, ctx: &RequestContext, job_id: &str) -> Result<CancelResponse, JobError> {
        info!(job_id, stage = "JOB_CANCEL", event = "STARTED", owner = %ctx.owner, request_id = %ctx.request_id, "cancel requested");
        let result = self.cancel_job(ctx, job_id).await;
        if let Err(e) = &result {
            metrics::counter!("api_jobs_cancel_failed_total", "reason" => e.code()).increment(1);
            warn!(job_id, stage = "JOB_CANCEL", event = "FAILED", owner = %ctx.owner, error = %e, "cancel failed");
        }
        result
    }

    async fn cancel_job(&self, ctx: &RequestContext, job_id: &str) -> Result<CancelResponse, JobError> {
        let record = self.load_owned(ctx, job_id, "JOB_CANCEL").await?;

        if let Some(status) = record.status.filter(|s| s.is_terminal()) {
            metrics::counter!("api_jobs_cancel_noop_total", "status" => status.to_string()).increment(1);
            info!(
                job_id,
                stage = "JOB_CANCEL",
                event = "COMPLETED",
                owner = %ctx.owner,
                status = %status,
                "already_finished"
            );
            return Ok(CancelResponse {
                job_id: job_id.to_string(),
                status,
                message: "Job already finished".to_string(),
            });
        }

        let mut updates = FieldMap::new();
        updates.insert(fields::CANCEL_REQUESTED.into(), "1".into());
        updates.insert(fields::STATUS.into(), JobStatus::Cancelled.to_string());
        updates.insert(fields::STAGE.into(), "Cancelled by user".into());
        updates.insert(fields::UPDATED_AT.into(), Utc::now().to_rfc3339());

        let record_request_id = record.request_id.clone().unwrap_or_default();
        self.machine
            .apply(&keys::job(job_id), &updates, "JOB_CANCEL", &record_request_id)
            .await?;

        let prior = record
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "UNKNOWN".to_string());
        metrics::counter!("api_jobs_cancel_requested_total", "prior_status" => prior).increment(1);
        info!(
            job_id,
            stage = "JOB_CANCEL",
            event = "COMPLETED",
            owner = %ctx.owner,
            status = %JobStatus::Cancelled,
            "job cancelled"
        );

        Ok(CancelResponse {
            job_id: job_id.to_string(),
            status: JobStatus::Cancelled,
            message: "Cancellation requested".to_string(),
        })
    }

    /// Resubmit a FAILED or CANCELLED job as a new job that points back at it.
    pub async fn retry(&self, ctx: &RequestContext, job_id: &str) -> Result<RetryResponse, JobError> {
        info!(job_id, stage = "JOB_RETRY", event = "STARTED", owner = %ctx.owner, request_id = %ctx.request_id, "retry requested");
        let result = self.retry_job(ctx, job_id).await;
        if let Err(e) = &result {
            metrics::counter!("api_jobs_retry_failed_total", "reason" => e.code()).increment(1);
            warn!(job_id, stage = "JOB_RETRY", event = "FAILED", owner = %ctx.owner, error = %e, "retry failed");
        }
        result
    }

    async fn retry_job(&self, ctx: &RequestContext, job_id: &str) -> Result<RetryResponse, JobError> {
        let original = self.load_owned(ctx, job_id, "JOB_RETRY").await?;

        if !matches!(original.status, Some(JobStatus::Failed | JobStatus::Cancelled)) {
            let current = original
                .status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "UNKNOWN".to_string());
            return Err(JobError::Conflict(format!(
                "Retry allowed only for FAILED/CANCELLED jobs (current={current})"
            )));
        }

        let job_type = original.job_type.unwrap_or(JobType::Ocr);
        let queue_name = self.router.resolve(job_type).to_string();
        let input_storage_uri = original.input_storage_uri.clone().unwrap_or_else(|| {
            self.blobs
                .storage_uri(&format!("jobs/{job_id}/input/{}", original.input_filename))
        });
        let source = if original.source.is_empty() {
            job_type.upload_source().to_string()
        } else {
            original.source.clone()
        };
        let output_filename = if original.output_filename.is_empty() {
            DEFAULT_OUTPUT_FILENAME.to_string()
        } else {
            original.output_filename.clone()
        };

        let retry_job_id = Uuid::new_v4().simple().to_string();
        let now = Utc::now();
        let record = JobRecord {
            job_id: retry_job_id.clone(),
            status: Some(JobStatus::Queued),
            job_type: Some(job_type),
            stage: QUEUED_STAGE.to_string(),
            progress: 0,
            owner: ctx.owner.clone(),
            source,
            input_filename: original.input_filename.clone(),
            input_size_bytes: original.input_size_bytes,
            input_storage_uri: Some(input_storage_uri),
            output_filename,
            total_pages: original.total_pages,
            duration_sec: original.duration_sec,
            created_at: Some(now),
            updated_at: Some(now),
            request_id: Some(ctx.request_id.clone()),
            retry_of_job_id: Some(job_id.to_string()),
            ..Default::default()
        };

        match self
            .machine
            .create(&keys::job(&retry_job_id), &record.to_fields(), "JOB_RETRY_INIT", &ctx.request_id)
            .await?
        {
            Bootstrap::Created => {}
            Bootstrap::Existing(_) => {
                return Err(JobError::Conflict(format!("Job {retry_job_id} already exists")));
            }
        }

        self.store
            .list_append(&keys::user_jobs(&ctx.owner), &retry_job_id)
            .await
            .stage("JOB_RETRY")?;
        self.enqueue_once(&record, &queue_name, false, &ctx.request_id)
            .await?;

        metrics::counter!(
            "api_jobs_retry_requested_total",
            "job_type" => job_type.to_string(),
            "source" => record.source.clone(),
            "queue" => queue_name.clone()
        )
        .increment(1);
        info!(
            job_id = %retry_job_id,
            stage = "JOB_RETRY",
            event = "COMPLETED",
            owner = %ctx.owner,
            retry_of_job_id = job_id,
            queue = %queue_name,
            job_type = %job_type,
            request_id = %ctx.request_id,
            "job retried"
        );

        Ok(RetryResponse {
            job_id: retry_job_id,
            request_id: ctx.request_id.clone(),
            retry_of_job_id: job_id.to_string(),
        })
    }

    /// Advisory pre-upload analysis. Reads and writes nothing.
    pub fn precheck(&self, ctx: &RequestContext, request: &PrecheckRequest) -> Result<PrecheckResponse, JobError> {
        if !self.settings.features.smart_intake {
            return Err(JobError::FeatureDisabled("Smart intake"));
        }
        request
            .validate()
            .map_err(|report| JobError::validation("INVALID_METADATA", report.to_string()))?;

        let response = intake_precheck::assess(&self.settings, request);
        let route = response.detected_job_type.to_string();
        let effective = intake_precheck::effective_job_type(
            response.detected_job_type,
            request.mime_type.as_deref(),
        )
        .to_string();

        metrics::counter!(
            "intake_precheck_decisions_total",
            "route" => route.clone(),
            "job_type" => effective.clone(),
            "decision" => response.policy_decision.to_string()
        )
        .increment(1);
        metrics::counter!(
            "intake_precheck_warnings_total",
            "route" => route.clone(),
            "job_type" => effective.clone()
        )
        .increment(response.warnings.len() as u64);
        metrics::counter!(
            "intake_precheck_eta_bucket_total",
            "bucket" => intake_precheck::eta_bucket(response.eta_sec),
            "route" => route.clone(),
            "job_type" => effective.clone()
        )
        .increment(1);

        info!(
            job_id = "intake-precheck",
            stage = "INTAKE_PRECHECK",
            event = "COMPLETED",
            owner = %ctx.owner,
            detected_job_type = %route,
            job_type = %effective,
            confidence = response.confidence,
            warning_count = response.warnings.len(),
            eta_sec = response.eta_sec,
            policy_decision = %response.policy_decision,
            projected_cost_usd = response.projected_cost_usd,
            request_id = %ctx.request_id,
            "intake precheck"
        );
        Ok(response)
    }

    pub async fn queue_health(&self) -> QueueHealth {
        self.router.aggregate_health().await
    }
}
