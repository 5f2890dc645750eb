use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::models::job::{JobRecord, JobType};
use crate::services::state_store::{keys, StateStore, StoreError};

const MAX_TOKEN_LEN: usize = 128;
const JOB_ID_LEN: usize = 32;

/// Strip a client token to `[A-Za-z0-9_.:-]` and cap its length.
/// `None` means the caller did not ask for idempotency.
pub fn normalize_token(raw: Option<&str>) -> Option<String> {
    let token: String = raw?
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'))
        .take(MAX_TOKEN_LEN)
        .collect();
    (!token.is_empty()).then_some(token)
}

/// Deterministic job id for `(owner, job_type, token)`: the first 32 hex
/// characters of SHA-256 over `owner|job_type|token`.
pub fn derive_job_id(owner: &str, job_type: JobType, token: &str) -> String {
    let digest = Sha256::digest(format!("{owner}|{job_type}|{token}").as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(JOB_ID_LEN);
    id
}

/// How a duplicate submission was recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReuseSource {
    CachedMapping,
    DeterministicId,
}

impl ReuseSource {
    fn as_message(self) -> &'static str {
        match self {
            ReuseSource::CachedMapping => "duplicate_reused_cached_key",
            ReuseSource::DeterministicId => "duplicate_reused_deterministic_key",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReusedJob {
    pub job_id: String,
    /// Correlation id of the submission that created the job.
    pub request_id: String,
    pub source: ReuseSource,
    /// The stored record, for finishing a submission that was cut short.
    pub record: JobRecord,
}

/// Maps `(owner, job_type, token)` to a job id and guards the queue push.
pub struct IdempotencyGuard {
    store: Arc<dyn StateStore>,
    ttl: Duration,
    enqueue_guard_ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn StateStore>, ttl: Duration, enqueue_guard_ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            enqueue_guard_ttl,
        }
    }

    /// Find the job an earlier submission with the same token created.
    ///
    /// A mapping that points at a missing record, or at a record owned by
    /// someone else, is deleted and treated as no match.
    pub async fn try_reuse(
        &self,
        owner: &str,
        job_type: JobType,
        token: &str,
        request_id: &str,
    ) -> Result<Option<ReusedJob>, StoreError> {
        let map_key = keys::idempotency(owner, &job_type.to_string(), token);

        if let Some(mapped_id) = self.store.get(&map_key).await? {
            if let Some(record) = self.matching_record(&mapped_id, owner, job_type).await? {
                self.store.expire(&map_key, self.ttl).await?;
                return Ok(Some(self.reused(record, request_id, ReuseSource::CachedMapping)));
            }
            warn!(owner, job_id = %mapped_id, request_id, "stale idempotency mapping dropped");
            self.store.delete(&map_key).await?;
        }

        let derived_id = derive_job_id(owner, job_type, token);
        if let Some(record) = self.matching_record(&derived_id, owner, job_type).await? {
            self.store
                .set_with_expiry(&map_key, &derived_id, self.ttl)
                .await?;
            return Ok(Some(self.reused(record, request_id, ReuseSource::DeterministicId)));
        }

        Ok(None)
    }

    /// Store the mapping once the job record exists.
    pub async fn remember(
        &self,
        owner: &str,
        job_type: JobType,
        token: &str,
        job_id: &str,
    ) -> Result<(), StoreError> {
        let map_key = keys::idempotency(owner, &job_type.to_string(), token);
        self.store.set_with_expiry(&map_key, job_id, self.ttl).await
    }

    /// Claim the right to push `job_id` onto the queue. Only one caller wins
    /// while the guard lives.
    pub async fn claim_enqueue(&self, job_id: &str, tokenized: bool) -> Result<bool, StoreError> {
        let ttl = if tokenized { self.ttl } else { self.enqueue_guard_ttl };
        self.store
            .set_if_absent(&keys::enqueue_guard(job_id), "1", ttl)
            .await
    }

    /// Give the claim back after a failed push so a retry can enqueue.
    pub async fn release_enqueue(&self, job_id: &str) -> Result<(), StoreError> {
        self.store.delete(&keys::enqueue_guard(job_id)).await
    }

    async fn matching_record(
        &self,
        job_id: &str,
        owner: &str,
        job_type: JobType,
    ) -> Result<Option<JobRecord>, StoreError> {
        let fields = self.store.get_fields(&keys::job(job_id)).await?;
        Ok(JobRecord::from_fields(job_id, &fields)
            .filter(|record| record.is_owned_by(owner) && record.job_type == Some(job_type)))
    }

    fn reused(&self, record: JobRecord, request_id: &str, source: ReuseSource) -> ReusedJob {
        let job_type = record.job_type.map(|t| t.to_string()).unwrap_or_default();
        info!(
            job_id = %record.job_id,
            stage = "UPLOAD_IDEMPOTENCY",
            event = "COMPLETED",
            owner = %record.owner,
            job_type = %job_type,
            request_id,
            reason = source.as_message(),
            "duplicate submission reused"
        );
        metrics::counter!("api_jobs_idempotent_reused_total", "job_type" => job_type).increment(1);

        ReusedJob {
            request_id: record
                .request_id
                .clone()
                .unwrap_or_else(|| request_id.to_string()),
            job_id: record.job_id.clone(),
            source,
            record,
        }
    }
}
