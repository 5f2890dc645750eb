use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::QuotaSettings;
use crate::error::{JobError, StageContext};
use crate::models::job::{fields, JobStatus, JobType};
use crate::services::state_store::{keys, StateStore};

/// Newest index entries inspected when counting active jobs.
const ACTIVE_SCAN_WINDOW: isize = 200;
const DAILY_COUNTER_TTL: Duration = Duration::from_secs(48 * 3600);

fn today() -> String {
    Utc::now().format("%Y%m%d").to_string()
}

/// Per-user submission limits. A zero limit disables that check.
pub struct QuotaGuard {
    store: Arc<dyn StateStore>,
    settings: QuotaSettings,
}

impl QuotaGuard {
    pub fn new(store: Arc<dyn StateStore>, settings: QuotaSettings) -> Self {
        Self { store, settings }
    }

    pub async fn enforce(&self, owner: &str, job_type: JobType, request_id: &str) -> Result<(), JobError> {
        let daily_limit = self.settings.daily_job_limit;
        if daily_limit > 0 {
            let used = self
                .store
                .get(&keys::daily_usage(owner, &today()))
                .await
                .stage("UPLOAD_QUOTA")?
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0);
            if used >= daily_limit {
                return Err(JobError::quota(
                    "USER_DAILY_QUOTA_EXCEEDED",
                    format!("Daily upload limit reached ({daily_limit})."),
                ));
            }
        }

        let active_limit = self.settings.active_job_limit;
        if active_limit > 0 {
            let active = self.count_active(owner).await?;
            if active >= active_limit {
                return Err(JobError::quota(
                    "USER_ACTIVE_QUOTA_EXCEEDED",
                    format!("Active job limit reached ({active_limit}). Wait for completion."),
                ));
            }
        }

        info!(
            owner,
            job_type = %job_type,
            request_id,
            daily_limit,
            active_limit,
            "quota_check_pass"
        );
        Ok(())
    }

    /// Count one more submission against today's counter.
    pub async fn register(&self, owner: &str) -> Result<(), JobError> {
        if self.settings.daily_job_limit == 0 {
            return Ok(());
        }
        self.store
            .increment(&keys::daily_usage(owner, &today()), DAILY_COUNTER_TTL)
            .await
            .stage("UPLOAD_QUOTA")?;
        Ok(())
    }

    async fn count_active(&self, owner: &str) -> Result<u64, JobError> {
        let ids = self
            .store
            .list_range(&keys::user_jobs(owner), 0, ACTIVE_SCAN_WINDOW - 1)
            .await
            .stage("UPLOAD_QUOTA")?;
        let record_keys: Vec<String> = ids.iter().map(|id| keys::job(id)).collect();
        let rows = self
            .store
            .get_projection_batch(&record_keys, &[fields::STATUS])
            .await
            .stage("UPLOAD_QUOTA")?;

        let active = rows
            .iter()
            .filter_map(|row| row.first().cloned().flatten())
            .filter_map(|raw| JobStatus::parse_stored(Some(&raw)))
            .filter(|status| !status.is_terminal())
            .count();
        Ok(active as u64)
    }
}
