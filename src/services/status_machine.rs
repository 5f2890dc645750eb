use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::models::job::{fields, FieldMap, JobStatus};
use crate::services::state_store::{StateStore, StoreError};

const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Whether `target` may follow `current` (`None` = no record yet).
pub fn is_allowed(current: Option<JobStatus>, target: JobStatus) -> bool {
    use JobStatus::*;
    match current {
        None | Some(Queued) => true,
        Some(Processing) => target != Queued,
        Some(terminal) => terminal == target,
    }
}

/// Result of a write that went through the machine.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    /// Status stored before the write (`None` for metadata-only writes and fresh records).
    pub previous: Option<JobStatus>,
    pub target: Option<JobStatus>,
}

/// Result of creating a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Bootstrap {
    Created,
    /// Someone else created the record first; this is what they wrote.
    Existing(FieldMap),
}

#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("invalid status transition to {target} from {}", label(.current))]
    Invalid {
        current: Option<JobStatus>,
        target: JobStatus,
    },

    #[error("status write lost {attempts} consecutive races")]
    Contended { attempts: usize },

    #[error("unknown status value {0:?}")]
    UnknownStatus(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The single gate for status mutations on job records.
///
/// Status-changing writes compare-and-set the record's `version` field, so a
/// writer that raced another re-reads and re-validates instead of
/// overwriting. Metadata-only writes go straight through.
pub struct StatusMachine {
    store: Arc<dyn StateStore>,
    max_attempts: usize,
}

impl StatusMachine {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub async fn apply(
        &self,
        key: &str,
        updates: &FieldMap,
        context: &str,
        request_id: &str,
    ) -> Result<Applied, TransitionError> {
        let Some(target) = target_status(updates)? else {
            self.store.set_fields(key, updates).await?;
            return Ok(Applied {
                previous: None,
                target: None,
            });
        };

        for attempt in 1..=self.max_attempts {
            let stored = self.store.get_fields(key).await?;
            let current = JobStatus::parse_stored(stored.get(fields::STATUS).map(String::as_str));

            if !is_allowed(current, target) {
                warn!(
                    context,
                    key,
                    current = %label(&current),
                    target = %target,
                    request_id,
                    "status_transition_blocked"
                );
                return Err(TransitionError::Invalid { current, target });
            }

            let stored_version = stored.get(fields::VERSION).cloned();
            let next_version = stored_version
                .as_deref()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0)
                + 1;

            let mut write = updates.clone();
            write.insert(fields::VERSION.to_string(), next_version.to_string());

            let landed = self
                .store
                .compare_and_set_fields(key, fields::VERSION, stored_version.as_deref(), &write)
                .await?;

            if landed {
                if current == Some(target) && target.is_terminal() {
                    info!(
                        context,
                        key,
                        status = %target,
                        request_id,
                        "status_transition_idempotent_terminal"
                    );
                }
                return Ok(Applied {
                    previous: current,
                    target: Some(target),
                });
            }

            debug!(context, key, attempt, "status write raced, re-reading");
        }

        warn!(context, key, target = %target, request_id, "status_transition_contended");
        Err(TransitionError::Contended {
            attempts: self.max_attempts,
        })
    }

    /// Create a record under `key`. Exactly one of several concurrent creators
    /// gets [`Bootstrap::Created`]; the rest see the winner's fields.
    pub async fn create(
        &self,
        key: &str,
        record: &FieldMap,
        context: &str,
        request_id: &str,
    ) -> Result<Bootstrap, TransitionError> {
        let target = target_status(record)?;

        let existing = self.store.get_fields(key).await?;
        if !existing.is_empty() {
            debug!(context, key, request_id, "record already exists");
            return Ok(Bootstrap::Existing(existing));
        }

        if let Some(target) = target {
            if !is_allowed(None, target) {
                return Err(TransitionError::Invalid {
                    current: None,
                    target,
                });
            }
        }

        let mut write = record.clone();
        write.insert(fields::VERSION.to_string(), "1".to_string());

        if self
            .store
            .compare_and_set_fields(key, fields::VERSION, None, &write)
            .await?
        {
            return Ok(Bootstrap::Created);
        }

        debug!(context, key, request_id, "lost record creation race");
        Ok(Bootstrap::Existing(self.store.get_fields(key).await?))
    }
}

fn label(status: &Option<JobStatus>) -> String {
    status.map(|s| s.to_string()).unwrap_or_else(|| "NONE".to_string())
}

fn target_status(updates: &FieldMap) -> Result<Option<JobStatus>, TransitionError> {
    match updates.get(fields::STATUS).map(|s| s.trim()) {
        None | Some("") => Ok(None),
        Some(raw) => JobStatus::parse_stored(Some(raw))
            .map(Some)
            .ok_or_else(|| TransitionError::UnknownStatus(raw.to_string())),
    }
}
