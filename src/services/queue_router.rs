use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::config::QueueSettings;
use crate::models::job::JobType;
use crate::services::queue::JobQueue;

/// Queue a job of `job_type` is pushed to.
pub fn resolve_queue(settings: &QueueSettings, job_type: JobType) -> &str {
    if !settings.partitioning_enabled {
        return &settings.shared;
    }
    match job_type {
        JobType::Ocr => &settings.ocr,
        JobType::Transcription => &settings.transcription,
    }
}

/// Every queue name in use under the current policy.
pub fn configured_queues(settings: &QueueSettings) -> Vec<String> {
    let mut names = if settings.partitioning_enabled {
        vec![settings.ocr.clone(), settings.transcription.clone()]
    } else {
        vec![settings.shared.clone()]
    };
    names.dedup();
    names
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueueDepth {
    pub name: String,
    /// Pending messages, or `-1` when the queue could not be read.
    pub depth: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueueHealth {
    pub queue_mode: &'static str,
    pub partitioning_enabled: bool,
    pub queues: Vec<QueueDepth>,
}

pub struct QueueRouter {
    queue: Arc<dyn JobQueue>,
    settings: QueueSettings,
}

impl QueueRouter {
    pub fn new(queue: Arc<dyn JobQueue>, settings: QueueSettings) -> Self {
        Self { queue, settings }
    }

    pub fn resolve(&self, job_type: JobType) -> &str {
        resolve_queue(&self.settings, job_type)
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Depth of every configured queue, read concurrently. A queue that
    /// cannot be read reports `-1` and does not affect the others.
    pub async fn aggregate_health(&self) -> QueueHealth {
        let names = configured_queues(&self.settings);
        let depths = join_all(names.iter().map(|name| self.queue.depth(name))).await;

        let queues = names
            .into_iter()
            .zip(depths)
            .map(|(name, depth)| {
                let depth = match depth {
                    Ok(depth) => i64::try_from(depth).unwrap_or(i64::MAX),
                    Err(e) => {
                        warn!(queue = %name, error = %e, "queue depth read failed");
                        -1
                    }
                };
                QueueDepth { name, depth }
            })
            .collect();

        QueueHealth {
            queue_mode: if self.settings.partitioning_enabled {
                "partitioned"
            } else {
                "single"
            },
            partitioning_enabled: self.settings.partitioning_enabled,
            queues,
        }
    }
}
