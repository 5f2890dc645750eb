use garde::Validate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::job::{JobRecord, JobStatus, JobType};

/// Query string of `GET /api/v1/jobs`.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ListQuery {
    #[garde(length(max = 32))]
    pub status: Option<String>,

    #[garde(length(max = 32))]
    pub job_type: Option<String>,

    /// Page size. Absent means "everything, unpaginated".
    #[garde(range(min = 1, max = 200))]
    pub limit: Option<usize>,

    #[serde(default)]
    #[garde(range(max = 100_000))]
    pub offset: usize,

    #[serde(default)]
    #[garde(skip)]
    pub include_counts: bool,
}

/// A job record as returned to its owner.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub record: JobRecord,

    /// Time-limited link to the output, when the worker stored one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,

    /// Worker recovery steps, decoded from the stored JSON text.
    pub recovery_trace: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListingPage {
    pub items: Vec<JobView>,
    pub offset: usize,
    pub limit: usize,
    pub next_offset: Option<usize>,
    pub has_more: bool,
    /// Matching jobs; only known when counts were requested.
    pub total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts_by_status: Option<BTreeMap<JobStatus, usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts_by_type: Option<BTreeMap<JobType, usize>>,
}

/// Unpaginated listings are a bare array; paginated ones a page object.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ListingResponse {
    All(Vec<JobView>),
    Page(ListingPage),
}
