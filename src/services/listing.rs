use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{JobError, StageContext};
use crate::models::job::{fields, JobRecord, JobStatus, JobType};
use crate::models::listing::{JobView, ListQuery, ListingPage, ListingResponse};
use crate::services::state_store::{keys, StateStore};
use crate::services::storage::BlobStore;
use crate::services::upload_rules::DEFAULT_OUTPUT_FILENAME;

/// Candidates whose projections are read per round trip when the scan may stop early.
const SCAN_CHUNK: usize = 100;
const PROJECTION: [&str; 3] = [fields::STATUS, fields::JOB_TYPE, fields::LEGACY_TYPE];

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ListFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
}

impl ListFilter {
    pub fn from_query(query: &ListQuery) -> Result<Self, JobError> {
        Ok(Self {
            status: parse_filter(query.status.as_deref(), "status")?,
            job_type: parse_filter(query.job_type.as_deref(), "job_type")?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.job_type.is_none()
    }
}

fn parse_filter<T: FromStr>(raw: Option<&str>, name: &str) -> Result<Option<T>, JobError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => T::from_str(value).map(Some).map_err(|_| {
            JobError::validation("INVALID_FILTER", format!("Unknown {name} filter: {value}"))
        }),
    }
}

/// Accumulates one pass over an owner's index.
struct Scan {
    selected: Vec<String>,
    matched_total: usize,
    scanned: usize,
    by_status: BTreeMap<JobStatus, usize>,
    by_type: BTreeMap<JobType, usize>,
}

impl Scan {
    fn new() -> Self {
        Self {
            selected: Vec::new(),
            matched_total: 0,
            scanned: 0,
            by_status: JobStatus::ALL.into_iter().map(|s| (s, 0)).collect(),
            by_type: JobType::ALL.into_iter().map(|t| (t, 0)).collect(),
        }
    }

    /// Feed one candidate. Returns `false` once nothing further can change the result.
    fn visit(
        &mut self,
        job_id: &str,
        row: &[Option<String>],
        filter: &ListFilter,
        offset: usize,
        limit: usize,
        include_counts: bool,
    ) -> bool {
        self.scanned += 1;
        let raw = |idx: usize| row.get(idx).and_then(|v| v.as_deref());
        if row.iter().all(Option::is_none) {
            // Index entry without a record.
            return true;
        }
        let status = JobStatus::parse_stored(raw(0));
        let job_type = JobType::parse_stored(raw(1)).or_else(|| JobType::parse_stored(raw(2)));

        if include_counts {
            if let Some(job_type) = job_type {
                *self.by_type.entry(job_type).or_default() += 1;
            }
        }
        if filter.job_type.is_some() && job_type != filter.job_type {
            return true;
        }

        if include_counts {
            if let Some(status) = status {
                *self.by_status.entry(status).or_default() += 1;
            }
        }
        if filter.status.is_some() && status != filter.status {
            return true;
        }

        self.matched_total += 1;
        if self.matched_total <= offset {
            return true;
        }
        if self.selected.len() <= limit {
            self.selected.push(job_id.to_string());
        }
        include_counts || self.selected.len() <= limit
    }
}

/// Time-limited link resolution and request-id backfill for returned records.
pub struct RecordEnricher {
    blobs: Arc<dyn BlobStore>,
    signed_url_ttl: Duration,
}

impl RecordEnricher {
    pub fn new(blobs: Arc<dyn BlobStore>, signed_url_ttl: Duration) -> Self {
        Self {
            blobs,
            signed_url_ttl,
        }
    }

    /// Build the caller-facing view of `record`. The stored record is not touched.
    pub async fn enrich(&self, mut record: JobRecord, request_id: &str) -> Result<JobView, JobError> {
        if record.request_id.is_none() && !request_id.is_empty() {
            record.request_id = Some(request_id.to_string());
        }

        let download_url = match record.output_path.as_deref() {
            Some(path) if self.blobs.is_storage_uri(path) => {
                let filename = download_name(&record, path);
                let url = self
                    .blobs
                    .signed_download_url(path, self.signed_url_ttl, &filename)
                    .await
                    .stage("OUTPUT_LINK")?;
                Some(url)
            }
            _ => None,
        };

        let recovery_trace = record
            .extra
            .remove("recovery_trace")
            .map(|raw| decode_trace(&raw))
            .unwrap_or_default();

        Ok(JobView {
            record,
            download_url,
            recovery_trace,
        })
    }
}

fn download_name(record: &JobRecord, path: &str) -> String {
    if !record.output_filename.is_empty() {
        return record.output_filename.clone();
    }
    path.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_OUTPUT_FILENAME)
        .to_string()
}

fn decode_trace(raw: &str) -> Vec<serde_json::Value> {
    match serde_json::from_str::<serde_json::Value>(raw.trim()) {
        Ok(serde_json::Value::Array(steps)) => steps,
        _ => Vec::new(),
    }
}

/// Filtered, paginated views over one owner's job index.
pub struct JobListing {
    store: Arc<dyn StateStore>,
    enricher: Arc<RecordEnricher>,
}

impl JobListing {
    pub fn new(store: Arc<dyn StateStore>, enricher: Arc<RecordEnricher>) -> Self {
        Self { store, enricher }
    }

    pub async fn list(
        &self,
        owner: &str,
        query: &ListQuery,
        request_id: &str,
    ) -> Result<ListingResponse, JobError> {
        let filter = ListFilter::from_query(query)?;
        info!(
            job_id = "jobs-list",
            stage = "JOBS_LIST",
            event = "STARTED",
            owner,
            status = ?filter.status,
            job_type = ?filter.job_type,
            limit = ?query.limit,
            offset = query.offset,
            include_counts = query.include_counts,
            request_id,
            "jobs list started"
        );

        let Some(limit) = query.limit else {
            let items = self.list_all(owner, request_id).await?;
            record_list_metric("all", false, false);
            info!(
                job_id = "jobs-list",
                stage = "JOBS_LIST",
                event = "COMPLETED",
                owner,
                returned_count = items.len(),
                paginated = false,
                request_id,
                "jobs list completed"
            );
            return Ok(ListingResponse::All(items));
        };

        let page = if filter.is_empty() && !query.include_counts {
            self.fast_page(owner, query.offset, limit, request_id).await?
        } else {
            self.scanned_page(owner, &filter, query.offset, limit, query.include_counts, request_id)
                .await?
        };

        record_list_metric("paged", query.include_counts, !filter.is_empty());
        info!(
            job_id = "jobs-list",
            stage = "JOBS_LIST",
            event = "COMPLETED",
            owner,
            returned_count = page.items.len(),
            paginated = true,
            has_more = page.has_more,
            next_offset = ?page.next_offset,
            total = ?page.total,
            request_id,
            "jobs list completed"
        );
        Ok(ListingResponse::Page(page))
    }

    async fn list_all(&self, owner: &str, request_id: &str) -> Result<Vec<JobView>, JobError> {
        let ids = self
            .store
            .list_range(&keys::user_jobs(owner), 0, -1)
            .await
            .stage("JOBS_LIST")?;
        self.load_views(&ids, request_id).await
    }

    /// Unfiltered page straight off the index; one extra id detects `has_more`.
    async fn fast_page(
        &self,
        owner: &str,
        offset: usize,
        limit: usize,
        request_id: &str,
    ) -> Result<ListingPage, JobError> {
        let start = isize::try_from(offset).unwrap_or(isize::MAX);
        let stop = isize::try_from(offset.saturating_add(limit)).unwrap_or(isize::MAX);
        let mut ids = self
            .store
            .list_range(&keys::user_jobs(owner), start, stop)
            .await
            .stage("JOBS_LIST")?;

        let has_more = ids.len() > limit;
        ids.truncate(limit);
        let items = self.load_views(&ids, request_id).await?;

        Ok(ListingPage {
            next_offset: has_more.then_some(offset.saturating_add(items.len())),
            items,
            offset,
            limit,
            has_more,
            total: None,
            counts_by_status: None,
            counts_by_type: None,
        })
    }

    /// Filtered and/or counted page. Reads only `(status, job_type, type)` per
    /// candidate; with counts every candidate is read.
    async fn scanned_page(
        &self,
        owner: &str,
        filter: &ListFilter,
        offset: usize,
        limit: usize,
        include_counts: bool,
        request_id: &str,
    ) -> Result<ListingPage, JobError> {
        let ids = self
            .store
            .list_range(&keys::user_jobs(owner), 0, -1)
            .await
            .stage("JOBS_LIST")?;

        let chunk = if include_counts { ids.len().max(1) } else { SCAN_CHUNK };
        let mut scan = Scan::new();
        'chunks: for batch in ids.chunks(chunk) {
            let record_keys: Vec<String> = batch.iter().map(|id| keys::job(id)).collect();
            let rows = self
                .store
                .get_projection_batch(&record_keys, &PROJECTION)
                .await
                .stage("JOBS_LIST")?;
            for (job_id, row) in batch.iter().zip(&rows) {
                if !scan.visit(job_id, row, filter, offset, limit, include_counts) {
                    break 'chunks;
                }
            }
        }

        debug!(
            owner,
            scanned_count = scan.scanned,
            matched_total = scan.matched_total,
            index_len = ids.len(),
            "jobs index scanned"
        );

        let mut has_more = scan.selected.len() > limit;
        scan.selected.truncate(limit);
        let items = self.load_views(&scan.selected, request_id).await?;
        if include_counts {
            has_more = offset.saturating_add(items.len()) < scan.matched_total;
        }

        Ok(ListingPage {
            next_offset: has_more.then_some(offset.saturating_add(items.len())),
            items,
            offset,
            limit,
            has_more,
            total: include_counts.then_some(scan.matched_total),
            counts_by_status: include_counts.then_some(scan.by_status),
            counts_by_type: include_counts.then_some(scan.by_type),
        })
    }

    /// Full records for `ids` in order, skipping ids with no record.
    async fn load_views(&self, ids: &[String], request_id: &str) -> Result<Vec<JobView>, JobError> {
        let record_keys: Vec<String> = ids.iter().map(|id| keys::job(id)).collect();
        let maps = self
            .store
            .get_fields_batch(&record_keys)
            .await
            .stage("JOBS_LIST")?;

        let records = ids
            .iter()
            .zip(&maps)
            .filter_map(|(id, map)| JobRecord::from_fields(id, map));
        try_join_all(records.map(|record| self.enricher.enrich(record, request_id))).await
    }
}

fn record_list_metric(mode: &'static str, include_counts: bool, filtered: bool) {
    metrics::counter!(
        "api_jobs_list_total",
        "mode" => mode,
        "include_counts" => include_counts.to_string(),
        "filtered" => filtered.to_string()
    )
    .increment(1);
}
