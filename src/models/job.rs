use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use strum::{Display, EnumString};

/// Field-map representation of a record in the state store.
pub type FieldMap = HashMap<String, String>;

/// Lifecycle status of a job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Lenient parse of a stored value; blank or unknown values read as no status.
    pub fn parse_stored(raw: Option<&str>) -> Option<Self> {
        let raw = raw?.trim();
        if raw.is_empty() {
            return None;
        }
        JobStatus::from_str(raw).ok()
    }
}

/// Kind of processing a job asks for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum JobType {
    Ocr,
    Transcription,
}

impl JobType {
    pub const ALL: [JobType; 2] = [JobType::Ocr, JobType::Transcription];

    /// Provenance tag written to `source` for uploads of this type.
    pub fn upload_source(self) -> &'static str {
        match self {
            JobType::Ocr => "ocr",
            JobType::Transcription => "file",
        }
    }

    pub fn parse_stored(raw: Option<&str>) -> Option<Self> {
        let raw = raw?.trim();
        if raw.is_empty() {
            return None;
        }
        JobType::from_str(raw).ok()
    }
}

/// Store field names. Kept in one place so readers and writers cannot drift.
pub mod fields {
    pub const STATUS: &str = "status";
    pub const JOB_TYPE: &str = "job_type";
    pub const STAGE: &str = "stage";
    pub const PROGRESS: &str = "progress";
    pub const OWNER: &str = "owner";
    pub const SOURCE: &str = "source";
    pub const INPUT_FILENAME: &str = "input_filename";
    pub const INPUT_SIZE_BYTES: &str = "input_size_bytes";
    pub const INPUT_STORAGE_URI: &str = "input_storage_uri";
    pub const OUTPUT_FILENAME: &str = "output_filename";
    pub const OUTPUT_PATH: &str = "output_path";
    pub const TOTAL_PAGES: &str = "total_pages";
    pub const DURATION_SEC: &str = "duration_sec";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
    pub const REQUEST_ID: &str = "request_id";
    pub const CANCEL_REQUESTED: &str = "cancel_requested";
    pub const RETRY_OF_JOB_ID: &str = "retry_of_job_id";
    pub const ERROR: &str = "error";
    pub const ERROR_CODE: &str = "error_code";
    pub const ERROR_MESSAGE: &str = "error_message";
    pub const VERSION: &str = "version";
    /// Set once the job id has been added to the owner's index.
    pub const USER_INDEXED: &str = "user_indexed";
    /// Job type as written by older uploaders.
    pub const LEGACY_TYPE: &str = "type";

    pub(crate) const KNOWN: [&str; 24] = [
        STATUS,
        JOB_TYPE,
        STAGE,
        PROGRESS,
        OWNER,
        SOURCE,
        INPUT_FILENAME,
        INPUT_SIZE_BYTES,
        INPUT_STORAGE_URI,
        OUTPUT_FILENAME,
        OUTPUT_PATH,
        TOTAL_PAGES,
        DURATION_SEC,
        CREATED_AT,
        UPDATED_AT,
        REQUEST_ID,
        CANCEL_REQUESTED,
        RETRY_OF_JOB_ID,
        ERROR,
        ERROR_CODE,
        ERROR_MESSAGE,
        VERSION,
        USER_INDEXED,
        LEGACY_TYPE,
    ];
}

/// A job record as stored under `job_status:{job_id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub job_id: String,
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub stage: String,
    pub progress: u8,
    pub owner: String,
    pub source: String,
    pub input_filename: String,
    pub input_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_storage_uri: Option<String>,
    pub output_filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    pub total_pages: Option<u32>,
    pub duration_sec: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub request_id: Option<String>,
    pub cancel_requested: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_of_job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub version: u64,
    /// Worker-written fields this service does not interpret (quality scores, recovery traces, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl JobRecord {
    /// Build a record from a stored field map. Returns `None` for an empty map (no record).
    pub fn from_fields(job_id: &str, map: &FieldMap) -> Option<Self> {
        if map.is_empty() {
            return None;
        }

        let text = |name: &str| map.get(name).map(|v| v.trim()).unwrap_or_default().to_string();
        let optional = |name: &str| {
            map.get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let extra = map
            .iter()
            .filter(|(k, _)| !fields::KNOWN.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Some(Self {
            job_id: job_id.to_string(),
            status: JobStatus::parse_stored(map.get(fields::STATUS).map(String::as_str)),
            job_type: JobType::parse_stored(map.get(fields::JOB_TYPE).map(String::as_str))
                .or_else(|| JobType::parse_stored(map.get(fields::LEGACY_TYPE).map(String::as_str))),
            stage: text(fields::STAGE),
            progress: optional(fields::PROGRESS)
                .and_then(|v| v.parse::<f64>().ok())
                .map(|v| v.clamp(0.0, 100.0) as u8)
                .unwrap_or(0),
            owner: text(fields::OWNER),
            source: text(fields::SOURCE),
            input_filename: text(fields::INPUT_FILENAME),
            input_size_bytes: optional(fields::INPUT_SIZE_BYTES)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            input_storage_uri: optional(fields::INPUT_STORAGE_URI),
            output_filename: text(fields::OUTPUT_FILENAME),
            output_path: optional(fields::OUTPUT_PATH),
            total_pages: optional(fields::TOTAL_PAGES).and_then(|v| v.parse().ok()),
            duration_sec: optional(fields::DURATION_SEC).and_then(|v| v.parse().ok()),
            created_at: optional(fields::CREATED_AT).and_then(|v| parse_timestamp(&v)),
            updated_at: optional(fields::UPDATED_AT).and_then(|v| parse_timestamp(&v)),
            request_id: optional(fields::REQUEST_ID),
            cancel_requested: optional(fields::CANCEL_REQUESTED)
                .map(|v| matches!(v.as_str(), "1" | "true"))
                .unwrap_or(false),
            retry_of_job_id: optional(fields::RETRY_OF_JOB_ID),
            error: optional(fields::ERROR),
            error_code: optional(fields::ERROR_CODE),
            error_message: optional(fields::ERROR_MESSAGE),
            version: optional(fields::VERSION)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            extra,
        })
    }

    /// Field map written when the record is created. `version` is owned by the status machine.
    pub fn to_fields(&self) -> FieldMap {
        let mut map = FieldMap::new();
        let mut put = |name: &str, value: String| {
            map.insert(name.to_string(), value);
        };

        put(
            fields::STATUS,
            self.status.map(|s| s.to_string()).unwrap_or_default(),
        );
        put(
            fields::JOB_TYPE,
            self.job_type.map(|t| t.to_string()).unwrap_or_default(),
        );
        put(fields::STAGE, self.stage.clone());
        put(fields::PROGRESS, self.progress.to_string());
        put(fields::OWNER, self.owner.clone());
        put(fields::SOURCE, self.source.clone());
        put(fields::INPUT_FILENAME, self.input_filename.clone());
        put(fields::INPUT_SIZE_BYTES, self.input_size_bytes.to_string());
        put(
            fields::INPUT_STORAGE_URI,
            self.input_storage_uri.clone().unwrap_or_default(),
        );
        put(fields::OUTPUT_FILENAME, self.output_filename.clone());
        put(
            fields::TOTAL_PAGES,
            self.total_pages.map(|p| p.to_string()).unwrap_or_default(),
        );
        put(
            fields::DURATION_SEC,
            self.duration_sec.map(|d| d.to_string()).unwrap_or_default(),
        );
        put(
            fields::CREATED_AT,
            self.created_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
        );
        put(
            fields::UPDATED_AT,
            self.updated_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
        );
        put(fields::REQUEST_ID, self.request_id.clone().unwrap_or_default());
        put(
            fields::CANCEL_REQUESTED,
            if self.cancel_requested { "1" } else { "0" }.to_string(),
        );
        if let Some(original) = &self.retry_of_job_id {
            put(fields::RETRY_OF_JOB_ID, original.clone());
        }
        map
    }

    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.owner == owner
    }
}

/// Accepts RFC 3339 and the naive ISO form older records were written with (read as UTC).
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Message pushed to the transport queue. Always built from a [`JobRecord`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuePayload {
    pub job_id: String,
    pub job_type: JobType,
    pub source: String,
    pub queue: String,
    pub input_storage_uri: String,
    pub filename: String,
    pub output_filename: String,
    pub input_size_bytes: u64,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_of_job_id: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ProjectionError {
    #[error("job {0} has no job type")]
    MissingJobType(String),

    #[error("job {0} has no input storage reference")]
    MissingInput(String),
}

impl QueuePayload {
    /// Project a record onto the queue message it must agree with.
    pub fn project(record: &JobRecord, queue: &str) -> Result<Self, ProjectionError> {
        let job_type = record
            .job_type
            .ok_or_else(|| ProjectionError::MissingJobType(record.job_id.clone()))?;
        let input_storage_uri = record
            .input_storage_uri
            .clone()
            .ok_or_else(|| ProjectionError::MissingInput(record.job_id.clone()))?;

        Ok(Self {
            job_id: record.job_id.clone(),
            job_type,
            source: record.source.clone(),
            queue: queue.to_string(),
            input_storage_uri,
            filename: record.input_filename.clone(),
            output_filename: record.output_filename.clone(),
            input_size_bytes: record.input_size_bytes,
            request_id: record.request_id.clone().unwrap_or_default(),
            retry_of_job_id: record.retry_of_job_id.clone(),
        })
    }
}
