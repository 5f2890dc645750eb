use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::models::job::JobType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EffortBand {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CostBand {
    Low,
    Medium,
    High,
    VeryHigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyDecision {
    Allow,
    Warn,
    Block,
}

/// Projected cost and the policy it maps to.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CostAssessment {
    pub projected_cost_usd: f64,
    pub estimated_effort: EffortBand,
    pub estimated_cost_band: CostBand,
    pub policy_decision: PolicyDecision,
    pub policy_reason: String,
}

/// Job type inferred from file metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectedJobType {
    Ocr,
    Transcription,
    Unknown,
}

impl DetectedJobType {
    pub fn job_type(self) -> Option<JobType> {
        match self {
            DetectedJobType::Ocr => Some(JobType::Ocr),
            DetectedJobType::Transcription => Some(JobType::Transcription),
            DetectedJobType::Unknown => None,
        }
    }
}

impl From<JobType> for DetectedJobType {
    fn from(job_type: JobType) -> Self {
        match job_type {
            JobType::Ocr => DetectedJobType::Ocr,
            JobType::Transcription => DetectedJobType::Transcription,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RouteDetection {
    pub detected_job_type: DetectedJobType,
    pub confidence: f64,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningSeverity {
    Info,
    Warn,
}

/// Advisory intake warning; never blocks a submission on its own.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PrecheckWarning {
    pub code: &'static str,
    pub message: String,
    pub severity: WarningSeverity,
}

/// Declared metadata of a file the caller is about to upload.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct PrecheckRequest {
    #[garde(length(min = 1, max = 512))]
    pub filename: String,

    #[garde(length(max = 255))]
    pub mime_type: Option<String>,

    #[garde(skip)]
    pub file_size_bytes: Option<u64>,

    #[garde(range(min = 0.0))]
    pub media_duration_sec: Option<f64>,

    #[garde(skip)]
    pub pdf_page_count: Option<u32>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PrecheckResponse {
    pub detected_job_type: DetectedJobType,
    pub warnings: Vec<PrecheckWarning>,
    pub eta_sec: u64,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub estimated_effort: EffortBand,
    pub estimated_cost_band: CostBand,
    pub policy_decision: PolicyDecision,
    pub policy_reason: String,
    pub projected_cost_usd: f64,
}
