use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Process configuration, loaded once from the environment.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// `redis` (Redis + S3-compatible storage) or `memory` (in-process, local dev only).
    #[serde(default = "default_state_backend")]
    pub state_backend: String,

    /// Redis connection string for job records and queues
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Upper bound for a single state-store, queue or blob-store call
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Bucket holding job inputs and outputs
    #[serde(default)]
    pub s3_bucket: Option<String>,

    /// S3-compatible endpoint URL
    #[serde(default)]
    pub s3_endpoint: Option<String>,

    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    #[serde(default)]
    pub s3_access_key: Option<String>,

    #[serde(default)]
    pub s3_secret_key: Option<String>,

    /// HMAC secret used to verify bearer tokens
    pub jwt_secret: String,

    #[serde(default)]
    pub jwt_audience: Option<String>,

    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    #[serde(default = "default_queue_name_ocr")]
    pub queue_name_ocr: String,

    #[serde(default = "default_queue_name_transcription")]
    pub queue_name_transcription: String,

    #[serde(default, deserialize_with = "deserialize_flag")]
    pub feature_queue_partitioning: bool,

    #[serde(default, deserialize_with = "deserialize_flag")]
    pub feature_upload_quotas: bool,

    #[serde(default, deserialize_with = "deserialize_flag")]
    pub feature_duration_page_limits: bool,

    #[serde(default = "default_true", deserialize_with = "deserialize_flag")]
    pub feature_cost_guardrail: bool,

    #[serde(default = "default_true", deserialize_with = "deserialize_flag")]
    pub feature_smart_intake: bool,

    #[serde(default = "default_idempotency_ttl_sec")]
    pub idempotency_ttl_sec: u64,

    #[serde(default = "default_enqueue_guard_ttl_sec")]
    pub enqueue_guard_ttl_sec: u64,

    #[serde(default = "default_signed_url_ttl_sec")]
    pub signed_url_ttl_sec: u64,

    #[serde(default = "default_ocr_cost_per_page_usd")]
    pub ocr_cost_per_page_usd: f64,

    #[serde(default = "default_ocr_cost_per_mb_usd")]
    pub ocr_cost_per_mb_usd: f64,

    #[serde(default = "default_transcription_cost_per_min_usd")]
    pub transcription_cost_per_min_usd: f64,

    #[serde(default = "default_transcription_cost_per_mb_usd")]
    pub transcription_cost_per_mb_usd: f64,

    #[serde(default = "default_cost_guardrail_warn_usd")]
    pub cost_guardrail_warn_usd: f64,

    #[serde(default = "default_cost_guardrail_block_usd")]
    pub cost_guardrail_block_usd: f64,

    #[serde(default = "default_max_ocr_file_size_mb")]
    pub max_ocr_file_size_mb: u64,

    #[serde(default = "default_max_transcription_file_size_mb")]
    pub max_transcription_file_size_mb: u64,

    #[serde(default = "default_max_ocr_pages")]
    pub max_ocr_pages: u32,

    /// 0 disables the duration limit
    #[serde(default)]
    pub max_transcription_duration_sec: u64,

    #[serde(default = "default_intake_warn_ratio")]
    pub intake_warn_ratio: f64,

    #[serde(default = "default_intake_default_warn_pages")]
    pub intake_default_warn_pages: u32,

    #[serde(default = "default_intake_default_warn_duration_sec")]
    pub intake_default_warn_duration_sec: u64,

    /// 0 disables the daily quota
    #[serde(default)]
    pub daily_job_limit_per_user: u64,

    /// 0 disables the active-job quota
    #[serde(default)]
    pub active_job_limit_per_user: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_state_backend() -> String {
    "redis".to_string()
}

fn default_redis_url() -> String {
    "redis://localhost:6379/0".to_string()
}

fn default_store_timeout_ms() -> u64 {
    2_000
}

fn default_s3_region() -> String {
    "auto".to_string()
}

fn default_queue_name() -> String {
    "doc_jobs".to_string()
}

fn default_queue_name_ocr() -> String {
    "doc_jobs_ocr".to_string()
}

fn default_queue_name_transcription() -> String {
    "doc_jobs_transcription".to_string()
}

fn default_true() -> bool {
    true
}

fn default_idempotency_ttl_sec() -> u64 {
    900
}

fn default_enqueue_guard_ttl_sec() -> u64 {
    24 * 3600
}

fn default_signed_url_ttl_sec() -> u64 {
    3600
}

fn default_ocr_cost_per_page_usd() -> f64 {
    0.02
}

fn default_ocr_cost_per_mb_usd() -> f64 {
    0.003
}

fn default_transcription_cost_per_min_usd() -> f64 {
    0.015
}

fn default_transcription_cost_per_mb_usd() -> f64 {
    0.001
}

fn default_cost_guardrail_warn_usd() -> f64 {
    0.75
}

fn default_cost_guardrail_block_usd() -> f64 {
    2.50
}

fn default_max_ocr_file_size_mb() -> u64 {
    25
}

fn default_max_transcription_file_size_mb() -> u64 {
    100
}

fn default_max_ocr_pages() -> u32 {
    500
}

fn default_intake_warn_ratio() -> f64 {
    0.80
}

fn default_intake_default_warn_pages() -> u32 {
    50
}

fn default_intake_default_warn_duration_sec() -> u64 {
    900
}

/// Accepts `1/true/yes/on` (any case) as enabled; anything else is disabled.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(parse_flag(&raw))
}

pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Resolve the per-request policy knobs once at startup.
    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            queues: QueueSettings {
                shared: self.queue_name.clone(),
                ocr: self.queue_name_ocr.clone(),
                transcription: self.queue_name_transcription.clone(),
                partitioning_enabled: self.feature_queue_partitioning,
            },
            features: FeatureFlags {
                upload_quotas: self.feature_upload_quotas,
                duration_page_limits: self.feature_duration_page_limits,
                cost_guardrail: self.feature_cost_guardrail,
                smart_intake: self.feature_smart_intake,
            },
            idempotency_ttl: Duration::from_secs(self.idempotency_ttl_sec),
            enqueue_guard_ttl: Duration::from_secs(self.enqueue_guard_ttl_sec),
            signed_url_ttl: Duration::from_secs(self.signed_url_ttl_sec),
            cost: CostSettings {
                ocr_per_page_usd: self.ocr_cost_per_page_usd,
                ocr_per_mb_usd: self.ocr_cost_per_mb_usd,
                transcription_per_min_usd: self.transcription_cost_per_min_usd,
                transcription_per_mb_usd: self.transcription_cost_per_mb_usd,
                warn_at_usd: self.cost_guardrail_warn_usd,
                block_at_usd: self.cost_guardrail_block_usd,
            },
            intake: IntakeLimits {
                max_ocr_file_size_mb: self.max_ocr_file_size_mb,
                max_transcription_file_size_mb: self.max_transcription_file_size_mb,
                max_ocr_pages: self.max_ocr_pages,
                max_transcription_duration_sec: self.max_transcription_duration_sec,
                warn_ratio: self.intake_warn_ratio,
                default_warn_pages: self.intake_default_warn_pages,
                default_warn_duration_sec: self.intake_default_warn_duration_sec,
            },
            quotas: QuotaSettings {
                daily_job_limit: self.daily_job_limit_per_user,
                active_job_limit: self.active_job_limit_per_user,
            },
        }
    }
}

/// Policy resolved from [`AppConfig`] and handed to the job services by value.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub queues: QueueSettings,
    pub features: FeatureFlags,
    pub idempotency_ttl: Duration,
    pub enqueue_guard_ttl: Duration,
    pub signed_url_ttl: Duration,
    pub cost: CostSettings,
    pub intake: IntakeLimits,
    pub quotas: QuotaSettings,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            queues: QueueSettings::default(),
            features: FeatureFlags::default(),
            idempotency_ttl: Duration::from_secs(default_idempotency_ttl_sec()),
            enqueue_guard_ttl: Duration::from_secs(default_enqueue_guard_ttl_sec()),
            signed_url_ttl: Duration::from_secs(default_signed_url_ttl_sec()),
            cost: CostSettings::default(),
            intake: IntakeLimits::default(),
            quotas: QuotaSettings::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub shared: String,
    pub ocr: String,
    pub transcription: String,
    pub partitioning_enabled: bool,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            shared: default_queue_name(),
            ocr: default_queue_name_ocr(),
            transcription: default_queue_name_transcription(),
            partitioning_enabled: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeatureFlags {
    pub upload_quotas: bool,
    pub duration_page_limits: bool,
    pub cost_guardrail: bool,
    pub smart_intake: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            upload_quotas: false,
            duration_page_limits: false,
            cost_guardrail: true,
            smart_intake: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CostSettings {
    pub ocr_per_page_usd: f64,
    pub ocr_per_mb_usd: f64,
    pub transcription_per_min_usd: f64,
    pub transcription_per_mb_usd: f64,
    pub warn_at_usd: f64,
    pub block_at_usd: f64,
}

impl Default for CostSettings {
    fn default() -> Self {
        Self {
            ocr_per_page_usd: default_ocr_cost_per_page_usd(),
            ocr_per_mb_usd: default_ocr_cost_per_mb_usd(),
            transcription_per_min_usd: default_transcription_cost_per_min_usd(),
            transcription_per_mb_usd: default_transcription_cost_per_mb_usd(),
            warn_at_usd: default_cost_guardrail_warn_usd(),
            block_at_usd: default_cost_guardrail_block_usd(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntakeLimits {
    pub max_ocr_file_size_mb: u64,
    pub max_transcription_file_size_mb: u64,
    pub max_ocr_pages: u32,
    pub max_transcription_duration_sec: u64,
    pub warn_ratio: f64,
    pub default_warn_pages: u32,
    pub default_warn_duration_sec: u64,
}

impl Default for IntakeLimits {
    fn default() -> Self {
        Self {
            max_ocr_file_size_mb: default_max_ocr_file_size_mb(),
            max_transcription_file_size_mb: default_max_transcription_file_size_mb(),
            max_ocr_pages: default_max_ocr_pages(),
            max_transcription_duration_sec: 0,
            warn_ratio: default_intake_warn_ratio(),
            default_warn_pages: default_intake_default_warn_pages(),
            default_warn_duration_sec: default_intake_default_warn_duration_sec(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QuotaSettings {
    pub daily_job_limit: u64,
    pub active_job_limit: u64,
}
