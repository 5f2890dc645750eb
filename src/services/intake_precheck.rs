use crate::config::{IntakeLimits, JobSettings};
use crate::models::intake::{
    DetectedJobType, PrecheckRequest, PrecheckResponse, PrecheckWarning, WarningSeverity,
};
use crate::models::job::JobType;
use crate::services::cost_guardrail;
use crate::services::intake_router::{self, MISMATCH_REASON, NO_SIGNAL_REASON};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

fn warn(code: &'static str, message: String) -> PrecheckWarning {
    PrecheckWarning {
        code,
        message,
        severity: WarningSeverity::Warn,
    }
}

fn size_warning(limits: &IntakeLimits, job_type: JobType, file_size_bytes: Option<u64>) -> Option<PrecheckWarning> {
    let size = file_size_bytes?;
    let (max_mb, label) = match job_type {
        JobType::Ocr => (limits.max_ocr_file_size_mb, "OCR"),
        JobType::Transcription => (limits.max_transcription_file_size_mb, "transcription"),
    };
    let warn_at = (max_mb as f64 * BYTES_PER_MB * limits.warn_ratio) as u64;
    (size >= warn_at).then(|| {
        warn(
            "LARGE_FILE",
            format!(
                "File size is high for {label} ({:.2} MB). Processing may take longer.",
                size as f64 / BYTES_PER_MB
            ),
        )
    })
}

fn duration_warning(limits: &IntakeLimits, job_type: JobType, media_duration_sec: Option<f64>) -> Option<PrecheckWarning> {
    if job_type != JobType::Transcription {
        return None;
    }
    let duration = media_duration_sec?;
    let warn_limit = if limits.max_transcription_duration_sec > 0 {
        (limits.max_transcription_duration_sec as f64 * limits.warn_ratio).floor()
    } else {
        limits.default_warn_duration_sec as f64
    };
    (duration >= warn_limit).then(|| {
        warn(
            "LONG_MEDIA",
            format!(
                "Media duration is long ({} min). Transcription may take longer than usual.",
                (duration / 60.0).floor() as u64
            ),
        )
    })
}

fn page_warning(limits: &IntakeLimits, job_type: JobType, pdf_page_count: Option<u32>) -> Option<PrecheckWarning> {
    if job_type != JobType::Ocr {
        return None;
    }
    let pages = pdf_page_count?;
    let warn_limit = if limits.max_ocr_pages > 0 {
        (f64::from(limits.max_ocr_pages) * limits.warn_ratio).floor() as u32
    } else {
        limits.default_warn_pages
    };
    (pages >= warn_limit).then(|| {
        warn(
            "HIGH_PAGE_COUNT",
            format!("Page count is high ({pages} pages). OCR may take longer."),
        )
    })
}

fn metadata_warnings(filename: &str, mime_type: Option<&str>) -> Vec<PrecheckWarning> {
    let detection = intake_router::detect_route(filename, mime_type);
    let mut warnings = Vec::new();
    if detection.reasons.iter().any(|r| r == MISMATCH_REASON) {
        warnings.push(warn(
            "MIME_EXTENSION_MISMATCH",
            "Filename extension and MIME type do not match. Verify selected file type.".to_string(),
        ));
    }
    if detection.reasons.iter().any(|r| r == NO_SIGNAL_REASON) {
        warnings.push(warn(
            "UNCERTAIN_FILE_TYPE",
            "Could not confidently detect file type from filename and MIME.".to_string(),
        ));
    }
    warnings
}

/// Advisory warnings for a file about to be processed as `job_type`.
pub fn build_warnings(
    limits: &IntakeLimits,
    job_type: JobType,
    filename: &str,
    mime_type: Option<&str>,
    file_size_bytes: Option<u64>,
    media_duration_sec: Option<f64>,
    pdf_page_count: Option<u32>,
) -> Vec<PrecheckWarning> {
    size_warning(limits, job_type, file_size_bytes)
        .into_iter()
        .chain(duration_warning(limits, job_type, media_duration_sec))
        .chain(page_warning(limits, job_type, pdf_page_count))
        .chain(metadata_warnings(filename, mime_type))
        .collect()
}

/// Rough wait estimate in seconds from declared metadata.
pub fn estimate_eta_sec(
    job_type: JobType,
    file_size_bytes: Option<u64>,
    media_duration_sec: Option<f64>,
    pdf_page_count: Option<u32>,
) -> u64 {
    let size_mb = file_size_bytes.unwrap_or(0) as f64 / BYTES_PER_MB;
    match job_type {
        JobType::Transcription => match media_duration_sec {
            Some(duration) if duration > 0.0 => ((duration * 0.2).ceil() as u64).max(15),
            _ if size_mb <= 5.0 => 45,
            _ if size_mb <= 20.0 => 90,
            _ => 180,
        },
        JobType::Ocr => match pdf_page_count {
            Some(pages) if pages > 0 => (u64::from(pages) * 20).max(20),
            _ if size_mb <= 2.0 => 60,
            _ if size_mb <= 10.0 => 120,
            _ => 240,
        },
    }
}

/// Bucket label used to tag ETA metrics.
pub fn eta_bucket(eta_sec: u64) -> &'static str {
    match eta_sec {
        0..=30 => "lte_30s",
        31..=120 => "31_120s",
        121..=300 => "121_300s",
        _ => "gt_300s",
    }
}

/// Type used for warnings, ETA and cost when detection is inconclusive:
/// audio/video MIME types mean transcription, everything else OCR.
pub fn effective_job_type(detected: DetectedJobType, mime_type: Option<&str>) -> JobType {
    if let Some(job_type) = detected.job_type() {
        return job_type;
    }
    let mime = intake_router::normalize_mime(mime_type);
    if mime.starts_with("audio/") || mime.starts_with("video/") {
        JobType::Transcription
    } else {
        JobType::Ocr
    }
}

/// Full pre-upload analysis. Pure: reads nothing and writes nothing.
pub fn assess(settings: &JobSettings, request: &PrecheckRequest) -> PrecheckResponse {
    let mime_type = request.mime_type.as_deref();
    let detection = intake_router::detect_route(&request.filename, mime_type);
    let job_type = effective_job_type(detection.detected_job_type, mime_type);

    let warnings = build_warnings(
        &settings.intake,
        job_type,
        &request.filename,
        mime_type,
        request.file_size_bytes,
        request.media_duration_sec,
        request.pdf_page_count,
    );
    let eta_sec = estimate_eta_sec(
        job_type,
        request.file_size_bytes,
        request.media_duration_sec,
        request.pdf_page_count,
    );
    let cost = if settings.features.cost_guardrail {
        cost_guardrail::evaluate(
            &settings.cost,
            job_type,
            request.file_size_bytes,
            request.media_duration_sec,
            request.pdf_page_count,
        )
    } else {
        cost_guardrail::disabled()
    };

    PrecheckResponse {
        detected_job_type: detection.detected_job_type,
        warnings,
        eta_sec,
        confidence: detection.confidence,
        reasons: detection.reasons,
        estimated_effort: cost.estimated_effort,
        estimated_cost_band: cost.estimated_cost_band,
        policy_decision: cost.policy_decision,
        policy_reason: cost.policy_reason,
        projected_cost_usd: cost.projected_cost_usd,
    }
}
