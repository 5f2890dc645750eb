use crate::config::IntakeLimits;
use crate::error::JobError;
use crate::models::job::JobType;
use crate::services::intake_router;

const BYTES_PER_MB: u64 = 1024 * 1024;
/// Output name used when nothing usable survives from the upload's name.
pub const DEFAULT_OUTPUT_FILENAME: &str = "transcript.txt";
const PAGE_MARKER: &[u8] = b"/Type /Page";
const PAGES_MARKER: &[u8] = b"/Type /Pages";

/// Reject uploads that a worker of `job_type` cannot process.
///
/// The MIME type is only checked when the client sent one.
pub fn validate_upload(
    limits: &IntakeLimits,
    job_type: JobType,
    filename: &str,
    mime_type: Option<&str>,
    input_size_bytes: u64,
) -> Result<(), JobError> {
    let filename = filename.trim();
    if filename.is_empty() {
        return Err(JobError::validation("INVALID_FILENAME", "Filename is required"));
    }

    let ext = intake_router::extension(filename);
    let mime = intake_router::normalize_mime(mime_type);
    let (label, max_mb) = match job_type {
        JobType::Ocr => ("OCR", limits.max_ocr_file_size_mb),
        JobType::Transcription => ("Transcription", limits.max_transcription_file_size_mb),
    };

    let allowed = intake_router::allowed_extensions(job_type);
    if !allowed.contains(&ext.as_str()) {
        let mut sorted = allowed.to_vec();
        sorted.sort_unstable();
        return Err(JobError::validation(
            "UNSUPPORTED_FILE_TYPE",
            format!("{label} supports: {}", sorted.join(", ")),
        ));
    }

    if !mime.is_empty()
        && !intake_router::allowed_mime_prefixes(job_type)
            .iter()
            .any(|prefix| mime.starts_with(prefix))
    {
        return Err(JobError::validation(
            "UNSUPPORTED_MIME_TYPE",
            format!("Unsupported {} MIME type: {mime}", label.to_lowercase()),
        ));
    }

    if input_size_bytes > max_mb.saturating_mul(BYTES_PER_MB) {
        return Err(JobError::validation(
            "FILE_TOO_LARGE",
            format!("{label} file exceeds max {max_mb} MB"),
        ));
    }

    Ok(())
}

/// Name of the text file the worker writes for an upload called `uploaded_name`.
pub fn output_filename(uploaded_name: &str) -> String {
    let base = uploaded_name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();
    let stem = match base.rfind('.') {
        Some(idx) if idx > 0 => &base[..idx],
        _ => base,
    };

    let mut cleaned = String::with_capacity(stem.len());
    for c in stem.chars() {
        if c.is_ascii_alphanumeric() {
            cleaned.push(c);
        } else if !cleaned.ends_with('_') {
            cleaned.push('_');
        }
    }
    let cleaned = cleaned.trim_matches('_');

    if cleaned.is_empty() {
        DEFAULT_OUTPUT_FILENAME.to_string()
    } else {
        format!("{cleaned}.txt")
    }
}

fn count_marker(haystack: &[u8], needle: &[u8]) -> usize {
    haystack.windows(needle.len()).filter(|w| *w == needle).count()
}

/// Cheap page count from PDF object markers. `None` when no page object is found.
pub fn pdf_page_count(data: &[u8]) -> Option<u32> {
    let pages = count_marker(data, PAGE_MARKER);
    if pages == 0 {
        return None;
    }
    // "/Type /Pages" also matches the page marker.
    let trees = count_marker(data, PAGES_MARKER);
    let count = pages.saturating_sub(trees).max(1);
    Some(u32::try_from(count).unwrap_or(u32::MAX))
}

/// Page count recorded on the job: PDFs are scanned, other images count as one
/// page, transcription jobs have none.
pub fn derive_total_pages(job_type: JobType, filename: &str, data: &[u8]) -> Option<u32> {
    match job_type {
        JobType::Transcription => None,
        JobType::Ocr if intake_router::extension(filename) == ".pdf" => pdf_page_count(data),
        JobType::Ocr => Some(1),
    }
}

/// Hard page/duration caps. A zero limit disables the check.
pub fn enforce_page_and_duration_limits(
    limits: &IntakeLimits,
    job_type: JobType,
    total_pages: Option<u32>,
    media_duration_sec: Option<f64>,
) -> Result<(), JobError> {
    match job_type {
        JobType::Ocr => {
            let max = limits.max_ocr_pages;
            if max > 0 && total_pages.is_some_and(|pages| pages > max) {
                return Err(JobError::validation(
                    "PAGE_LIMIT_EXCEEDED",
                    format!("OCR page limit exceeded ({max} pages)."),
                ));
            }
        }
        JobType::Transcription => {
            let max = limits.max_transcription_duration_sec;
            if max > 0 && media_duration_sec.is_some_and(|d| d > max as f64) {
                return Err(JobError::validation(
                    "DURATION_LIMIT_EXCEEDED",
                    format!("Media duration exceeds limit ({max}s)."),
                ));
            }
        }
    }
    Ok(())
}
