use crate::models::intake::{DetectedJobType, RouteDetection};
use crate::models::job::JobType;

pub const OCR_EXTENSIONS: &[&str] = &[".pdf", ".png", ".jpg", ".jpeg", ".webp", ".tif", ".tiff", ".bmp"];

pub const TRANSCRIPTION_EXTENSIONS: &[&str] = &[
    ".mp3", ".wav", ".m4a", ".aac", ".flac", ".ogg", ".wma", ".mp4", ".mov", ".avi", ".mkv", ".webm",
    ".m4v",
];

pub const OCR_MIME_PREFIXES: &[&str] = &["application/pdf", "image/"];
pub const TRANSCRIPTION_MIME_PREFIXES: &[&str] = &["audio/", "video/"];

pub const MISMATCH_REASON: &str = "mime_extension_mismatch";
pub const NO_SIGNAL_REASON: &str = "no_route_signal";

/// Lower-cased extension including the dot (`".pdf"`), or `""`.
pub fn extension(filename: &str) -> String {
    let name = filename.trim().to_lowercase();
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default();
    match base.rfind('.') {
        Some(idx) if idx > 0 => base[idx..].to_string(),
        _ => String::new(),
    }
}

pub fn normalize_mime(mime_type: Option<&str>) -> String {
    mime_type.unwrap_or_default().trim().to_lowercase()
}

pub fn allowed_extensions(job_type: JobType) -> &'static [&'static str] {
    match job_type {
        JobType::Ocr => OCR_EXTENSIONS,
        JobType::Transcription => TRANSCRIPTION_EXTENSIONS,
    }
}

pub fn allowed_mime_prefixes(job_type: JobType) -> &'static [&'static str] {
    match job_type {
        JobType::Ocr => OCR_MIME_PREFIXES,
        JobType::Transcription => TRANSCRIPTION_MIME_PREFIXES,
    }
}

fn route_from_extension(ext: &str) -> Option<JobType> {
    JobType::ALL
        .into_iter()
        .find(|job_type| allowed_extensions(*job_type).contains(&ext))
}

fn route_from_mime(mime: &str) -> Option<JobType> {
    if mime.is_empty() {
        return None;
    }
    JobType::ALL.into_iter().find(|job_type| {
        allowed_mime_prefixes(*job_type)
            .iter()
            .any(|prefix| mime.starts_with(prefix))
    })
}

/// Infer the job type from filename and declared MIME type.
///
/// The extension decides when it is recognised; the MIME type only raises or
/// lowers confidence. A MIME-only match is weaker, and no signal at all gives
/// `UNKNOWN` with zero confidence.
pub fn detect_route(filename: &str, mime_type: Option<&str>) -> RouteDetection {
    let ext = extension(filename);
    let mime = normalize_mime(mime_type);
    let ext_route = route_from_extension(&ext);
    let mime_route = route_from_mime(&mime);

    if let Some(route) = ext_route {
        let mut reasons = vec![format!("extension={ext}")];
        let confidence = match mime_route {
            None => 0.95,
            Some(mime_route) => {
                reasons.push(format!("mime={mime}"));
                if mime_route == route {
                    0.99
                } else {
                    reasons.push(MISMATCH_REASON.to_string());
                    0.75
                }
            }
        };
        return RouteDetection {
            detected_job_type: route.into(),
            confidence,
            reasons,
        };
    }

    if let Some(route) = mime_route {
        return RouteDetection {
            detected_job_type: route.into(),
            confidence: 0.7,
            reasons: vec![format!("mime={mime}"), "extension_unknown".to_string()],
        };
    }

    RouteDetection {
        detected_job_type: DetectedJobType::Unknown,
        confidence: 0.0,
        reasons: vec![
            format!("extension={}", if ext.is_empty() { "none" } else { ext.as_str() }),
            format!("mime={}", if mime.is_empty() { "none" } else { mime.as_str() }),
            NO_SIGNAL_REASON.to_string(),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_parsing() {
        assert_eq!(extension("Scan.PDF"), ".pdf");
        assert_eq!(extension("dir/archive.tar.gz"), ".gz");
        assert_eq!(extension("file"), "");
        assert_eq!(extension(".bashrc"), "");
    }

    #[test]
    fn test_extension_and_mime_agree() {
        let detection = detect_route("scan.pdf", Some("application/pdf"));
        assert_eq!(detection.detected_job_type, DetectedJobType::Ocr);
        assert_eq!(detection.confidence, 0.99);
        assert!(!detection.reasons.iter().any(|r| r == MISMATCH_REASON));
    }

    #[test]
    fn test_extension_wins_over_conflicting_mime() {
        let detection = detect_route("scan.pdf", Some("audio/mpeg"));
        assert_eq!(detection.detected_job_type, DetectedJobType::Ocr);
        assert_eq!(detection.confidence, 0.75);
        assert!(detection.reasons.iter().any(|r| r == MISMATCH_REASON));
    }

    #[test]
    fn test_mime_only_route() {
        let detection = detect_route("file", Some("video/mp4"));
        assert_eq!(detection.detected_job_type, DetectedJobType::Transcription);
        assert_eq!(detection.confidence, 0.7);
        assert_eq!(detection.reasons, vec!["mime=video/mp4", "extension_unknown"]);
    }

    #[test]
    fn test_no_signal() {
        let detection = detect_route("file.bin", Some("application/octet-stream"));
        assert_eq!(detection.detected_job_type, DetectedJobType::Unknown);
        assert_eq!(detection.confidence, 0.0);
        assert_eq!(
            detection.reasons,
            vec!["extension=.bin", "mime=application/octet-stream", NO_SIGNAL_REASON]
        );
    }

    #[test]
    fn test_extension_only_route() {
        let detection = detect_route("talk.m4a", None);
        assert_eq!(detection.detected_job_type, DetectedJobType::Transcription);
        assert_eq!(detection.confidence, 0.95);
    }
}
