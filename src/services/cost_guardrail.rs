use crate::config::CostSettings;
use crate::models::intake::{CostAssessment, CostBand, EffortBand, PolicyDecision};
use crate::models::job::JobType;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const MEDIUM_FROM_USD: f64 = 0.25;
const HIGH_FROM_USD: f64 = 1.0;

/// Linear cost model over declared metadata. Never looks at content.
pub fn estimate_cost(
    settings: &CostSettings,
    job_type: JobType,
    file_size_bytes: Option<u64>,
    media_duration_sec: Option<f64>,
    pdf_page_count: Option<u32>,
) -> f64 {
    let size_mb = file_size_bytes.unwrap_or(0) as f64 / BYTES_PER_MB;

    let cost = match job_type {
        JobType::Transcription => {
            let minutes = media_duration_sec.unwrap_or(0.0).max(0.0) / 60.0;
            minutes * settings.transcription_per_min_usd + size_mb * settings.transcription_per_mb_usd
        }
        JobType::Ocr => {
            let pages = f64::from(pdf_page_count.unwrap_or(1).max(1));
            pages * settings.ocr_per_page_usd + size_mb * settings.ocr_per_mb_usd
        }
    };
    cost.max(0.0)
}

pub fn effort_band(cost: f64) -> EffortBand {
    if cost < MEDIUM_FROM_USD {
        EffortBand::Low
    } else if cost < HIGH_FROM_USD {
        EffortBand::Medium
    } else {
        EffortBand::High
    }
}

/// `VERY_HIGH` starts at the block threshold.
pub fn cost_band(settings: &CostSettings, cost: f64) -> CostBand {
    if cost < MEDIUM_FROM_USD {
        CostBand::Low
    } else if cost < HIGH_FROM_USD {
        CostBand::Medium
    } else if cost < settings.block_at_usd {
        CostBand::High
    } else {
        CostBand::VeryHigh
    }
}

/// Block wins over warn.
pub fn decide(settings: &CostSettings, cost: f64) -> (PolicyDecision, &'static str) {
    if cost >= settings.block_at_usd {
        (
            PolicyDecision::Block,
            "Projected cost exceeds configured block threshold",
        )
    } else if cost >= settings.warn_at_usd {
        (
            PolicyDecision::Warn,
            "Projected cost is high; consider splitting/compressing input",
        )
    } else {
        (PolicyDecision::Allow, "Projected cost is within safe threshold")
    }
}

pub fn classify(settings: &CostSettings, cost: f64) -> CostAssessment {
    let (policy_decision, reason) = decide(settings, cost);
    CostAssessment {
        projected_cost_usd: (cost * 10_000.0).round() / 10_000.0,
        estimated_effort: effort_band(cost),
        estimated_cost_band: cost_band(settings, cost),
        policy_decision,
        policy_reason: reason.to_string(),
    }
}

pub fn evaluate(
    settings: &CostSettings,
    job_type: JobType,
    file_size_bytes: Option<u64>,
    media_duration_sec: Option<f64>,
    pdf_page_count: Option<u32>,
) -> CostAssessment {
    let cost = estimate_cost(
        settings,
        job_type,
        file_size_bytes,
        media_duration_sec,
        pdf_page_count,
    );
    classify(settings, cost)
}

/// Reported when the guardrail is switched off.
pub fn disabled() -> CostAssessment {
    CostAssessment {
        projected_cost_usd: 0.0,
        estimated_effort: EffortBand::Low,
        estimated_cost_band: CostBand::Low,
        policy_decision: PolicyDecision::Allow,
        policy_reason: "Cost guardrail is disabled".to_string(),
    }
}
