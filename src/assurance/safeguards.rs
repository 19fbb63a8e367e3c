//! # Behavioural Safeguards
//!
//! Capping rules that catch gaming patterns dimension scores alone miss.
//! Each rule is independent; the effective level is the declared level under
//! the strongest applicable cap. `all-pass-bias` flags without capping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::assurance::classify::{AssessmentDepth, classify_assessment_depth};
use crate::assurance::score::document_age_days;
use crate::normalize::{NormalizedEvidence, NormalizedSeverity, Provenance};

/// The safeguard that fired.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Safeguard {
    /// Evidence missing on some control, or no controls at all.
    SamplingOpacity,
    /// The document is more than 180 days old.
    FreshnessDecay,
    /// Self-asserted evidence claiming observed-or-better assurance.
    IndependenceCheck,
    /// Critical controls assessed more shallowly than minor ones.
    SeverityAsymmetry,
    /// Suspiciously uniform all-pass result set (flag only).
    AllPassBias,
}

/// Outcome of the safeguard pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SafeguardOutcome {
    /// Declared level after caps.
    pub effective_level: u8,

    /// Safeguards that fired, in evaluation order.
    pub applied: Vec<Safeguard>,

    /// One explanation per fired safeguard.
    pub explanations: Vec<String>,
}

/// Apply the behavioural safeguards to a (possibly already gated) declared
/// level.
#[must_use]
pub fn apply_safeguards(
    declared: u8, normalized: &NormalizedEvidence, as_of: DateTime<Utc>,
) -> SafeguardOutcome {
    let controls = &normalized.controls;
    let mut applied = Vec::new();
    let mut explanations = Vec::new();
    let mut cap = declared;

    // sampling-opacity
    if controls.is_empty() {
        cap = cap.min(0);
        applied.push(Safeguard::SamplingOpacity);
        explanations.push("sampling-opacity: no controls in scope, capped at L0".to_string());
    } else if controls
        .iter()
        .any(|c| c.evidence.text.as_deref().is_none_or(|e| e.trim().is_empty()))
    {
        cap = cap.min(1);
        applied.push(Safeguard::SamplingOpacity);
        explanations
            .push("sampling-opacity: evidence missing on at least one control, capped at L1".to_string());
    }

    // freshness-decay
    match document_age_days(normalized, as_of) {
        Some(age) if age > 180 => {
            cap = cap.min(1);
            applied.push(Safeguard::FreshnessDecay);
            explanations.push(format!("freshness-decay: document is {age} days old, capped at L1"));
        }
        _ => {}
    }

    // independence-check
    if normalized.metadata.provenance == Provenance::SelfAsserted && declared >= 3 {
        cap = cap.min(2);
        applied.push(Safeguard::IndependenceCheck);
        explanations.push(
            "independence-check: self-asserted evidence cannot support L3+, capped at L2".to_string(),
        );
    }

    // severity-asymmetry
    let depth_of = |c: &crate::normalize::CanonicalControlEvidence| {
        c.evidence.text.as_deref().map(classify_assessment_depth)
    };
    let critical_inquiry = controls
        .iter()
        .filter(|c| c.severity == NormalizedSeverity::Critical)
        .any(|c| depth_of(c) == Some(AssessmentDepth::Inquiry));
    let minor_reperformed = controls
        .iter()
        .filter(|c| c.severity != NormalizedSeverity::Critical)
        .any(|c| depth_of(c) == Some(AssessmentDepth::Reperformance));
    if critical_inquiry && minor_reperformed {
        cap = cap.min(1);
        applied.push(Safeguard::SeverityAsymmetry);
        explanations.push(
            "severity-asymmetry: critical controls assessed by inquiry while minor controls were \
             reperformed, capped at L1"
                .to_string(),
        );
    }

    // all-pass-bias: flag only
    if controls.len() >= 10 && controls.iter().all(|c| {
        matches!(c.status, crate::normalize::NormalizedStatus::Pass)
    }) {
        let depths: Vec<_> = controls.iter().filter_map(depth_of).collect();
        let uniform = depths.windows(2).all(|w| w[0] == w[1]);
        if uniform {
            applied.push(Safeguard::AllPassBias);
            explanations.push(format!(
                "all-pass-bias: {} controls all effective with uniform methodology (flag only)",
                controls.len()
            ));
        }
    }

    SafeguardOutcome { effective_level: cap, applied, explanations }
}
