//! # Assurance Engine
//!
//! Scores normalized evidence on the L0-L4 assurance ladder: documented,
//! configured, demonstrated, observed, attested. The declared level is the
//! weakest link across in-scope controls; a seven-dimension score vector,
//! deterministic dimension gating, and behavioural safeguards keep the
//! declaration honest.

pub mod classify;
pub mod gating;
pub mod safeguards;
pub mod score;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::normalize::{DocumentRollup, NormalizedEvidence, rollup};

pub use self::classify::{BinaryCheck, DoraMetrics, EvidenceProfile, ProvenanceQuality};
use self::classify::{compute_dora_metrics, compute_provenance_quality, profile_evidence, run_binary_checks};
pub use self::gating::apply_dimension_gating;
pub use self::safeguards::{Safeguard, apply_safeguards};
pub use self::score::{DimensionScores, ScoreOptions, score};

/// Caller knobs for an evaluation run.
#[derive(Clone, Debug, Default)]
pub struct EvaluationOptions {
    /// Evaluation reference time; defaults to now.
    pub as_of: Option<DateTime<Utc>>,

    /// External methodology score in `[0, 1]`, scaled to `[0, 100]`.
    pub methodology_override: Option<f64>,

    /// External consistency bias score in `[0, 1]`, replacing the computed
    /// consistency dimension.
    pub consistency_bias: Option<f64>,
}

/// Full output of one assurance evaluation.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssuranceEvaluation {
    /// The weakest-link document rollup.
    pub rollup: DocumentRollup,

    /// The seven-dimension score vector.
    pub dimensions: DimensionScores,

    /// Declared level after dimension gating.
    pub gated_level: u8,

    /// Final level after behavioural safeguards.
    pub effective_level: u8,

    /// Safeguards that fired.
    pub applied_safeguards: Vec<Safeguard>,

    /// Safeguard explanations, one per applied safeguard.
    pub explanations: Vec<String>,

    /// Ordered rule-application trace across rollup, scoring, gating, and
    /// safeguards.
    pub rule_trace: Vec<String>,

    /// Provenance distribution and quality score.
    pub provenance_quality: ProvenanceQuality,

    /// The 16 fixed binary checks.
    pub binary_checks: Vec<BinaryCheck>,

    /// DORA-style metrics, banded by the weakest.
    pub dora: DoraMetrics,

    /// Text-feature profile of the evidence set.
    pub evidence_profile: EvidenceProfile,
}

/// Run the full pipeline: rollup, scoring, gating, safeguards.
#[must_use]
pub fn evaluate(normalized: &NormalizedEvidence, opts: &EvaluationOptions) -> AssuranceEvaluation {
    let as_of = opts.as_of.unwrap_or_else(Utc::now);
    let doc_rollup = rollup(normalized);
    let mut trace = doc_rollup.rule_trace.clone();

    let score_opts = ScoreOptions {
        methodology_override: opts.methodology_override,
        consistency_bias: opts.consistency_bias,
    };
    let (dimensions, score_trace) = score(normalized, &score_opts, as_of);
    trace.extend(score_trace);

    let (gated_level, gate_trace) = apply_dimension_gating(doc_rollup.declared, &dimensions);
    trace.extend(gate_trace);

    let outcome = apply_safeguards(gated_level, normalized, as_of);
    trace.extend(outcome.explanations.iter().cloned());

    AssuranceEvaluation {
        rollup: doc_rollup,
        dimensions,
        gated_level,
        effective_level: outcome.effective_level,
        applied_safeguards: outcome.applied,
        explanations: outcome.explanations,
        rule_trace: trace,
        provenance_quality: compute_provenance_quality(&normalized.controls),
        binary_checks: run_binary_checks(normalized, as_of),
        dora: compute_dora_metrics(normalized, as_of),
        evidence_profile: profile_evidence(normalized),
    }
}
