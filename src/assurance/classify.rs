//! # Classification Helpers
//!
//! Pure, deterministic functions over already-normalized controls and
//! metadata. Their outputs are simple records embedded in the credential
//! subject when the issuer requests enrichment.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::assurance::score::{document_age_days, independence_base, parse_document_date};
use crate::normalize::{
    CanonicalControlEvidence, NormalizedEvidence, NormalizedSeverity, NormalizedStatus, Provenance,
};

/// What kind of artifact an evidence text describes.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EvidenceContentClass {
    /// Screenshot or image capture.
    Screenshot,
    /// Configuration or infrastructure export.
    ConfigExport,
    /// Log or audit-trail extract.
    LogExtract,
    /// Policy or procedure document.
    PolicyDocument,
    /// Free narrative.
    Narrative,
}

/// Classify evidence text by artifact kind.
#[must_use]
pub fn classify_evidence_content(text: &str) -> EvidenceContentClass {
    let lower = text.to_lowercase();
    if lower.contains("screenshot") || lower.contains("screen capture") {
        EvidenceContentClass::Screenshot
    } else if lower.contains("config") || lower.contains("terraform") || lower.contains("{\"") {
        EvidenceContentClass::ConfigExport
    } else if lower.contains("log") || lower.contains("audit trail") || lower.contains("cloudtrail") {
        EvidenceContentClass::LogExtract
    } else if lower.contains("policy") || lower.contains("procedure") || lower.contains("standard") {
        EvidenceContentClass::PolicyDocument
    } else {
        EvidenceContentClass::Narrative
    }
}

static SAMPLE_SIZE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)sample of (\d+)").expect("valid regex"),
        Regex::new(r"(?i)(\d+)\s+samples").expect("valid regex"),
        Regex::new(r"(?i)\bn\s*=\s*(\d+)").expect("valid regex"),
    ]
});

/// Extract a declared sample size from evidence text.
#[must_use]
pub fn extract_sample_size(text: &str) -> Option<u32> {
    SAMPLE_SIZE
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

const BOILERPLATE_PHRASES: &[&str] = &[
    "operating effectively",
    "no exceptions noted",
    "control is in place",
    "management has implemented",
    "adequately designed",
    "in accordance with policy",
];

/// Short evidence built from stock audit phrases.
#[must_use]
pub fn detect_boilerplate(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.len() < 160 && BOILERPLATE_PHRASES.iter().any(|p| lower.contains(p))
}

/// How deeply a control was assessed.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum AssessmentDepth {
    /// Asked and answered.
    Inquiry,
    /// Artifacts were inspected.
    Observation,
    /// The control was re-executed.
    Reperformance,
}

/// Classify the assessment depth evidenced by the text.
#[must_use]
pub fn classify_assessment_depth(text: &str) -> AssessmentDepth {
    let lower = text.to_lowercase();
    let reperformed = ["reperform", "re-perform", "retest", "re-test", "re-execut", "reexecut", "replay"];
    if reperformed.iter().any(|k| lower.contains(k)) {
        return AssessmentDepth::Reperformance;
    }
    let observed = ["observ", "inspect", "screenshot", "walkthrough", "examined", "reviewed evidence"];
    if observed.iter().any(|k| lower.contains(k)) {
        return AssessmentDepth::Observation;
    }
    AssessmentDepth::Inquiry
}

/// Provenance distribution over a control set.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceQuality {
    /// Fraction asserted by the subject itself.
    pub self_fraction: f64,

    /// Fraction produced by tools.
    pub tool_fraction: f64,

    /// Fraction attested by auditors.
    pub auditor_fraction: f64,

    /// Weighted quality score in `[0, 100]`.
    pub score: u8,
}

/// Weight provenance authority: auditor 1.0, tool 0.6, self 0.2.
#[must_use]
pub fn compute_provenance_quality(controls: &[CanonicalControlEvidence]) -> ProvenanceQuality {
    if controls.is_empty() {
        return ProvenanceQuality {
            self_fraction: 0.0,
            tool_fraction: 0.0,
            auditor_fraction: 0.0,
            score: 0,
        };
    }
    let mut counts: HashMap<Provenance, usize> = HashMap::new();
    for control in controls {
        *counts.entry(control.assurance.provenance).or_insert(0) += 1;
    }
    let total = controls.len() as f64;
    let self_fraction = *counts.get(&Provenance::SelfAsserted).unwrap_or(&0) as f64 / total;
    let tool_fraction = *counts.get(&Provenance::Tool).unwrap_or(&0) as f64 / total;
    let auditor_fraction = *counts.get(&Provenance::Auditor).unwrap_or(&0) as f64 / total;
    let score = ((auditor_fraction + 0.6 * tool_fraction + 0.2 * self_fraction) * 100.0)
        .round()
        .clamp(0.0, 100.0) as u8;
    ProvenanceQuality { self_fraction, tool_fraction, auditor_fraction, score }
}

/// One named boolean predicate over a normalized document.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct BinaryCheck {
    /// Stable check name.
    pub name: String,

    /// Whether the document passes.
    pub passed: bool,
}

/// The 16 fixed binary checks, evaluated at a reference time.
#[must_use]
pub fn run_binary_checks(normalized: &NormalizedEvidence, as_of: DateTime<Utc>) -> Vec<BinaryCheck> {
    let controls = &normalized.controls;
    let meta = &normalized.metadata;
    let total = controls.len();

    let with_evidence = controls
        .iter()
        .filter(|c| c.evidence.text.as_deref().is_some_and(|e| !e.trim().is_empty()))
        .count();
    let passed = controls.iter().filter(|c| c.status == NormalizedStatus::Pass).count();
    let failed = controls.iter().filter(|c| c.status == NormalizedStatus::Fail).count();

    let mut ids: Vec<&str> = controls.iter().map(|c| c.source.raw_id.as_str()).collect();
    let id_count = ids.len();
    ids.sort_unstable();
    ids.dedup();

    let age_days = parse_document_date(&meta.date).map(|d| (as_of - d).num_days());

    let checks: [(&str, bool); 16] = [
        ("has-controls", total > 0),
        ("unique-control-ids", ids.len() == id_count),
        ("has-document-date", !meta.date.trim().is_empty()),
        ("date-parses", parse_document_date(&meta.date).is_some()),
        ("has-scope", !meta.scope.trim().is_empty()),
        ("has-issuer", !meta.issuer.trim().is_empty()),
        ("any-evidence", with_evidence > 0),
        ("majority-evidence", total > 0 && with_evidence * 2 >= total),
        (
            "has-framework-references",
            controls.iter().any(|c| !c.framework_refs.is_empty()),
        ),
        (
            "has-severity-ratings",
            controls.iter().any(|c| c.severity != NormalizedSeverity::Info),
        ),
        (
            "critical-controls-tested",
            controls
                .iter()
                .filter(|c| c.severity == NormalizedSeverity::Critical)
                .all(|c| matches!(c.status, NormalizedStatus::Pass | NormalizedStatus::Fail)),
        ),
        ("mixed-results", passed > 0 && failed > 0),
        (
            "sample-sizes-declared",
            controls
                .iter()
                .filter_map(|c| c.evidence.text.as_deref())
                .any(|e| extract_sample_size(e).is_some()),
        ),
        ("source-hash-present", meta.source_hash.is_some()),
        ("assurance-above-floor", controls.iter().any(|c| c.assurance.level > 0)),
        ("fresh-within-year", age_days.is_some_and(|d| (0..=365).contains(&d))),
    ];

    checks
        .into_iter()
        .map(|(name, passed)| BinaryCheck { name: name.to_string(), passed })
        .collect()
}

/// Aggregate text-feature profile of a document's evidence, built from the
/// per-control classifiers for inclusion in the credential subject.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceProfile {
    /// Count of evidence-bearing controls per content class.
    pub content_classes: BTreeMap<String, usize>,

    /// Count of evidence-bearing controls per assessment depth.
    pub depth_classes: BTreeMap<String, usize>,

    /// Controls whose evidence reads as boilerplate.
    pub boilerplate_controls: usize,

    /// Sample sizes declared in evidence text, in document order.
    pub sample_sizes: Vec<u32>,
}

/// Profile a document's evidence texts.
#[must_use]
pub fn profile_evidence(normalized: &NormalizedEvidence) -> EvidenceProfile {
    let mut content_classes: BTreeMap<String, usize> = BTreeMap::new();
    let mut depth_classes: BTreeMap<String, usize> = BTreeMap::new();
    let mut boilerplate_controls = 0;
    let mut sample_sizes = Vec::new();

    let texts = normalized
        .controls
        .iter()
        .filter_map(|c| c.evidence.text.as_deref())
        .filter(|t| !t.trim().is_empty());
    for text in texts {
        *content_classes.entry(wire_name(classify_evidence_content(text))).or_insert(0) += 1;
        *depth_classes.entry(wire_name(classify_assessment_depth(text))).or_insert(0) += 1;
        if detect_boilerplate(text) {
            boilerplate_controls += 1;
        }
        if let Some(n) = extract_sample_size(text) {
            sample_sizes.push(n);
        }
    }

    EvidenceProfile { content_classes, depth_classes, boilerplate_controls, sample_sizes }
}

fn wire_name<T: serde::Serialize>(value: T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default()
}

/// DORA-style delivery band.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DoraBand {
    /// All metrics at or above 85.
    Elite,
    /// All metrics at or above 70.
    High,
    /// All metrics at or above 50.
    Medium,
    /// Anything weaker.
    Low,
}

/// Freshness/specificity/independence/reproducibility, banded by minimum.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DoraMetrics {
    /// Document recency, 0-100.
    pub freshness: u8,

    /// Evidence specificity, 0-100.
    pub specificity: u8,

    /// Assessor independence, 0-100.
    pub independence: u8,

    /// Fraction of evidence showing reperformance, 0-100.
    pub reproducibility: u8,

    /// Band over the minimum metric.
    pub band: DoraBand,

    /// Pairing-divergence flags.
    pub divergence_flags: Vec<String>,
}

/// Compute the four DORA-style metrics over a normalized document.
#[must_use]
pub fn compute_dora_metrics(normalized: &NormalizedEvidence, as_of: DateTime<Utc>) -> DoraMetrics {
    let controls = &normalized.controls;

    let freshness = document_age_days(normalized, as_of)
        .map_or(0, |age| (100.0 - age as f64 * 100.0 / 365.0).round().clamp(0.0, 100.0) as u8);

    let evidence_texts: Vec<&str> = controls
        .iter()
        .filter_map(|c| c.evidence.text.as_deref())
        .filter(|e| !e.trim().is_empty())
        .collect();

    let specificity = fraction_to_score(
        evidence_texts.iter().filter(|e| e.len() >= 40 && !detect_boilerplate(e)).count(),
        evidence_texts.len(),
    );
    let reproducibility = fraction_to_score(
        evidence_texts
            .iter()
            .filter(|e| classify_assessment_depth(e) == AssessmentDepth::Reperformance)
            .count(),
        evidence_texts.len(),
    );
    let independence = independence_base(normalized.metadata.source);

    let weakest = freshness.min(specificity).min(independence).min(reproducibility);
    let band = match weakest {
        85..=100 => DoraBand::Elite,
        70..=84 => DoraBand::High,
        50..=69 => DoraBand::Medium,
        _ => DoraBand::Low,
    };

    let mut divergence_flags = Vec::new();
    if i16::from(freshness) - i16::from(reproducibility) > 40 {
        divergence_flags.push("fresh-but-not-reproduced".to_string());
    }

    DoraMetrics { freshness, specificity, independence, reproducibility, band, divergence_flags }
}

fn fraction_to_score(num: usize, den: usize) -> u8 {
    if den == 0 {
        return 0;
    }
    (num as f64 * 100.0 / den as f64).round().clamp(0.0, 100.0) as u8
}
