//! # CPOE Credential Subject
//!
//! The claims a CPOE makes: scope, provenance, summary statistics, and the
//! optional evidence-chain, framework, assurance, and process-provenance
//! descriptors. Non-core extension fields are preserved opaquely so that
//! canonicalization and signatures remain stable across schema upgrades.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::assurance::{
    AssuranceEvaluation, BinaryCheck, DimensionScores, DoraMetrics, EvidenceProfile,
    ProvenanceQuality, Safeguard,
};
use crate::core::Kind;
use crate::normalize::{EvidenceType, NormalizedEvidence, NormalizedStatus};

/// Structured scope description.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ScopeDetail {
    /// Cloud or platform providers in scope.
    pub providers: Vec<String>,

    /// Number of resources assessed.
    pub resource_count: u64,

    /// Frameworks the assessment covers.
    pub frameworks_covered: Vec<String>,
}

/// Where the attested evidence came from.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvenanceDescriptor {
    /// Source class, e.g. `prowler`.
    pub source: String,

    /// Identity of the producing party.
    pub source_identity: String,

    /// SHA-256 of the source document, hex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_hash: Option<String>,

    /// ISO-8601 date of the source document.
    pub date: String,

    /// Evidence-type distribution; fractions sum to 1.0 when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_type_distribution: Option<BTreeMap<String, f64>>,
}

/// Headline result counts. `controls_passed + controls_failed` never
/// exceeds `controls_tested`; the overall score is deterministic from the
/// counts.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SummaryStats {
    /// Controls exercised (passed, failed, skipped, or errored).
    pub controls_tested: usize,

    /// Controls that passed.
    pub controls_passed: usize,

    /// Controls that failed.
    pub controls_failed: usize,

    /// `round(100 * passed / (passed + failed))`.
    pub overall_score: u8,
}

impl SummaryStats {
    /// Compute the summary from normalized controls.
    #[must_use]
    pub fn from_controls(normalized: &NormalizedEvidence) -> Self {
        let mut tested = 0;
        let mut passed = 0;
        let mut failed = 0;
        for control in &normalized.controls {
            tested += 1;
            match control.status {
                NormalizedStatus::Pass => passed += 1,
                NormalizedStatus::Fail => failed += 1,
                NormalizedStatus::Skip | NormalizedStatus::Error => {}
            }
        }
        Self {
            controls_tested: tested,
            controls_passed: passed,
            controls_failed: failed,
            overall_score: overall_score(passed, failed),
        }
    }
}

/// `round(100 * passed / (passed + failed))`, 0 when nothing was decided.
#[must_use]
pub fn overall_score(passed: usize, failed: usize) -> u8 {
    let decided = passed + failed;
    if decided == 0 {
        return 0;
    }
    (passed as f64 * 100.0 / decided as f64).round().clamp(0.0, 100.0) as u8
}

/// Link from the credential to its evidence chain.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceChainDescriptor {
    /// The chain's Merkle digest.
    pub hash_chain_root: String,

    /// Records in the chain at issuance.
    pub record_count: usize,

    /// Whether the chain verified at issuance.
    pub chain_verified: bool,
}

/// Assurance enrichment, embedded when the issuer requests it.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AssuranceEnrichment {
    /// Effective ladder level after gating and safeguards.
    pub level: u8,

    /// Control count per level.
    pub breakdown: BTreeMap<u8, usize>,

    /// Safeguards that fired.
    pub applied_safeguards: Vec<Safeguard>,

    /// Ordered rule-application trace.
    pub rule_trace: Vec<String>,
}

/// Time window the evidence observes.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObservationPeriod {
    /// Window start, ISO-8601.
    pub from: String,

    /// Window end, ISO-8601.
    pub to: String,
}

/// Link to the in-toto/SLSA-shaped receipt chain for the issuance pipeline
/// itself.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessProvenanceDescriptor {
    /// Merkle digest of the receipt chain.
    pub chain_digest: String,

    /// Total pipeline steps witnessed.
    pub step_count: usize,

    /// Steps any party can re-run.
    pub reproducible_steps: usize,

    /// Steps vouched for by tool attestation only.
    pub attested_steps: usize,
}

/// The CPOE credential subject.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CpoeSubject {
    /// Assessment scope: a human string or a structured description.
    pub scope: Kind<ScopeDetail>,

    /// Evidence provenance.
    pub provenance: ProvenanceDescriptor,

    /// Headline counts.
    pub summary: SummaryStats,

    /// Evidence-chain linkage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_chain: Option<EvidenceChainDescriptor>,

    /// Frameworks the credential claims.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frameworks: Option<Vec<String>>,

    /// Per-framework result counts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework_breakdown: Option<BTreeMap<String, SummaryStats>>,

    /// Threat-model summary, carried opaquely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threat_model: Option<Value>,

    /// Provenance distribution and quality score.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance_quality: Option<ProvenanceQuality>,

    /// The 16 fixed binary checks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_checks: Option<Vec<BinaryCheck>>,

    /// DORA-style metrics, banded by the weakest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dora_metrics: Option<DoraMetrics>,

    /// Text-feature profile of the evidence set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_profile: Option<EvidenceProfile>,

    /// Assurance enrichment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assurance: Option<AssuranceEnrichment>,

    /// Seven-dimension score vector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<DimensionScores>,

    /// Evidence types present in the underlying documents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_types: Option<Vec<EvidenceType>>,

    /// Observed time window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation_period: Option<ObservationPeriod>,

    /// Pipeline receipt-chain linkage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_provenance: Option<ProcessProvenanceDescriptor>,

    /// Non-core extension fields, preserved opaquely.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CpoeSubject {
    /// Assemble a subject from normalized evidence and its evaluation. The
    /// enrichment fields are attached only when `enrich` is set.
    #[must_use]
    pub fn from_evidence(
        normalized: &NormalizedEvidence, evaluation: &AssuranceEvaluation, enrich: bool,
    ) -> Self {
        let meta = &normalized.metadata;

        // frameworks claimed = union of framework refs across controls
        let mut frameworks: Vec<String> = Vec::new();
        let mut breakdown: BTreeMap<String, (usize, usize, usize)> = BTreeMap::new();
        for control in &normalized.controls {
            for fref in &control.framework_refs {
                if !frameworks.contains(&fref.framework) {
                    frameworks.push(fref.framework.clone());
                }
                let entry = breakdown.entry(fref.framework.clone()).or_insert((0, 0, 0));
                entry.0 += 1;
                match control.status {
                    NormalizedStatus::Pass => entry.1 += 1,
                    NormalizedStatus::Fail => entry.2 += 1,
                    NormalizedStatus::Skip | NormalizedStatus::Error => {}
                }
            }
        }
        let framework_breakdown: BTreeMap<String, SummaryStats> = breakdown
            .into_iter()
            .map(|(framework, (tested, passed, failed))| {
                (framework, SummaryStats {
                    controls_tested: tested,
                    controls_passed: passed,
                    controls_failed: failed,
                    overall_score: overall_score(passed, failed),
                })
            })
            .collect();

        let mut distribution = BTreeMap::new();
        distribution.insert(
            serde_json::to_value(meta.evidence_type)
                .ok()
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_default(),
            1.0,
        );

        Self {
            scope: Kind::String(meta.scope.clone()),
            provenance: ProvenanceDescriptor {
                source: meta.source.as_str().to_string(),
                source_identity: meta.issuer.clone(),
                source_hash: meta.source_hash.clone(),
                date: meta.date.clone(),
                evidence_type_distribution: Some(distribution),
            },
            summary: SummaryStats::from_controls(normalized),
            evidence_chain: None,
            frameworks: if frameworks.is_empty() { None } else { Some(frameworks) },
            framework_breakdown: if framework_breakdown.is_empty() {
                None
            } else {
                Some(framework_breakdown)
            },
            threat_model: None,
            provenance_quality: Some(evaluation.provenance_quality.clone()),
            binary_checks: Some(evaluation.binary_checks.clone()),
            dora_metrics: Some(evaluation.dora.clone()),
            evidence_profile: Some(evaluation.evidence_profile.clone()),
            assurance: enrich.then(|| AssuranceEnrichment {
                level: evaluation.effective_level,
                breakdown: evaluation.rollup.breakdown.clone(),
                applied_safeguards: evaluation.applied_safeguards.clone(),
                rule_trace: evaluation.rule_trace.clone(),
            }),
            dimensions: enrich.then_some(evaluation.dimensions),
            evidence_types: enrich.then(|| vec![meta.evidence_type]),
            observation_period: None,
            process_provenance: None,
            extra: Map::new(),
        }
    }
}
