//! # Seven-Dimension Scoring
//!
//! Each dimension is an integer in `[0, 100]`. The formulas are fixed;
//! callers may override methodology (external scalar) and consistency
//! (external bias score).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::Source;
use crate::normalize::{NormalizedEvidence, NormalizedStatus};

/// External overrides for the score vector.
#[derive(Clone, Debug, Default)]
pub struct ScoreOptions {
    /// External methodology scalar in `[0, 1]`, scaled to `[0, 100]`.
    pub methodology_override: Option<f64>,

    /// External consistency bias score in `[0, 1]`, replacing the computed
    /// value.
    pub consistency_bias: Option<f64>,
}

/// The seven-dimension score vector.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DimensionScores {
    /// Do the controls work: pass rate and evidence backing.
    pub capability: u8,

    /// How much was tested: tested fraction, framework mapping, scope gaps.
    pub coverage: u8,

    /// Will it stay true: effectiveness and result freshness.
    pub reliability: u8,

    /// How rigorous the assessment was.
    pub methodology: u8,

    /// How recent the document is.
    pub freshness: u8,

    /// Who performed the assessment.
    pub independence: u8,

    /// Internal coherence of the evidence set.
    pub consistency: u8,
}

impl DimensionScores {
    /// The dimensions in table order, with their names.
    #[must_use]
    pub const fn named(&self) -> [(&'static str, u8); 7] {
        [
            ("capability", self.capability),
            ("coverage", self.coverage),
            ("reliability", self.reliability),
            ("methodology", self.methodology),
            ("freshness", self.freshness),
            ("independence", self.independence),
            ("consistency", self.consistency),
        ]
    }
}

struct ControlStats {
    total: usize,
    tested: usize,
    passed: usize,
    failed: usize,
    with_evidence: usize,
    with_framework: usize,
}

impl ControlStats {
    fn of(normalized: &NormalizedEvidence) -> Self {
        let mut stats =
            Self { total: 0, tested: 0, passed: 0, failed: 0, with_evidence: 0, with_framework: 0 };
        for control in &normalized.controls {
            stats.total += 1;
            match control.status {
                NormalizedStatus::Pass => {
                    stats.tested += 1;
                    stats.passed += 1;
                }
                NormalizedStatus::Fail => {
                    stats.tested += 1;
                    stats.failed += 1;
                }
                NormalizedStatus::Skip | NormalizedStatus::Error => {}
            }
            if control.evidence.text.as_deref().is_some_and(|e| !e.trim().is_empty()) {
                stats.with_evidence += 1;
            }
            if !control.framework_refs.is_empty() {
                stats.with_framework += 1;
            }
        }
        stats
    }

    fn pass_rate(&self) -> f64 {
        ratio(self.passed, self.tested)
    }

    fn effective_rate(&self) -> f64 {
        ratio(self.passed, self.total)
    }

    fn fraction_tested(&self) -> f64 {
        ratio(self.tested, self.total)
    }

    fn fraction_with_evidence(&self) -> f64 {
        ratio(self.with_evidence, self.total)
    }

    fn fraction_framework_mapped(&self) -> f64 {
        ratio(self.with_framework, self.total)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

fn clamp_score(x: f64) -> u8 {
    x.round().clamp(0.0, 100.0) as u8
}

/// Parse a document date: RFC 3339, falling back to a plain `YYYY-MM-DD`.
#[must_use]
pub fn parse_document_date(date: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(date) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Document age in days at `as_of`, `None` on a missing or invalid date.
#[must_use]
pub fn document_age_days(normalized: &NormalizedEvidence, as_of: DateTime<Utc>) -> Option<i64> {
    parse_document_date(&normalized.metadata.date).map(|d| (as_of - d).num_days().max(0))
}

/// Compute the seven-dimension vector with its rule trace.
#[must_use]
pub fn score(
    normalized: &NormalizedEvidence, opts: &ScoreOptions, as_of: DateTime<Utc>,
) -> (DimensionScores, Vec<String>) {
    let stats = ControlStats::of(normalized);
    let mut trace = Vec::new();
    let source = normalized.metadata.source;
    let age_days = document_age_days(normalized, as_of);

    // capability: 70 pass rate, 30 evidence backing, up to +20 for declared
    // tech stack (5 per component)
    let tech_bonus = normalized
        .metadata
        .context
        .as_ref()
        .map_or(0.0, |ctx| (ctx.tech_stack.len() as f64 * 5.0).min(20.0));
    let capability = clamp_score(
        70.0 * stats.pass_rate() + 30.0 * stats.fraction_with_evidence() + tech_bonus,
    );

    // coverage: 70 tested, 30 framework mapped, minus one point per declared
    // scope gap (capped at 20)
    let gap_penalty = normalized
        .metadata
        .context
        .as_ref()
        .map_or(0.0, |ctx| (ctx.scope_gaps.len() as f64).min(20.0));
    let coverage = clamp_score(
        70.0 * stats.fraction_tested() + 30.0 * stats.fraction_framework_mapped() - gap_penalty,
    );

    // reliability: 60 effective rate, 40 freshness bucket
    let bucket = match age_days {
        Some(age) if age <= 90 => {
            trace.push(format!("freshness fresh ({age} days)"));
            1.0
        }
        Some(age) if age <= 365 => {
            trace.push(format!("freshness aging ({age} days)"));
            0.5
        }
        Some(age) => {
            trace.push(format!("freshness stale ({age} days)"));
            0.0
        }
        None => {
            trace.push("freshness unknown (missing or invalid date)".to_string());
            0.0
        }
    };
    let reliability = clamp_score(60.0 * stats.effective_rate() + 40.0 * bucket);

    // methodology: source table, overridable, enriched by assessor notes
    let methodology = opts.methodology_override.map_or_else(
        || {
            let base = methodology_base(source);
            let enrichment = normalized
                .metadata
                .context
                .as_ref()
                .and_then(|ctx| ctx.assessor_notes.as_deref())
                .map_or(0.0, notes_enrichment);
            if enrichment > 0.0 {
                trace.push(format!("methodology enriched +{enrichment:.0} from assessor notes"));
            }
            clamp_score(f64::from(base) + enrichment)
        },
        |scalar| clamp_score(scalar * 100.0),
    );

    // freshness: linear decay over a year
    let freshness = age_days
        .map_or(0, |age| clamp_score(100.0 - age as f64 * 100.0 / 365.0));

    let independence = independence_base(source);

    // consistency: 60 evidence backing, 15 mixed-result transparency, 25 base
    let consistency = opts.consistency_bias.map_or_else(
        || {
            let mixed = if stats.passed > 0 && stats.failed > 0 { 15.0 } else { 0.0 };
            clamp_score(60.0 * stats.fraction_with_evidence() + mixed + 25.0)
        },
        |bias| clamp_score(bias * 100.0),
    );

    let dims = DimensionScores {
        capability,
        coverage,
        reliability,
        methodology,
        freshness,
        independence,
        consistency,
    };
    (dims, trace)
}

/// Methodology score by source class.
#[must_use]
pub const fn methodology_base(source: Source) -> u8 {
    match source {
        Source::Pentest => 75,
        Source::Prowler | Source::SecurityHub | Source::CisoAssistant => 60,
        Source::Soc2 | Source::Iso27001 => 50,
        Source::Json => 25,
        Source::Manual => 15,
    }
}

/// Independence score by source class.
#[must_use]
pub const fn independence_base(source: Source) -> u8 {
    match source {
        Source::Soc2 | Source::Iso27001 => 85,
        Source::Pentest => 75,
        Source::Prowler | Source::SecurityHub | Source::CisoAssistant => 50,
        Source::Json => 25,
        Source::Manual => 15,
    }
}

/// Up to +20 when assessor notes mention reperformance or sampling work.
fn notes_enrichment(notes: &str) -> f64 {
    let lower = notes.to_lowercase();
    let mut bonus = 0.0;
    if lower.contains("reperform") || lower.contains("re-perform") || lower.contains("retest") {
        bonus += 10.0;
    }
    if lower.contains("sampling") || lower.contains("sample") {
        bonus += 10.0;
    }
    bonus
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::ingest::{
        AssessmentContext, ControlStatus, DocumentMetadata, IngestedControl, IngestedDocument,
    };
    use crate::normalize::normalize;

    fn doc_with(
        source: Source, date: &str, controls: Vec<IngestedControl>, context: Option<AssessmentContext>,
    ) -> NormalizedEvidence {
        normalize(&IngestedDocument {
            source,
            metadata: DocumentMetadata {
                title: "t".to_string(),
                issuer: "acme".to_string(),
                date: date.to_string(),
                scope: "prod".to_string(),
                ..DocumentMetadata::default()
            },
            controls,
            tool_assurance_level: 1,
            context,
        })
    }

    fn control(status: ControlStatus, evidence: Option<&str>) -> IngestedControl {
        IngestedControl {
            id: "c".to_string(),
            description: "d".to_string(),
            status: Some(status),
            evidence: evidence.map(String::from),
            ..IngestedControl::default()
        }
    }

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn capability_blends_pass_rate_and_evidence() {
        // 1 pass with evidence, 1 fail without: pass rate 0.5, evidence 0.5
        let n = doc_with(
            Source::Prowler,
            "2026-06-01",
            vec![
                control(ControlStatus::Effective, Some("ok")),
                control(ControlStatus::Ineffective, None),
            ],
            None,
        );
        let (dims, _) = score(&n, &ScoreOptions::default(), as_of());
        assert_eq!(dims.capability, 50);
    }

    #[test]
    fn tech_stack_bonus_caps_at_twenty() {
        let ctx = AssessmentContext {
            tech_stack: (0..6).map(|i| format!("component-{i}")).collect(),
            ..AssessmentContext::default()
        };
        let n = doc_with(
            Source::Prowler,
            "2026-06-01",
            vec![control(ControlStatus::Effective, Some("ok"))],
            Some(ctx),
        );
        let (dims, _) = score(&n, &ScoreOptions::default(), as_of());
        // 70 + 30 + 20 clamps to 100
        assert_eq!(dims.capability, 100);
    }

    #[test]
    fn coverage_penalizes_scope_gaps() {
        let ctx = AssessmentContext {
            scope_gaps: (0..5).map(|i| format!("gap-{i}")).collect(),
            ..AssessmentContext::default()
        };
        let n = doc_with(
            Source::Prowler,
            "2026-06-01",
            vec![control(ControlStatus::Effective, Some("ok"))],
            Some(ctx),
        );
        let (dims, _) = score(&n, &ScoreOptions::default(), as_of());
        // 70 tested + 0 mapped - 5 gaps
        assert_eq!(dims.coverage, 65);
    }

    #[test]
    fn freshness_decays_linearly() {
        let n = doc_with(
            Source::Prowler,
            "2026-06-01", // 30 days before as_of
            vec![control(ControlStatus::Effective, Some("ok"))],
            None,
        );
        let (dims, trace) = score(&n, &ScoreOptions::default(), as_of());
        assert_eq!(dims.freshness, 92); // 100 - 30*100/365 = 91.78 → 92
        assert!(trace.iter().any(|t| t.contains("fresh (30 days)")));

        let stale = doc_with(
            Source::Prowler,
            "2024-01-01",
            vec![control(ControlStatus::Effective, Some("ok"))],
            None,
        );
        let (dims, _) = score(&stale, &ScoreOptions::default(), as_of());
        assert_eq!(dims.freshness, 0);
    }

    #[test]
    fn invalid_date_scores_zero_freshness() {
        let n = doc_with(
            Source::Prowler,
            "not a date",
            vec![control(ControlStatus::Effective, Some("ok"))],
            None,
        );
        let (dims, trace) = score(&n, &ScoreOptions::default(), as_of());
        assert_eq!(dims.freshness, 0);
        assert!(trace.iter().any(|t| t.contains("missing or invalid")));
    }

    #[test]
    fn methodology_tables_and_override() {
        let n = doc_with(
            Source::Pentest,
            "2026-06-01",
            vec![control(ControlStatus::Effective, Some("ok"))],
            None,
        );
        let (dims, _) = score(&n, &ScoreOptions::default(), as_of());
        assert_eq!(dims.methodology, 75);

        let opts = ScoreOptions { methodology_override: Some(0.9), ..ScoreOptions::default() };
        let (dims, _) = score(&n, &opts, as_of());
        assert_eq!(dims.methodology, 90);
    }

    #[test]
    fn assessor_notes_enrich_methodology() {
        let ctx = AssessmentContext {
            assessor_notes: Some("re-performed a sample of 25 items".to_string()),
            ..AssessmentContext::default()
        };
        let n = doc_with(
            Source::Soc2,
            "2026-06-01",
            vec![control(ControlStatus::Effective, Some("ok"))],
            Some(ctx),
        );
        let (dims, _) = score(&n, &ScoreOptions::default(), as_of());
        assert_eq!(dims.methodology, 70); // 50 + 10 + 10
    }

    #[test]
    fn consistency_rewards_mixed_results() {
        let n = doc_with(
            Source::Prowler,
            "2026-06-01",
            vec![
                control(ControlStatus::Effective, Some("ok")),
                control(ControlStatus::Ineffective, Some("found drift")),
            ],
            None,
        );
        let (dims, _) = score(&n, &ScoreOptions::default(), as_of());
        assert_eq!(dims.consistency, 100); // 60 + 15 + 25

        let opts = ScoreOptions { consistency_bias: Some(0.3), ..ScoreOptions::default() };
        let (dims, _) = score(&n, &opts, as_of());
        assert_eq!(dims.consistency, 30);
    }

    #[test]
    fn all_dimensions_stay_in_range() {
        let n = doc_with(Source::Manual, "1990-01-01", vec![], None);
        let (dims, _) = score(&n, &ScoreOptions::default(), as_of());
        for (_, v) in dims.named() {
            assert!(v <= 100);
        }
    }
}
