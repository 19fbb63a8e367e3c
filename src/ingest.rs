//! # Ingested Documents
//!
//! The single canonical structure every source parser emits. Parsers for
//! specific vendor formats live outside this crate; whatever they read —
//! SOC 2 reports, Prowler output, pentest findings — arrives here as an
//! [`IngestedDocument`] and is immutable thereafter.

use serde::{Deserialize, Serialize};

/// The tool or document class a document was extracted from.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    /// SOC 2 audit report.
    Soc2,
    /// ISO 27001 certification audit.
    Iso27001,
    /// Prowler cloud scanner output.
    Prowler,
    /// AWS Security Hub findings.
    #[serde(rename = "securityhub")]
    SecurityHub,
    /// Penetration test report.
    Pentest,
    /// Manually authored evidence.
    Manual,
    /// Generic JSON control manifest.
    Json,
    /// CISO Assistant export.
    CisoAssistant,
}

impl Source {
    /// Stable lower-case name, matching the wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Soc2 => "soc2",
            Self::Iso27001 => "iso27001",
            Self::Prowler => "prowler",
            Self::SecurityHub => "securityhub",
            Self::Pentest => "pentest",
            Self::Manual => "manual",
            Self::Json => "json",
            Self::CisoAssistant => "ciso-assistant",
        }
    }
}

/// Tested state of a control as reported by the source.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ControlStatus {
    /// The control was tested and operates as intended.
    Effective,
    /// The control was tested and failed.
    Ineffective,
    /// The control was not exercised.
    NotTested,
}

/// Source-reported severity. Uppercase on the wire, as tools emit it.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Highest impact.
    Critical,
    /// High impact.
    High,
    /// Moderate impact.
    Medium,
    /// Low impact.
    Low,
}

/// A mapping from a control to a compliance-framework control ID.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct FrameworkRef {
    /// Framework name, e.g. `SOC2` or `NIST-800-53`.
    pub framework: String,

    /// The control identifier within the framework, e.g. `CC6.1`.
    pub control_id: String,
}

/// A single control extracted from a source document.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestedControl {
    /// Stable identifier within the document.
    pub id: String,

    /// Human description of the control.
    pub description: String,

    /// Tested state. `None` deserializes as not-tested via `default`.
    pub status: Option<ControlStatus>,

    /// Source-reported severity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,

    /// Free-text supporting evidence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,

    /// Framework control mappings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework_refs: Option<Vec<FrameworkRef>>,

    /// Parser-declared assurance level for this control (0-4).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assurance_level: Option<u8>,
}

/// Document-level metadata.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentMetadata {
    /// Document title.
    pub title: String,

    /// Issuing organization.
    pub issuer: String,

    /// ISO-8601 date of the document.
    pub date: String,

    /// Assessment scope statement.
    pub scope: String,

    /// Auditor name, for audited sources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auditor: Option<String>,

    /// Report type, e.g. `Type II`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_type: Option<String>,

    /// SHA-256 of the raw source text, hex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_hash: Option<String>,
}

/// Assessment context declared alongside the controls.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AssessmentContext {
    /// Technology components in scope.
    pub tech_stack: Vec<String>,

    /// Compensating controls declared by the assessee.
    pub compensating_controls: Vec<String>,

    /// Known gaps in assessment scope.
    pub scope_gaps: Vec<String>,

    /// Human summary of scope coverage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_coverage: Option<String>,

    /// Assessor narrative about methodology.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assessor_notes: Option<String>,
}

/// A source document after parsing: created once per input, immutable
/// thereafter. Every control referenced by the document lives in
/// `controls`; order is preserved for observability but carries no meaning.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IngestedDocument {
    /// Where the document came from.
    pub source: Source,

    /// Document metadata.
    pub metadata: DocumentMetadata,

    /// The extracted controls.
    pub controls: Vec<IngestedControl>,

    /// Assurance level (0, 1, or 2) declared by the parser based on tool
    /// class, not content.
    pub tool_assurance_level: u8,

    /// Optional assessment context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<AssessmentContext>,
}
