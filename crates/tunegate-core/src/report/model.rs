use serde::{Deserialize, Serialize};

use crate::calibration::model::{CalibrationTable, EngineMetadata, TableKind, Unit};
use crate::error::PipelineError;
use crate::format::detect::FormatDescriptor;
use crate::pipeline::{Compatibility, UploadOutcome};
use crate::safety::catalog::SafetyFinding;
use crate::{POLICY_VERSION, SCHEMA_VERSION};

/// Exit code for uploads rejected before a decision was reached.
pub const REJECTED_EXIT_CODE: i32 = 3;

/// Top-level tunegate report.
///
/// This struct is the stable JSON contract handed to the marketplace.
/// It must remain deterministic for identical uploads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub schema_version: String,
    pub policy_version: String,
    pub tool: ToolInfo,
    pub file: FileInfo,
    pub processing: ProcessingInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<DecisionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compatibility: Option<Compatibility>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EngineMetadata>,
    #[serde(default)]
    pub tables: Vec<TableSummary>,
    #[serde(default)]
    pub findings: Vec<FindingInfo>,
    /// Accepted formats, listed when the upload was format-rejected.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accepted_formats: Vec<FormatDescriptor>,
    pub exit_code: i32,
}

impl Report {
    /// Report for an upload that reached a decision.
    pub fn decided(tool: ToolInfo, outcome: UploadOutcome) -> Self {
        let decision = outcome.decision;
        let assessment = decision.assessment;

        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            policy_version: POLICY_VERSION.to_string(),
            tool,
            file: outcome.file,
            processing: ProcessingInfo::decided(outcome.processing_hint_ms),
            decision: Some(DecisionInfo {
                outcome: decision.outcome.as_str().to_string(),
                trust_tier: decision.trust_tier.as_str().to_string(),
                reason: decision.reason,
                score: round2(assessment.score),
                confidence: round2(assessment.confidence),
                rule_score: round2(assessment.rule_score),
                reasoning_score: assessment.reasoning_score.map(round2),
                reasoning_notes: assessment.reasoning_notes,
                extraction_status: serde_plain(&assessment.extraction_status),
            }),
            compatibility: Some(outcome.compatibility),
            metadata: Some(outcome.metadata),
            tables: outcome.tables,
            findings: outcome.findings.iter().map(FindingInfo::from).collect(),
            accepted_formats: vec![],
            exit_code: decision.outcome.exit_code(),
        }
    }

    /// Report for an upload rejected (or cancelled) before a decision.
    pub fn rejected(tool: ToolInfo, file: FileInfo, error: &PipelineError) -> Self {
        let accepted_formats = match error {
            PipelineError::FormatRejected { supported, .. } => supported.clone(),
            _ => vec![],
        };

        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            policy_version: POLICY_VERSION.to_string(),
            tool,
            file,
            processing: ProcessingInfo::rejected(error),
            decision: None,
            compatibility: None,
            metadata: None,
            tables: vec![],
            findings: vec![],
            accepted_formats,
            exit_code: REJECTED_EXIT_CODE,
        }
    }
}

/// Tool metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

/// Identity of the analyzed upload. Raw bytes never outlive the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size_bytes: u64,
    pub hash_algorithm: String,
    pub hash: String,
    /// Detected format, absent when the upload was rejected first.
    pub format: Option<String>,
}

/// Whether the pipeline ran to a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingInfo {
    /// `decided`, `security_rejected`, `format_rejected` or `cancelled`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_hint_ms: Option<u64>,
}

impl ProcessingInfo {
    pub fn decided(processing_hint_ms: u64) -> Self {
        Self {
            status: "decided".into(),
            reason: None,
            processing_hint_ms: Some(processing_hint_ms),
        }
    }

    pub fn rejected(error: &PipelineError) -> Self {
        Self {
            status: error.kind().into(),
            reason: Some(error.to_string()),
            processing_hint_ms: None,
        }
    }
}

/// Flattened decision block. Scores are rounded to two decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionInfo {
    pub outcome: String,
    pub trust_tier: String,
    pub reason: Option<String>,
    pub score: f64,
    pub confidence: f64,
    pub rule_score: f64,
    pub reasoning_score: Option<f64>,
    pub reasoning_notes: Option<String>,
    pub extraction_status: String,
}

/// Shape of one canonical table, without its values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSummary {
    pub kind: TableKind,
    pub name: String,
    pub rpm_bins: usize,
    pub load_bins: Option<usize>,
    pub unit: Unit,
    pub confidence: f64,
    pub source_offset: Option<usize>,
}

impl From<&CalibrationTable> for TableSummary {
    fn from(t: &CalibrationTable) -> Self {
        Self {
            kind: t.kind,
            name: t.name.clone(),
            rpm_bins: t.rpm_bins.len(),
            load_bins: t.load_bins.as_ref().map(Vec::len),
            unit: t.unit,
            confidence: t.confidence,
            source_offset: t.source_offset,
        }
    }
}

/// Finding entry included in report output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingInfo {
    pub rule_id: String,
    pub category: String,
    pub severity: String,
    pub source: String,
    pub rationale: String,
    pub evidence: serde_json::Value,
}

impl From<&SafetyFinding> for FindingInfo {
    fn from(f: &SafetyFinding) -> Self {
        Self {
            rule_id: f.rule_id.to_string(),
            category: f.category.to_string(),
            severity: serde_plain(&f.severity),
            source: serde_plain(&f.source),
            rationale: f.rationale.clone(),
            evidence: f.evidence.clone(),
        }
    }
}

/// Serialized name of a unit-variant enum.
fn serde_plain<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => String::new(),
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
