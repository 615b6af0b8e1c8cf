//! Binary-to-calibration extraction.
//!
//! One strategy per format family, all behind `ExtractionStrategy`:
//!
//!   - map text    → keyword/table-header grammar (`map`)
//!   - Intel HEX   → record decoding, then pattern scan of the image (`hex`)
//!   - bare / BDM  → pattern scan of the raw image (`pattern`)
//!
//! Container formats reach this stage already unwrapped and are treated as
//! bare images. Extraction never fails the pipeline: grammar violations
//! and empty results are reported as structural findings instead.

pub mod hex;
pub mod manufacturer;
pub mod map;
pub mod pattern;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::calibration::model::{EngineMetadata, TableKind};
use crate::format::detect::EcuFormat;
use crate::safety::catalog::{FindingSource, RuleId, SafetyFinding, Severity};

/// Units as they appear in source files, before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawUnit {
    Afr,
    Lambda,
    Degrees,
    Rpm,
    Krpm,
}

impl RawUnit {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "afr" => Some(RawUnit::Afr),
            "lambda" => Some(RawUnit::Lambda),
            "deg" | "degrees" => Some(RawUnit::Degrees),
            "rpm" => Some(RawUnit::Rpm),
            "krpm" => Some(RawUnit::Krpm),
            _ => None,
        }
    }
}

/// A table as located in the payload, in source units.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub kind: TableKind,
    pub name: String,
    pub rpm_bins: Vec<f64>,
    pub rpm_unit: RawUnit,
    pub load_bins: Option<Vec<f64>>,
    pub values: Vec<Vec<f64>>,
    pub value_unit: RawUnit,
    pub confidence: f64,
    pub source_offset: Option<usize>,
}

/// Whether extraction produced usable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    /// Payload was read and at least one table located.
    Complete,
    /// Payload was read but no table could be located.
    Empty,
    /// Payload could not be read as its declared format (missing container
    /// magic, grammar or checksum violations).
    Degraded,
}

/// Output of the extraction stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub tables: Vec<RawTable>,
    pub metadata: EngineMetadata,
    pub findings: Vec<SafetyFinding>,
    pub status: ExtractionStatus,
}

impl Extraction {
    /// A degraded extraction carrying one critical structural finding.
    pub fn degraded(rule_id: RuleId, source: FindingSource, rationale: String) -> Self {
        Self {
            tables: vec![],
            metadata: EngineMetadata::default(),
            findings: vec![SafetyFinding::structural(
                rule_id,
                Severity::Critical,
                source,
                rationale.clone(),
                json!({ "error": rationale }),
            )],
            status: ExtractionStatus::Degraded,
        }
    }
}

/// Successful strategy output, before status classification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyOutput {
    pub tables: Vec<RawTable>,
    pub metadata: EngineMetadata,
}

/// A grammar-level failure in a self-describing format.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct TextFormatError {
    pub line: usize,
    pub message: String,
}

impl TextFormatError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Decode contract implemented once per format family.
pub trait ExtractionStrategy: Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, payload: &[u8]) -> Result<StrategyOutput, TextFormatError>;
}

static BARE_BINARY: pattern::PatternStrategy = pattern::PatternStrategy::bare_binary();
static BDM_DUMP: pattern::PatternStrategy = pattern::PatternStrategy::bdm_dump();
static INTEL_HEX: hex::HexStrategy = hex::HexStrategy;
static MAP_TEXT: map::MapStrategy = map::MapStrategy;

/// Strategy for a detected format. Containers share the bare-binary strategy
/// because their unwrapped payload is a bare image.
pub fn strategy_for(format: EcuFormat) -> &'static dyn ExtractionStrategy {
    match format {
        EcuFormat::IntelHex => &INTEL_HEX,
        EcuFormat::MapText => &MAP_TEXT,
        EcuFormat::BdmDump => &BDM_DUMP,
        EcuFormat::BareBinary
        | EcuFormat::WoolichContainer
        | EcuFormat::PowerVisionContainer
        | EcuFormat::HpTunersContainer
        | EcuFormat::FtEcuContainer => &BARE_BINARY,
    }
}

/// Run the strategy for `format` over an unwrapped payload.
pub fn extract(payload: &[u8], format: EcuFormat) -> Extraction {
    let strategy = strategy_for(format);

    let mut output = match strategy.extract(payload) {
        Ok(output) => output,
        Err(e) => {
            tracing::warn!(strategy = strategy.name(), error = %e, "text payload rejected");
            return Extraction::degraded(
                RuleId::SText01,
                FindingSource::Extractor,
                format!("{} payload is malformed: {e}", strategy.name()),
            );
        }
    };

    if output.metadata.manufacturer.is_none() {
        output.metadata.manufacturer = manufacturer::identify(payload).map(str::to_string);
    }

    tracing::debug!(
        strategy = strategy.name(),
        tables = output.tables.len(),
        manufacturer = ?output.metadata.manufacturer,
        "extraction finished"
    );

    if output.tables.is_empty() {
        return Extraction {
            tables: vec![],
            metadata: output.metadata,
            findings: vec![SafetyFinding::structural(
                RuleId::SExt01,
                Severity::Critical,
                FindingSource::Extractor,
                format!(
                    "no calibration table located in {} bytes of {format} payload",
                    payload.len()
                ),
                json!({ "format": format, "payload_bytes": payload.len() }),
            )],
            status: ExtractionStatus::Empty,
        };
    }

    Extraction {
        tables: output.tables,
        metadata: output.metadata,
        findings: vec![],
        status: ExtractionStatus::Complete,
    }
}
