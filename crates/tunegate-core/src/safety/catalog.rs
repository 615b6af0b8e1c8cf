use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifiers for every finding the pipeline can emit.
///
/// The external id (`as_str`) is part of the report contract and must not
/// change without a schema version bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RuleId {
    /// Extension and content signature disagree.
    SFmt01,
    /// Container header magic missing.
    SWrap01,
    /// Text-encoded payload violates its grammar or record checksums.
    SText01,
    /// No calibration table located.
    SExt01,
    /// Table dropped for violating dimensional invariants.
    SNorm01,
    /// Values outside the physical envelope of their unit.
    SNorm02,
    /// Lower-confidence duplicate table discarded.
    SNorm03,
    /// Abrupt, non-monotonic jump between adjacent cells.
    SProg01,
    /// Required table kind missing.
    SCov01,
    RAfr01,
    RAfr02,
    RAfr03,
    RAfr04,
    RIgn01,
    RIgn02,
    RRev01,
    /// Concern raised by the external reasoning service.
    QReason01,
}

impl RuleId {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::SFmt01 => "S-FMT-01",
            RuleId::SWrap01 => "S-WRAP-01",
            RuleId::SText01 => "S-TEXT-01",
            RuleId::SExt01 => "S-EXT-01",
            RuleId::SNorm01 => "S-NORM-01",
            RuleId::SNorm02 => "S-NORM-02",
            RuleId::SNorm03 => "S-NORM-03",
            RuleId::SProg01 => "S-PROG-01",
            RuleId::SCov01 => "S-COV-01",
            RuleId::RAfr01 => "R-AFR-01",
            RuleId::RAfr02 => "R-AFR-02",
            RuleId::RAfr03 => "R-AFR-03",
            RuleId::RAfr04 => "R-AFR-04",
            RuleId::RIgn01 => "R-IGN-01",
            RuleId::RIgn02 => "R-IGN-02",
            RuleId::RRev01 => "R-REV-01",
            RuleId::QReason01 => "Q-REASON-01",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordering is semantic: Informational < Moderate < Critical.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Informational,
    Moderate,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum FindingCategory {
    LeanFuel,
    RichFuel,
    ExcessiveAdvance,
    RevLimitOutOfRange,
    StructuralAnomaly,
}

impl FindingCategory {
    /// Lean-fuel and rev-limit criticals can never be overridden by any tier.
    pub fn is_overridable(&self) -> bool {
        !matches!(
            self,
            FindingCategory::LeanFuel | FindingCategory::RevLimitOutOfRange
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FindingCategory::LeanFuel => "lean-fuel",
            FindingCategory::RichFuel => "rich-fuel",
            FindingCategory::ExcessiveAdvance => "excessive-advance",
            FindingCategory::RevLimitOutOfRange => "rev-limit-out-of-range",
            FindingCategory::StructuralAnomaly => "structural-anomaly",
        }
    }
}

impl fmt::Display for FindingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which stage produced a finding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FindingSource {
    Detector,
    Unwrapper,
    Extractor,
    Normalizer,
    Rules,
    Reasoning,
}

/// One detected issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyFinding {
    pub rule_id: RuleId,
    pub category: FindingCategory,
    pub severity: Severity,
    pub source: FindingSource,
    pub rationale: String,
    pub evidence: serde_json::Value,
}

impl SafetyFinding {
    pub fn new(
        rule_id: RuleId,
        category: FindingCategory,
        severity: Severity,
        source: FindingSource,
        rationale: impl Into<String>,
        evidence: serde_json::Value,
    ) -> Self {
        Self {
            rule_id,
            category,
            severity,
            source,
            rationale: rationale.into(),
            evidence,
        }
    }

    pub fn structural(
        rule_id: RuleId,
        severity: Severity,
        source: FindingSource,
        rationale: impl Into<String>,
        evidence: serde_json::Value,
    ) -> Self {
        Self::new(
            rule_id,
            FindingCategory::StructuralAnomaly,
            severity,
            source,
            rationale,
            evidence,
        )
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn severity_ordering_is_semantic() {
        assert!(Severity::Informational < Severity::Moderate);
        assert!(Severity::Moderate < Severity::Critical);
    }

    #[test]
    fn categories_serialize_kebab_case() {
        let s = serde_json::to_string(&FindingCategory::RevLimitOutOfRange).unwrap();
        assert_eq!(s, "\"rev-limit-out-of-range\"");

        let back: FindingCategory = serde_json::from_str("\"rich-fuel\"").unwrap();
        assert_eq!(back, FindingCategory::RichFuel);
    }

    #[test]
    fn lean_and_rev_limit_are_never_overridable() {
        assert!(!FindingCategory::LeanFuel.is_overridable());
        assert!(!FindingCategory::RevLimitOutOfRange.is_overridable());
        assert!(FindingCategory::RichFuel.is_overridable());
        assert!(FindingCategory::ExcessiveAdvance.is_overridable());
    }

    #[test]
    fn rule_ids_render_external_form() {
        assert_eq!(RuleId::SExt01.to_string(), "S-EXT-01");
        assert_eq!(RuleId::RAfr01.as_str(), "R-AFR-01");
    }

    #[test]
    fn structural_helper_sets_category() {
        let f = SafetyFinding::structural(
            RuleId::SExt01,
            Severity::Critical,
            FindingSource::Extractor,
            "no tables",
            json!({}),
        );
        assert_eq!(f.category, FindingCategory::StructuralAnomaly);
        assert!(f.is_critical());
    }
}
