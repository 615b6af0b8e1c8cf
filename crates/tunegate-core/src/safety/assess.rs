//! Aggregation of the rule pass and the optional reasoning pass into a
//! `SafetyAssessment`.
//!
//! Score: `100 - penalty` from the rule pass, blended with the service score
//! when one is available. Penalty is severity-weighted; repeated findings of
//! the same rule and severity add a diminishing amount so a single bad region
//! does not read like many independent problems.
//!
//! Confidence: structural confidence (extraction × completeness), intersected
//! with the service's own confidence, or capped when the service is absent.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

use crate::calibration::model::CalibrationModel;
use crate::config::{PolicyConfig, ScoringPolicy};
use crate::extract::ExtractionStatus;
use crate::pipeline::Compatibility;
use crate::safety::catalog::{FindingSource, RuleId, SafetyFinding, Severity};
use crate::safety::reasoning::{ReasoningRequest, ReasoningResponse, ReasoningService};
use crate::safety::rules::{self, RulePass};
use crate::util::deterministic::sort_findings;

/// Extra weight per repeated finding of one rule and severity.
const REPEAT_STEP: f64 = 0.1;
/// Ceiling on a group's weight, as a multiple of a single finding.
const REPEAT_CAP: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyAssessment {
    /// Aggregate safety score in [0, 100].
    pub score: f64,
    /// Assessment confidence in [0, 1].
    pub confidence: f64,
    /// Deterministic part of the score.
    pub rule_score: f64,
    /// Service score, when the reasoning pass answered.
    pub reasoning_score: Option<f64>,
    /// Every finding, most severe first.
    pub findings: Vec<SafetyFinding>,
    /// Narrative from the reasoning service; absent when it was unavailable.
    pub reasoning_notes: Option<String>,
    pub extraction_status: ExtractionStatus,
}

impl SafetyAssessment {
    pub fn has_critical(&self) -> bool {
        self.findings.iter().any(SafetyFinding::is_critical)
    }

    pub fn highest_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }
}

/// What the analyzer needs to call the reasoning service.
#[derive(Clone, Copy)]
pub struct ReasoningCall<'a> {
    pub service: &'a dyn ReasoningService,
    pub file_hash: &'a str,
    pub compatibility: &'a Compatibility,
}

/// Run the rule pass, then the reasoning pass when available, and aggregate.
///
/// `prior` carries findings from earlier stages (detector, unwrapper,
/// extractor, normalizer).
pub fn analyze(
    model: &CalibrationModel,
    prior: Vec<SafetyFinding>,
    extraction_status: ExtractionStatus,
    reasoning: Option<ReasoningCall<'_>>,
    policy: &PolicyConfig,
) -> SafetyAssessment {
    let pass = rules::evaluate(model, policy);

    let mut findings = prior;
    findings.extend(pass.findings.iter().cloned());

    let response = match reasoning {
        Some(call) if !model.is_empty() => {
            let request = ReasoningRequest::new(call.file_hash, call.compatibility, model, &findings);
            match call.service.assess(&request) {
                Ok(response) => Some(response),
                Err(e) => {
                    tracing::warn!(error = %e, "reasoning service unavailable, using rule pass only");
                    None
                }
            }
        }
        _ => None,
    };

    aggregate(&pass, findings, response, extraction_status, &policy.scoring)
}

/// Pure aggregation step.
pub fn aggregate(
    pass: &RulePass,
    mut findings: Vec<SafetyFinding>,
    response: Option<ReasoningResponse>,
    extraction_status: ExtractionStatus,
    scoring: &ScoringPolicy,
) -> SafetyAssessment {
    let rule_score = (100.0 - penalty(&findings, scoring)).clamp(0.0, 100.0);
    let structural = pass.confidence();

    let (score, confidence, reasoning_score, reasoning_notes) = match response {
        Some(r) => {
            findings.extend(r.concerns.iter().map(|c| {
                SafetyFinding::new(
                    RuleId::QReason01,
                    c.category,
                    c.severity.min(Severity::Moderate),
                    FindingSource::Reasoning,
                    c.rationale.clone(),
                    json!({ "reported_severity": c.severity }),
                )
            }));
            let blended =
                scoring.rule_weight * rule_score + (1.0 - scoring.rule_weight) * r.score;
            (
                blended.clamp(0.0, 100.0),
                structural.min(r.confidence),
                Some(r.score),
                Some(r.narrative),
            )
        }
        None => (
            rule_score,
            structural.min(scoring.confidence_cap_without_reasoning),
            None,
            None,
        ),
    };

    sort_findings(&mut findings);

    SafetyAssessment {
        score,
        confidence: confidence.clamp(0.0, 1.0),
        rule_score,
        reasoning_score,
        findings,
        reasoning_notes,
        extraction_status,
    }
}

/// Severity-weighted penalty over non-reasoning findings.
pub fn penalty(findings: &[SafetyFinding], scoring: &ScoringPolicy) -> f64 {
    let mut groups: BTreeMap<(RuleId, Severity), usize> = BTreeMap::new();
    for f in findings.iter().filter(|f| f.source != FindingSource::Reasoning) {
        *groups.entry((f.rule_id, f.severity)).or_default() += 1;
    }

    groups
        .into_iter()
        .map(|((_, severity), count)| {
            let weight = match severity {
                Severity::Critical => scoring.critical_weight,
                Severity::Moderate => scoring.moderate_weight,
                Severity::Informational => scoring.informational_weight,
            };
            weight * (1.0 + REPEAT_STEP * (count - 1) as f64).min(REPEAT_CAP)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::model::{CalibrationTable, TableKind};
    use crate::safety::catalog::FindingCategory;
    use crate::safety::reasoning::{ReasoningConcern, ReasoningError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed(Result<ReasoningResponse, ()>, AtomicUsize);

    impl Fixed {
        fn answering(score: f64, confidence: f64) -> Self {
            Self(
                Ok(ReasoningResponse {
                    score,
                    confidence,
                    narrative: "looks conservative".into(),
                    concerns: vec![ReasoningConcern {
                        category: FindingCategory::RichFuel,
                        severity: Severity::Critical,
                        rationale: "rich at idle".into(),
                    }],
                }),
                AtomicUsize::new(0),
            )
        }

        fn failing() -> Self {
            Self(Err(()), AtomicUsize::new(0))
        }
    }

    impl ReasoningService for Fixed {
        fn assess(&self, _: &ReasoningRequest) -> Result<ReasoningResponse, ReasoningError> {
            self.1.fetch_add(1, Ordering::SeqCst);
            self.0.clone().map_err(|_| ReasoningError::Timeout)
        }
    }

    fn table(kind: TableKind, values: Vec<Vec<f64>>) -> CalibrationTable {
        CalibrationTable {
            kind,
            name: kind.as_str().into(),
            rpm_bins: vec![2000.0],
            load_bins: Some(vec![50.0, 100.0]),
            unit: kind.canonical_unit(),
            values,
            confidence: 1.0,
            source_offset: None,
        }
    }

    fn safe_model() -> CalibrationModel {
        CalibrationModel {
            tables: vec![
                table(TableKind::Fuel, vec![vec![13.0, 12.9]]),
                table(TableKind::Ignition, vec![vec![24.0, 26.0]]),
            ],
            metadata: Default::default(),
        }
    }

    fn finding(id: RuleId, severity: Severity) -> SafetyFinding {
        SafetyFinding::structural(id, severity, FindingSource::Rules, "x", json!({}))
    }

    #[test]
    fn repeated_findings_are_diminishing_and_capped() {
        let scoring = ScoringPolicy::default();

        let one = penalty(&[finding(RuleId::RIgn02, Severity::Moderate)], &scoring);
        let three = penalty(&vec![finding(RuleId::RIgn02, Severity::Moderate); 3], &scoring);
        let many = penalty(&vec![finding(RuleId::RIgn02, Severity::Moderate); 50], &scoring);

        assert_eq!(one, 8.0);
        assert!((three - 9.6).abs() < 1e-9);
        assert_eq!(many, 16.0);
    }

    #[test]
    fn distinct_rules_add_up() {
        let scoring = ScoringPolicy::default();
        let p = penalty(
            &[
                finding(RuleId::RIgn01, Severity::Critical),
                finding(RuleId::SCov01, Severity::Informational),
            ],
            &scoring,
        );
        assert_eq!(p, 41.0);
    }

    #[test]
    fn absent_service_caps_confidence() {
        let a = analyze(
            &safe_model(),
            vec![],
            ExtractionStatus::Complete,
            None,
            &PolicyConfig::default(),
        );

        // only the missing rev limiter (informational) is reported
        assert_eq!(a.score, 99.0);
        assert_eq!(a.confidence, 0.6);
        assert!(a.reasoning_notes.is_none());
        assert!(a.reasoning_score.is_none());
    }

    #[test]
    fn service_answer_is_blended_and_intersected() {
        let service = Fixed::answering(90.0, 0.9);
        let compat = Compatibility::default();
        let a = analyze(
            &safe_model(),
            vec![],
            ExtractionStatus::Complete,
            Some(ReasoningCall {
                service: &service,
                file_hash: "h",
                compatibility: &compat,
            }),
            &PolicyConfig::default(),
        );

        assert!((a.score - (0.7 * 99.0 + 0.3 * 90.0)).abs() < 1e-9);
        assert_eq!(a.confidence, 0.9);
        assert_eq!(a.reasoning_notes.as_deref(), Some("looks conservative"));
    }

    #[test]
    fn service_concerns_are_kept_but_capped_at_moderate() {
        let service = Fixed::answering(90.0, 0.9);
        let compat = Compatibility::default();
        let a = analyze(
            &safe_model(),
            vec![],
            ExtractionStatus::Complete,
            Some(ReasoningCall {
                service: &service,
                file_hash: "h",
                compatibility: &compat,
            }),
            &PolicyConfig::default(),
        );

        let q = a
            .findings
            .iter()
            .find(|f| f.rule_id == RuleId::QReason01)
            .unwrap();
        assert_eq!(q.severity, Severity::Moderate);
        assert_eq!(q.source, FindingSource::Reasoning);
        assert_eq!(q.evidence["reported_severity"], "critical");
        assert!(!a.has_critical());
        // concerns never feed the deterministic score
        assert_eq!(a.rule_score, 99.0);
    }

    #[test]
    fn failing_service_degrades_to_rule_pass() {
        let service = Fixed::failing();
        let compat = Compatibility::default();
        let a = analyze(
            &safe_model(),
            vec![],
            ExtractionStatus::Complete,
            Some(ReasoningCall {
                service: &service,
                file_hash: "h",
                compatibility: &compat,
            }),
            &PolicyConfig::default(),
        );

        assert_eq!(service.1.load(Ordering::SeqCst), 1);
        assert_eq!(a.confidence, 0.6);
        assert!(a.reasoning_notes.is_none());
    }

    #[test]
    fn empty_model_skips_the_service() {
        let service = Fixed::answering(100.0, 1.0);
        let compat = Compatibility::default();
        let a = analyze(
            &CalibrationModel::default(),
            vec![],
            ExtractionStatus::Empty,
            Some(ReasoningCall {
                service: &service,
                file_hash: "h",
                compatibility: &compat,
            }),
            &PolicyConfig::default(),
        );

        assert_eq!(service.1.load(Ordering::SeqCst), 0);
        assert!(a.has_critical());
        assert_eq!(a.confidence, 0.0);
    }

    #[test]
    fn prior_findings_are_preserved_and_sorted() {
        let prior = vec![finding(RuleId::SFmt01, Severity::Moderate)];
        let model = CalibrationModel {
            tables: vec![table(TableKind::Fuel, vec![vec![16.0, 13.0]])],
            metadata: Default::default(),
        };
        let a = analyze(
            &model,
            prior,
            ExtractionStatus::Complete,
            None,
            &PolicyConfig::default(),
        );

        assert_eq!(a.findings[0].rule_id, RuleId::RAfr01);
        assert!(a.findings.iter().any(|f| f.rule_id == RuleId::SFmt01));
        assert_eq!(a.highest_severity(), Some(Severity::Critical));
    }
}
