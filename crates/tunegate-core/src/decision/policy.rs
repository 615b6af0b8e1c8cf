//! Decision engine.
//!
//! Derives the final `UploadDecision` from a `SafetyAssessment` and the
//! submitter's trust tier. The policy is a pure function of
//! (assessment, tier, policy config) and is evaluated in a fixed order:
//!
//!   1. Critical lean-fuel / rev-limit finding       → BLOCK (never overridable)
//!   2. Extraction degraded                          → MANUAL_REVIEW
//!   3. Other critical finding                       → BLOCK, or MANUAL_REVIEW
//!                                                     when the tier may override
//!                                                     every such category
//!   4. Score ≤ hard floor                           → BLOCK
//!   5. Score ≥ threshold − tier margin
//!      and confidence ≥ floor                       → APPROVE
//!   6. Otherwise                                    → MANUAL_REVIEW
//!
//! Trust tiers only move the approve threshold and unlock overrides, and an
//! overridden critical lands in manual review at best. Identical data can
//! therefore differ by tier only across the approve/manual-review boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::DecisionPolicy;
use crate::extract::ExtractionStatus;
use crate::safety::assess::SafetyAssessment;
use crate::safety::catalog::{FindingCategory, SafetyFinding};

/// Submitter reputation, supplied by the marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrustTier {
    Unverified,
    Verified,
    Trusted,
    Partner,
}

impl TrustTier {
    pub const ALL: [TrustTier; 4] = [
        TrustTier::Unverified,
        TrustTier::Verified,
        TrustTier::Trusted,
        TrustTier::Partner,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrustTier::Unverified => "unverified",
            TrustTier::Verified => "verified",
            TrustTier::Trusted => "trusted",
            TrustTier::Partner => "partner",
        }
    }
}

impl fmt::Display for TrustTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionOutcome {
    Approve,
    ManualReview,
    Block,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionOutcome::Approve => "approve",
            DecisionOutcome::ManualReview => "manual-review",
            DecisionOutcome::Block => "block",
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            DecisionOutcome::Approve => 0,
            DecisionOutcome::ManualReview => 1,
            DecisionOutcome::Block => 2,
        }
    }
}

impl fmt::Display for DecisionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only artifact handed to external collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadDecision {
    pub outcome: DecisionOutcome,
    pub trust_tier: TrustTier,
    /// Why the upload was not approved. `None` for approvals.
    pub reason: Option<String>,
    pub assessment: SafetyAssessment,
}

pub fn decide(assessment: SafetyAssessment, tier: TrustTier, policy: &DecisionPolicy) -> UploadDecision {
    let (outcome, reason) = evaluate(&assessment, tier, policy);

    tracing::debug!(
        outcome = %outcome,
        tier = %tier,
        score = assessment.score,
        confidence = assessment.confidence,
        "decision reached"
    );

    UploadDecision {
        outcome,
        trust_tier: tier,
        reason,
        assessment,
    }
}

fn evaluate(
    a: &SafetyAssessment,
    tier: TrustTier,
    policy: &DecisionPolicy,
) -> (DecisionOutcome, Option<String>) {
    let criticals: Vec<&SafetyFinding> = a.findings.iter().filter(|f| f.is_critical()).collect();

    if let Some(f) = criticals.iter().find(|f| !f.category.is_overridable()) {
        return block(format!(
            "critical {} finding {} is never overridable: {}",
            f.category, f.rule_id, f.rationale
        ));
    }

    if a.extraction_status == ExtractionStatus::Degraded {
        let detail = criticals
            .first()
            .map(|f| f.rationale.as_str())
            .unwrap_or("payload could not be read as its declared format");
        return review(format!("extraction degraded: {detail}"));
    }

    if !criticals.is_empty() {
        if let Some(f) = criticals
            .iter()
            .find(|f| !policy.may_override(tier, f.category))
        {
            return block(format!(
                "critical {} finding {}: {}",
                f.category, f.rule_id, f.rationale
            ));
        }
        let mut overridden: Vec<FindingCategory> = criticals.iter().map(|f| f.category).collect();
        overridden.sort();
        overridden.dedup();
        let names: Vec<&str> = overridden.iter().map(FindingCategory::as_str).collect();
        return review(format!(
            "critical {} finding(s) overridden for {tier} submitter; review required",
            names.join(", ")
        ));
    }

    if a.score <= policy.hard_floor {
        return block(format!(
            "safety score {:.1} is at or below the hard floor of {:.1}",
            a.score, policy.hard_floor
        ));
    }

    let threshold = policy.approve_threshold - policy.margin_for(tier);
    let score_ok = a.score >= threshold;
    let confidence_ok = a.confidence >= policy.min_confidence;

    match (score_ok, confidence_ok) {
        (true, true) => (DecisionOutcome::Approve, None),
        (false, _) => review(format!(
            "safety score {:.1} is below the {tier} approve threshold of {:.1}",
            a.score, threshold
        )),
        (true, false) => review(format!(
            "confidence {:.2} is below the floor of {:.2}",
            a.confidence, policy.min_confidence
        )),
    }
}

fn block(reason: String) -> (DecisionOutcome, Option<String>) {
    (DecisionOutcome::Block, Some(reason))
}

fn review(reason: String) -> (DecisionOutcome, Option<String>) {
    (DecisionOutcome::ManualReview, Some(reason))
}
