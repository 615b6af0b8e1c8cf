//! Policy configuration.
//!
//! Every numeric threshold used by the safety rules and the decision engine
//! lives here. The values are product policy, not physics: operators may
//! override any of them from a TOML file. Omitted keys keep their defaults.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::decision::policy::TrustTier;
use crate::safety::catalog::FindingCategory;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PolicyConfig {
    pub fuel: FuelPolicy,
    pub ignition: IgnitionPolicy,
    pub rev_limit: RevLimitPolicy,
    pub progression: ProgressionPolicy,
    pub scoring: ScoringPolicy,
    pub decision: DecisionPolicy,
    pub reasoning: ReasoningConfig,
    /// Worker pool size for batch processing. `None` uses available cores.
    pub workers: Option<usize>,
}

/// Air-fuel-ratio bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FuelPolicy {
    pub rich_critical_afr: f64,
    pub rich_afr: f64,
    pub moderate_lean_afr: f64,
    pub critical_lean_afr: f64,
    /// Cells whose load bin is at or above this fraction of the table's
    /// maximum load count as high-load.
    pub high_load_fraction: f64,
}

impl Default for FuelPolicy {
    fn default() -> Self {
        Self {
            rich_critical_afr: 10.5,
            rich_afr: 11.5,
            moderate_lean_afr: 14.7,
            critical_lean_afr: 15.5,
            high_load_fraction: 0.75,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnitionPolicy {
    pub caution_advance_deg: f64,
    pub critical_advance_deg: f64,
}

impl Default for IgnitionPolicy {
    fn default() -> Self {
        Self {
            caution_advance_deg: 30.0,
            critical_advance_deg: 35.0,
        }
    }
}

/// Plausible mechanical envelope for rev limiters.
///
/// Distance outside the envelope is measured relative to the violated bound;
/// up to `informational_margin` is informational, up to `moderate_margin`
/// is moderate, anything further is critical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevLimitPolicy {
    pub min_rpm: f64,
    pub max_rpm: f64,
    pub informational_margin: f64,
    pub moderate_margin: f64,
}

impl Default for RevLimitPolicy {
    fn default() -> Self {
        Self {
            min_rpm: 5000.0,
            max_rpm: 15500.0,
            informational_margin: 0.03,
            moderate_margin: 0.08,
        }
    }
}

/// Maximum step between adjacent cells before a table is flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionPolicy {
    pub afr_step_tolerance: f64,
    pub advance_step_tolerance: f64,
}

impl Default for ProgressionPolicy {
    fn default() -> Self {
        Self {
            afr_step_tolerance: 1.5,
            advance_step_tolerance: 8.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringPolicy {
    pub critical_weight: f64,
    pub moderate_weight: f64,
    pub informational_weight: f64,
    /// Share of the blended score taken by the deterministic rule pass when
    /// the reasoning service answered. The service gets the remainder.
    pub rule_weight: f64,
    /// Confidence ceiling applied when the reasoning service is absent.
    pub confidence_cap_without_reasoning: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            critical_weight: 40.0,
            moderate_weight: 8.0,
            informational_weight: 1.0,
            rule_weight: 0.7,
            confidence_cap_without_reasoning: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionPolicy {
    pub approve_threshold: f64,
    pub hard_floor: f64,
    pub min_confidence: f64,
    pub tier_margins: TierTable<f64>,
    pub overrides: TierTable<Vec<FindingCategory>>,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            approve_threshold: 90.0,
            hard_floor: 40.0,
            min_confidence: 0.7,
            tier_margins: TierTable {
                unverified: 0.0,
                verified: 3.0,
                trusted: 6.0,
                partner: 10.0,
            },
            overrides: TierTable {
                unverified: vec![],
                verified: vec![],
                trusted: vec![],
                partner: vec![FindingCategory::RichFuel],
            },
        }
    }
}

impl DecisionPolicy {
    pub fn margin_for(&self, tier: TrustTier) -> f64 {
        *self.tier_margins.get(tier)
    }

    pub fn may_override(&self, tier: TrustTier, category: FindingCategory) -> bool {
        category.is_overridable() && self.overrides.get(tier).contains(&category)
    }
}

/// One value per trust tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TierTable<T> {
    pub unverified: T,
    pub verified: T,
    pub trusted: T,
    pub partner: T,
}

impl<T> TierTable<T> {
    pub fn get(&self, tier: TrustTier) -> &T {
        match tier {
            TrustTier::Unverified => &self.unverified,
            TrustTier::Verified => &self.verified,
            TrustTier::Trusted => &self.trusted,
            TrustTier::Partner => &self.partner,
        }
    }

    fn iter(&self) -> impl Iterator<Item = (TrustTier, &T)> {
        TrustTier::ALL.into_iter().map(move |t| (t, self.get(t)))
    }
}

/// External reasoning service endpoint. No endpoint means the qualitative
/// pass is skipped and every assessment is rule-pass only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 10_000,
            connect_timeout_ms: 3_000,
        }
    }
}

impl PolicyConfig {
    /// Load and validate a TOML policy file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read policy config: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("invalid policy config: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PolicyConfig = toml::from_str(content).context("failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations whose thresholds contradict each other.
    pub fn validate(&self) -> Result<()> {
        let f = &self.fuel;
        if !(f.rich_critical_afr <= f.rich_afr
            && f.rich_afr < f.moderate_lean_afr
            && f.moderate_lean_afr <= f.critical_lean_afr)
        {
            bail!(
                "fuel bands must satisfy rich_critical <= rich < moderate_lean <= critical_lean"
            );
        }
        if !(0.0..=1.0).contains(&f.high_load_fraction) {
            bail!("fuel.high_load_fraction must be within [0, 1]");
        }

        let i = &self.ignition;
        if i.caution_advance_deg > i.critical_advance_deg {
            bail!("ignition.caution_advance_deg must not exceed critical_advance_deg");
        }

        let r = &self.rev_limit;
        if r.min_rpm >= r.max_rpm {
            bail!("rev_limit.min_rpm must be below max_rpm");
        }
        if r.informational_margin > r.moderate_margin {
            bail!("rev_limit.informational_margin must not exceed moderate_margin");
        }

        let s = &self.scoring;
        if !(0.0..=1.0).contains(&s.rule_weight) {
            bail!("scoring.rule_weight must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&s.confidence_cap_without_reasoning) {
            bail!("scoring.confidence_cap_without_reasoning must be within [0, 1]");
        }

        let d = &self.decision;
        if d.hard_floor >= d.approve_threshold {
            bail!("decision.hard_floor must be below approve_threshold");
        }
        for (tier, margin) in d.tier_margins.iter() {
            if *margin < 0.0 || d.approve_threshold - margin <= d.hard_floor {
                bail!("decision.tier_margins.{tier} would move approval to or below the hard floor");
            }
        }
        for (tier, categories) in d.overrides.iter() {
            if let Some(c) = categories.iter().find(|c| !c.is_overridable()) {
                bail!("decision.overrides.{tier} lists {c}, which is never overridable");
            }
        }

        if self.reasoning.timeout_ms == 0 {
            bail!("reasoning.timeout_ms must be positive");
        }
        if self.workers == Some(0) {
            bail!("workers must be positive when set");
        }

        Ok(())
    }
}
