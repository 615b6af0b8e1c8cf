//! Deterministic rule pass over a `CalibrationModel`.
//!
//! Always runs and needs nothing beyond the model and the policy. Cell rules
//! emit one finding per offending cell, in table order then row-major cell
//! order, so the output is a pure function of the model.
//!
//!   - R-AFR-01  fuel cell above the critical-lean cutoff        critical
//!   - R-AFR-02  high-load fuel cell above the moderate-lean cutoff  moderate
//!   - R-AFR-03  fuel cell below the rich cutoff                 moderate
//!   - R-AFR-04  fuel cell below the critical-rich cutoff        critical
//!   - R-IGN-01  advance above the critical cutoff               critical
//!   - R-IGN-02  advance above the caution cutoff                moderate
//!   - R-REV-01  rev limit outside the envelope, scaled by distance
//!   - S-PROG-01 adjacent-cell jump beyond tolerance (one per table)
//!   - S-COV-01  required table kind missing

use serde_json::json;

use crate::calibration::model::{CalibrationModel, CalibrationTable, TableKind, fmt_num};
use crate::config::{FuelPolicy, IgnitionPolicy, PolicyConfig, ProgressionPolicy, RevLimitPolicy};
use crate::safety::catalog::{FindingCategory, FindingSource, RuleId, SafetyFinding, Severity};

/// Table kinds without which an assessment is structurally incomplete.
pub const REQUIRED_KINDS: [TableKind; 2] = [TableKind::Fuel, TableKind::Ignition];

/// Output of the deterministic pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RulePass {
    pub findings: Vec<SafetyFinding>,
    /// Mean extraction confidence of the model's tables.
    pub extraction_confidence: f64,
    /// Share of `REQUIRED_KINDS` present in the model.
    pub completeness: f64,
}

impl RulePass {
    /// Structural confidence: extraction confidence × completeness.
    pub fn confidence(&self) -> f64 {
        self.extraction_confidence * self.completeness
    }
}

pub fn evaluate(model: &CalibrationModel, policy: &PolicyConfig) -> RulePass {
    let mut findings = Vec::new();

    for table in &model.tables {
        match table.kind {
            TableKind::Fuel => fuel_cells(table, &policy.fuel, &mut findings),
            TableKind::Ignition => ignition_cells(table, &policy.ignition, &mut findings),
            TableKind::RevLimiter => rev_limits(table, &policy.rev_limit, &mut findings),
        }
        if let Some(f) = progression(table, &policy.progression) {
            findings.push(f);
        }
    }

    coverage(model, &mut findings);

    let extraction_confidence = if model.is_empty() {
        0.0
    } else {
        model.tables.iter().map(|t| t.confidence).sum::<f64>() / model.tables.len() as f64
    };
    let present = REQUIRED_KINDS.iter().filter(|k| model.has_kind(**k)).count();

    RulePass {
        findings,
        extraction_confidence,
        completeness: present as f64 / REQUIRED_KINDS.len() as f64,
    }
}

fn fuel_cells(table: &CalibrationTable, p: &FuelPolicy, out: &mut Vec<SafetyFinding>) {
    let high_load_from = table
        .load_bins
        .as_ref()
        .and_then(|load| load.iter().copied().reduce(f64::max))
        .map(|max| max * p.high_load_fraction);

    for (row, col, afr) in table.cells() {
        let high_load = match (high_load_from, &table.load_bins) {
            (Some(from), Some(load)) => load[col] >= from,
            _ => false,
        };

        use FindingCategory::{LeanFuel, RichFuel};
        use Severity::{Critical, Moderate};

        let hit = if afr > p.critical_lean_afr {
            CellHit::new(RuleId::RAfr01, LeanFuel, Critical, "critical-lean cutoff", p.critical_lean_afr)
        } else if afr > p.moderate_lean_afr && high_load {
            CellHit::new(RuleId::RAfr02, LeanFuel, Moderate, "high-load lean cutoff", p.moderate_lean_afr)
        } else if afr < p.rich_critical_afr {
            CellHit::new(RuleId::RAfr04, RichFuel, Critical, "critical-rich cutoff", p.rich_critical_afr)
        } else if afr < p.rich_afr {
            CellHit::new(RuleId::RAfr03, RichFuel, Moderate, "rich cutoff", p.rich_afr)
        } else {
            continue;
        };

        out.push(hit.finding(table, row, col, afr));
    }
}

fn ignition_cells(table: &CalibrationTable, p: &IgnitionPolicy, out: &mut Vec<SafetyFinding>) {
    use FindingCategory::ExcessiveAdvance;

    for (row, col, deg) in table.cells() {
        let hit = if deg > p.critical_advance_deg {
            CellHit::new(
                RuleId::RIgn01,
                ExcessiveAdvance,
                Severity::Critical,
                "critical advance cutoff",
                p.critical_advance_deg,
            )
        } else if deg > p.caution_advance_deg {
            CellHit::new(
                RuleId::RIgn02,
                ExcessiveAdvance,
                Severity::Moderate,
                "caution advance cutoff",
                p.caution_advance_deg,
            )
        } else {
            continue;
        };

        out.push(hit.finding(table, row, col, deg));
    }
}

/// A cell threshold that was crossed.
#[derive(Debug, Clone, Copy)]
struct CellHit {
    rule_id: RuleId,
    category: FindingCategory,
    severity: Severity,
    label: &'static str,
    limit: f64,
}

impl CellHit {
    const fn new(
        rule_id: RuleId,
        category: FindingCategory,
        severity: Severity,
        label: &'static str,
        limit: f64,
    ) -> Self {
        Self {
            rule_id,
            category,
            severity,
            label,
            limit,
        }
    }

    fn finding(self, table: &CalibrationTable, row: usize, col: usize, value: f64) -> SafetyFinding {
        let symbol = table.unit.symbol();
        let CellHit {
            rule_id,
            category,
            severity,
            label,
            limit,
        } = self;
        SafetyFinding::new(
            rule_id,
            category,
            severity,
            FindingSource::Rules,
            format!(
                "{} table '{}' at {}: {} {symbol} is beyond the {label} of {} {symbol}",
                table.kind.as_str(),
                table.name,
                table.describe_cell(row, col),
                fmt_num(value),
                fmt_num(limit)
            ),
            json!({
                "table": table.name,
                "row": row,
                "column": col,
                "value": value,
                "limit": limit,
            }),
        )
    }
}

/// Severity scales with the relative distance outside the envelope.
fn rev_limits(table: &CalibrationTable, p: &RevLimitPolicy, out: &mut Vec<SafetyFinding>) {
    for (row, col, rpm) in table.cells() {
        let (bound, distance, side) = if rpm < p.min_rpm {
            (p.min_rpm, (p.min_rpm - rpm) / p.min_rpm, "below")
        } else if rpm > p.max_rpm {
            (p.max_rpm, (rpm - p.max_rpm) / p.max_rpm, "above")
        } else {
            continue;
        };

        let severity = if distance <= p.informational_margin {
            Severity::Informational
        } else if distance <= p.moderate_margin {
            Severity::Moderate
        } else {
            Severity::Critical
        };

        out.push(SafetyFinding::new(
            RuleId::RRev01,
            FindingCategory::RevLimitOutOfRange,
            severity,
            FindingSource::Rules,
            format!(
                "rev limit '{}' at {}: {} rpm is {:.1}% {side} the {}..{} rpm envelope",
                table.name,
                table.describe_cell(row, col),
                fmt_num(rpm),
                distance * 100.0,
                fmt_num(p.min_rpm),
                fmt_num(p.max_rpm)
            ),
            json!({
                "table": table.name,
                "row": row,
                "column": col,
                "value": rpm,
                "bound": bound,
                "relative_distance": distance,
            }),
        ));
    }
}

/// Largest adjacent-cell step along either axis, if it exceeds tolerance.
fn progression(table: &CalibrationTable, p: &ProgressionPolicy) -> Option<SafetyFinding> {
    let tolerance = match table.kind {
        TableKind::Fuel => p.afr_step_tolerance,
        TableKind::Ignition => p.advance_step_tolerance,
        TableKind::RevLimiter => return None,
    };

    let along_rows = table.values.iter().enumerate().flat_map(|(r, row)| {
        row.windows(2)
            .enumerate()
            .map(move |(c, w)| ((r, c), (r, c + 1), (w[1] - w[0]).abs()))
    });
    let along_cols = table.values.windows(2).enumerate().flat_map(|(r, rows)| {
        rows[0]
            .iter()
            .zip(&rows[1])
            .enumerate()
            .map(move |(c, (a, b))| ((r, c), (r + 1, c), (b - a).abs()))
    });

    let jumps: Vec<_> = along_rows
        .chain(along_cols)
        .filter(|(_, _, step)| *step > tolerance)
        .collect();
    let worst = jumps
        .iter()
        .copied()
        .reduce(|a, b| if b.2 > a.2 { b } else { a })?;

    let ((r0, c0), (r1, c1), step) = worst;
    Some(SafetyFinding::structural(
        RuleId::SProg01,
        Severity::Moderate,
        FindingSource::Rules,
        format!(
            "{} table '{}' has {} abrupt step(s) beyond {} {}; largest is {} between {} and {}",
            table.kind.as_str(),
            table.name,
            jumps.len(),
            fmt_num(tolerance),
            table.unit.symbol(),
            fmt_num(step),
            table.describe_cell(r0, c0),
            table.describe_cell(r1, c1)
        ),
        json!({
            "table": table.name,
            "jumps": jumps.len(),
            "largest_step": step,
            "tolerance": tolerance,
        }),
    ))
}

fn coverage(model: &CalibrationModel, out: &mut Vec<SafetyFinding>) {
    if model.is_empty() {
        out.push(SafetyFinding::structural(
            RuleId::SCov01,
            Severity::Critical,
            FindingSource::Rules,
            "calibration model contains no tables to assess",
            json!({ "tables": 0 }),
        ));
        return;
    }

    for kind in [TableKind::Fuel, TableKind::Ignition, TableKind::RevLimiter] {
        if model.has_kind(kind) {
            continue;
        }
        let severity = if REQUIRED_KINDS.contains(&kind) {
            Severity::Moderate
        } else {
            Severity::Informational
        };
        out.push(SafetyFinding::structural(
            RuleId::SCov01,
            severity,
            FindingSource::Rules,
            format!("no {} table was located", kind.as_str()),
            json!({ "missing": kind }),
        ));
    }
}
