//! Raw tables → canonical `CalibrationModel`.
//!
//! Responsibilities:
//! - Convert source units to the canonical unit of each table kind
//! - Re-validate the dimension and finiteness invariants, dropping violators
//!   and marking the output degraded
//! - Report (never clamp) values outside the plausible physical range
//! - Resolve overlapping tables of the same kind by extraction confidence
//!
//! Two tables overlap when they share kind and both axes, i.e. they describe
//! the same operating points. Tables of one kind over different axes are all
//! kept, so every located table still reaches the rule pass.

use serde_json::json;

use crate::calibration::model::{
    CalibrationModel, CalibrationTable, EngineMetadata, TableKind, fmt_num,
};
use crate::extract::{RawTable, RawUnit};
use crate::safety::catalog::{FindingSource, RuleId, SafetyFinding, Severity};
use crate::util::deterministic::sort_tables;

/// Stoichiometric AFR of gasoline, used to convert lambda.
pub const STOICH_AFR: f64 = 14.7;

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub model: CalibrationModel,
    pub findings: Vec<SafetyFinding>,
    /// At least one located table was dropped.
    pub degraded: bool,
}

pub fn normalize(raw: Vec<RawTable>, metadata: EngineMetadata) -> Normalized {
    let mut findings = Vec::new();
    let mut kept: Vec<CalibrationTable> = Vec::with_capacity(raw.len());
    let mut degraded = false;

    for table in raw {
        let Some(table) = canonicalize(table, &mut findings) else {
            degraded = true;
            continue;
        };

        let implausible = table.implausible_cells();
        if implausible > 0 {
            let (lo, hi) = table.unit.plausible_range();
            findings.push(SafetyFinding::structural(
                RuleId::SNorm02,
                Severity::Moderate,
                FindingSource::Normalizer,
                format!(
                    "{} table '{}' has {implausible} of {} values outside {}..{} {}",
                    table.kind.as_str(),
                    table.name,
                    table.cell_count(),
                    fmt_num(lo),
                    fmt_num(hi),
                    table.unit.symbol()
                ),
                json!({ "table": table.name, "implausible_cells": implausible }),
            ));
        }

        match kept.iter().position(|k| overlaps(k, &table)) {
            Some(idx) => {
                let (winner, loser) = if table.confidence > kept[idx].confidence {
                    (table, kept[idx].clone())
                } else {
                    (kept[idx].clone(), table)
                };
                findings.push(SafetyFinding::structural(
                    RuleId::SNorm03,
                    Severity::Informational,
                    FindingSource::Normalizer,
                    format!(
                        "{} table '{}' (confidence {:.2}) overlaps '{}' (confidence {:.2}) and was discarded",
                        loser.kind.as_str(),
                        loser.name,
                        loser.confidence,
                        winner.name,
                        winner.confidence
                    ),
                    json!({ "kept": winner.name, "discarded": loser.name }),
                ));
                kept[idx] = winner;
            }
            None => kept.push(table),
        }
    }

    sort_tables(&mut kept);

    tracing::debug!(
        tables = kept.len(),
        findings = findings.len(),
        degraded,
        "normalization finished"
    );

    Normalized {
        model: CalibrationModel {
            tables: kept,
            metadata,
        },
        findings,
        degraded,
    }
}

/// Unit conversion plus invariant checks. `None` means dropped.
fn canonicalize(raw: RawTable, findings: &mut Vec<SafetyFinding>) -> Option<CalibrationTable> {
    let unit = raw.kind.canonical_unit();

    let Some(value_factor) = value_factor(raw.kind, raw.value_unit) else {
        findings.push(dropped(
            &raw.name,
            raw.kind,
            format!("unit {:?} is not valid for a {} table", raw.value_unit, raw.kind.as_str()),
        ));
        return None;
    };
    let rpm_factor = match raw.rpm_unit {
        RawUnit::Rpm => 1.0,
        RawUnit::Krpm => 1000.0,
        other => {
            findings.push(dropped(
                &raw.name,
                raw.kind,
                format!("engine-speed axis unit {other:?} is not an RPM unit"),
            ));
            return None;
        }
    };

    let table = CalibrationTable {
        kind: raw.kind,
        rpm_bins: scale(raw.rpm_bins, rpm_factor),
        load_bins: raw.load_bins,
        values: raw
            .values
            .into_iter()
            .map(|row| scale(row, value_factor))
            .collect(),
        unit,
        confidence: raw.confidence.clamp(0.0, 1.0),
        source_offset: raw.source_offset,
        name: raw.name,
    };

    if !table.dimensions_valid() {
        let shape: Vec<usize> = table.values.iter().map(Vec::len).collect();
        findings.push(dropped(
            &table.name,
            table.kind,
            format!(
                "value matrix rows {:?} do not match {} rpm bins x {} load bins",
                shape,
                table.rpm_bins.len(),
                table.load_bins.as_ref().map_or(0, Vec::len)
            ),
        ));
        return None;
    }
    if !table.all_finite() {
        findings.push(dropped(
            &table.name,
            table.kind,
            "axes or values contain non-finite numbers".to_string(),
        ));
        return None;
    }

    Some(table)
}

fn value_factor(kind: TableKind, unit: RawUnit) -> Option<f64> {
    match (kind, unit) {
        (TableKind::Fuel, RawUnit::Afr) => Some(1.0),
        (TableKind::Fuel, RawUnit::Lambda) => Some(STOICH_AFR),
        (TableKind::Ignition, RawUnit::Degrees) => Some(1.0),
        (TableKind::RevLimiter, RawUnit::Rpm) => Some(1.0),
        (TableKind::RevLimiter, RawUnit::Krpm) => Some(1000.0),
        _ => None,
    }
}

fn scale(values: Vec<f64>, factor: f64) -> Vec<f64> {
    values.into_iter().map(|v| v * factor).collect()
}

fn overlaps(a: &CalibrationTable, b: &CalibrationTable) -> bool {
    a.kind == b.kind && a.rpm_bins == b.rpm_bins && a.load_bins == b.load_bins
}

fn dropped(name: &str, kind: TableKind, reason: String) -> SafetyFinding {
    SafetyFinding::structural(
        RuleId::SNorm01,
        Severity::Critical,
        FindingSource::Normalizer,
        format!("{} table '{name}' dropped: {reason}", kind.as_str()),
        json!({ "table": name, "kind": kind }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::model::Unit;

    fn raw(kind: TableKind, values: Vec<Vec<f64>>, unit: RawUnit, confidence: f64) -> RawTable {
        RawTable {
            kind,
            name: format!("{}_t", kind.as_str()),
            rpm_bins: vec![2000.0, 4000.0],
            rpm_unit: RawUnit::Rpm,
            load_bins: Some(vec![20.0, 80.0]),
            values,
            value_unit: unit,
            confidence,
            source_offset: None,
        }
    }

    fn fuel(confidence: f64) -> RawTable {
        raw(
            TableKind::Fuel,
            vec![vec![13.1, 12.9], vec![13.0, 12.8]],
            RawUnit::Afr,
            confidence,
        )
    }

    #[test]
    fn canonical_tables_pass_through_exactly() {
        let input = fuel(1.0);
        let out = normalize(vec![input.clone()], EngineMetadata::default());

        assert!(out.findings.is_empty());
        assert!(!out.degraded);
        let t = &out.model.tables[0];
        assert_eq!(t.rpm_bins, input.rpm_bins);
        assert_eq!(t.load_bins, input.load_bins);
        assert_eq!(t.values, input.values);
        assert_eq!(t.unit, Unit::Afr);
    }

    #[test]
    fn lambda_and_krpm_are_converted() {
        let mut t = raw(
            TableKind::Fuel,
            vec![vec![1.0, 0.9], vec![0.88, 0.86]],
            RawUnit::Lambda,
            1.0,
        );
        t.rpm_bins = vec![2.0, 4.5];
        t.rpm_unit = RawUnit::Krpm;

        let out = normalize(vec![t], EngineMetadata::default());
        let t = &out.model.tables[0];
        assert_eq!(t.rpm_bins, vec![2000.0, 4500.0]);
        assert!((t.values[0][0] - 14.7).abs() < 1e-9);
        assert!((t.values[1][1] - 0.86 * 14.7).abs() < 1e-9);
    }

    #[test]
    fn ragged_table_is_dropped_with_finding() {
        let t = raw(
            TableKind::Ignition,
            vec![vec![20.0, 22.0], vec![24.0]],
            RawUnit::Degrees,
            1.0,
        );
        let out = normalize(vec![t], EngineMetadata::default());

        assert!(out.model.is_empty());
        assert!(out.degraded);
        assert_eq!(out.findings.len(), 1);
        assert_eq!(out.findings[0].rule_id, RuleId::SNorm01);
        assert_eq!(out.findings[0].severity, Severity::Critical);
    }

    #[test]
    fn non_finite_table_is_dropped() {
        let t = raw(
            TableKind::Fuel,
            vec![vec![13.0, f64::INFINITY], vec![13.0, 13.0]],
            RawUnit::Afr,
            1.0,
        );
        let out = normalize(vec![t], EngineMetadata::default());
        assert!(out.model.is_empty());
        assert!(out.degraded);
        assert_eq!(out.findings[0].rule_id, RuleId::SNorm01);
        assert_eq!(out.findings[0].severity, Severity::Critical);
    }

    #[test]
    fn dropped_table_degrades_even_beside_a_clean_one() {
        let clean = fuel(1.0);
        let mut hidden = raw(
            TableKind::Fuel,
            vec![vec![16.5, f64::NAN], vec![17.0, 17.2]],
            RawUnit::Afr,
            1.0,
        );
        hidden.name = "hidden".into();
        hidden.rpm_bins = vec![6000.0, 8000.0];

        let out = normalize(vec![clean, hidden], EngineMetadata::default());

        assert_eq!(out.model.tables.len(), 1);
        assert!(out.degraded);
        let f = &out.findings[0];
        assert_eq!(f.rule_id, RuleId::SNorm01);
        assert_eq!(f.severity, Severity::Critical);
        assert!(f.rationale.contains("'hidden'"));
    }

    #[test]
    fn mismatched_unit_is_dropped() {
        let t = raw(
            TableKind::Ignition,
            vec![vec![20.0, 22.0], vec![24.0, 26.0]],
            RawUnit::Afr,
            1.0,
        );
        let out = normalize(vec![t], EngineMetadata::default());
        assert!(out.model.is_empty());
        assert!(out.findings[0].rationale.contains("not valid"));
    }

    #[test]
    fn implausible_values_are_kept_and_reported() {
        let t = raw(
            TableKind::Fuel,
            vec![vec![13.0, 40.0], vec![13.0, 13.0]],
            RawUnit::Afr,
            1.0,
        );
        let out = normalize(vec![t], EngineMetadata::default());

        assert_eq!(out.model.tables[0].values[0][1], 40.0);
        assert_eq!(out.findings[0].rule_id, RuleId::SNorm02);
        assert!(!out.degraded);
    }

    #[test]
    fn overlapping_tables_keep_higher_confidence() {
        let mut low = fuel(0.55);
        low.name = "low".into();
        let mut high = fuel(0.75);
        high.name = "high".into();

        let out = normalize(vec![low, high], EngineMetadata::default());

        assert_eq!(out.model.tables.len(), 1);
        assert_eq!(out.model.tables[0].name, "high");
        assert_eq!(out.findings[0].rule_id, RuleId::SNorm03);
        assert_eq!(out.findings[0].severity, Severity::Informational);
    }

    #[test]
    fn overlap_tie_keeps_first_seen() {
        let mut a = fuel(0.6);
        a.name = "a".into();
        let mut b = fuel(0.6);
        b.name = "b".into();

        let out = normalize(vec![a, b], EngineMetadata::default());
        assert_eq!(out.model.tables[0].name, "a");
    }

    #[test]
    fn same_kind_over_different_axes_is_kept() {
        let a = fuel(1.0);
        let mut b = fuel(1.0);
        b.rpm_bins = vec![6000.0, 8000.0];

        let out = normalize(vec![a, b], EngineMetadata::default());
        assert_eq!(out.model.tables.len(), 2);
        assert!(out.findings.is_empty());
    }

    #[test]
    fn output_is_ordered_by_kind() {
        let ign = raw(
            TableKind::Ignition,
            vec![vec![20.0, 22.0], vec![24.0, 26.0]],
            RawUnit::Degrees,
            1.0,
        );
        let out = normalize(vec![ign, fuel(1.0)], EngineMetadata::default());
        assert_eq!(out.model.tables[0].kind, TableKind::Fuel);
        assert_eq!(out.model.tables[1].kind, TableKind::Ignition);
    }
}
