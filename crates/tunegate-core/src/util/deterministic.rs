//! Deterministic ordering helpers.
//!
//! These utilities enforce the stable ordering guarantees of the report
//! contract: identical inputs always produce identical outputs.

use std::cmp::Ordering;

use crate::calibration::model::CalibrationTable;
use crate::safety::catalog::SafetyFinding;

/// Sort findings by severity (most severe first), then rule id.
///
/// The sort is stable, so findings sharing a key keep their emission order,
/// which is itself deterministic (table order, then row-major cell order).
pub fn sort_findings(findings: &mut [SafetyFinding]) {
    findings.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.rule_id.cmp(&b.rule_id))
    });
}

/// Sort tables by kind, then by descending confidence, then by source offset.
pub fn sort_tables(tables: &mut [CalibrationTable]) {
    tables.sort_by(|a, b| {
        a.kind
            .cmp(&b.kind)
            .then_with(|| cmp_f64_desc(a.confidence, b.confidence))
            .then_with(|| a.source_offset.cmp(&b.source_offset))
    });
}

fn cmp_f64_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}
