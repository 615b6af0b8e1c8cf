use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of calibration table. Ordering is used for deterministic output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Fuel,
    Ignition,
    RevLimiter,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableKind::Fuel => "fuel",
            TableKind::Ignition => "ignition",
            TableKind::RevLimiter => "rev_limiter",
        }
    }

    /// The canonical unit tables of this kind are normalized to.
    pub fn canonical_unit(&self) -> Unit {
        match self {
            TableKind::Fuel => Unit::Afr,
            TableKind::Ignition => Unit::DegreesAdvance,
            TableKind::RevLimiter => Unit::Rpm,
        }
    }
}

/// Canonical value units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Afr,
    DegreesAdvance,
    Rpm,
}

impl Unit {
    /// Physically plausible value range. Values outside are kept, not
    /// clamped, and reported as a corruption signal.
    pub fn plausible_range(&self) -> (f64, f64) {
        match self {
            Unit::Afr => (6.0, 25.0),
            Unit::DegreesAdvance => (-20.0, 70.0),
            Unit::Rpm => (500.0, 25_000.0),
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Afr => "AFR",
            Unit::DegreesAdvance => "deg",
            Unit::Rpm => "rpm",
        }
    }
}

/// A typed table in canonical units.
///
/// With a load axis, `values` has one row per RPM bin and one column per
/// load bin. Without one, `values` is a single row: either aligned to
/// `rpm_bins` or, when `rpm_bins` is empty, a list of scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTable {
    pub kind: TableKind,
    pub name: String,
    pub rpm_bins: Vec<f64>,
    pub load_bins: Option<Vec<f64>>,
    pub values: Vec<Vec<f64>>,
    pub unit: Unit,
    /// Extraction confidence in [0, 1].
    pub confidence: f64,
    /// Byte offset in the unwrapped payload, for pattern-located tables.
    pub source_offset: Option<usize>,
}

impl CalibrationTable {
    /// Checks the matrix-dimension invariant.
    pub fn dimensions_valid(&self) -> bool {
        match &self.load_bins {
            Some(load) => {
                !self.rpm_bins.is_empty()
                    && !load.is_empty()
                    && self.values.len() == self.rpm_bins.len()
                    && self.values.iter().all(|row| row.len() == load.len())
            }
            None => {
                self.values.len() == 1
                    && !self.values[0].is_empty()
                    && (self.rpm_bins.is_empty() || self.values[0].len() == self.rpm_bins.len())
            }
        }
    }

    pub fn all_finite(&self) -> bool {
        self.rpm_bins.iter().all(|v| v.is_finite())
            && self
                .load_bins
                .iter()
                .flatten()
                .all(|v| v.is_finite())
            && self.values.iter().flatten().all(|v| v.is_finite())
    }

    /// Every cell as `(row, column, value)`, row-major.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.values
            .iter()
            .enumerate()
            .flat_map(|(r, row)| row.iter().enumerate().map(move |(c, v)| (r, c, *v)))
    }

    pub fn cell_count(&self) -> usize {
        self.values.iter().map(Vec::len).sum()
    }

    /// Values outside the unit's plausible range.
    pub fn implausible_cells(&self) -> usize {
        let (lo, hi) = self.unit.plausible_range();
        self.values
            .iter()
            .flatten()
            .filter(|v| **v < lo || **v > hi)
            .count()
    }

    /// Human-readable coordinate for the cell at `(row, col)`.
    pub fn describe_cell(&self, row: usize, col: usize) -> String {
        match &self.load_bins {
            Some(load) => format!(
                "rpm {} / load {}",
                fmt_num(self.rpm_bins[row]),
                fmt_num(load[col])
            ),
            None if !self.rpm_bins.is_empty() => format!("rpm {}", fmt_num(self.rpm_bins[col])),
            None => format!("entry {col}"),
        }
    }
}

/// Best-effort engine/ECU metadata. Never gates extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineMetadata {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    /// Additional key/value metadata declared by text formats.
    pub extra: BTreeMap<String, String>,
}

/// Normalized output of extraction; the only artifact handed to the analyzer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationModel {
    pub tables: Vec<CalibrationTable>,
    pub metadata: EngineMetadata,
}

impl CalibrationModel {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn tables_of(&self, kind: TableKind) -> impl Iterator<Item = &CalibrationTable> {
        self.tables.iter().filter(move |t| t.kind == kind)
    }

    pub fn has_kind(&self, kind: TableKind) -> bool {
        self.tables_of(kind).next().is_some()
    }
}

pub(crate) fn fmt_num(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e9 {
        format!("{}", v as i64)
    } else {
        format!("{v:.2}")
    }
}
