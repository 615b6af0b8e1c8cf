//! Pattern-based table location for images without a schema.
//!
//! A table is recognized as an engine-speed axis of u16 values, directly
//! followed by a load axis of u16 values, directly followed by one u8 cell
//! per (rpm, load) pair. Axis lengths must be one of the canonical sizes.
//! Cells are classified by their value profile:
//!
//!   - fuel:     raw / 10 = AFR,      all within [9, 20], mean ≥ 10.5
//!   - ignition: raw / 2  = degrees,  all within [0, 60]
//!
//! Rev limiters are short runs of identical u16 values inside the RPM
//! envelope (one per gear). Every result carries a confidence below the
//! schema-based formats, scaled by how regular its axes are.

use crate::calibration::model::TableKind;
use crate::extract::{ExtractionStrategy, RawTable, RawUnit, StrategyOutput, TextFormatError};

/// Canonical axis lengths, largest first.
pub const CANONICAL_AXIS_SIZES: [usize; 5] = [16, 12, 10, 8, 6];

const MAX_AXIS: usize = 16;

const RPM_AXIS_RANGE: (u16, u16) = (500, 20_000);
const RPM_AXIS_MIN_STEP: u16 = 50;
const LOAD_AXIS_MAX: u16 = 400;

const FUEL_RAW_RANGE: (u8, u8) = (90, 200);
const FUEL_RAW_MIN_MEAN: f64 = 105.0;
const IGNITION_RAW_MAX: u8 = 120;

const REV_RANGE: (u16, u16) = (4_000, 20_000);
const REV_RUN: (usize, usize) = (3, 8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    fn read_u16(&self, bytes: &[u8], at: usize) -> Option<u16> {
        let pair: [u8; 2] = bytes.get(at..at + 2)?.try_into().ok()?;
        Some(match self {
            Endian::Little => u16::from_le_bytes(pair),
            Endian::Big => u16::from_be_bytes(pair),
        })
    }
}

/// Pattern scanner parameterized by byte order preference and base confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternScanner {
    pub endian_order: [Endian; 2],
    pub base_confidence: f64,
}

impl PatternScanner {
    /// Locate every recognizable table in `image`, in offset order.
    pub fn scan(&self, image: &[u8], label: &str) -> Vec<RawTable> {
        let mut tables = Vec::new();
        let mut covered: Vec<(usize, usize)> = Vec::new();

        let mut offset = 0;
        while offset < image.len() {
            match self.table_at(image, offset, label, tables.len()) {
                Some((table, len)) => {
                    covered.push((offset, offset + len));
                    tables.push(table);
                    offset += len;
                }
                None => offset += 1,
            }
        }

        // `covered` is in offset order and never overlaps.
        let mut next_span = 0;
        let mut offset = 0;
        while offset < image.len() {
            while next_span < covered.len() && covered[next_span].1 <= offset {
                next_span += 1;
            }
            if let Some(&(start, end)) = covered.get(next_span) {
                if start <= offset {
                    offset = end;
                    next_span += 1;
                    continue;
                }
            }
            match self.rev_limiter_at(image, offset, label) {
                Some((table, len)) => {
                    tables.push(table);
                    offset += len;
                }
                None => offset += 1,
            }
        }

        tables
    }

    fn table_at(
        &self,
        image: &[u8],
        offset: usize,
        label: &str,
        index: usize,
    ) -> Option<(RawTable, usize)> {
        for endian in self.endian_order {
            let rpm = axis_run(image, offset, endian, RPM_AXIS_RANGE, RPM_AXIS_MIN_STEP);
            if !CANONICAL_AXIS_SIZES.contains(&rpm.len())
                || extends_left(image, offset, endian, RPM_AXIS_RANGE, RPM_AXIS_MIN_STEP, rpm[0])
            {
                continue;
            }

            let load_offset = offset + 2 * rpm.len();
            let load = axis_run(image, load_offset, endian, (0, LOAD_AXIS_MAX), 1);
            if !CANONICAL_AXIS_SIZES.contains(&load.len()) {
                continue;
            }

            let cells_offset = load_offset + 2 * load.len();
            let cell_count = rpm.len() * load.len();
            let Some(cells) = image.get(cells_offset..cells_offset + cell_count) else {
                continue;
            };

            let Some((kind, value_unit, scale)) = classify_cells(cells) else {
                continue;
            };

            let values = cells
                .chunks(load.len())
                .map(|row| row.iter().map(|raw| *raw as f64 / scale).collect())
                .collect();

            let regularity = (axis_regularity(&rpm) + axis_regularity(&load)) / 2.0;
            let table = RawTable {
                kind,
                name: format!("{label}_{}_{index}@0x{offset:x}", kind.as_str()),
                rpm_bins: rpm.iter().map(|v| *v as f64).collect(),
                rpm_unit: RawUnit::Rpm,
                load_bins: Some(load.iter().map(|v| *v as f64).collect()),
                values,
                value_unit,
                confidence: self.base_confidence * (0.7 + 0.3 * regularity),
                source_offset: Some(offset),
            };

            return Some((table, cells_offset + cell_count - offset));
        }

        None
    }

    fn rev_limiter_at(
        &self,
        image: &[u8],
        offset: usize,
        label: &str,
    ) -> Option<(RawTable, usize)> {
        for endian in self.endian_order {
            let Some(first) = endian.read_u16(image, offset) else {
                continue;
            };
            if first < REV_RANGE.0 || first > REV_RANGE.1 || first % 50 != 0 {
                continue;
            }
            // Only the start of a run counts.
            if offset >= 2 && endian.read_u16(image, offset - 2) == Some(first) {
                continue;
            }

            let mut run = 1;
            while endian.read_u16(image, offset + 2 * run) == Some(first) {
                run += 1;
                if run > REV_RUN.1 {
                    break;
                }
            }
            if run < REV_RUN.0 || run > REV_RUN.1 {
                continue;
            }

            let table = RawTable {
                kind: TableKind::RevLimiter,
                name: format!("{label}_rev_limiter@0x{offset:x}"),
                rpm_bins: vec![],
                rpm_unit: RawUnit::Rpm,
                load_bins: None,
                values: vec![vec![first as f64; run]],
                value_unit: RawUnit::Rpm,
                confidence: self.base_confidence * 0.7,
                source_offset: Some(offset),
            };
            return Some((table, 2 * run));
        }

        None
    }
}

/// Longest strictly increasing run of u16 values starting at `offset`,
/// capped one past the largest canonical axis.
fn axis_run(
    image: &[u8],
    offset: usize,
    endian: Endian,
    range: (u16, u16),
    min_step: u16,
) -> Vec<u16> {
    let mut out: Vec<u16> = Vec::with_capacity(MAX_AXIS + 1);
    while out.len() <= MAX_AXIS {
        let Some(v) = endian.read_u16(image, offset + 2 * out.len()) else {
            break;
        };
        if v < range.0 || v > range.1 {
            break;
        }
        if let Some(prev) = out.last() {
            if v <= *prev || v - *prev < min_step {
                break;
            }
        }
        out.push(v);
    }
    out
}

/// Whether the u16 before `offset` would continue the axis, meaning
/// `offset` is inside an axis rather than at its start.
fn extends_left(
    image: &[u8],
    offset: usize,
    endian: Endian,
    range: (u16, u16),
    min_step: u16,
    first: u16,
) -> bool {
    let Some(prev_at) = offset.checked_sub(2) else {
        return false;
    };
    match endian.read_u16(image, prev_at) {
        Some(prev) => {
            prev >= range.0 && prev <= range.1 && prev < first && first - prev >= min_step
        }
        None => false,
    }
}

/// Smallest step over largest step, 1.0 for evenly spaced axes.
fn axis_regularity(axis: &[u16]) -> f64 {
    let steps: Vec<u16> = axis.windows(2).map(|w| w[1] - w[0]).collect();
    match (steps.iter().min(), steps.iter().max()) {
        (Some(min), Some(max)) if *max > 0 => *min as f64 / *max as f64,
        _ => 0.0,
    }
}

fn classify_cells(cells: &[u8]) -> Option<(TableKind, RawUnit, f64)> {
    let mean = cells.iter().map(|c| *c as f64).sum::<f64>() / cells.len() as f64;

    if cells
        .iter()
        .all(|c| (FUEL_RAW_RANGE.0..=FUEL_RAW_RANGE.1).contains(c))
        && mean >= FUEL_RAW_MIN_MEAN
    {
        return Some((TableKind::Fuel, RawUnit::Afr, 10.0));
    }

    if cells.iter().all(|c| *c <= IGNITION_RAW_MAX) {
        return Some((TableKind::Ignition, RawUnit::Degrees, 2.0));
    }

    None
}

/// Strategy for schema-less binary images.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternStrategy {
    label: &'static str,
    scanner: PatternScanner,
}

impl PatternStrategy {
    /// Flash dumps from most tools are little-endian.
    pub const fn bare_binary() -> Self {
        Self {
            label: "bare_binary",
            scanner: PatternScanner {
                endian_order: [Endian::Little, Endian::Big],
                base_confidence: 0.55,
            },
        }
    }

    /// BDM read-outs come from big-endian Motorola/Freescale parts.
    pub const fn bdm_dump() -> Self {
        Self {
            label: "bdm_dump",
            scanner: PatternScanner {
                endian_order: [Endian::Big, Endian::Little],
                base_confidence: 0.6,
            },
        }
    }
}

impl ExtractionStrategy for PatternStrategy {
    fn name(&self) -> &'static str {
        self.label
    }

    fn extract(&self, payload: &[u8]) -> Result<StrategyOutput, TextFormatError> {
        Ok(StrategyOutput {
            tables: self.scanner.scan(payload, self.label),
            ..Default::default()
        })
    }
}
