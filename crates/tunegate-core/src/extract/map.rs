//! Calibration map text format.
//!
//! ```text
//! ; comment          (also '#')
//! META manufacturer=Yamaha
//! TABLE fuel unit=afr axis=rpm name=main_fuel
//! RPM 2000 4000 6000
//! LOAD 20 60 100
//! 13.4 13.2 13.0
//! 13.3 13.1 12.9
//! 13.2 13.0 12.8
//! END
//! SCALAR rev_limiter unit=rpm 11500 11500
//! ```
//!
//! A `TABLE` without `LOAD` is one-dimensional: a single value row aligned
//! to the RPM axis. Dimensions are not checked here; the normalizer owns
//! that invariant.

use std::collections::BTreeMap;

use crate::calibration::model::{EngineMetadata, TableKind};
use crate::extract::{ExtractionStrategy, RawTable, RawUnit, StrategyOutput, TextFormatError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapStrategy;

impl ExtractionStrategy for MapStrategy {
    fn name(&self) -> &'static str {
        "map_text"
    }

    fn extract(&self, payload: &[u8]) -> Result<StrategyOutput, TextFormatError> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| TextFormatError::new(0, format!("not valid UTF-8: {e}")))?;
        parse_map(text)
    }
}

/// Table under construction between `TABLE` and `END`.
struct OpenTable {
    line: usize,
    kind: TableKind,
    name: String,
    value_unit: RawUnit,
    rpm_unit: RawUnit,
    rpm: Option<Vec<f64>>,
    load: Option<Vec<f64>>,
    rows: Vec<Vec<f64>>,
}

impl OpenTable {
    fn finish(self) -> Result<RawTable, TextFormatError> {
        let rpm = self
            .rpm
            .ok_or_else(|| TextFormatError::new(self.line, "TABLE without RPM axis"))?;
        Ok(RawTable {
            kind: self.kind,
            name: self.name,
            rpm_bins: rpm,
            rpm_unit: self.rpm_unit,
            load_bins: self.load,
            values: self.rows,
            value_unit: self.value_unit,
            confidence: 1.0,
            source_offset: None,
        })
    }
}

pub fn parse_map(text: &str) -> Result<StrategyOutput, TextFormatError> {
    let mut tables = Vec::new();
    let mut metadata = EngineMetadata::default();
    let mut open: Option<OpenTable> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        let mut tokens = line.split_whitespace();
        let Some(keyword) = tokens.next() else {
            continue;
        };
        let rest: Vec<&str> = tokens.collect();

        if let Some(table) = open.as_mut() {
            match keyword {
                "END" => {}
                "RPM" => {
                    if table.rpm.is_some() {
                        return Err(TextFormatError::new(line_no, "duplicate RPM axis"));
                    }
                    table.rpm = Some(parse_numbers(&rest, line_no)?);
                }
                "LOAD" => {
                    if table.load.is_some() {
                        return Err(TextFormatError::new(line_no, "duplicate LOAD axis"));
                    }
                    table.load = Some(parse_numbers(&rest, line_no)?);
                }
                "TABLE" | "SCALAR" | "META" => {
                    return Err(TextFormatError::new(
                        line_no,
                        format!("{keyword} inside TABLE opened on line {}", table.line),
                    ));
                }
                _ => {
                    if table.rpm.is_none() {
                        return Err(TextFormatError::new(line_no, "value row before RPM axis"));
                    }
                    let mut row = vec![parse_number(keyword, line_no)?];
                    row.extend(parse_numbers(&rest, line_no)?);
                    table.rows.push(row);
                }
            }
            if keyword == "END" {
                if let Some(table) = open.take() {
                    tables.push(table.finish()?);
                }
            }
            continue;
        }

        match keyword {
            "TABLE" => {
                let (kind, options) = parse_header(&rest, line_no)?;
                open = Some(OpenTable {
                    line: line_no,
                    kind,
                    name: options
                        .get("name")
                        .cloned()
                        .unwrap_or_else(|| format!("{}_{}", kind.as_str(), tables.len())),
                    value_unit: unit_option(&options, "unit", default_unit(kind), line_no)?,
                    rpm_unit: unit_option(&options, "axis", RawUnit::Rpm, line_no)?,
                    rpm: None,
                    load: None,
                    rows: Vec::new(),
                });
            }
            "SCALAR" => {
                let (kind, options) = parse_header(&rest, line_no)?;
                let values: Vec<&str> = rest
                    .iter()
                    .skip(1)
                    .filter(|t| !t.contains('='))
                    .copied()
                    .collect();
                if values.is_empty() {
                    return Err(TextFormatError::new(line_no, "SCALAR without values"));
                }
                tables.push(RawTable {
                    kind,
                    name: options
                        .get("name")
                        .cloned()
                        .unwrap_or_else(|| format!("{}_{}", kind.as_str(), tables.len())),
                    rpm_bins: vec![],
                    rpm_unit: RawUnit::Rpm,
                    load_bins: None,
                    values: vec![parse_numbers(&values, line_no)?],
                    value_unit: unit_option(&options, "unit", default_unit(kind), line_no)?,
                    confidence: 1.0,
                    source_offset: None,
                });
            }
            "META" => {
                for (key, value) in parse_options(&rest) {
                    match key.as_str() {
                        "manufacturer" => metadata.manufacturer = Some(value),
                        "model" => metadata.model = Some(value),
                        _ => {
                            metadata.extra.insert(key, value);
                        }
                    }
                }
            }
            other => {
                return Err(TextFormatError::new(
                    line_no,
                    format!("unexpected '{other}' outside TABLE"),
                ));
            }
        }
    }

    if let Some(table) = open {
        return Err(TextFormatError::new(
            table.line,
            "TABLE is never closed with END",
        ));
    }

    Ok(StrategyOutput { tables, metadata })
}

fn strip_comment(line: &str) -> &str {
    match line.find([';', '#']) {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn parse_header(
    rest: &[&str],
    line_no: usize,
) -> Result<(TableKind, BTreeMap<String, String>), TextFormatError> {
    let kind_token = rest
        .first()
        .ok_or_else(|| TextFormatError::new(line_no, "missing table kind"))?;
    let kind = parse_kind(kind_token)
        .ok_or_else(|| TextFormatError::new(line_no, format!("unknown table kind '{kind_token}'")))?;
    Ok((kind, parse_options(&rest[1..])))
}

fn parse_kind(token: &str) -> Option<TableKind> {
    match token.to_ascii_lowercase().as_str() {
        "fuel" | "afr" => Some(TableKind::Fuel),
        "ignition" | "timing" => Some(TableKind::Ignition),
        "rev_limiter" | "rev_limit" | "revlimit" => Some(TableKind::RevLimiter),
        _ => None,
    }
}

fn default_unit(kind: TableKind) -> RawUnit {
    match kind {
        TableKind::Fuel => RawUnit::Afr,
        TableKind::Ignition => RawUnit::Degrees,
        TableKind::RevLimiter => RawUnit::Rpm,
    }
}

fn parse_options(tokens: &[&str]) -> BTreeMap<String, String> {
    tokens
        .iter()
        .filter_map(|t| t.split_once('='))
        .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
        .collect()
}

fn unit_option(
    options: &BTreeMap<String, String>,
    key: &str,
    default: RawUnit,
    line_no: usize,
) -> Result<RawUnit, TextFormatError> {
    match options.get(key) {
        None => Ok(default),
        Some(v) => RawUnit::parse(v)
            .ok_or_else(|| TextFormatError::new(line_no, format!("unknown {key} '{v}'"))),
    }
}

fn parse_numbers(tokens: &[&str], line_no: usize) -> Result<Vec<f64>, TextFormatError> {
    tokens.iter().map(|t| parse_number(t, line_no)).collect()
}

fn parse_number(token: &str, line_no: usize) -> Result<f64, TextFormatError> {
    token
        .parse::<f64>()
        .map_err(|_| TextFormatError::new(line_no, format!("'{token}' is not a number")))
}
