pub mod calibration;
pub mod config;
pub mod decision;
pub mod error;
pub mod extract;
pub mod format;
pub mod ingest;
pub mod pipeline;
pub mod report;
pub mod safety;
pub mod security;
pub mod util;

use anyhow::Result;
use std::path::Path;

use crate::decision::policy::TrustTier;
use crate::pipeline::{CancelToken, Compatibility, Pipeline};
use crate::report::model::{Report, ToolInfo};

pub const TOOL_NAME: &str = "tunegate";

/// JSON schema version of tunegate reports.
/// Bump only when the report shape changes semantically.
pub const SCHEMA_VERSION: &str = "0.1.0";

/// Version of the rule catalog and default thresholds.
pub const POLICY_VERSION: &str = "0.1.0";

/// Check one tune file from disk and build its report.
///
/// Only I/O failures are errors here. Security, format and cancellation
/// outcomes become rejected reports.
pub fn check_file(
    path: &Path,
    pipeline: &Pipeline,
    tier: TrustTier,
    compatibility: Compatibility,
    tool: ToolInfo,
) -> Result<Report> {
    let file = ingest::read::read_tune_file(path)?;
    let info = file.file_info(None);

    let report = match pipeline.process_file(file, compatibility, tier, &CancelToken::new()) {
        Ok(outcome) => Report::decided(tool, outcome),
        Err(e) => Report::rejected(tool, info, &e),
    };
    Ok(report)
}
