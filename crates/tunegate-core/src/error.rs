//! Error types for the tunegate pipeline.
//!
//! Only the two terminal outcomes (security veto, format rejection) and
//! caller-requested cancellation are surfaced as errors. Degraded extraction
//! and reasoning-service failures are folded into the `UploadDecision`.

use crate::format::detect::FormatDescriptor;

/// Terminal pipeline outcome that prevents an `UploadDecision` from being produced.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("security rejected: {reason}")]
    SecurityRejected { reason: String },

    #[error("format rejected: {reason} (accepted extensions: {})", accepted_list(.supported))]
    FormatRejected {
        reason: String,
        supported: Vec<FormatDescriptor>,
    },

    #[error("upload cancelled before {stage}")]
    Cancelled { stage: &'static str },
}

impl PipelineError {
    /// Short machine-readable kind, used by the CLI report.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::SecurityRejected { .. } => "security_rejected",
            PipelineError::FormatRejected { .. } => "format_rejected",
            PipelineError::Cancelled { .. } => "cancelled",
        }
    }
}

fn accepted_list(supported: &[FormatDescriptor]) -> String {
    supported
        .iter()
        .map(|d| format!(".{}", d.extension))
        .collect::<Vec<_>>()
        .join(", ")
}

pub type PipelineResult<T> = Result<T, PipelineError>;
