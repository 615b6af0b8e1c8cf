//! External reasoning service boundary.
//!
//! The service receives the canonical model and the findings gathered so far
//! and answers with an independent score, a confidence and a narrative. It is
//! a soft dependency: every error here is downgraded by the caller to
//! "service absent".

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::calibration::model::{CalibrationModel, CalibrationTable, EngineMetadata};
use crate::config::ReasoningConfig;
use crate::pipeline::Compatibility;
use crate::safety::catalog::{FindingCategory, SafetyFinding, Severity};

/// Wire format version sent with every request.
pub const REQUEST_SCHEMA: &str = "tunegate.reasoning.v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningRequest {
    pub schema: String,
    pub file_hash: String,
    pub compatibility: Compatibility,
    pub metadata: EngineMetadata,
    /// Canonical tables, axes and values exactly as normalized.
    pub tables: Vec<CalibrationTable>,
    pub findings: Vec<SafetyFinding>,
}

impl ReasoningRequest {
    pub fn new(
        file_hash: &str,
        compatibility: &Compatibility,
        model: &CalibrationModel,
        findings: &[SafetyFinding],
    ) -> Self {
        Self {
            schema: REQUEST_SCHEMA.to_string(),
            file_hash: file_hash.to_string(),
            compatibility: compatibility.clone(),
            metadata: model.metadata.clone(),
            tables: model.tables.clone(),
            findings: findings.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningResponse {
    /// Independent safety score in [0, 100].
    pub score: f64,
    /// Service's own confidence in [0, 1].
    pub confidence: f64,
    #[serde(default)]
    pub narrative: String,
    #[serde(default)]
    pub concerns: Vec<ReasoningConcern>,
}

/// A qualitative concern raised by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningConcern {
    pub category: FindingCategory,
    pub severity: Severity,
    pub rationale: String,
}

impl ReasoningResponse {
    /// Reject responses whose numbers cannot be trusted.
    pub fn validate(self) -> Result<Self, ReasoningError> {
        if !(self.score.is_finite() && (0.0..=100.0).contains(&self.score)) {
            return Err(ReasoningError::OutOfRange {
                field: "score",
                value: self.score,
            });
        }
        if !(self.confidence.is_finite() && (0.0..=1.0).contains(&self.confidence)) {
            return Err(ReasoningError::OutOfRange {
                field: "confidence",
                value: self.confidence,
            });
        }
        Ok(self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReasoningError {
    #[error("reasoning service timed out")]
    Timeout,

    #[error("reasoning service unreachable: {0}")]
    Transport(String),

    #[error("reasoning service returned HTTP {0}")]
    Status(u16),

    #[error("malformed reasoning response: {0}")]
    Malformed(String),

    #[error("reasoning response {field} {value} is out of range")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("failed to build reasoning client: {0}")]
    Client(String),
}

/// Qualitative safety judgment over a canonical model.
pub trait ReasoningService: Send + Sync {
    fn assess(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, ReasoningError>;
}

/// JSON-over-HTTP reasoning client with explicit timeouts.
#[derive(Debug, Clone)]
pub struct HttpReasoningService {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpReasoningService {
    pub fn new(endpoint: impl Into<String>, config: &ReasoningConfig) -> Result<Self, ReasoningError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("tunegate/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(config.timeout_ms))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()
            .map_err(|e| ReasoningError::Client(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// Client for the configured endpoint, or `None` when none is configured.
    pub fn from_config(config: &ReasoningConfig) -> Result<Option<Self>, ReasoningError> {
        config
            .endpoint
            .as_deref()
            .map(|endpoint| Self::new(endpoint, config))
            .transpose()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ReasoningService for HttpReasoningService {
    fn assess(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, ReasoningError> {
        tracing::debug!(
            endpoint = %self.endpoint,
            tables = request.tables.len(),
            "calling reasoning service"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReasoningError::Status(status.as_u16()));
        }

        let body: ReasoningResponse = response.json().map_err(|e| {
            if e.is_timeout() {
                ReasoningError::Timeout
            } else {
                ReasoningError::Malformed(e.to_string())
            }
        })?;

        body.validate()
    }
}

fn transport_error(e: reqwest::Error) -> ReasoningError {
    if e.is_timeout() {
        ReasoningError::Timeout
    } else {
        ReasoningError::Transport(e.to_string())
    }
}
