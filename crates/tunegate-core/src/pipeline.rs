//! Upload boundary and stage composition.
//!
//! One upload is one independent unit of work: security scan, format
//! detection, unwrapping, extraction, normalization, safety analysis and
//! decision, strictly in that order. Stages share no mutable state, so
//! batches run on a worker pool without coordination.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::calibration::model::EngineMetadata;
use crate::calibration::normalize::normalize;
use crate::config::PolicyConfig;
use crate::decision::policy::{TrustTier, UploadDecision, decide};
use crate::error::{PipelineError, PipelineResult};
use crate::extract::{self, Extraction, ExtractionStatus};
use crate::format::detect::{EcuFormat, detect, supported_formats};
use crate::format::unwrap::unwrap_payload;
use crate::ingest::read::TuneFile;
use crate::report::model::{FileInfo, TableSummary};
use crate::safety::assess::{ReasoningCall, analyze};
use crate::safety::catalog::{FindingSource, RuleId, SafetyFinding};
use crate::safety::reasoning::{HttpReasoningService, ReasoningError, ReasoningService};
use crate::security::scan::{ScanVerdict, scan};

/// Declared motorcycle compatibility, as supplied by the submitter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compatibility {
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<u16>,
}

/// One upload as handed over by the marketplace.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub compatibility: Compatibility,
    pub trust_tier: TrustTier,
}

/// Cooperative cancellation, checked before every stage up to the decision.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self, stage: &'static str) -> PipelineResult<()> {
        if self.is_cancelled() {
            tracing::debug!(stage, "upload cancelled");
            return Err(PipelineError::Cancelled { stage });
        }
        Ok(())
    }
}

/// Everything returned across the upload boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub file: FileInfo,
    pub compatibility: Compatibility,
    pub metadata: EngineMetadata,
    pub tables: Vec<TableSummary>,
    /// Machine-readable findings, most severe first.
    pub findings: Vec<SafetyFinding>,
    /// Deterministic estimate of processing time for an upload like this one.
    pub processing_hint_ms: u64,
    pub decision: UploadDecision,
}

pub struct Pipeline {
    config: PolicyConfig,
    reasoning: Option<Box<dyn ReasoningService>>,
}

impl Pipeline {
    /// Pipeline without a reasoning service.
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            reasoning: None,
        }
    }

    /// Pipeline with an HTTP reasoning client when the config names an endpoint.
    pub fn from_config(config: PolicyConfig) -> Result<Self, ReasoningError> {
        let reasoning = HttpReasoningService::from_config(&config.reasoning)?;
        if let Some(service) = &reasoning {
            tracing::debug!(endpoint = service.endpoint(), "reasoning service configured");
        }
        Ok(Self {
            config,
            reasoning: reasoning.map(|s| Box::new(s) as Box<dyn ReasoningService>),
        })
    }

    pub fn with_reasoning(mut self, service: impl ReasoningService + 'static) -> Self {
        self.reasoning = Some(Box::new(service));
        self
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn process(&self, upload: Upload, cancel: &CancelToken) -> PipelineResult<UploadOutcome> {
        let file = TuneFile::from_bytes(upload.file_name, upload.bytes);
        self.process_file(file, upload.compatibility, upload.trust_tier, cancel)
    }

    pub fn process_file(
        &self,
        file: TuneFile,
        compatibility: Compatibility,
        tier: TrustTier,
        cancel: &CancelToken,
    ) -> PipelineResult<UploadOutcome> {
        let short_hash = &file.hash_hex[..file.hash_hex.len().min(12)];
        let span = tracing::debug_span!("upload", hash = short_hash, tier = %tier);
        let _guard = span.enter();

        cancel.check("security scan")?;
        if let ScanVerdict::Fail { reason } = scan(&file.bytes, &file.name) {
            tracing::warn!(file = %file.name, %reason, "upload rejected by security scan");
            return Err(PipelineError::SecurityRejected { reason });
        }

        cancel.check("format detection")?;
        let detection = detect(&file.bytes, &file.extension).map_err(|e| {
            tracing::warn!(file = %file.name, error = %e, "upload rejected by format detection");
            PipelineError::FormatRejected {
                reason: e.to_string(),
                supported: supported_formats(),
            }
        })?;
        let format = detection.format;
        tracing::debug!(
            %format,
            signature_verified = detection.signature_verified,
            size = file.size_bytes,
            "format detected"
        );
        let mut findings = detection.findings;

        cancel.check("unwrap")?;
        let extraction = match unwrap_payload(&file.bytes, format) {
            Ok(unwrapped) => {
                cancel.check("extraction")?;
                let mut extraction = extract::extract(unwrapped.payload, format);
                merge_container_metadata(&mut extraction.metadata, unwrapped.metadata);
                extraction
            }
            Err(e) => {
                tracing::warn!(%format, error = %e, "container unwrap failed");
                Extraction::degraded(RuleId::SWrap01, FindingSource::Unwrapper, e.to_string())
            }
        };
        let mut status = extraction.status;
        findings.extend(extraction.findings);

        cancel.check("normalization")?;
        let normalized = normalize(extraction.tables, extraction.metadata);
        findings.extend(normalized.findings);
        if normalized.degraded && status == ExtractionStatus::Complete {
            tracing::warn!(file = %file.name, "located tables dropped during normalization");
            status = ExtractionStatus::Degraded;
        }
        let model = normalized.model;

        cancel.check("safety analysis")?;
        let reasoning = self.reasoning.as_deref().map(|service| ReasoningCall {
            service,
            file_hash: &file.hash_hex,
            compatibility: &compatibility,
        });
        let assessment = analyze(&model, findings, status, reasoning, &self.config);

        cancel.check("decision")?;
        let decision = decide(assessment, tier, &self.config.decision);

        Ok(UploadOutcome {
            file: file.file_info(Some(format.as_str().to_string())),
            processing_hint_ms: processing_hint_ms(
                file.size_bytes,
                format,
                self.reasoning.as_ref().map(|_| self.config.reasoning.timeout_ms),
            ),
            compatibility,
            tables: model.tables.iter().map(TableSummary::from).collect(),
            metadata: model.metadata,
            findings: decision.assessment.findings.clone(),
            decision,
        })
    }

    /// Process uploads on a worker pool; results keep input order. A failed
    /// upload never affects the others.
    pub fn process_batch(
        &self,
        uploads: Vec<Upload>,
        cancel: &CancelToken,
    ) -> Vec<PipelineResult<UploadOutcome>> {
        if uploads.is_empty() {
            return vec![];
        }

        let workers = self.config.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .build();

        match pool {
            Ok(pool) => pool.install(|| {
                uploads
                    .into_par_iter()
                    .map(|upload| self.process(upload, cancel))
                    .collect()
            }),
            Err(e) => {
                tracing::warn!(error = %e, "worker pool unavailable, processing sequentially");
                uploads
                    .into_iter()
                    .map(|upload| self.process(upload, cancel))
                    .collect()
            }
        }
    }
}

/// Declared container metadata wins over signature guesses.
fn merge_container_metadata(
    metadata: &mut EngineMetadata,
    container: std::collections::BTreeMap<String, String>,
) {
    for (key, value) in container {
        match key.as_str() {
            "manufacturer" | "make" => metadata.manufacturer = Some(value),
            "model" | "vehicle" => metadata.model = Some(value),
            _ => {
                metadata.extra.entry(key).or_insert(value);
            }
        }
    }
}

const HINT_BASE_MS: u64 = 5;

/// Upper-bound estimate, a pure function of size, format and whether the
/// reasoning service will be called.
pub fn processing_hint_ms(size_bytes: u64, format: EcuFormat, reasoning_timeout_ms: Option<u64>) -> u64 {
    let ns_per_byte: u64 = match format {
        EcuFormat::MapText => 20,
        EcuFormat::IntelHex => 60,
        _ => 40,
    };
    HINT_BASE_MS + (size_bytes * ns_per_byte).div_ceil(1_000_000) + reasoning_timeout_ms.unwrap_or(0)
}
