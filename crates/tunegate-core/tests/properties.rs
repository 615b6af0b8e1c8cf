//! Property tests for the pipeline guarantees that must hold for any input:
//! undersized uploads are rejected, identical uploads decide identically,
//! a critical-lean cell is never approved, and normalized tables reach the
//! reasoning request unchanged.

use proptest::prelude::*;

use tunegate_core::calibration::model::{
    CalibrationModel, CalibrationTable, EngineMetadata, TableKind, Unit,
};
use tunegate_core::calibration::normalize::normalize;
use tunegate_core::config::PolicyConfig;
use tunegate_core::decision::policy::{DecisionOutcome, TrustTier, decide};
use tunegate_core::error::PipelineError;
use tunegate_core::extract::{ExtractionStatus, RawTable, RawUnit};
use tunegate_core::format::detect::{FormatDescriptor, supported_formats};
use tunegate_core::pipeline::{CancelToken, Compatibility, Pipeline, Upload, UploadOutcome};
use tunegate_core::safety::assess::{ReasoningCall, analyze};
use tunegate_core::safety::reasoning::{
    ReasoningError, ReasoningRequest, ReasoningResponse, ReasoningService,
};

/// Reasoning stub answering with a fixed score and confidence.
struct Steady {
    score: f64,
    confidence: f64,
}

impl ReasoningService for Steady {
    fn assess(&self, _: &ReasoningRequest) -> Result<ReasoningResponse, ReasoningError> {
        Ok(ReasoningResponse {
            score: self.score,
            confidence: self.confidence,
            narrative: "steady".into(),
            concerns: vec![],
        })
    }
}

fn upload(name: String, bytes: Vec<u8>, tier: TrustTier) -> Upload {
    Upload {
        file_name: name,
        bytes,
        compatibility: Compatibility::default(),
        trust_tier: tier,
    }
}

/// Comparable rendering of one pipeline result.
fn fingerprint(result: &Result<UploadOutcome, PipelineError>) -> String {
    match result {
        Ok(outcome) => serde_json::to_string(outcome).expect("outcome serializes"),
        Err(e) => format!("{}: {e}", e.kind()),
    }
}

fn arb_tier() -> impl Strategy<Value = TrustTier> {
    prop::sample::select(TrustTier::ALL.to_vec())
}

/// Non-ASCII filler, so no content signature or security marker can match.
fn arb_undersized() -> impl Strategy<Value = (FormatDescriptor, Vec<u8>)> {
    prop::sample::select(supported_formats()).prop_flat_map(|descriptor| {
        let max = descriptor.min_size_bytes;
        (
            Just(descriptor),
            prop::collection::vec(0x80u8..=0xFF, 0..max),
        )
    })
}

/// A 3x3 fuel map in the text grammar, with AFR values from 10.0 to 17.0.
fn arb_map_text() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(100u16..=170, 9).prop_map(|cells| {
        let rows: Vec<String> = cells
            .chunks(3)
            .map(|row| {
                row.iter()
                    .map(|c| format!("{}.{}", c / 10, c % 10))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect();
        format!(
            "TABLE fuel unit=afr\nRPM 2000 4000 6000\nLOAD 20 60 100\n{}\nEND\n",
            rows.join("\n")
        )
        .into_bytes()
    })
}

fn arb_upload() -> impl Strategy<Value = (String, Vec<u8>)> {
    let extensions: Vec<String> = supported_formats().into_iter().map(|d| d.extension).collect();
    (
        prop::sample::select(extensions),
        prop_oneof![
            prop::collection::vec(any::<u8>(), 0..4096),
            arb_map_text(),
        ],
    )
        .prop_map(|(ext, bytes)| (format!("tune.{ext}"), bytes))
}

fn ascending(start: f64, steps: Vec<f64>) -> Vec<f64> {
    steps
        .into_iter()
        .scan(start, |acc, step| {
            *acc += step;
            Some(*acc)
        })
        .collect()
}

/// Fuel table with at least one cell above the critical-lean cutoff.
fn arb_lean_fuel() -> impl Strategy<Value = CalibrationTable> {
    (1usize..=8, 1usize..=8)
        .prop_flat_map(|(rows, cols)| {
            (
                prop::collection::vec(50.0f64..1500.0, rows),
                prop::collection::vec(5.0f64..40.0, cols),
                prop::collection::vec(prop::collection::vec(9.0f64..=15.5, cols), rows),
                (0..rows, 0..cols),
                15.51f64..30.0,
                0.0f64..=1.0,
            )
        })
        .prop_map(|(rpm_steps, load_steps, mut values, (row, col), lean, confidence)| {
            values[row][col] = lean;
            CalibrationTable {
                kind: TableKind::Fuel,
                name: "fuel".into(),
                rpm_bins: ascending(500.0, rpm_steps),
                load_bins: Some(ascending(0.0, load_steps)),
                values,
                unit: Unit::Afr,
                confidence,
                source_offset: None,
            }
        })
}

fn arb_ignition() -> impl Strategy<Value = CalibrationTable> {
    prop::collection::vec(prop::collection::vec(0.0f64..=45.0, 3), 3).prop_map(|values| {
        CalibrationTable {
            kind: TableKind::Ignition,
            name: "ignition".into(),
            rpm_bins: vec![2000.0, 4000.0, 6000.0],
            load_bins: Some(vec![20.0, 60.0, 100.0]),
            values,
            unit: Unit::DegreesAdvance,
            confidence: 1.0,
            source_offset: None,
        }
    })
}

fn arb_lean_model() -> impl Strategy<Value = CalibrationModel> {
    (
        arb_lean_fuel(),
        prop::option::of(arb_ignition()),
        prop::option::of(arb_lean_fuel()),
    )
        .prop_map(|(lean, ignition, extra)| CalibrationModel {
            tables: std::iter::once(lean).chain(ignition).chain(extra).collect(),
            metadata: EngineMetadata::default(),
        })
}

fn arb_finite() -> impl Strategy<Value = f64> {
    prop::num::f64::POSITIVE
        | prop::num::f64::NEGATIVE
        | prop::num::f64::NORMAL
        | prop::num::f64::SUBNORMAL
        | prop::num::f64::ZERO
}

fn arb_raw_table() -> impl Strategy<Value = RawTable> {
    (1usize..=16, 1usize..=16, any::<bool>(), 0.0f64..=1.0)
        .prop_flat_map(|(rows, cols, fuel, confidence)| {
            (
                prop::collection::vec(arb_finite(), rows),
                prop::collection::vec(arb_finite(), cols),
                prop::collection::vec(prop::collection::vec(arb_finite(), cols), rows),
                Just(fuel),
                Just(confidence),
            )
        })
        .prop_map(|(rpm_bins, load_bins, values, fuel, confidence)| {
            let (kind, value_unit) = if fuel {
                (TableKind::Fuel, RawUnit::Afr)
            } else {
                (TableKind::Ignition, RawUnit::Degrees)
            };
            RawTable {
                kind,
                name: format!("{}_table", kind.as_str()),
                rpm_bins,
                rpm_unit: RawUnit::Rpm,
                load_bins: Some(load_bins),
                values,
                value_unit,
                confidence,
                source_offset: None,
            }
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn undersized_uploads_are_always_format_rejected(
        (descriptor, bytes) in arb_undersized(),
        tier in arb_tier(),
    ) {
        let name = format!("short.{}", descriptor.extension);
        let result = Pipeline::new(PolicyConfig::default())
            .process(upload(name, bytes, tier), &CancelToken::new());

        prop_assert!(
            matches!(result, Err(PipelineError::FormatRejected { .. })),
            "{}: {}",
            descriptor.extension,
            fingerprint(&result)
        );
    }

    #[test]
    fn identical_uploads_decide_identically(
        (name, bytes) in arb_upload(),
        tier in arb_tier(),
    ) {
        let pipeline = Pipeline::new(PolicyConfig::default())
            .with_reasoning(Steady { score: 91.0, confidence: 0.85 });

        let first = pipeline.process(upload(name.clone(), bytes.clone(), tier), &CancelToken::new());
        let second = pipeline.process(upload(name, bytes, tier), &CancelToken::new());

        prop_assert_eq!(fingerprint(&first), fingerprint(&second));
    }

    #[test]
    fn critical_lean_cell_is_never_approved(
        model in arb_lean_model(),
        tier in arb_tier(),
        score in 0.0f64..=100.0,
        confidence in 0.0f64..=1.0,
        with_reasoning in any::<bool>(),
    ) {
        let config = PolicyConfig::default();
        let service = Steady { score, confidence };
        let compatibility = Compatibility::default();
        let reasoning = with_reasoning.then(|| ReasoningCall {
            service: &service,
            file_hash: "00",
            compatibility: &compatibility,
        });

        let assessment = analyze(&model, vec![], ExtractionStatus::Complete, reasoning, &config);
        let decision = decide(assessment, tier, &config.decision);

        prop_assert_eq!(decision.outcome, DecisionOutcome::Block);
    }

    #[test]
    fn normalized_tables_reach_reasoning_request_exactly(
        raw in prop::collection::vec(arb_raw_table(), 1..4),
    ) {
        let expected: Vec<Vec<Vec<f64>>> = raw.iter().map(|t| t.values.clone()).collect();
        let normalized = normalize(raw, EngineMetadata::default());
        prop_assert!(!normalized.degraded);

        for table in &normalized.model.tables {
            prop_assert!(expected.contains(&table.values));
        }

        let request = ReasoningRequest::new(
            "00",
            &Compatibility::default(),
            &normalized.model,
            &normalized.findings,
        );
        let json = serde_json::to_string(&request).expect("request serializes");
        let back: ReasoningRequest = serde_json::from_str(&json).expect("request parses");

        prop_assert_eq!(back, request);
    }
}
