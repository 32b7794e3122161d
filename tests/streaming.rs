mod common;

use common::synthetic_patch::flat;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use structure_detector::error::ModuleError;
use structure_detector::features::{parse_params, ParamMap};
use structure_detector::profile::GeometryConfig;
use structure_detector::types::FaultKind;
use structure_detector::{
    AggregationMethod, DetectionResult, DetectorError, DetectorProfile, ElevationPatch,
    FeatureConfig, FeatureModule, FeatureOutput, FeatureRegistry, ModuleStatus, Outcome,
    Polarity, ProgressObserver, ProgressUpdate, StructureDetector,
};

#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Behaviour {
    #[default]
    Score,
    Panic,
    Error,
    Inconclusive,
}

/// Test module returning a configured score after an optional delay.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct StubParams {
    score: f32,
    /// Score used instead once the patch is coarser than 0.5 m.
    coarse_score: Option<f32>,
    delay_ms: u64,
    behaviour: Behaviour,
}

struct Stub(StubParams);

impl FeatureModule for Stub {
    fn kind(&self) -> &str {
        "stub"
    }

    fn compute(
        &self,
        patch: &ElevationPatch,
        _geometry: &GeometryConfig,
    ) -> Result<FeatureOutput, ModuleError> {
        std::thread::sleep(Duration::from_millis(self.0.delay_ms));
        match self.0.behaviour {
            Behaviour::Panic => panic!("stub exploded"),
            Behaviour::Error => Err(ModuleError::Numerical("singular system".into())),
            Behaviour::Inconclusive => Ok(FeatureOutput::inconclusive("no data")),
            Behaviour::Score => {
                let score = match self.0.coarse_score {
                    Some(coarse) if patch.resolution_m > 0.5 => coarse,
                    _ => self.0.score,
                };
                Ok(FeatureOutput::scored(score))
            }
        }
    }
}

fn stub_factory(params: &ParamMap) -> Result<Arc<dyn FeatureModule>, String> {
    let params: StubParams = parse_params(params)?;
    Ok(Arc::new(Stub(params)))
}

fn registry() -> FeatureRegistry {
    let mut registry = FeatureRegistry::empty();
    registry.register("stub", stub_factory);
    registry
}

fn stub(score: f32) -> FeatureConfig {
    FeatureConfig::new(1.0)
        .with_module("stub")
        .with_polarity(Polarity::Positive)
        .with_param("score", json!(score))
}

fn profile(features: Vec<(&str, FeatureConfig)>) -> DetectorProfile {
    let mut profile = DetectorProfile::windmill();
    profile.features = features
        .into_iter()
        .map(|(k, f)| (k.to_string(), f))
        .collect();
    profile.max_workers = 3;
    profile.enable_refinement = false;
    profile
}

fn run(profile: DetectorProfile) -> structure_detector::Result<DetectionResult> {
    let _ = env_logger::builder().is_test(true).try_init();
    StructureDetector::with_registry(profile, &registry())?.detect(&flat(0.0))
}

fn early_profile(method: AggregationMethod) -> DetectorProfile {
    let mut p = profile(vec![
        ("a", stub(0.95)),
        ("b", stub(0.95)),
        ("c", stub(0.95).with_param("delay_ms", json!(500))),
    ]);
    p.thresholds.min_modules_for_decision = 2;
    p.thresholds.early_decision_threshold = 0.5;
    p.aggregation_method = method;
    p
}

#[test]
fn early_decision_stops_waiting_for_slow_module() {
    let started = Instant::now();
    let result = run(early_profile(AggregationMethod::Streaming)).unwrap();

    let early = result.early_decision.as_ref().expect("early decision");
    assert_eq!(early.completed_modules, 2);
    assert_eq!(early.outstanding, vec!["c".to_string()]);
    assert!(early.final_score >= 0.6);
    assert!((result.final_score - 0.975).abs() < 1e-5);
    assert!((result.confidence - 2.0 / 3.0).abs() < 1e-5);
    assert!(result.detected);
    assert!(matches!(
        result.module("c").unwrap().status,
        ModuleStatus::Abandoned | ModuleStatus::Skipped
    ));
    assert!(started.elapsed() < Duration::from_millis(450));
}

#[test]
fn batch_mode_awaits_every_module() {
    let result = run(early_profile(AggregationMethod::Batch)).unwrap();
    assert!(result.early_decision.is_none());
    assert_eq!(result.confidence, 1.0);
    assert_eq!(result.count_with_status(ModuleStatus::Completed), 3);
}

#[test]
fn late_arrival_is_reported_but_not_aggregated() {
    let mut p = profile(vec![
        ("a", stub(0.95)),
        ("b", stub(0.95)),
        (
            "c",
            stub(1.0)
                .with_polarity(Polarity::Negative)
                .with_param("delay_ms", json!(150)),
        ),
    ]);
    p.thresholds.min_modules_for_decision = 2;
    p.thresholds.early_decision_threshold = 0.5;
    p.decision_grace_ms = 5_000;
    let result = run(p).unwrap();

    let late = result.module("c").unwrap();
    assert_eq!(late.status, ModuleStatus::LateArrival);
    assert_eq!(late.score, Some(1.0));
    assert!((result.final_score - 0.975).abs() < 1e-5);
    assert_eq!(result.history.len(), 2);
}

#[test]
fn panicking_module_is_isolated() {
    let mut p = profile(vec![
        ("a", stub(0.8)),
        ("b", stub(0.8).with_param("behaviour", json!("panic"))),
        ("c", stub(0.8)),
    ]);
    p.aggregation_method = AggregationMethod::Batch;
    let result = run(p).unwrap();

    let failed = result.module("b").unwrap();
    assert_eq!(failed.status, ModuleStatus::Failed);
    let fault = failed.metadata.error.as_ref().unwrap();
    assert_eq!(fault.kind, FaultKind::Panic);
    assert!(fault.message.contains("stub exploded"));
    assert!((result.confidence - 2.0 / 3.0).abs() < 1e-5);
    assert!((result.final_score - 0.9).abs() < 1e-5);
}

#[test]
fn erroring_module_carries_its_message() {
    let mut p = profile(vec![
        ("a", stub(0.8)),
        ("b", stub(0.8).with_param("behaviour", json!("error"))),
    ]);
    p.aggregation_method = AggregationMethod::Batch;
    let result = run(p).unwrap();
    let fault = result.module("b").unwrap().metadata.error.clone().unwrap();
    assert_eq!(fault.kind, FaultKind::Error);
    assert!(fault.message.contains("singular system"));
}

#[test]
fn hung_module_times_out() {
    let mut p = profile(vec![
        ("a", stub(0.8)),
        ("b", stub(0.8).with_param("delay_ms", json!(3_000))),
    ]);
    p.aggregation_method = AggregationMethod::Batch;
    p.module_timeout_ms = Some(100);
    let started = Instant::now();
    let result = run(p).unwrap();

    assert!(started.elapsed() < Duration::from_millis(2_000));
    let b = result.module("b").unwrap();
    assert_eq!(b.status, ModuleStatus::Failed);
    assert_eq!(b.metadata.error.as_ref().unwrap().kind, FaultKind::Timeout);
    assert_eq!(result.confidence, 0.5);
}

#[test]
fn every_module_failing_is_an_error() {
    let p = profile(vec![
        ("a", stub(0.8).with_param("behaviour", json!("panic"))),
        ("b", stub(0.8).with_param("behaviour", json!("error"))),
    ]);
    let err = run(p).unwrap_err();
    assert!(matches!(err, DetectorError::AllModulesFailed { attempted: 2 }));
    assert!(!err.is_input_error());
}

#[test]
fn inconclusive_modules_leave_evidence_insufficient() {
    let p = profile(vec![
        ("a", stub(0.9)),
        ("b", stub(0.0).with_param("behaviour", json!("inconclusive"))),
        ("c", stub(0.0).with_param("behaviour", json!("inconclusive"))),
    ]);
    let result = run(p).unwrap();
    assert_eq!(result.outcome, Outcome::InsufficientEvidence);
    assert!(!result.detected);
    assert_eq!(result.count_with_status(ModuleStatus::Inconclusive), 2);
}

struct PanickingObserver;

impl ProgressObserver for PanickingObserver {
    fn on_progress(&self, _update: &ProgressUpdate) {
        panic!("observer bug");
    }
}

#[test]
fn observers_see_each_aggregated_module() {
    let mut p = profile(vec![
        ("a", stub(0.3).with_param("delay_ms", json!(40))),
        ("b", stub(0.6)),
        ("c", stub(0.9).with_param("delay_ms", json!(20))),
    ]);
    p.aggregation_method = AggregationMethod::Batch;

    let seen = Arc::new(Mutex::new(Vec::<(String, f32)>::new()));
    let sink = Arc::clone(&seen);
    let detector = StructureDetector::with_registry(p, &registry())
        .unwrap()
        .with_observer(PanickingObserver)
        .with_observer(move |update: &ProgressUpdate| {
            sink.lock()
                .unwrap()
                .push((update.module.clone(), update.state.confidence));
        });
    let result = detector.detect(&flat(0.0)).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen.windows(2).all(|w| w[1].1 >= w[0].1));
    let order: Vec<&str> = result.history.iter().map(|s| s.module.as_str()).collect();
    let observed: Vec<&str> = seen.iter().map(|(m, _)| m.as_str()).collect();
    assert_eq!(order, observed);
}

#[test]
fn batch_results_do_not_depend_on_completion_order() {
    let build = |delays: [u64; 3]| {
        let mut p = profile(vec![
            ("a", stub(0.2).with_param("delay_ms", json!(delays[0]))),
            ("b", stub(0.7).with_param("delay_ms", json!(delays[1]))),
            ("c", stub(0.9).with_param("delay_ms", json!(delays[2]))),
        ]);
        p.aggregation_method = AggregationMethod::Batch;
        p
    };
    let first = run(build([0, 20, 40])).unwrap();
    let second = run(build([40, 20, 0])).unwrap();
    assert_eq!(first.final_score.to_bits(), second.final_score.to_bits());
    let names: Vec<&str> = second.modules.iter().map(|m| m.module.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
}

#[test]
fn neutral_modules_are_not_a_detection_at_midpoint_threshold() {
    for method in [AggregationMethod::Streaming, AggregationMethod::Batch] {
        let neutral = |score| stub(score).with_polarity(Polarity::Neutral);
        let mut p = profile(vec![("a", neutral(0.9)), ("b", neutral(0.9)), ("c", neutral(0.9))]);
        p.thresholds.detection_threshold = 0.5;
        p.thresholds.min_modules_for_decision = 2;
        p.thresholds.early_decision_threshold = 0.5;
        p.aggregation_method = method;
        let result = run(p).unwrap();

        assert!(result.early_decision.is_none(), "{method:?}");
        assert_eq!(result.final_score, 0.5);
        assert_eq!(result.confidence, 1.0);
        assert!(!result.detected, "{method:?}");
        assert_eq!(result.outcome, Outcome::NotDetected);
    }
}

#[test]
fn refinement_is_exhausted_when_no_pass_decides() {
    let neutral = |score| stub(score).with_polarity(Polarity::Neutral);
    let mut p = profile(vec![("a", neutral(0.5)), ("b", neutral(0.9))]);
    p.enable_refinement = true;
    p.max_refinement_attempts = 2;
    let result = run(p).unwrap();

    let refinement = result.refinement.as_ref().unwrap();
    assert!(refinement.exhausted);
    assert_eq!(refinement.selected, None);
    let factors: Vec<usize> = refinement.passes.iter().map(|r| r.downsample_factor).collect();
    assert_eq!(factors, vec![2, 4]);
    assert_eq!(refinement.passes[1].width, 20);
    assert_eq!(result.final_score, 0.5);
    assert_eq!(result.outcome, Outcome::NotDetected);
}

#[test]
fn refinement_reports_the_decisive_coarse_pass() {
    let mut p = profile(vec![
        ("a", stub(0.1).with_param("coarse_score", json!(0.95))),
        ("b", stub(0.1).with_param("coarse_score", json!(0.95))),
    ]);
    p.enable_refinement = true;
    p.max_refinement_attempts = 3;
    let result = run(p).unwrap();

    let refinement = result.refinement.as_ref().unwrap();
    assert!((refinement.initial_score - 0.55).abs() < 1e-5);
    assert_eq!(refinement.passes.len(), 1);
    assert!(refinement.passes[0].determined);
    assert!(!refinement.exhausted);
    assert_eq!(refinement.selected, Some(0));
    assert!((result.final_score - 0.975).abs() < 1e-5);
    assert!(result.detected);
}

#[test]
fn unknown_stub_parameter_is_rejected() {
    let p = profile(vec![("a", stub(0.5).with_param("scroe", json!(0.1)))]);
    let err = StructureDetector::with_registry(p, &registry()).unwrap_err();
    assert!(matches!(err, DetectorError::InvalidParameters { .. }));
}

#[test]
fn module_kind_must_be_registered() {
    let p = profile(vec![("volume", FeatureConfig::new(1.0))]);
    let err = StructureDetector::with_registry(p, &registry()).unwrap_err();
    assert!(matches!(err, DetectorError::UnknownModule { .. }));
}
