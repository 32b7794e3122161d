//! Streaming weighted-evidence aggregation.
//!
//! The aggregator consumes module results in completion order, resolves
//! their polarity, folds them into a [`StreamingState`] and records one
//! [`HistorySnapshot`] per arrival. In streaming mode it may reach an early
//! decision once enough decisive evidence has accumulated; results arriving
//! afterwards are reported as late arrivals and never change the decision.
//!
//! Without an early decision the final score is recomputed over the planned
//! module order, so it does not depend on which module happened to finish
//! first.

mod state;

pub use state::{weighted_score, AggregationPhase, HistorySnapshot, StreamingState, BASE_SCORE};

use crate::diagnostics::{EarlyDecision, Outcome};
use crate::error::{DetectorError, Result};
use crate::features::{polarity, FeatureOutput};
use crate::profile::{AggregationMethod, DetectorProfile, ThresholdConfig};
use crate::types::{FeatureMetadata, FeatureResult, ModuleFault, ModuleStatus, Polarity};
use log::{debug, warn};
use std::collections::BTreeMap;

/// Raw completion of one module as delivered by the executor.
#[derive(Clone, Debug)]
pub struct ModuleCompletion {
    pub name: String,
    pub weight: f32,
    pub preference: Option<Polarity>,
    pub outcome: std::result::Result<FeatureOutput, ModuleFault>,
    pub elapsed_ms: f64,
}

impl ModuleCompletion {
    /// Resolve polarity and turn the completion into a [`FeatureResult`].
    pub fn resolve(self) -> FeatureResult {
        let output = match self.outcome {
            Ok(output) => output,
            Err(fault) => {
                let mut failed = FeatureResult::failed(self.name, self.weight, fault);
                failed.elapsed_ms = self.elapsed_ms;
                return failed;
            }
        };
        let (polarity, score, polarity_source) = polarity::resolve(&output, self.preference);
        let status = if score.is_some() {
            ModuleStatus::Completed
        } else {
            ModuleStatus::Inconclusive
        };
        FeatureResult {
            module: self.name,
            score,
            magnitude: output.score,
            polarity,
            polarity_source,
            weight: self.weight,
            status,
            metadata: FeatureMetadata {
                metrics: output.metrics,
                notes: output.notes,
                error: None,
            },
            elapsed_ms: self.elapsed_ms,
        }
    }
}

/// Everything the aggregator knows once a pass is over.
#[derive(Clone, Debug)]
pub struct AggregationSummary {
    pub final_score: f32,
    pub confidence: f32,
    pub detected: bool,
    pub outcome: Outcome,
    /// One entry per planned module, in planned order.
    pub modules: Vec<FeatureResult>,
    pub history: Vec<HistorySnapshot>,
    pub early_decision: Option<EarlyDecision>,
    pub state: StreamingState,
}

/// Single-consumer aggregation loop state for one detection pass.
#[derive(Debug)]
pub struct StreamingAggregator {
    thresholds: ThresholdConfig,
    early_enabled: bool,
    planned: Vec<(String, f32)>,
    state: StreamingState,
    results: BTreeMap<String, FeatureResult>,
    history: Vec<HistorySnapshot>,
    early: Option<EarlyDecision>,
}

impl StreamingAggregator {
    /// Aggregator over the profile's planned modules.
    pub fn new(profile: &DetectorProfile) -> Self {
        let planned = profile
            .planned_features()
            .into_iter()
            .map(|(name, f)| (name.to_string(), f.weight))
            .collect();
        Self::with_plan(
            profile.thresholds.clone(),
            profile.aggregation_method == AggregationMethod::Streaming,
            planned,
        )
    }

    pub fn with_plan(
        thresholds: ThresholdConfig,
        early_enabled: bool,
        planned: Vec<(String, f32)>,
    ) -> Self {
        let planned_weight = planned.iter().map(|(_, w)| *w).sum();
        Self {
            thresholds,
            early_enabled,
            planned,
            state: StreamingState::new(planned_weight),
            results: BTreeMap::new(),
            history: Vec::new(),
            early: None,
        }
    }

    pub fn state(&self) -> &StreamingState {
        &self.state
    }

    pub fn history(&self) -> &[HistorySnapshot] {
        &self.history
    }

    pub fn is_decided(&self) -> bool {
        self.early.is_some()
    }

    pub fn early_decision(&self) -> Option<&EarlyDecision> {
        self.early.as_ref()
    }

    pub fn result(&self, name: &str) -> Option<&FeatureResult> {
        self.results.get(name)
    }

    /// Planned modules without a result yet, in planned order.
    pub fn pending(&self) -> Vec<String> {
        self.planned
            .iter()
            .filter(|(name, _)| !self.results.contains_key(name))
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn is_planned(&self, name: &str) -> bool {
        self.planned.iter().any(|(n, _)| n == name)
    }

    /// Fold one arriving result into the running state.
    ///
    /// Returns the history snapshot it produced, or `None` when the result
    /// was not aggregated (unplanned, duplicate, or arriving after an early
    /// decision, in which case it is kept as a late arrival).
    pub fn ingest(&mut self, mut result: FeatureResult) -> Option<HistorySnapshot> {
        if !self.is_planned(&result.module) {
            warn!("ignoring result of unplanned module `{}`", result.module);
            return None;
        }
        if self.results.contains_key(&result.module) {
            debug!("discarding duplicate result of `{}`", result.module);
            return None;
        }
        if self.is_decided() {
            if result.status != ModuleStatus::Failed {
                result.status = ModuleStatus::LateArrival;
            }
            debug!("`{}` arrived after the early decision", result.module);
            self.results.insert(result.module.clone(), result);
            return None;
        }

        self.state.apply(&result);
        let snapshot = HistorySnapshot::capture(self.history.len() + 1, &result, &self.state);
        self.history.push(snapshot.clone());
        self.results.insert(result.module.clone(), result);
        self.check_early_decision();
        Some(snapshot)
    }

    /// Store a placeholder (skipped or abandoned) without aggregating it.
    pub fn record(&mut self, placeholder: FeatureResult) {
        if self.is_planned(&placeholder.module) && !self.results.contains_key(&placeholder.module) {
            self.results.insert(placeholder.module.clone(), placeholder);
        }
    }

    fn check_early_decision(&mut self) {
        if !self.early_enabled || self.early.is_some() {
            return;
        }
        let t = &self.thresholds;
        let s = &self.state;
        let decisive = t.is_detection(s.score) || t.is_rejection(s.score);
        if s.completed >= t.min_modules_for_decision
            && s.confidence >= t.early_decision_threshold
            && decisive
        {
            let decision = EarlyDecision {
                step: self.history.len(),
                completed_modules: s.completed,
                final_score: s.score,
                confidence: s.confidence,
                detected: t.is_detection(s.score) && s.confidence >= t.confidence_threshold,
                outstanding: self.pending(),
            };
            debug!(
                "early decision at step {}: score={:.3} confidence={:.3} outstanding={}",
                decision.step,
                decision.final_score,
                decision.confidence,
                decision.outstanding.len()
            );
            self.state.phase = AggregationPhase::EarlyDecided;
            self.early = Some(decision);
        }
    }

    /// Close the pass and assemble the summary.
    ///
    /// Fails only when every module that ran produced a fault.
    pub fn finish(mut self) -> Result<AggregationSummary> {
        let modules: Vec<FeatureResult> = self
            .planned
            .iter()
            .map(|(name, weight)| {
                self.results
                    .remove(name)
                    .unwrap_or_else(|| FeatureResult::placeholder(name, *weight, ModuleStatus::Skipped))
            })
            .collect();

        let ran: Vec<&FeatureResult> = modules
            .iter()
            .filter(|m| !matches!(m.status, ModuleStatus::Skipped | ModuleStatus::Abandoned))
            .collect();
        if !ran.is_empty() && ran.iter().all(|m| m.status == ModuleStatus::Failed) {
            return Err(DetectorError::AllModulesFailed {
                attempted: ran.len(),
            });
        }

        let (final_score, confidence, state) = match &self.early {
            Some(decision) => (decision.final_score, decision.confidence, self.state),
            None => {
                let mut ordered = StreamingState::new(self.state.planned_weight);
                for m in &modules {
                    ordered.apply(m);
                }
                ordered.phase = AggregationPhase::Completed;
                (ordered.score, ordered.confidence, ordered)
            }
        };

        let t = &self.thresholds;
        let detected = t.is_detection(final_score) && confidence >= t.confidence_threshold;
        Ok(AggregationSummary {
            final_score,
            confidence,
            detected,
            outcome: Outcome::classify(final_score, confidence, t),
            modules,
            history: self.history,
            early_decision: self.early,
            state,
        })
    }
}
