use crate::types::{FeatureResult, ModuleStatus, Polarity};
use serde::{Deserialize, Serialize};

/// Neutral prior the running score starts from.
pub const BASE_SCORE: f32 = 0.5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPhase {
    #[default]
    Accumulating,
    EarlyDecided,
    Completed,
}

/// Running weighted-evidence totals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingState {
    pub positive_evidence: f32,
    pub negative_evidence: f32,
    /// Weight of every result that counted, neutral ones included.
    pub total_weight: f32,
    /// Weight of every planned module: the confidence denominator.
    pub planned_weight: f32,
    /// Number of results that counted toward `total_weight`.
    pub completed: usize,
    pub score: f32,
    pub confidence: f32,
    pub phase: AggregationPhase,
}

impl StreamingState {
    pub fn new(planned_weight: f32) -> Self {
        Self {
            positive_evidence: 0.0,
            negative_evidence: 0.0,
            total_weight: 0.0,
            planned_weight,
            completed: 0,
            score: BASE_SCORE,
            confidence: 0.0,
            phase: AggregationPhase::Accumulating,
        }
    }

    /// Fold one result into the totals. Returns whether it counted.
    pub fn apply(&mut self, result: &FeatureResult) -> bool {
        if !result.counts_toward_weight() {
            return false;
        }
        let evidence = result.score.unwrap_or(0.0) * result.weight;
        match result.polarity {
            Polarity::Positive => self.positive_evidence += evidence,
            Polarity::Negative => self.negative_evidence += evidence,
            Polarity::Neutral => {}
        }
        self.total_weight += result.weight;
        self.completed += 1;
        self.recompute();
        true
    }

    fn recompute(&mut self) {
        self.score = weighted_score(
            self.positive_evidence,
            self.negative_evidence,
            self.total_weight,
        );
        self.confidence = if self.planned_weight > 0.0 {
            (self.total_weight / self.planned_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };
    }
}

/// `clamp(0.5 + (P − N) / T · 0.5, 0, 1)`, or the prior when nothing counted.
pub fn weighted_score(positive: f32, negative: f32, total_weight: f32) -> f32 {
    if total_weight <= 0.0 {
        return BASE_SCORE;
    }
    (BASE_SCORE + (positive - negative) / total_weight * 0.5).clamp(0.0, 1.0)
}

/// One entry of the streaming history, appended per arriving result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySnapshot {
    /// 1-based arrival index within the pass.
    pub step: usize,
    pub module: String,
    pub score: Option<f32>,
    pub magnitude: Option<f32>,
    pub polarity: Polarity,
    pub weight: f32,
    pub status: ModuleStatus,
    pub running_score: f32,
    pub running_confidence: f32,
    pub positive_evidence: f32,
    pub negative_evidence: f32,
}

impl HistorySnapshot {
    pub(crate) fn capture(step: usize, result: &FeatureResult, state: &StreamingState) -> Self {
        Self {
            step,
            module: result.module.clone(),
            score: result.score,
            magnitude: result.magnitude,
            polarity: result.polarity,
            weight: result.weight,
            status: result.status,
            running_score: state.score,
            running_confidence: state.confidence,
            positive_evidence: state.positive_evidence,
            negative_evidence: state.negative_evidence,
        }
    }
}
