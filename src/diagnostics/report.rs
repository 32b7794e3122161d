use crate::aggregator::HistorySnapshot;
use crate::diagnostics::{RefinementStage, TimingBreakdown};
use crate::profile::ThresholdConfig;
use crate::types::{FeatureResult, GeoPoint, ModuleStatus};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Final classification of a detection call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Detected,
    /// Enough evidence was gathered and it does not support the structure.
    NotDetected,
    /// Confidence stayed below the confidence threshold.
    InsufficientEvidence,
}

impl Outcome {
    pub fn classify(score: f32, confidence: f32, thresholds: &ThresholdConfig) -> Self {
        if confidence < thresholds.confidence_threshold {
            Outcome::InsufficientEvidence
        } else if thresholds.is_detection(score) {
            Outcome::Detected
        } else {
            Outcome::NotDetected
        }
    }
}

/// The point at which the aggregator stopped waiting for further modules.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarlyDecision {
    /// History step that triggered the decision.
    pub step: usize,
    pub completed_modules: usize,
    pub final_score: f32,
    pub confidence: f32,
    pub detected: bool,
    /// Planned modules without a result at decision time.
    pub outstanding: Vec<String>,
}

/// Immutable report of one detection call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub profile: String,
    pub center: GeoPoint,
    pub final_score: f32,
    pub confidence: f32,
    pub detected: bool,
    pub outcome: Outcome,
    /// Per-module breakdown in planned order.
    pub modules: Vec<FeatureResult>,
    pub history: Vec<HistorySnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub early_decision: Option<EarlyDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refinement: Option<RefinementStage>,
    pub timings: TimingBreakdown,
}

fn format_optional(val: Option<f32>) -> String {
    val.map(|v| format!("{v:.3}"))
        .unwrap_or_else(|| "-".to_string())
}

impl DetectionResult {
    pub fn module(&self, name: &str) -> Option<&FeatureResult> {
        self.modules.iter().find(|m| m.module == name)
    }

    /// Results whose weight entered the final score.
    pub fn contributing(&self) -> impl Iterator<Item = &FeatureResult> {
        self.modules.iter().filter(|m| m.counts_toward_weight())
    }

    pub fn count_with_status(&self, status: ModuleStatus) -> usize {
        self.modules.iter().filter(|m| m.status == status).count()
    }

    /// Multi-line human-readable summary.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Detection summary ({})", self.profile);
        let _ = writeln!(
            out,
            "  center: {:.6}, {:.6}",
            self.center.lat, self.center.lon
        );
        let _ = writeln!(out, "  outcome: {:?}", self.outcome);
        let _ = writeln!(out, "  final_score: {:.3}", self.final_score);
        let _ = writeln!(out, "  confidence: {:.3}", self.confidence);
        if let Some(early) = &self.early_decision {
            let _ = writeln!(
                out,
                "  early decision at step {} after {} modules (outstanding: {})",
                early.step,
                early.completed_modules,
                if early.outstanding.is_empty() {
                    "none".to_string()
                } else {
                    early.outstanding.join(", ")
                }
            );
        }
        let _ = writeln!(out, "\nModules");
        for m in &self.modules {
            let _ = writeln!(
                out,
                "  {:<20} {:<13} score={:<6} magnitude={:<6} polarity={:<8} weight={:.2} {:.2} ms",
                m.module,
                format!("{:?}", m.status),
                format_optional(m.score),
                format_optional(m.magnitude),
                format!("{:?}", m.polarity),
                m.weight,
                m.elapsed_ms
            );
            if let Some(err) = &m.metadata.error {
                let _ = writeln!(out, "    error ({:?}): {}", err.kind, err.message);
            }
        }
        if let Some(refine) = &self.refinement {
            let _ = writeln!(
                out,
                "\nRefinement: {} passes, exhausted={}",
                refine.passes.len(),
                refine.exhausted
            );
            for pass in &refine.passes {
                let _ = writeln!(
                    out,
                    "  x{} ({}x{} @ {:.2} m): score={:.3} confidence={:.3} determined={}",
                    pass.downsample_factor,
                    pass.width,
                    pass.height,
                    pass.resolution_m,
                    pass.final_score,
                    pass.confidence,
                    pass.determined
                );
            }
        }
        let stages: Vec<String> = self
            .timings
            .stages
            .iter()
            .map(|s| format!("{}={:.3}", s.label, s.elapsed_ms))
            .collect();
        let _ = writeln!(
            out,
            "\nTimings (ms): {} total={:.3}",
            stages.join(" "),
            self.timings.total_ms
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_separates_confident_negative_from_undetermined() {
        let t = ThresholdConfig::default();
        assert_eq!(Outcome::classify(0.9, 0.8, &t), Outcome::Detected);
        assert_eq!(Outcome::classify(0.2, 0.8, &t), Outcome::NotDetected);
        assert_eq!(Outcome::classify(0.9, 0.1, &t), Outcome::InsufficientEvidence);
    }

    #[test]
    fn prior_score_is_never_a_detection() {
        let t = ThresholdConfig {
            detection_threshold: 0.5,
            ..ThresholdConfig::default()
        };
        assert_eq!(Outcome::classify(0.5, 1.0, &t), Outcome::NotDetected);
        assert_eq!(Outcome::classify(0.51, 1.0, &t), Outcome::Detected);
    }

    #[test]
    fn outcome_serializes_snake_case() {
        let json = serde_json::to_string(&Outcome::InsufficientEvidence).unwrap();
        assert_eq!(json, "\"insufficient_evidence\"");
    }
}
