//! Magnitude-to-polarity rules and rejection policies.
//!
//! Each module owns its rule and exposes it through its parameters, so the
//! pivot separating "supports the structure" from "contradicts it" is
//! calibrated per module rather than hardcoded in the aggregator.

use super::FeatureOutput;
use crate::types::{Polarity, PolaritySource};
use serde::{Deserialize, Serialize};

/// Maps a module's raw magnitude in `[0, 1]` to a polarity and evidence strength.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolarityRule {
    /// Always the same polarity; evidence equals the magnitude.
    Fixed { polarity: Polarity },
    /// Split at `pivot`: magnitudes within `neutral_band` of it are neutral,
    /// below map to `below`, above to `above`. Evidence grows with the
    /// distance from the pivot, normalised to `[0, 1]` on each side.
    Pivot {
        pivot: f32,
        neutral_band: f32,
        below: Polarity,
        above: Polarity,
    },
}

impl Default for PolarityRule {
    fn default() -> Self {
        PolarityRule::Fixed {
            polarity: Polarity::Positive,
        }
    }
}

impl PolarityRule {
    /// Pivot rule where low magnitudes support and high ones contradict.
    pub fn low_is_positive(pivot: f32, neutral_band: f32) -> Self {
        PolarityRule::Pivot {
            pivot,
            neutral_band,
            below: Polarity::Positive,
            above: Polarity::Negative,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if let PolarityRule::Pivot {
            pivot,
            neutral_band,
            ..
        } = *self
        {
            if !(pivot > 0.0 && pivot < 1.0) {
                return Err(format!("polarity pivot must lie in (0, 1), got {pivot}"));
            }
            if !(0.0..0.5).contains(&neutral_band) {
                return Err(format!("neutral band must lie in [0, 0.5), got {neutral_band}"));
            }
        }
        Ok(())
    }

    /// Resolve `magnitude` into `(polarity, evidence)`.
    pub fn resolve(&self, magnitude: f32) -> (Polarity, f32) {
        let m = magnitude.clamp(0.0, 1.0);
        match *self {
            PolarityRule::Fixed { polarity } => (polarity, m),
            PolarityRule::Pivot {
                pivot,
                neutral_band,
                below,
                above,
            } => {
                if (m - pivot).abs() <= neutral_band {
                    (Polarity::Neutral, 0.0)
                } else if m < pivot {
                    (below, ((pivot - m) / pivot).clamp(0.0, 1.0))
                } else {
                    (above, ((m - pivot) / (1.0 - pivot)).clamp(0.0, 1.0))
                }
            }
        }
    }
}

/// Resolve the polarity of a module output.
///
/// Precedence: the module's forced rejection polarity, then the profile's
/// declared preference, then the module's own rule. Returns the polarity,
/// the evidence score (`None` when inconclusive) and its source.
pub fn resolve(
    output: &FeatureOutput,
    preference: Option<Polarity>,
) -> (Polarity, Option<f32>, PolaritySource) {
    let Some(magnitude) = output.score else {
        return (Polarity::Neutral, None, PolaritySource::Unresolved);
    };
    if let Some(forced) = output.forced_polarity {
        return (forced, Some(magnitude), PolaritySource::Rejection);
    }
    if let Some(declared) = preference {
        return (declared, Some(magnitude), PolaritySource::Profile);
    }
    let (polarity, evidence) = output.rule.resolve(magnitude);
    (polarity, Some(evidence), PolaritySource::ModuleRule)
}

/// What a module does with itself when its own rejection test fires.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionPolicy {
    /// Force a near-zero score that still counts toward total weight.
    #[default]
    Penalize,
    /// Count as negative evidence of strength `1 − value`.
    Negative,
    /// Drop out of the weighting entirely (inconclusive).
    Exclude,
}

impl RejectionPolicy {
    /// Rewrite `output` after a failed test on `value` (e.g. a similarity).
    pub fn apply(self, output: FeatureOutput, value: f32, rejection_score: f32) -> FeatureOutput {
        let output = output.with_metric("rejected", 1.0);
        match self {
            RejectionPolicy::Penalize => FeatureOutput {
                score: Some(rejection_score.clamp(0.0, 1.0)),
                forced_polarity: Some(Polarity::Positive),
                ..output
            },
            RejectionPolicy::Negative => FeatureOutput {
                score: Some((1.0 - value).clamp(0.0, 1.0)),
                forced_polarity: Some(Polarity::Negative),
                ..output
            },
            RejectionPolicy::Exclude => FeatureOutput {
                score: None,
                forced_polarity: None,
                ..output
            }
            .with_note("excluded by rejection policy"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn pivot_rule_maps_both_sides() {
        let rule = PolarityRule::low_is_positive(0.5, 0.05);
        let (p, e) = rule.resolve(0.1);
        assert_eq!(p, Polarity::Positive);
        assert!(approx_eq(e, 0.8));
        let (p, e) = rule.resolve(0.9);
        assert_eq!(p, Polarity::Negative);
        assert!(approx_eq(e, 0.8));
        let (p, e) = rule.resolve(0.52);
        assert_eq!(p, Polarity::Neutral);
        assert_eq!(e, 0.0);
    }

    #[test]
    fn preference_overrides_module_rule() {
        let out = FeatureOutput::scored(0.9).with_rule(PolarityRule::low_is_positive(0.5, 0.0));
        let (p, s, src) = resolve(&out, Some(Polarity::Positive));
        assert_eq!((p, s, src), (Polarity::Positive, Some(0.9), PolaritySource::Profile));
        let (p, _, src) = resolve(&out, None);
        assert_eq!((p, src), (Polarity::Negative, PolaritySource::ModuleRule));
    }

    #[test]
    fn rejection_wins_over_preference() {
        let out = RejectionPolicy::Negative.apply(FeatureOutput::scored(0.3), 0.3, 0.0);
        let (p, s, src) = resolve(&out, Some(Polarity::Positive));
        assert_eq!(p, Polarity::Negative);
        assert!(approx_eq(s.unwrap(), 0.7));
        assert_eq!(src, PolaritySource::Rejection);
    }

    #[test]
    fn exclude_makes_output_inconclusive() {
        let out = RejectionPolicy::Exclude.apply(FeatureOutput::scored(0.3), 0.3, 0.0);
        assert!(out.score.is_none());
        assert_eq!(resolve(&out, None).2, PolaritySource::Unresolved);
    }

    #[test]
    fn pivot_validation() {
        assert!(PolarityRule::low_is_positive(0.0, 0.1).validate().is_err());
        assert!(PolarityRule::low_is_positive(0.4, 0.6).validate().is_err());
        assert!(PolarityRule::low_is_positive(0.4, 0.1).validate().is_ok());
    }

    #[test]
    fn rule_deserializes_from_tagged_json() {
        let rule: PolarityRule = serde_json::from_str(
            r#"{"type":"pivot","pivot":0.4,"neutral_band":0.1,"below":"positive","above":"negative"}"#,
        )
        .unwrap();
        assert_eq!(rule, PolarityRule::low_is_positive(0.4, 0.1));
    }
}
