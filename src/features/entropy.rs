//! Shannon entropy of elevations or local residuals inside the radius.
//!
//! Engineered surfaces are ordered: their local residuals (3×3 neighbour
//! mean minus height) concentrate in a few bins. Rough natural terrain
//! spreads across many. The entropy is normalised either by the bin count
//! or by the sample count. Its polarity is decided by the module's own
//! [`PolarityRule`], which defaults to "low entropy supports".

use super::polarity::PolarityRule;
use super::{parse_params, FeatureModule, FeatureOutput, ParamMap};
use crate::error::ModuleError;
use crate::patch::{sampling::relief, ElevationPatch, RadialSample};
use crate::profile::GeometryConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntropyMode {
    /// Local residuals binned at a fixed width.
    #[default]
    Residual,
    /// Min/max normalised heights.
    Elevation,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntropyNormalization {
    /// Divide by `ln(bins)`.
    #[default]
    Bins,
    /// Divide by `ln(min(samples, bins))`, the largest entropy the sample
    /// count can reach.
    Samples,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EntropyParams {
    pub mode: EntropyMode,
    pub bins: usize,
    /// Residual bin width; residuals beyond the outer bins are clamped.
    pub residual_bin_m: f32,
    pub normalization: EntropyNormalization,
    pub min_relief_m: f32,
    pub min_samples: usize,
    pub radius_scale: f32,
    pub polarity_rule: PolarityRule,
}

impl Default for EntropyParams {
    fn default() -> Self {
        Self {
            mode: EntropyMode::Residual,
            bins: 16,
            residual_bin_m: 0.05,
            normalization: EntropyNormalization::Bins,
            min_relief_m: 0.5,
            min_samples: 16,
            radius_scale: 1.0,
            polarity_rule: PolarityRule::low_is_positive(0.5, 0.05),
        }
    }
}

impl EntropyParams {
    fn validate(&self) -> Result<(), String> {
        if self.bins < 2 {
            return Err(format!("bins must be at least 2, got {}", self.bins));
        }
        if !(self.residual_bin_m > 0.0) {
            return Err("residual_bin_m must be positive".into());
        }
        if !(self.min_relief_m >= 0.0 && self.radius_scale > 0.0) {
            return Err("min_relief_m must be non-negative and radius_scale positive".into());
        }
        self.polarity_rule.validate()
    }
}

/// 3×3 neighbour mean minus the centre height, over valid neighbours.
fn local_residual(patch: &ElevationPatch, s: &RadialSample) -> Option<f32> {
    let mut sum = 0.0;
    let mut n = 0;
    for yy in s.y.saturating_sub(1)..=(s.y + 1).min(patch.h - 1) {
        for xx in s.x.saturating_sub(1)..=(s.x + 1).min(patch.w - 1) {
            if (xx, yy) == (s.x, s.y) {
                continue;
            }
            if let Some(z) = patch.valid(xx, yy) {
                sum += z;
                n += 1;
            }
        }
    }
    (n > 0).then(|| sum / n as f32 - s.z)
}

/// Shannon entropy (nats) of a count histogram.
fn shannon(counts: &[usize]) -> f64 {
    let total: usize = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total as f64;
            -p * p.ln()
        })
        .sum()
}

#[derive(Clone, Debug)]
pub struct EntropyModule {
    params: EntropyParams,
}

impl EntropyModule {
    pub fn new(params: EntropyParams) -> Result<Self, String> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn from_params(params: &ParamMap) -> Result<Self, String> {
        Self::new(parse_params(params)?)
    }

    fn histogram(&self, patch: &ElevationPatch, samples: &[RadialSample]) -> Vec<usize> {
        let p = &self.params;
        let bins = p.bins;
        let mut counts = vec![0usize; bins];
        let to_bin = |v: f32| (v.floor().max(0.0) as usize).min(bins - 1);
        match p.mode {
            EntropyMode::Residual => {
                let offset = (bins / 2) as f32;
                for s in samples {
                    if let Some(r) = local_residual(patch, s) {
                        counts[to_bin(r / p.residual_bin_m + offset)] += 1;
                    }
                }
            }
            EntropyMode::Elevation => {
                let range = relief(samples);
                let lo = samples.iter().map(|s| s.z).fold(f32::INFINITY, f32::min);
                for s in samples {
                    let t = if range > 0.0 { (s.z - lo) / range } else { 0.0 };
                    counts[to_bin(t * bins as f32)] += 1;
                }
            }
        }
        counts
    }
}

pub(crate) fn factory(params: &ParamMap) -> Result<Arc<dyn FeatureModule>, String> {
    Ok(Arc::new(EntropyModule::from_params(params)?))
}

impl FeatureModule for EntropyModule {
    fn kind(&self) -> &str {
        "entropy"
    }

    fn compute(
        &self,
        patch: &ElevationPatch,
        geometry: &GeometryConfig,
    ) -> Result<FeatureOutput, ModuleError> {
        let p = &self.params;
        let radius = geometry.structure_radius_m * p.radius_scale;
        let samples = patch.disc(radius);
        if samples.len() < p.min_samples {
            return Ok(FeatureOutput::inconclusive(format!(
                "{} samples within {radius:.1} m, need {}",
                samples.len(),
                p.min_samples
            )));
        }

        let counts = self.histogram(patch, &samples);
        let used: usize = counts.iter().sum();
        let entropy = shannon(&counts);
        let max_entropy = match p.normalization {
            EntropyNormalization::Bins => (p.bins as f64).ln(),
            EntropyNormalization::Samples => (used.min(p.bins).max(2) as f64).ln(),
        };
        let normalized = (entropy / max_entropy).clamp(0.0, 1.0);
        let occupied = counts.iter().filter(|&&c| c > 0).count();
        let relief_m = relief(&samples);

        let output = if relief_m < p.min_relief_m {
            FeatureOutput::inconclusive(format!(
                "relief {relief_m:.2} m below {} m; order carries no evidence",
                p.min_relief_m
            ))
        } else {
            FeatureOutput::scored(normalized as f32)
        };
        Ok(output
            .with_rule(p.polarity_rule)
            .with_metric("entropy_nats", entropy)
            .with_metric("normalized_entropy", normalized)
            .with_metric("occupied_bins", occupied as f64)
            .with_metric("relief_m", relief_m)
            .with_metric("samples", used as f64))
    }
}
