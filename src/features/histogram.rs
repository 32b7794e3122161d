//! Elevation histogram similarity.
//!
//! Heights inside the detection radius are min/max normalised, binned and
//! smoothed, then compared against a reference distribution. Without a
//! trained reference the module compares against the ideal paraboloid
//! mound, whose normalised heights are uniformly distributed.
//!
//! A flat patch collapses into the lowest bin and scores poorly against
//! any spread-out reference; `min_similarity` turns that into an explicit
//! rejection handled by the configured [`RejectionPolicy`].

use super::{parse_params, FeatureModule, FeatureOutput, ParamMap};
use crate::error::ModuleError;
use crate::features::polarity::RejectionPolicy;
use crate::patch::{sampling::relief, ElevationPatch};
use crate::profile::GeometryConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const FLAT_RANGE_M: f32 = 1e-6;
const MIN_ADAPTIVE_BINS: usize = 8;
const MAX_ADAPTIVE_BINS: usize = 32;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Bhattacharyya coefficient `Σ √(p·q)`.
    #[default]
    Bhattacharyya,
    Cosine,
    /// Histogram intersection `Σ min(p, q)`.
    Intersection,
}

impl SimilarityMetric {
    /// Similarity in `[0, 1]` of two normalised histograms of equal length.
    pub fn compare(self, p: &[f32], q: &[f32]) -> f32 {
        let pairs = p.iter().zip(q);
        let s = match self {
            SimilarityMetric::Bhattacharyya => pairs.map(|(a, b)| (a * b).max(0.0).sqrt()).sum(),
            SimilarityMetric::Intersection => pairs.map(|(a, b)| a.min(*b)).sum(),
            SimilarityMetric::Cosine => {
                let dot: f32 = pairs.map(|(a, b)| a * b).sum();
                let np = p.iter().map(|a| a * a).sum::<f32>().sqrt();
                let nq = q.iter().map(|b| b * b).sum::<f32>().sqrt();
                if np <= f32::EPSILON || nq <= f32::EPSILON {
                    0.0
                } else {
                    dot / (np * nq)
                }
            }
        };
        s.clamp(0.0, 1.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HistogramParams {
    pub bins: usize,
    /// Pick `√n` bins (clamped to [8, 32]) from the sample count instead.
    pub adaptive_bins: bool,
    /// Number of [1, 2, 1]/4 smoothing passes.
    pub smoothing_passes: usize,
    /// Bins holding less than this share of the mass are zeroed.
    pub noise_floor: f32,
    pub metric: SimilarityMetric,
    /// Trained fingerprint; rebinned to the working bin count.
    pub reference: Option<Vec<f32>>,
    pub min_similarity: Option<f32>,
    pub rejection: RejectionPolicy,
    pub rejection_score: f32,
    pub radius_scale: f32,
    pub min_samples: usize,
}

impl Default for HistogramParams {
    fn default() -> Self {
        Self {
            bins: 16,
            adaptive_bins: false,
            smoothing_passes: 1,
            noise_floor: 0.0,
            metric: SimilarityMetric::Bhattacharyya,
            reference: None,
            min_similarity: None,
            rejection: RejectionPolicy::Penalize,
            rejection_score: 0.0,
            radius_scale: 1.0,
            min_samples: 16,
        }
    }
}

impl HistogramParams {
    fn validate(&self) -> Result<(), String> {
        if self.bins < 2 {
            return Err(format!("bins must be at least 2, got {}", self.bins));
        }
        if !(0.0..1.0).contains(&self.noise_floor) {
            return Err(format!("noise_floor must lie in [0, 1), got {}", self.noise_floor));
        }
        if let Some(t) = self.min_similarity {
            if !(0.0..=1.0).contains(&t) {
                return Err(format!("min_similarity must lie in [0, 1], got {t}"));
            }
        }
        if !(self.radius_scale.is_finite() && self.radius_scale > 0.0) {
            return Err("radius_scale must be positive".into());
        }
        if let Some(reference) = &self.reference {
            if reference.is_empty() || reference.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return Err("reference must be a non-empty list of non-negative numbers".into());
            }
            if reference.iter().sum::<f32>() <= 0.0 {
                return Err("reference holds no mass".into());
            }
        }
        Ok(())
    }
}

/// Linear histogram over normalised heights in `[0, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct ElevationHistogram {
    bins: Vec<f32>,
}

impl ElevationHistogram {
    pub fn new(num_bins: usize) -> Self {
        ElevationHistogram {
            bins: vec![0.0; num_bins.max(1)],
        }
    }

    pub fn bins(&self) -> &[f32] {
        &self.bins
    }

    pub fn accumulate(&mut self, value: f32, weight: f32) {
        if !value.is_finite() {
            return;
        }
        let n = self.bins.len();
        let idx = ((value.clamp(0.0, 1.0) * n as f32) as usize).min(n - 1);
        self.bins[idx] += weight.max(0.0);
    }

    /// Applies a [1, 2, 1]/4 kernel, replicating the end bins.
    pub fn smooth_121(&mut self) {
        let n = self.bins.len();
        if n <= 1 {
            return;
        }
        let mut smoothed = vec![0.0f32; n];
        for (i, dst) in smoothed.iter_mut().enumerate() {
            let prev = self.bins[i.saturating_sub(1)];
            let curr = self.bins[i];
            let next = self.bins[(i + 1).min(n - 1)];
            *dst = (prev + 2.0 * curr + next) * 0.25;
        }
        self.bins = smoothed;
    }

    /// Scale to unit mass; an empty histogram stays all-zero.
    pub fn normalize(&mut self) {
        let total: f32 = self.bins.iter().sum();
        if total > 0.0 {
            self.bins.iter_mut().for_each(|b| *b /= total);
        }
    }

    /// Zero bins below `floor` (share of mass), then renormalise.
    /// Leaves the histogram untouched if nothing would survive.
    pub fn suppress_noise(&mut self, floor: f32) {
        if floor <= 0.0 {
            return;
        }
        self.normalize();
        if self.bins.iter().all(|&b| b < floor) {
            return;
        }
        self.bins.iter_mut().filter(|b| **b < floor).for_each(|b| *b = 0.0);
        self.normalize();
    }
}

/// Resample a distribution to `n` bins by interpolating its cumulative mass.
pub fn rebin(source: &[f32], n: usize) -> Vec<f32> {
    let m = source.len();
    if m == 0 || n == 0 {
        return vec![0.0; n];
    }
    let total: f32 = source.iter().sum();
    if total <= 0.0 {
        return vec![1.0 / n as f32; n];
    }
    let mut cdf = Vec::with_capacity(m + 1);
    cdf.push(0.0f32);
    for v in source {
        let last = cdf[cdf.len() - 1];
        cdf.push(last + v / total);
    }
    let cdf_at = |t: f32| {
        let pos = t * m as f32;
        let i = (pos.floor() as usize).min(m - 1);
        let frac = pos - i as f32;
        cdf[i] + (cdf[i + 1] - cdf[i]) * frac
    };
    (0..n)
        .map(|k| {
            let lo = cdf_at(k as f32 / n as f32);
            let hi = cdf_at((k + 1) as f32 / n as f32);
            (hi - lo).max(0.0)
        })
        .collect()
}

/// Build the normalised, smoothed histogram of heights within `radius_m`.
///
/// Returns `None` when fewer than `min_samples` valid samples are inside.
fn disc_histogram(
    patch: &ElevationPatch,
    radius_m: f32,
    params: &HistogramParams,
) -> Option<(ElevationHistogram, usize, f32)> {
    let samples = patch.disc(radius_m);
    if samples.len() < params.min_samples.max(1) {
        return None;
    }
    let bins = if params.adaptive_bins {
        ((samples.len() as f32).sqrt().round() as usize).clamp(MIN_ADAPTIVE_BINS, MAX_ADAPTIVE_BINS)
    } else {
        params.bins
    };
    let range = relief(&samples);
    let lo = samples.iter().map(|s| s.z).fold(f32::INFINITY, f32::min);
    let mut hist = ElevationHistogram::new(bins);
    for s in &samples {
        let v = if range <= FLAT_RANGE_M {
            0.0
        } else {
            (s.z - lo) / range
        };
        hist.accumulate(v, 1.0);
    }
    hist.normalize();
    for _ in 0..params.smoothing_passes {
        hist.smooth_121();
    }
    hist.suppress_noise(params.noise_floor);
    hist.normalize();
    Some((hist, samples.len(), range))
}

/// Average fingerprint of `patches` around their centres.
///
/// Patches without enough samples inside `radius_m` are skipped; `None`
/// when none contributes.
pub fn train_reference(
    patches: &[ElevationPatch],
    radius_m: f32,
    params: &HistogramParams,
) -> Option<Vec<f32>> {
    let training = HistogramParams {
        adaptive_bins: false,
        ..params.clone()
    };
    let mut acc = vec![0.0f32; training.bins.max(1)];
    let mut used = 0usize;
    for patch in patches {
        if let Some((hist, _, _)) = disc_histogram(patch, radius_m, &training) {
            acc.iter_mut().zip(hist.bins()).for_each(|(a, b)| *a += b);
            used += 1;
        }
    }
    if used == 0 {
        return None;
    }
    acc.iter_mut().for_each(|a| *a /= used as f32);
    Some(acc)
}

#[derive(Clone, Debug)]
pub struct HistogramModule {
    params: HistogramParams,
}

impl HistogramModule {
    pub fn new(params: HistogramParams) -> Result<Self, String> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn from_params(params: &ParamMap) -> Result<Self, String> {
        Self::new(parse_params(params)?)
    }

    fn reference(&self, bins: usize) -> Vec<f32> {
        match &self.params.reference {
            Some(r) if r.len() == bins => {
                let total: f32 = r.iter().sum();
                r.iter().map(|v| v / total).collect()
            }
            Some(r) => rebin(r, bins),
            None => vec![1.0 / bins as f32; bins],
        }
    }
}

pub(crate) fn factory(params: &ParamMap) -> Result<Arc<dyn FeatureModule>, String> {
    Ok(Arc::new(HistogramModule::from_params(params)?))
}

impl FeatureModule for HistogramModule {
    fn kind(&self) -> &str {
        "histogram"
    }

    fn compute(
        &self,
        patch: &ElevationPatch,
        geometry: &GeometryConfig,
    ) -> Result<FeatureOutput, ModuleError> {
        let p = &self.params;
        let radius = geometry.structure_radius_m * p.radius_scale;
        let Some((hist, samples, range)) = disc_histogram(patch, radius, p) else {
            return Ok(FeatureOutput::inconclusive(format!(
                "fewer than {} valid samples within {radius:.1} m",
                p.min_samples
            )));
        };
        let reference = self.reference(hist.bins().len());
        let similarity = p.metric.compare(hist.bins(), &reference);

        let output = FeatureOutput::scored(similarity)
            .with_metric("similarity", similarity)
            .with_metric("bins", hist.bins().len() as f64)
            .with_metric("samples", samples as f64)
            .with_metric("relief_m", range);
        match p.min_similarity {
            Some(min) if similarity < min => Ok(p.rejection.apply(output, similarity, p.rejection_score)),
            _ => Ok(output),
        }
    }
}
