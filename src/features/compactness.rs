//! Circularity and symmetry of the angular height profile.
//!
//! Heights are sampled on a circle at `sample_radius_ratio · R` and taken
//! relative to the surrounding base level. A round structure gives a flat
//! profile (low coefficient of variation) with matching opposite points.
//! The optional Fourier filter penalises energy in harmonics above
//! `max_harmonic`, which smooth built outlines lack and jagged natural
//! outlines carry.

use super::surface::{mean_std, median};
use super::{parse_params, FeatureModule, FeatureOutput, ParamMap};
use crate::error::ModuleError;
use crate::patch::ElevationPatch;
use crate::profile::GeometryConfig;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::sync::Arc;

const PEAK_RADIUS_RATIO: f32 = 0.2;
const BASE_ANNULUS: (f32, f32) = (1.1, 1.25);
/// Share of profile points that may be missing before giving up.
const MAX_MISSING_SHARE: f32 = 0.25;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompactnessParams {
    /// Profile points around the circle (even, at least 8).
    pub samples: usize,
    pub sample_radius_ratio: f32,
    pub min_relief_m: f32,
    pub fourier_filter: bool,
    pub max_harmonic: usize,
    /// Blend of circularity against opposite-point symmetry.
    pub circularity_weight: f32,
    /// Profile height relative to peak relief needed for full credit.
    pub min_prominence: f32,
    pub radius_scale: f32,
}

impl Default for CompactnessParams {
    fn default() -> Self {
        Self {
            samples: 36,
            sample_radius_ratio: 0.6,
            min_relief_m: 0.5,
            fourier_filter: false,
            max_harmonic: 4,
            circularity_weight: 0.6,
            min_prominence: 0.2,
            radius_scale: 1.0,
        }
    }
}

impl CompactnessParams {
    fn validate(&self) -> Result<(), String> {
        if self.samples < 8 || self.samples % 2 != 0 {
            return Err(format!("samples must be even and at least 8, got {}", self.samples));
        }
        if !(self.sample_radius_ratio > 0.0 && self.sample_radius_ratio <= 1.0) {
            return Err("sample_radius_ratio must lie in (0, 1]".into());
        }
        if self.max_harmonic == 0 || self.max_harmonic >= self.samples / 2 {
            return Err(format!(
                "max_harmonic must lie in [1, {}), got {}",
                self.samples / 2,
                self.max_harmonic
            ));
        }
        if !(0.0..=1.0).contains(&self.circularity_weight) {
            return Err("circularity_weight must lie in [0, 1]".into());
        }
        if !(self.min_prominence > 0.0 && self.min_relief_m >= 0.0 && self.radius_scale > 0.0) {
            return Err("min_prominence and radius_scale must be positive".into());
        }
        Ok(())
    }
}

/// Energy of harmonics `1..=n/2`, split at `max_harmonic`.
fn harmonic_energy(profile: &[f32], max_harmonic: usize) -> (f64, f64, f64) {
    let n = profile.len();
    let mut low = 0.0;
    let mut high = 0.0;
    let mut dc = 0.0;
    for k in 0..=n / 2 {
        let (mut re, mut im) = (0.0f64, 0.0f64);
        for (i, &h) in profile.iter().enumerate() {
            let phase = TAU * (k * i) as f64 / n as f64;
            re += h as f64 * phase.cos();
            im -= h as f64 * phase.sin();
        }
        let power = re * re + im * im;
        match k {
            0 => dc = power,
            k if k <= max_harmonic => low += power,
            _ => high += power,
        }
    }
    (dc, low, high)
}

#[derive(Clone, Debug)]
pub struct CompactnessModule {
    params: CompactnessParams,
}

impl CompactnessModule {
    pub fn new(params: CompactnessParams) -> Result<Self, String> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn from_params(params: &ParamMap) -> Result<Self, String> {
        Self::new(parse_params(params)?)
    }
}

pub(crate) fn factory(params: &ParamMap) -> Result<Arc<dyn FeatureModule>, String> {
    Ok(Arc::new(CompactnessModule::from_params(params)?))
}

impl FeatureModule for CompactnessModule {
    fn kind(&self) -> &str {
        "compactness"
    }

    fn compute(
        &self,
        patch: &ElevationPatch,
        geometry: &GeometryConfig,
    ) -> Result<FeatureOutput, ModuleError> {
        let p = &self.params;
        let radius = geometry.structure_radius_m * p.radius_scale;

        let peak_samples: Vec<f32> = patch
            .disc(radius * PEAK_RADIUS_RATIO)
            .iter()
            .map(|s| s.z)
            .collect();
        let mut base_samples: Vec<f32> = patch
            .annulus(radius * BASE_ANNULUS.0, radius * BASE_ANNULUS.1)
            .iter()
            .map(|s| s.z)
            .collect();
        let (Some((peak, _)), Some(base)) = (mean_std(&peak_samples), median(&mut base_samples))
        else {
            return Ok(FeatureOutput::inconclusive("no valid samples at the centre or base"));
        };
        let relief = peak - base;
        if relief.abs() < p.min_relief_m {
            return Ok(FeatureOutput::inconclusive(format!(
                "relief {relief:.2} m below {} m",
                p.min_relief_m
            ))
            .with_metric("relief_m", relief));
        }

        let n = p.samples;
        let ring = radius * p.sample_radius_ratio;
        let profile: Vec<Option<f32>> = (0..n)
            .map(|i| {
                let theta = (TAU * i as f64 / n as f64) as f32;
                patch.sample_polar(ring, theta).map(|z| z - base)
            })
            .collect();
        let valid: Vec<f32> = profile.iter().flatten().copied().collect();
        if (n - valid.len()) as f32 > MAX_MISSING_SHARE * n as f32 {
            return Ok(FeatureOutput::inconclusive(format!(
                "{} of {n} profile points invalid",
                n - valid.len()
            )));
        }
        let Some((mean, std)) = mean_std(&valid) else {
            return Ok(FeatureOutput::inconclusive("empty profile"));
        };
        if mean.abs() <= f32::EPSILON || mean.signum() != relief.signum() {
            return Ok(FeatureOutput::scored(0.0)
                .with_metric("relief_m", relief)
                .with_metric("profile_mean_m", mean)
                .with_note("profile does not follow the central relief"));
        }

        let circularity = (1.0 - std / mean.abs()).clamp(0.0, 1.0);
        let half = n / 2;
        let diffs: Vec<f32> = (0..half)
            .filter_map(|i| Some((profile[i]? - profile[i + half]?).abs()))
            .collect();
        let symmetry = match mean_std(&diffs) {
            Some((d, _)) => (1.0 - d / mean.abs()).clamp(0.0, 1.0),
            None => circularity,
        };
        let prominence = mean / relief;
        let prominence_factor = (prominence / p.min_prominence).clamp(0.0, 1.0);
        let cw = p.circularity_weight;
        let shape = cw * circularity + (1.0 - cw) * symmetry;

        let mut output = FeatureOutput::default();
        let mut fourier_factor = 1.0f32;
        if p.fourier_filter {
            if valid.len() == n {
                let (dc, low, high) = harmonic_energy(&valid, p.max_harmonic);
                let jaggedness = if dc > 0.0 { (high / dc).sqrt() } else { 0.0 };
                fourier_factor = (1.0 - jaggedness as f32).clamp(0.0, 1.0);
                let ac = low + high;
                output = output
                    .with_metric("jaggedness", jaggedness)
                    .with_metric("high_harmonic_share", if ac > 0.0 { high / ac } else { 0.0 });
            } else {
                output = output.with_note("fourier filter skipped on incomplete profile");
            }
        }

        let score = shape * prominence_factor * fourier_factor;
        let scored = FeatureOutput::scored(score);
        Ok(FeatureOutput {
            score: scored.score,
            ..output
        }
        .with_metric("relief_m", relief)
        .with_metric("circularity", circularity)
        .with_metric("symmetry", symmetry)
        .with_metric("prominence", prominence)
        .with_metric("fourier_factor", fourier_factor))
    }
}
