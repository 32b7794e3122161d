//! Flatness of the central platform.
//!
//! Fits a reference plane to the samples within `platform_ratio · R`,
//! drops MAD outliers and scores `exp(−rms / residual_scale_m)`. Low
//! residual indicates a constructed flat surface. Three fits are offered:
//! plain least squares, Huber-weighted IRLS, and per-quadrant planes for
//! platforms built from several faces.

use super::surface::{fit_plane, mad, median, Plane};
use super::{parse_params, FeatureModule, FeatureOutput, ParamMap};
use crate::error::ModuleError;
use crate::patch::{sampling::relief, ElevationPatch, RadialSample};
use crate::profile::GeometryConfig;
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Scale of the MAD for normally distributed residuals.
const MAD_TO_SIGMA: f32 = 1.4826;
const CONVERGENCE_M: f64 = 1e-4;
const MIN_QUADRANT_SAMPLES: usize = 6;
/// Residuals within this distance of the median are never outliers.
const MIN_OUTLIER_LIMIT_M: f32 = 0.01;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaneFit {
    #[default]
    LeastSquares,
    /// Huber-weighted iteratively reweighted least squares.
    Robust,
    /// One least-squares plane per quadrant around the centre.
    Segmented,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlanarityParams {
    pub fit: PlaneFit,
    pub platform_ratio: f32,
    pub huber_delta_m: f32,
    pub max_iters: usize,
    /// Residuals further than this many robust sigmas from the median are dropped.
    pub outlier_mad: f32,
    pub residual_scale_m: f32,
    pub min_relief_m: f32,
    pub min_samples: usize,
    pub radius_scale: f32,
}

impl Default for PlanarityParams {
    fn default() -> Self {
        Self {
            fit: PlaneFit::LeastSquares,
            platform_ratio: 0.4,
            huber_delta_m: 0.1,
            max_iters: 10,
            outlier_mad: 3.0,
            residual_scale_m: 0.25,
            min_relief_m: 0.5,
            min_samples: 12,
            radius_scale: 1.0,
        }
    }
}

impl PlanarityParams {
    fn validate(&self) -> Result<(), String> {
        if !(self.platform_ratio > 0.0 && self.platform_ratio <= 1.0) {
            return Err("platform_ratio must lie in (0, 1]".into());
        }
        if !(self.huber_delta_m > 0.0 && self.residual_scale_m > 0.0 && self.outlier_mad > 0.0) {
            return Err("huber_delta_m, residual_scale_m and outlier_mad must be positive".into());
        }
        if self.max_iters == 0 {
            return Err("max_iters must be at least 1".into());
        }
        if !(self.min_relief_m >= 0.0 && self.radius_scale > 0.0) {
            return Err("min_relief_m must be non-negative and radius_scale positive".into());
        }
        Ok(())
    }
}

fn huber_weight(residual: f32, delta: f32) -> f32 {
    let abs = residual.abs();
    if abs <= delta {
        1.0
    } else {
        delta / abs
    }
}

/// Estimate a plane by solving Huber-weighted normal equations (IRLS).
///
/// Starts from the least-squares solution and stops once the plane moves
/// less than a tenth of a millimetre at the centre and along the slopes.
fn fit_plane_huber(samples: &[RadialSample], delta: f32, max_iters: usize) -> Option<Plane> {
    let mut plane = fit_plane(samples, &[])?;
    let mut weights = vec![1.0f32; samples.len()];
    for _ in 0..max_iters {
        for (w, s) in weights.iter_mut().zip(samples) {
            *w = huber_weight(plane.residual(s), delta);
        }
        let Some(next) = fit_plane(samples, &weights) else {
            warn!("planarity: IRLS weights collapsed, keeping previous plane");
            break;
        };
        let moved = (next.a - plane.a).abs() + (next.b - plane.b).abs() + (next.c - plane.c).abs();
        plane = next;
        if moved < CONVERGENCE_M {
            break;
        }
    }
    Some(plane)
}

fn quadrant(s: &RadialSample) -> usize {
    usize::from(s.dx_m >= 0.0) + 2 * usize::from(s.dy_m >= 0.0)
}

#[derive(Clone, Debug)]
pub struct PlanarityModule {
    params: PlanarityParams,
}

impl PlanarityModule {
    pub fn new(params: PlanarityParams) -> Result<Self, String> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn from_params(params: &ParamMap) -> Result<Self, String> {
        Self::new(parse_params(params)?)
    }

    /// Residuals of `platform` against the configured fit, plus the slope of
    /// the (global) plane.
    fn residuals(&self, platform: &[RadialSample]) -> Option<(Vec<f32>, f64)> {
        let p = &self.params;
        match p.fit {
            PlaneFit::LeastSquares => {
                let plane = fit_plane(platform, &[])?;
                Some((platform.iter().map(|s| plane.residual(s)).collect(), plane.slope()))
            }
            PlaneFit::Robust => {
                let plane = fit_plane_huber(platform, p.huber_delta_m, p.max_iters)?;
                Some((platform.iter().map(|s| plane.residual(s)).collect(), plane.slope()))
            }
            PlaneFit::Segmented => {
                let global = fit_plane(platform, &[])?;
                let planes: Vec<Plane> = (0..4)
                    .map(|q| {
                        let part: Vec<RadialSample> =
                            platform.iter().filter(|s| quadrant(s) == q).copied().collect();
                        if part.len() < MIN_QUADRANT_SAMPLES {
                            global
                        } else {
                            fit_plane(&part, &[]).unwrap_or(global)
                        }
                    })
                    .collect();
                let residuals = platform
                    .iter()
                    .map(|s| planes[quadrant(s)].residual(s))
                    .collect();
                Some((residuals, global.slope()))
            }
        }
    }
}

pub(crate) fn factory(params: &ParamMap) -> Result<Arc<dyn FeatureModule>, String> {
    Ok(Arc::new(PlanarityModule::from_params(params)?))
}

impl FeatureModule for PlanarityModule {
    fn kind(&self) -> &str {
        "planarity"
    }

    fn compute(
        &self,
        patch: &ElevationPatch,
        geometry: &GeometryConfig,
    ) -> Result<FeatureOutput, ModuleError> {
        let p = &self.params;
        let radius = geometry.structure_radius_m * p.radius_scale;
        let relief_m = relief(&patch.disc(radius));
        if relief_m < p.min_relief_m {
            return Ok(FeatureOutput::inconclusive(format!(
                "relief {relief_m:.2} m below {} m",
                p.min_relief_m
            ))
            .with_metric("relief_m", relief_m));
        }
        let platform = patch.disc(radius * p.platform_ratio);
        if platform.len() < p.min_samples.max(3) {
            return Ok(FeatureOutput::inconclusive(format!(
                "{} platform samples, need {}",
                platform.len(),
                p.min_samples
            )));
        }
        let (residuals, slope) = self
            .residuals(&platform)
            .ok_or_else(|| ModuleError::Numerical("plane fit failed".into()))?;

        let mut sorted = residuals.clone();
        let centre = median(&mut sorted).unwrap_or(0.0);
        let spread = mad(&residuals).unwrap_or(0.0) * MAD_TO_SIGMA;
        let limit = (p.outlier_mad * spread).max(MIN_OUTLIER_LIMIT_M);
        let kept: Vec<f32> = residuals
            .iter()
            .copied()
            .filter(|r| (r - centre).abs() <= limit)
            .collect();
        let outliers = residuals.len() - kept.len();
        let rms = (kept.iter().map(|r| (r * r) as f64).sum::<f64>() / kept.len().max(1) as f64).sqrt();
        let score = (-rms / p.residual_scale_m as f64).exp();

        Ok(FeatureOutput::scored(score as f32)
            .with_metric("rms_m", rms)
            .with_metric("outliers", outliers as f64)
            .with_metric("inlier_share", kept.len() as f64 / residuals.len() as f64)
            .with_metric("plane_slope", slope)
            .with_metric("relief_m", relief_m)
            .with_metric("samples", platform.len() as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoPoint;

    fn patch_from(f: impl Fn(f32, f32) -> f32) -> ElevationPatch {
        let (n, res) = (80, 0.5);
        let c = (n as f32 - 1.0) * 0.5;
        let data = (0..n * n)
            .map(|i| f(((i % n) as f32 - c) * res, ((i / n) as f32 - c) * res))
            .collect();
        ElevationPatch::new(n, n, res, data, GeoPoint::default()).unwrap()
    }

    /// Flat-topped platform of radius 4 m at 3 m with a linear flank to 8 m.
    fn mesa(dx: f32, dy: f32) -> f32 {
        let r = (dx * dx + dy * dy).sqrt();
        if r <= 4.0 {
            3.0
        } else {
            (3.0 * (8.0 - r) / 4.0).max(0.0)
        }
    }

    fn module(fit: PlaneFit) -> PlanarityModule {
        PlanarityModule::new(PlanarityParams {
            fit,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn flat_platform_scores_high() {
        let out = module(PlaneFit::LeastSquares)
            .compute(&patch_from(mesa), &GeometryConfig::default())
            .unwrap();
        assert!(out.score.unwrap() > 0.99, "{:?}", out.metrics);
    }

    #[test]
    fn domed_top_scores_lower_than_flat_platform() {
        let dome = patch_from(|dx, dy| (8.0 * (1.0 - (dx * dx + dy * dy) / 64.0)).max(0.0));
        let geometry = GeometryConfig::default();
        let dome_score = module(PlaneFit::LeastSquares)
            .compute(&dome, &geometry)
            .unwrap()
            .score
            .unwrap();
        assert!(dome_score < 0.5, "dome {dome_score}");
    }

    #[test]
    fn robust_fit_ignores_spikes() {
        let spiky = patch_from(|dx, dy| {
            let base = mesa(dx, dy);
            if dx.abs() < 0.3 && (dy - 1.25).abs() < 0.3 {
                base + 4.0
            } else {
                base
            }
        });
        let out = module(PlaneFit::Robust)
            .compute(&spiky, &GeometryConfig::default())
            .unwrap();
        assert!(out.metrics["outliers"] >= 1.0);
        assert!(out.score.unwrap() > 0.95, "{:?}", out.metrics);
    }

    #[test]
    fn segmented_fit_handles_pitched_top() {
        // Four-sided pyramid top: each quadrant is its own plane.
        let pyramid = patch_from(|dx, dy| 6.0 - 0.5 * (dx.abs() + dy.abs()));
        let geometry = GeometryConfig::default();
        let single = module(PlaneFit::LeastSquares)
            .compute(&pyramid, &geometry)
            .unwrap()
            .score
            .unwrap();
        let segmented = module(PlaneFit::Segmented)
            .compute(&pyramid, &geometry)
            .unwrap()
            .score
            .unwrap();
        assert!(segmented > 0.99);
        assert!(segmented > single);
    }

    #[test]
    fn flat_terrain_is_inconclusive() {
        let out = module(PlaneFit::Robust)
            .compute(&patch_from(|_, _| 1.0), &GeometryConfig::default())
            .unwrap();
        assert!(out.score.is_none());
    }
}
