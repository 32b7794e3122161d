//! Volume above (or below) a local reference plane.
//!
//! The plane is a least-squares fit to the border band, so regional slope
//! does not count as structure. Residuals smaller than the noise floor (a
//! percentile of |residual| outside the detection radius) are ignored. The
//! score rewards absolute volume inside the radius, saturating through
//! `tanh(V_in / base_volume_m3)`, and its concentration inside vs outside.

use super::surface::{fit_plane, Plane};
use super::{parse_params, FeatureModule, FeatureOutput, ParamMap};
use crate::error::ModuleError;
use crate::patch::{percentile, ElevationPatch, RadialSample};
use crate::profile::GeometryConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VolumeParams {
    pub border_width_m: f32,
    pub base_volume_m3: f32,
    /// Percentile of |residual| outside the radius used as noise floor.
    pub noise_percentile: f32,
    /// Score depressions (ditches, rings) by their missing volume.
    pub allow_negative: bool,
    pub radius_scale: f32,
    pub min_samples: usize,
}

impl Default for VolumeParams {
    fn default() -> Self {
        Self {
            border_width_m: 3.0,
            base_volume_m3: 200.0,
            noise_percentile: 75.0,
            allow_negative: true,
            radius_scale: 1.0,
            min_samples: 16,
        }
    }
}

impl VolumeParams {
    fn validate(&self) -> Result<(), String> {
        if !(self.border_width_m > 0.0) {
            return Err("border_width_m must be positive".into());
        }
        if !(self.base_volume_m3 > 0.0) {
            return Err("base_volume_m3 must be positive".into());
        }
        if !(0.0..=100.0).contains(&self.noise_percentile) {
            return Err(format!(
                "noise_percentile must lie in [0, 100], got {}",
                self.noise_percentile
            ));
        }
        if !(self.radius_scale > 0.0) {
            return Err("radius_scale must be positive".into());
        }
        Ok(())
    }
}

/// Residual surface relative to the border reference plane.
pub(crate) struct ResidualSurface {
    pub plane: Plane,
    pub noise_floor_m: f32,
    /// Every valid sample with its height above the plane.
    pub samples: Vec<(RadialSample, f32)>,
}

impl ResidualSurface {
    /// Fit the border plane and the outside noise floor.
    ///
    /// `None` when the border band holds fewer than `min_samples` samples.
    pub fn fit(
        patch: &ElevationPatch,
        border_width_m: f32,
        radius_m: f32,
        noise_percentile: f32,
        min_samples: usize,
    ) -> Option<Self> {
        let border = patch.border_band(border_width_m);
        if border.len() < min_samples.max(3) {
            return None;
        }
        let plane = fit_plane(&border, &[])?;
        let samples: Vec<_> = patch
            .radial_samples()
            .into_iter()
            .map(|s| (s, plane.residual(&s)))
            .collect();
        let mut outside: Vec<f32> = samples
            .iter()
            .filter(|(s, _)| s.r_m > radius_m)
            .map(|(_, r)| r.abs())
            .collect();
        let noise_floor_m = percentile(&mut outside, noise_percentile).unwrap_or(0.0);
        Some(Self {
            plane,
            noise_floor_m,
            samples,
        })
    }

    /// Excess above (`sign = 1`) or below (`sign = -1`) the noise floor.
    #[inline]
    pub fn excess(&self, residual: f32, sign: f32) -> f32 {
        (sign * residual - self.noise_floor_m).max(0.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
struct Volumes {
    inside_pos: f64,
    inside_neg: f64,
    outside_pos: f64,
    outside_neg: f64,
}

#[derive(Clone, Debug)]
pub struct VolumeModule {
    params: VolumeParams,
}

impl VolumeModule {
    pub fn new(params: VolumeParams) -> Result<Self, String> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn from_params(params: &ParamMap) -> Result<Self, String> {
        Self::new(parse_params(params)?)
    }
}

pub(crate) fn factory(params: &ParamMap) -> Result<Arc<dyn FeatureModule>, String> {
    Ok(Arc::new(VolumeModule::from_params(params)?))
}

impl FeatureModule for VolumeModule {
    fn kind(&self) -> &str {
        "volume"
    }

    fn compute(
        &self,
        patch: &ElevationPatch,
        geometry: &GeometryConfig,
    ) -> Result<FeatureOutput, ModuleError> {
        let p = &self.params;
        let radius = geometry.structure_radius_m * p.radius_scale;
        let Some(surface) = ResidualSurface::fit(
            patch,
            p.border_width_m,
            radius,
            p.noise_percentile,
            p.min_samples,
        ) else {
            return Ok(FeatureOutput::inconclusive("border band too sparse for a reference plane"));
        };
        let inside_count = surface.samples.iter().filter(|(s, _)| s.r_m <= radius).count();
        if inside_count < p.min_samples {
            return Ok(FeatureOutput::inconclusive(format!(
                "only {inside_count} valid samples within {radius:.1} m"
            )));
        }

        let cell_area = (patch.resolution_m as f64).powi(2);
        let mut v = Volumes::default();
        for (s, r) in &surface.samples {
            let up = surface.excess(*r, 1.0) as f64 * cell_area;
            let down = surface.excess(*r, -1.0) as f64 * cell_area;
            if s.r_m <= radius {
                v.inside_pos += up;
                v.inside_neg += down;
            } else {
                v.outside_pos += up;
                v.outside_neg += down;
            }
        }

        let depression = p.allow_negative && v.inside_neg > v.inside_pos;
        let (v_in, v_out) = if depression {
            (v.inside_neg, v.outside_neg)
        } else {
            (v.inside_pos, v.outside_pos)
        };
        let concentration = if v_in + v_out > 0.0 {
            v_in / (v_in + v_out)
        } else {
            0.0
        };
        let magnitude = (v_in / p.base_volume_m3 as f64).tanh();
        let score = (magnitude * concentration) as f32;

        Ok(FeatureOutput::scored(score)
            .with_metric("volume_in_m3", v_in)
            .with_metric("volume_out_m3", v_out)
            .with_metric("signed_volume_m3", v.inside_pos - v.inside_neg)
            .with_metric("noise_floor_m", surface.noise_floor_m)
            .with_metric("plane_slope", surface.plane.slope())
            .with_metric("concentration", concentration)
            .with_metric("depression", if depression { 1.0 } else { 0.0 }))
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

    fn paraboloid(dx: f32, dy: f32) -> f32 {
        (8.0 * (1.0 - (dx * dx + dy * dy) / 64.0)).max(0.0)
    }

    fn module() -> VolumeModule {
        VolumeModule::new(VolumeParams::default()).unwrap()
    }

    #[test]
    fn flat_terrain_has_no_volume() {
        let out = module()
            .compute(&patch_from(|_, _| 12.0), &GeometryConfig::default())
            .unwrap();
        assert!(out.score.unwrap() < 1e-4);
        assert!(out.metrics["volume_in_m3"] < 1e-3);
    }

    #[test]
    fn mound_volume_matches_analytic() {
        let out = module()
            .compute(&patch_from(paraboloid), &GeometryConfig::default())
            .unwrap();
        // π · R² · H / 2 for a paraboloid of radius 8 m and height 8 m.
        let analytic = std::f64::consts::PI * 64.0 * 8.0 / 2.0;
        let v = out.metrics["volume_in_m3"];
        assert!((v - analytic).abs() / analytic < 0.03, "volume {v}");
        assert!(out.score.unwrap() > 0.99);
        assert_eq!(out.metrics["concentration"], 1.0);
    }

    #[test]
    fn regional_slope_is_removed() {
        let out = module()
            .compute(
                &patch_from(|dx, dy| paraboloid(dx, dy) + 0.3 * dx - 0.1 * dy),
                &GeometryConfig::default(),
            )
            .unwrap();
        assert!(out.score.unwrap() > 0.99);
        assert!((out.metrics["plane_slope"] - 0.316).abs() < 0.01);
    }

    #[test]
    fn depression_is_measured_when_allowed() {
        let pit = patch_from(|dx, dy| -paraboloid(dx, dy));
        let out = module().compute(&pit, &GeometryConfig::default()).unwrap();
        assert_eq!(out.metrics["depression"], 1.0);
        assert!(out.score.unwrap() > 0.99);

        let strict = VolumeModule::new(VolumeParams {
            allow_negative: false,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            strict.compute(&pit, &GeometryConfig::default()).unwrap().score,
            Some(0.0)
        );
    }
}
