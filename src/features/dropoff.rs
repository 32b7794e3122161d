//! Edge sharpness at the structure boundary.
//!
//! Measures the outward descent (negative radial slope) on an annulus
//! around the detection radius. Sharpness saturates as
//! `1 − exp(−mean_descent / slope_scale)`; the directional analysis splits
//! the annulus into sectors and rewards edges that drop off equally in all
//! directions, since constructed mounds erode more evenly than natural
//! ridges or spurs.

use super::gradient::sobel_slopes;
use super::{parse_params, FeatureModule, FeatureOutput, ParamMap};
use crate::error::ModuleError;
use crate::patch::ElevationPatch;
use crate::profile::GeometryConfig;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DropoffParams {
    /// Half-width of the annulus as a fraction of the radius.
    pub band: f32,
    /// Mean descent (m/m) at which sharpness reaches `1 − 1/e`.
    pub slope_scale: f32,
    pub sectors: usize,
    /// Blend between pure sharpness (0) and sharpness · uniformity (1).
    pub uniformity_weight: f32,
    pub radius_scale: f32,
    pub min_samples: usize,
}

impl Default for DropoffParams {
    fn default() -> Self {
        Self {
            band: 0.25,
            slope_scale: 0.5,
            sectors: 8,
            uniformity_weight: 0.5,
            radius_scale: 1.0,
            min_samples: 12,
        }
    }
}

impl DropoffParams {
    fn validate(&self) -> Result<(), String> {
        if !(self.band > 0.0 && self.band < 1.0) {
            return Err(format!("band must lie in (0, 1), got {}", self.band));
        }
        if !(self.slope_scale > 0.0) {
            return Err("slope_scale must be positive".into());
        }
        if self.sectors < 2 {
            return Err("sectors must be at least 2".into());
        }
        if !(0.0..=1.0).contains(&self.uniformity_weight) {
            return Err("uniformity_weight must lie in [0, 1]".into());
        }
        if !(self.radius_scale > 0.0) {
            return Err("radius_scale must be positive".into());
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct DropoffModule {
    params: DropoffParams,
}

impl DropoffModule {
    pub fn new(params: DropoffParams) -> Result<Self, String> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn from_params(params: &ParamMap) -> Result<Self, String> {
        Self::new(parse_params(params)?)
    }
}

pub(crate) fn factory(params: &ParamMap) -> Result<Arc<dyn FeatureModule>, String> {
    Ok(Arc::new(DropoffModule::from_params(params)?))
}

impl FeatureModule for DropoffModule {
    fn kind(&self) -> &str {
        "dropoff"
    }

    fn compute(
        &self,
        patch: &ElevationPatch,
        geometry: &GeometryConfig,
    ) -> Result<FeatureOutput, ModuleError> {
        let p = &self.params;
        let radius = geometry.structure_radius_m * p.radius_scale;
        let slopes = sobel_slopes(patch);

        let mut sum = vec![0.0f64; p.sectors];
        let mut count = vec![0usize; p.sectors];
        for s in patch.annulus(radius * (1.0 - p.band), radius * (1.0 + p.band)) {
            if s.r_m <= f32::EPSILON {
                continue;
            }
            let Some((gx, gy)) = slopes.at(s.x, s.y) else {
                continue;
            };
            let descent = (-(gx * s.dx_m + gy * s.dy_m) / s.r_m).max(0.0);
            let t = (s.angle() + PI) / (2.0 * PI);
            let k = ((t * p.sectors as f32) as usize).min(p.sectors - 1);
            sum[k] += descent as f64;
            count[k] += 1;
        }

        let samples: usize = count.iter().sum();
        if samples < p.min_samples {
            return Ok(FeatureOutput::inconclusive(format!(
                "{samples} annulus samples, need {}",
                p.min_samples
            )));
        }
        let covered: Vec<f64> = sum
            .iter()
            .zip(&count)
            .filter(|(_, &n)| n > 0)
            .map(|(s, &n)| s / n as f64)
            .collect();
        if covered.len() * 2 < p.sectors {
            return Ok(FeatureOutput::inconclusive(format!(
                "only {} of {} sectors covered",
                covered.len(),
                p.sectors
            )));
        }

        let mean_descent = sum.iter().sum::<f64>() / samples as f64;
        let sector_mean = covered.iter().sum::<f64>() / covered.len() as f64;
        let uniformity = if sector_mean > 1e-9 {
            let var = covered
                .iter()
                .map(|v| (v - sector_mean) * (v - sector_mean))
                .sum::<f64>()
                / covered.len() as f64;
            (1.0 - var.sqrt() / sector_mean).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let sharpness = 1.0 - (-mean_descent / p.slope_scale as f64).exp();
        let uw = p.uniformity_weight as f64;
        let score = sharpness * ((1.0 - uw) + uw * uniformity);

        Ok(FeatureOutput::scored(score as f32)
            .with_metric("mean_descent", mean_descent)
            .with_metric("sharpness", sharpness)
            .with_metric("uniformity", uniformity)
            .with_metric("sectors_covered", covered.len() as f64)
            .with_metric("samples", samples as f64))
    }
}
