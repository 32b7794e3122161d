//! How the excess volume inside the detection radius is spread.
//!
//! Built structures carry their volume evenly around the centre and
//! concentrate it toward the middle; spoil heaps and erosion remnants tend
//! to be lopsided. The disc is split into `rings × sectors` cells and the
//! score is `evenness · min(1, inner_share / expected_inner_share)`, where
//! evenness is `1 − CV` of the sector volumes and `inner_share` the volume
//! fraction within half the radius.

use super::volume::ResidualSurface;
use super::{parse_params, FeatureModule, FeatureOutput, ParamMap};
use crate::error::ModuleError;
use crate::patch::ElevationPatch;
use crate::profile::GeometryConfig;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VolumeDistributionParams {
    pub rings: usize,
    pub sectors: usize,
    pub expected_inner_share: f32,
    pub border_width_m: f32,
    pub noise_percentile: f32,
    /// Below this much excess volume there is nothing to distribute.
    pub min_volume_m3: f32,
    pub allow_negative: bool,
    pub radius_scale: f32,
    pub min_samples: usize,
}

impl Default for VolumeDistributionParams {
    fn default() -> Self {
        Self {
            rings: 4,
            sectors: 8,
            expected_inner_share: 0.35,
            border_width_m: 3.0,
            noise_percentile: 75.0,
            min_volume_m3: 1.0,
            allow_negative: true,
            radius_scale: 1.0,
            min_samples: 16,
        }
    }
}

impl VolumeDistributionParams {
    fn validate(&self) -> Result<(), String> {
        if self.rings == 0 || self.sectors < 2 {
            return Err("need at least 1 ring and 2 sectors".into());
        }
        if !(self.expected_inner_share > 0.0 && self.expected_inner_share <= 1.0) {
            return Err("expected_inner_share must lie in (0, 1]".into());
        }
        if !(self.border_width_m > 0.0 && self.radius_scale > 0.0) {
            return Err("border_width_m and radius_scale must be positive".into());
        }
        if !(0.0..=100.0).contains(&self.noise_percentile) {
            return Err("noise_percentile must lie in [0, 100]".into());
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct VolumeDistributionModule {
    params: VolumeDistributionParams,
}

impl VolumeDistributionModule {
    pub fn new(params: VolumeDistributionParams) -> Result<Self, String> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn from_params(params: &ParamMap) -> Result<Self, String> {
        Self::new(parse_params(params)?)
    }
}

pub(crate) fn factory(params: &ParamMap) -> Result<Arc<dyn FeatureModule>, String> {
    Ok(Arc::new(VolumeDistributionModule::from_params(params)?))
}

/// Sector index of an angle in `(-π, π]`.
fn sector_of(angle: f32, sectors: usize) -> usize {
    let t = (angle + PI) / (2.0 * PI);
    ((t * sectors as f32) as usize).min(sectors - 1)
}

impl FeatureModule for VolumeDistributionModule {
    fn kind(&self) -> &str {
        "volume_distribution"
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

        let inside: Vec<_> = surface
            .samples
            .iter()
            .filter(|(s, _)| s.r_m <= radius)
            .collect();
        let up: f32 = inside.iter().map(|(_, r)| surface.excess(*r, 1.0)).sum();
        let down: f32 = inside.iter().map(|(_, r)| surface.excess(*r, -1.0)).sum();
        let sign = if p.allow_negative && down > up { -1.0 } else { 1.0 };

        let cell_area = patch.resolution_m * patch.resolution_m;
        let mut cells = vec![0.0f64; p.rings * p.sectors];
        let mut inner = 0.0f64;
        for (s, r) in &inside {
            let v = (surface.excess(*r, sign) * cell_area) as f64;
            if v <= 0.0 {
                continue;
            }
            let ring = ((s.r_m / radius * p.rings as f32) as usize).min(p.rings - 1);
            cells[ring * p.sectors + sector_of(s.angle(), p.sectors)] += v;
            if s.r_m <= 0.5 * radius {
                inner += v;
            }
        }
        let total: f64 = cells.iter().sum();
        if total < p.min_volume_m3 as f64 {
            return Ok(FeatureOutput::inconclusive(format!(
                "excess volume {total:.2} m³ below {} m³",
                p.min_volume_m3
            ))
            .with_metric("volume_m3", total));
        }

        let sector_volumes: Vec<f64> = (0..p.sectors)
            .map(|k| (0..p.rings).map(|ring| cells[ring * p.sectors + k]).sum())
            .collect();
        let mean = total / p.sectors as f64;
        let var = sector_volumes
            .iter()
            .map(|v| (v - mean) * (v - mean))
            .sum::<f64>()
            / p.sectors as f64;
        let evenness = (1.0 - var.sqrt() / mean).clamp(0.0, 1.0);
        let inner_share = inner / total;
        let centrality = (inner_share / p.expected_inner_share as f64).min(1.0);

        let mut output = FeatureOutput::scored((evenness * centrality) as f32)
            .with_metric("volume_m3", total)
            .with_metric("evenness", evenness)
            .with_metric("inner_share", inner_share)
            .with_metric("centrality", centrality);
        for ring in 0..p.rings {
            let share = (0..p.sectors)
                .map(|k| cells[ring * p.sectors + k])
                .sum::<f64>()
                / total;
            output = output.with_metric(&format!("ring_{ring}_share"), share);
        }
        Ok(output)
    }
}
