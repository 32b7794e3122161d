//! Elevation patch value object and the sampling helpers feature modules use.
//!
//! - `elevation`: the owned row-major height grid with geometry and mask.
//! - `sampling`: radial iteration around the patch centre, bilinear lookup,
//!   border bands and percentile helpers.
//! - `PatchDescriptor`: the serialisable wire form supplied by acquisition.

pub mod elevation;
pub mod sampling;

pub use self::elevation::ElevationPatch;
pub use self::sampling::{percentile, RadialSample};

use crate::error::{DetectorError, Result};
use crate::types::GeoPoint;
use serde::{Deserialize, Serialize};

/// JSON form of a patch: `{grid, resolution_m, patch_size_m, center, mask}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PatchDescriptor {
    pub grid: Vec<Vec<f32>>,
    pub resolution_m: f32,
    #[serde(default)]
    pub patch_size_m: Option<[f32; 2]>,
    #[serde(default)]
    pub center: GeoPoint,
    #[serde(default)]
    pub mask: Option<Vec<Vec<bool>>>,
}

impl TryFrom<PatchDescriptor> for ElevationPatch {
    type Error = DetectorError;

    fn try_from(desc: PatchDescriptor) -> Result<Self> {
        let mut patch = ElevationPatch::from_rows(desc.grid, desc.resolution_m, desc.center)?;
        if let Some(size) = desc.patch_size_m {
            patch.patch_size_m = size;
        }
        if let Some(rows) = desc.mask {
            if rows.len() != patch.h || rows.iter().any(|r| r.len() != patch.w) {
                return Err(DetectorError::InvalidPatch(format!(
                    "mask shape does not match grid {}x{}",
                    patch.w, patch.h
                )));
            }
            patch = patch.with_mask(rows.into_iter().flatten().collect())?;
        }
        patch.validate()?;
        Ok(patch)
    }
}

impl From<&ElevationPatch> for PatchDescriptor {
    fn from(patch: &ElevationPatch) -> Self {
        let grid = (0..patch.h).map(|y| patch.row(y).to_vec()).collect();
        let mask = patch.mask.as_ref().map(|m| {
            m.chunks(patch.w.max(1))
                .map(|row| row.to_vec())
                .collect::<Vec<_>>()
        });
        Self {
            grid,
            resolution_m: patch.resolution_m,
            patch_size_m: Some(patch.patch_size_m),
            center: patch.center,
            mask,
        }
    }
}
