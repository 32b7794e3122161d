//! Owned single-channel elevation grid in row-major layout.
//!
//! Heights are metres; `resolution_m` is the ground distance between adjacent
//! samples. Samples that are non-finite or masked out are invalid and skipped
//! by every feature module.
use crate::error::{DetectorError, Result};
use crate::types::GeoPoint;

/// Slack (in samples) allowed between the grid shape and `patch_size_m`.
const SIZE_TOLERANCE_SAMPLES: f32 = 1.0;

#[derive(Clone, Debug, PartialEq)]
pub struct ElevationPatch {
    /// Grid width in samples
    pub w: usize,
    /// Grid height in samples
    pub h: usize,
    /// Metres per sample
    pub resolution_m: f32,
    /// Ground extent `[width, height]` in metres
    pub patch_size_m: [f32; 2],
    pub center: GeoPoint,
    /// Heights in row-major order
    pub data: Vec<f32>,
    /// Optional validity mask (`true` = usable)
    pub mask: Option<Vec<bool>>,
}

impl ElevationPatch {
    /// Build a patch from a row-major buffer; the extent is derived from the grid.
    pub fn new(
        w: usize,
        h: usize,
        resolution_m: f32,
        data: Vec<f32>,
        center: GeoPoint,
    ) -> Result<Self> {
        if w == 0 || h == 0 {
            return Err(DetectorError::InvalidPatch("grid is empty".into()));
        }
        if data.len() != w * h {
            return Err(DetectorError::InvalidPatch(format!(
                "buffer holds {} samples, expected {}x{}",
                data.len(),
                w,
                h
            )));
        }
        if !(resolution_m.is_finite() && resolution_m > 0.0) {
            return Err(DetectorError::InvalidPatch(format!(
                "resolution must be positive, got {resolution_m}"
            )));
        }
        Ok(Self {
            w,
            h,
            resolution_m,
            patch_size_m: [w as f32 * resolution_m, h as f32 * resolution_m],
            center,
            data,
            mask: None,
        })
    }

    /// Build a patch from nested rows (the wire layout).
    pub fn from_rows(rows: Vec<Vec<f32>>, resolution_m: f32, center: GeoPoint) -> Result<Self> {
        let h = rows.len();
        let w = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.iter().any(|r| r.len() != w) {
            return Err(DetectorError::InvalidPatch("grid rows are ragged".into()));
        }
        Self::new(w, h, resolution_m, rows.into_iter().flatten().collect(), center)
    }

    /// Attach a validity mask of length `w·h`.
    pub fn with_mask(mut self, mask: Vec<bool>) -> Result<Self> {
        if mask.len() != self.w * self.h {
            return Err(DetectorError::InvalidPatch(format!(
                "mask holds {} entries, expected {}",
                mask.len(),
                self.w * self.h
            )));
        }
        self.mask = Some(mask);
        Ok(self)
    }

    /// Check the buffer and grid/extent invariants and that some samples are usable.
    pub fn validate(&self) -> Result<()> {
        let n = self.w * self.h;
        if self.data.len() != n {
            return Err(DetectorError::InvalidPatch(format!(
                "buffer holds {} samples, expected {}x{}",
                self.data.len(),
                self.w,
                self.h
            )));
        }
        if let Some(mask) = &self.mask {
            if mask.len() != n {
                return Err(DetectorError::InvalidPatch(format!(
                    "mask holds {} entries, expected {n}",
                    mask.len()
                )));
            }
        }
        let expected_w = self.patch_size_m[0] / self.resolution_m;
        let expected_h = self.patch_size_m[1] / self.resolution_m;
        if (self.w as f32 - expected_w).abs() > SIZE_TOLERANCE_SAMPLES
            || (self.h as f32 - expected_h).abs() > SIZE_TOLERANCE_SAMPLES
        {
            return Err(DetectorError::InvalidPatch(format!(
                "grid {}x{} inconsistent with extent {:?} m at {} m/sample",
                self.w, self.h, self.patch_size_m, self.resolution_m
            )));
        }
        if self.valid_count() == 0 {
            return Err(DetectorError::InvalidPatch("no valid samples".into()));
        }
        Ok(())
    }

    #[inline]
    /// Convert (x, y) to a linear index into `data`.
    pub fn idx(&self, x: usize, y: usize) -> usize {
        y * self.w + x
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[self.idx(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: f32) {
        let i = self.idx(x, y);
        self.data[i] = v;
    }

    #[inline]
    pub fn row(&self, y: usize) -> &[f32] {
        let start = y * self.w;
        &self.data[start..start + self.w]
    }

    /// Height at (x, y) if the sample is finite and not masked out.
    #[inline]
    pub fn valid(&self, x: usize, y: usize) -> Option<f32> {
        let i = self.idx(x, y);
        if let Some(mask) = &self.mask {
            if !mask[i] {
                return None;
            }
        }
        let v = self.data[i];
        v.is_finite().then_some(v)
    }

    pub fn valid_count(&self) -> usize {
        (0..self.h)
            .flat_map(|y| (0..self.w).map(move |x| (x, y)))
            .filter(|&(x, y)| self.valid(x, y).is_some())
            .count()
    }

    /// Centre of the grid in sample coordinates.
    pub fn center_px(&self) -> (f32, f32) {
        ((self.w as f32 - 1.0) * 0.5, (self.h as f32 - 1.0) * 0.5)
    }

    /// Ground distance in metres from the patch centre to sample (x, y).
    pub fn distance_m(&self, x: usize, y: usize) -> f32 {
        let (cx, cy) = self.center_px();
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        (dx * dx + dy * dy).sqrt() * self.resolution_m
    }

    /// Half of the smaller side, i.e. the largest radius fully inside the grid.
    pub fn half_extent_m(&self) -> f32 {
        (self.w.min(self.h) as f32 - 1.0) * 0.5 * self.resolution_m
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.w as f32 / self.h as f32
    }

    /// Mask out every sample beyond the inscribed circle.
    pub fn mask_outside_circle(&mut self) {
        let radius = self.half_extent_m() + 0.5 * self.resolution_m;
        let mut mask = self.mask.take().unwrap_or_else(|| vec![true; self.w * self.h]);
        for y in 0..self.h {
            for x in 0..self.w {
                if self.distance_m(x, y) > radius {
                    mask[y * self.w + x] = false;
                }
            }
        }
        self.mask = Some(mask);
    }

    /// Block-average downsampling by an integer factor.
    ///
    /// Each output sample averages the valid inputs of its block; blocks with
    /// no valid input stay invalid. Partial blocks at the right/bottom edge
    /// are dropped so the extent stays consistent with the new grid.
    pub fn downsample(&self, factor: usize) -> Result<Self> {
        if factor <= 1 {
            return Ok(self.clone());
        }
        let nw = self.w / factor;
        let nh = self.h / factor;
        if nw < 2 || nh < 2 {
            return Err(DetectorError::InvalidPatch(format!(
                "cannot downsample {}x{} by {}",
                self.w, self.h, factor
            )));
        }
        let mut data = vec![f32::NAN; nw * nh];
        let mut mask = vec![false; nw * nh];
        for by in 0..nh {
            for bx in 0..nw {
                let mut sum = 0.0f64;
                let mut n = 0usize;
                for y in by * factor..(by + 1) * factor {
                    for x in bx * factor..(bx + 1) * factor {
                        if let Some(v) = self.valid(x, y) {
                            sum += v as f64;
                            n += 1;
                        }
                    }
                }
                if n > 0 {
                    data[by * nw + bx] = (sum / n as f64) as f32;
                    mask[by * nw + bx] = true;
                }
            }
        }
        let mut out = Self::new(
            nw,
            nh,
            self.resolution_m * factor as f32,
            data,
            self.center,
        )?;
        if mask.iter().any(|m| !m) {
            out.mask = Some(mask);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(w: usize, h: usize) -> ElevationPatch {
        let data = (0..w * h).map(|i| (i % w) as f32).collect();
        ElevationPatch::new(w, h, 0.5, data, GeoPoint::default()).unwrap()
    }

    #[test]
    fn extent_follows_grid() {
        let p = ramp(80, 80);
        assert_eq!(p.patch_size_m, [40.0, 40.0]);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn rejects_mismatched_buffer() {
        let err = ElevationPatch::new(4, 4, 1.0, vec![0.0; 15], GeoPoint::default());
        assert!(err.is_err());
    }

    #[test]
    fn validate_catches_buffers_resized_after_construction() {
        let mut p = ramp(8, 8);
        p.data.truncate(10);
        assert!(matches!(p.validate(), Err(DetectorError::InvalidPatch(_))));

        let mut p = ramp(8, 8).with_mask(vec![true; 64]).unwrap();
        p.mask = Some(vec![true; 63]);
        assert!(matches!(p.validate(), Err(DetectorError::InvalidPatch(_))));
    }

    #[test]
    fn nan_and_masked_samples_are_invalid() {
        let mut p = ramp(4, 4);
        p.set(1, 1, f32::NAN);
        let mut mask = vec![true; 16];
        mask[p.idx(2, 2)] = false;
        let p = p.with_mask(mask).unwrap();
        assert!(p.valid(1, 1).is_none());
        assert!(p.valid(2, 2).is_none());
        assert_eq!(p.valid_count(), 14);
    }

    #[test]
    fn downsample_averages_blocks() {
        let p = ramp(8, 8);
        let d = p.downsample(2).unwrap();
        assert_eq!((d.w, d.h), (4, 4));
        assert_eq!(d.resolution_m, 1.0);
        assert!((d.get(0, 0) - 0.5).abs() < 1e-6);
        assert!((d.get(3, 0) - 6.5).abs() < 1e-6);
        assert!(d.validate().is_ok());
    }

    #[test]
    fn downsample_refuses_tiny_output() {
        assert!(ramp(3, 3).downsample(2).is_err());
    }

    #[test]
    fn circle_mask_drops_corners() {
        let mut p = ramp(21, 21);
        p.mask_outside_circle();
        assert!(p.valid(0, 0).is_none());
        assert!(p.valid(10, 10).is_some());
        assert!(p.valid(10, 0).is_some());
    }
}
