//! Radial sampling around the patch centre.
//!
//! Feature modules work in ground metres relative to the patch centre. The
//! helpers here enumerate valid samples inside discs, annuli and the border
//! band, and provide bilinear lookup for profiles sampled off-grid.
use super::ElevationPatch;

/// A valid sample with its offset from the patch centre in metres.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RadialSample {
    pub x: usize,
    pub y: usize,
    /// East offset from centre (m)
    pub dx_m: f32,
    /// South offset from centre (m), following row order
    pub dy_m: f32,
    /// Distance from centre (m)
    pub r_m: f32,
    /// Height (m)
    pub z: f32,
}

impl RadialSample {
    /// Angle from the centre in `(-π, π]`.
    pub fn angle(&self) -> f32 {
        self.dy_m.atan2(self.dx_m)
    }
}

impl ElevationPatch {
    /// Every valid sample, annotated with its offset from the centre.
    pub fn radial_samples(&self) -> Vec<RadialSample> {
        self.annulus(0.0, f32::INFINITY)
    }

    /// Valid samples with `r_min <= r <= r_max`.
    pub fn annulus(&self, r_min: f32, r_max: f32) -> Vec<RadialSample> {
        let (cx, cy) = self.center_px();
        let res = self.resolution_m;
        let mut out = Vec::new();
        for y in 0..self.h {
            let dy_m = (y as f32 - cy) * res;
            for x in 0..self.w {
                let Some(z) = self.valid(x, y) else {
                    continue;
                };
                let dx_m = (x as f32 - cx) * res;
                let r_m = (dx_m * dx_m + dy_m * dy_m).sqrt();
                if r_m >= r_min && r_m <= r_max {
                    out.push(RadialSample {
                        x,
                        y,
                        dx_m,
                        dy_m,
                        r_m,
                        z,
                    });
                }
            }
        }
        out
    }

    /// Valid samples within `radius_m` of the centre.
    pub fn disc(&self, radius_m: f32) -> Vec<RadialSample> {
        self.annulus(0.0, radius_m)
    }

    /// Valid samples whose distance to the nearest grid edge is below `width_m`.
    pub fn border_band(&self, width_m: f32) -> Vec<RadialSample> {
        let band = (width_m / self.resolution_m).ceil().max(1.0) as usize;
        self.radial_samples()
            .into_iter()
            .filter(|s| {
                s.x < band || s.y < band || s.x + band >= self.w || s.y + band >= self.h
            })
            .collect()
    }

    /// Bilinear height at fractional sample coordinates; `None` if any
    /// contributing corner is invalid or the point falls outside the grid.
    pub fn bilinear(&self, fx: f32, fy: f32) -> Option<f32> {
        if !(fx.is_finite() && fy.is_finite()) || fx < 0.0 || fy < 0.0 {
            return None;
        }
        let x0 = fx.floor() as usize;
        let y0 = fy.floor() as usize;
        if x0 >= self.w || y0 >= self.h {
            return None;
        }
        let x1 = (x0 + 1).min(self.w - 1);
        let y1 = (y0 + 1).min(self.h - 1);
        let tx = fx - x0 as f32;
        let ty = fy - y0 as f32;
        let v00 = self.valid(x0, y0)?;
        let v10 = self.valid(x1, y0)?;
        let v01 = self.valid(x0, y1)?;
        let v11 = self.valid(x1, y1)?;
        let top = v00 + (v10 - v00) * tx;
        let bottom = v01 + (v11 - v01) * tx;
        Some(top + (bottom - top) * ty)
    }

    /// Bilinear height at a polar offset (metres, radians) from the centre.
    pub fn sample_polar(&self, r_m: f32, theta: f32) -> Option<f32> {
        let (cx, cy) = self.center_px();
        let fx = cx + r_m * theta.cos() / self.resolution_m;
        let fy = cy + r_m * theta.sin() / self.resolution_m;
        self.bilinear(fx, fy)
    }
}

/// Linear-interpolated percentile (`p` in `[0, 100]`) of `values`.
///
/// Sorts `values` in place. Returns `None` for an empty slice.
pub fn percentile(values: &mut [f32], p: f32) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (values.len() - 1) as f32;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let t = rank - lo as f32;
    Some(values[lo] + (values[hi] - values[lo]) * t)
}

/// Height span (max − min) of a sample set; zero when empty.
pub fn relief(samples: &[RadialSample]) -> f32 {
    let mut lo = f32::INFINITY;
    let mut hi = f32::NEG_INFINITY;
    for s in samples {
        lo = lo.min(s.z);
        hi = hi.max(s.z);
    }
    if hi >= lo {
        hi - lo
    } else {
        0.0
    }
}
