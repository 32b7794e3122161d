//! Shared surface helpers: reference planes and small robust statistics.
//!
//! Planes are expressed in ground metres relative to the patch centre,
//! `z = a·dx + b·dy + c`, and solved in `f64` through the normal equations.

use crate::patch::RadialSample;
use nalgebra::{Matrix3, Vector3};

const EPS: f64 = 1e-9;

/// Reference plane `z = a·dx + b·dy + c` over centre-relative metres.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct Plane {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Plane {
    pub fn flat(c: f64) -> Self {
        Self { a: 0.0, b: 0.0, c }
    }

    #[inline]
    pub fn at(&self, dx_m: f32, dy_m: f32) -> f32 {
        (self.a * dx_m as f64 + self.b * dy_m as f64 + self.c) as f32
    }

    /// Height of `s` above the plane.
    #[inline]
    pub fn residual(&self, s: &RadialSample) -> f32 {
        s.z - self.at(s.dx_m, s.dy_m)
    }

    /// Gradient magnitude (rise over run).
    pub fn slope(&self) -> f64 {
        (self.a * self.a + self.b * self.b).sqrt()
    }
}

/// Weighted least-squares plane through `samples`.
///
/// `weights` must be empty (all ones) or match `samples` in length. Falls
/// back to a weighted mean height when the design is degenerate (collinear
/// or too few samples); returns `None` only without any usable sample.
pub(crate) fn fit_plane(samples: &[RadialSample], weights: &[f32]) -> Option<Plane> {
    let weight_of = |i: usize| weights.get(i).copied().unwrap_or(1.0).max(0.0) as f64;
    let mut ata = Matrix3::<f64>::zeros();
    let mut atb = Vector3::<f64>::zeros();
    let mut sw = 0.0;
    let mut swz = 0.0;
    for (i, s) in samples.iter().enumerate() {
        let w = weight_of(i);
        if w <= 0.0 {
            continue;
        }
        let row = Vector3::new(s.dx_m as f64, s.dy_m as f64, 1.0);
        ata += w * row * row.transpose();
        atb += w * s.z as f64 * row;
        sw += w;
        swz += w * s.z as f64;
    }
    if sw <= EPS {
        return None;
    }
    let fallback = Plane::flat(swz / sw);
    if ata.determinant().abs() <= EPS {
        return Some(fallback);
    }
    match ata.cholesky() {
        Some(chol) => {
            let sol = chol.solve(&atb);
            if sol.iter().all(|v| v.is_finite()) {
                Some(Plane {
                    a: sol[0],
                    b: sol[1],
                    c: sol[2],
                })
            } else {
                Some(fallback)
            }
        }
        None => Some(fallback),
    }
}

/// Median of `values`; `None` when empty. Reorders the slice.
pub(crate) fn median(values: &mut [f32]) -> Option<f32> {
    crate::patch::percentile(values, 50.0)
}

/// Mean and population standard deviation.
pub(crate) fn mean_std(values: &[f32]) -> Option<(f32, f32)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    Some((mean as f32, var.sqrt() as f32))
}

/// Median absolute deviation around the median.
pub(crate) fn mad(values: &[f32]) -> Option<f32> {
    let mut sorted = values.to_vec();
    let med = median(&mut sorted)?;
    let mut dev: Vec<f32> = values.iter().map(|v| (v - med).abs()).collect();
    median(&mut dev)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(dx_m: f32, dy_m: f32, z: f32) -> RadialSample {
        RadialSample {
            x: 0,
            y: 0,
            dx_m,
            dy_m,
            r_m: (dx_m * dx_m + dy_m * dy_m).sqrt(),
            z,
        }
    }

    #[test]
    fn recovers_tilted_plane() {
        let mut pts = Vec::new();
        for i in -5..=5 {
            for j in -5..=5 {
                let (dx, dy) = (i as f32, j as f32);
                pts.push(sample(dx, dy, 0.2 * dx - 0.1 * dy + 3.0));
            }
        }
        let plane = fit_plane(&pts, &[]).unwrap();
        assert!((plane.a - 0.2).abs() < 1e-4);
        assert!((plane.b + 0.1).abs() < 1e-4);
        assert!((plane.c - 3.0).abs() < 1e-4);
        assert!(pts.iter().all(|s| plane.residual(s).abs() < 1e-3));
    }

    #[test]
    fn collinear_samples_fall_back_to_mean() {
        let pts: Vec<_> = (0..5).map(|i| sample(i as f32, 0.0, 2.0)).collect();
        let plane = fit_plane(&pts, &[]).unwrap();
        assert_eq!(plane.slope(), 0.0);
        assert!((plane.c - 2.0).abs() < 1e-6);
        assert!(fit_plane(&[], &[]).is_none());
    }

    #[test]
    fn robust_statistics() {
        let v = [1.0, 2.0, 3.0, 4.0, 100.0];
        assert_eq!(median(&mut v.clone()), Some(3.0));
        assert_eq!(mad(&v), Some(1.0));
        let (m, s) = mean_std(&[2.0, 4.0]).unwrap();
        assert!((m - 3.0).abs() < 1e-6 && (s - 1.0).abs() < 1e-6);
    }
}
