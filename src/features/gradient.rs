//! Sobel slope field over an elevation patch.
//!
//! - Convolves the 3×3 Sobel pair with border clamping.
//! - Invalid neighbours borrow the centre height, so masks and voids do
//!   not produce spurious cliffs; invalid centres yield no slope.
//! - Outputs are true slopes (metres per metre): the kernel response is
//!   divided by `8 · resolution`.
use crate::patch::ElevationPatch;

type Kernel3 = [[f32; 3]; 3];

const SOBEL_KERNEL_X: Kernel3 = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];
const SOBEL_KERNEL_Y: Kernel3 = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];

/// Per-sample slope components; `None` where the centre sample is invalid.
#[derive(Clone, Debug)]
pub(crate) struct SlopeField {
    pub w: usize,
    pub h: usize,
    /// d z / d x (east), m/m
    pub gx: Vec<Option<f32>>,
    /// d z / d y (row direction), m/m
    pub gy: Vec<Option<f32>>,
}

impl SlopeField {
    #[inline]
    pub fn at(&self, x: usize, y: usize) -> Option<(f32, f32)> {
        let i = y * self.w + x;
        Some((self.gx[i]?, self.gy[i]?))
    }
}

pub(crate) fn sobel_slopes(patch: &ElevationPatch) -> SlopeField {
    let (w, h) = (patch.w, patch.h);
    let mut gx = vec![None; w * h];
    let mut gy = vec![None; w * h];
    if w == 0 || h == 0 {
        return SlopeField { w, h, gx, gy };
    }
    let norm = 1.0 / (8.0 * patch.resolution_m);

    for y in 0..h {
        let y_idx = [y.saturating_sub(1), y, (y + 1).min(h - 1)];
        for x in 0..w {
            let Some(centre) = patch.valid(x, y) else {
                continue;
            };
            let x_idx = [x.saturating_sub(1), x, (x + 1).min(w - 1)];

            let mut sum_x = 0.0;
            let mut sum_y = 0.0;
            for (ky, &yy) in y_idx.iter().enumerate() {
                for (kx, &xx) in x_idx.iter().enumerate() {
                    let v = patch.valid(xx, yy).unwrap_or(centre);
                    sum_x += v * SOBEL_KERNEL_X[ky][kx];
                    sum_y += v * SOBEL_KERNEL_Y[ky][kx];
                }
            }

            let i = y * w + x;
            gx[i] = Some(sum_x * norm);
            gy[i] = Some(sum_y * norm);
        }
    }

    SlopeField { w, h, gx, gy }
}
