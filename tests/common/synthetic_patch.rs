use structure_detector::types::GeoPoint;
use structure_detector::ElevationPatch;

/// Side length in samples of a 40 m patch at 0.5 m resolution.
pub const SIDE: usize = 80;
pub const RESOLUTION_M: f32 = 0.5;

/// Builds a square patch from a height function of the metric offset
/// `(dx, dy)` to the patch centre.
pub fn patch_from(side: usize, res: f32, f: impl Fn(f32, f32) -> f32) -> ElevationPatch {
    assert!(side > 1, "patch must have at least two samples per side");
    let c = (side as f32 - 1.0) * 0.5;
    let data = (0..side * side)
        .map(|i| {
            let dx = ((i % side) as f32 - c) * res;
            let dy = ((i / side) as f32 - c) * res;
            f(dx, dy)
        })
        .collect();
    ElevationPatch::new(side, side, res, data, GeoPoint::new(52.0907, 5.1214))
        .expect("synthetic patch is valid")
}

/// Constant-elevation terrain.
pub fn flat(z: f32) -> ElevationPatch {
    patch_from(SIDE, RESOLUTION_M, |_, _| z)
}

/// Paraboloid mound of `height` metres and footprint radius `radius` metres.
pub fn mound(height: f32, radius: f32) -> ElevationPatch {
    patch_from(SIDE, RESOLUTION_M, |dx, dy| {
        (height * (1.0 - (dx * dx + dy * dy) / (radius * radius))).max(0.0)
    })
}

/// Deterministic pseudo-random value in `[-0.5, 0.5)`.
pub fn hash_noise(i: usize) -> f32 {
    let mut x = (i as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    x ^= x >> 29;
    x = x.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x ^= x >> 32;
    (x % 10_000) as f32 / 10_000.0 - 0.5
}

/// Uncorrelated rough terrain with peak-to-peak `amplitude` metres.
pub fn noise(amplitude: f32) -> ElevationPatch {
    let c = (SIDE as f32 - 1.0) * 0.5;
    patch_from(SIDE, RESOLUTION_M, |dx, dy| {
        let x = (dx / RESOLUTION_M + c).round() as usize;
        let y = (dy / RESOLUTION_M + c).round() as usize;
        amplitude * hash_noise(y * SIDE + x)
    })
}
