#![doc = include_str!("../README.md")]

// Public modules (stable-ish surface)
pub mod detector;
pub mod diagnostics;
pub mod error;
pub mod io;
pub mod patch;
pub mod profile;
pub mod types;

// Building blocks: public for custom modules and tooling, less stable.
pub mod aggregator;
pub mod executor;
pub mod features;

// --- High-level re-exports -------------------------------------------------

pub use crate::detector::{detect, ProgressObserver, ProgressUpdate, StructureDetector};
pub use crate::diagnostics::{DetectionResult, EarlyDecision, Outcome};
pub use crate::error::{DetectorError, ModuleError, Result};
pub use crate::features::{FeatureModule, FeatureOutput, FeatureRegistry, PolarityRule};
pub use crate::patch::ElevationPatch;
pub use crate::profile::{AggregationMethod, DetectorProfile, FeatureConfig};
pub use crate::types::{FeatureResult, ModuleStatus, Polarity};

// --- Prelude ---------------------------------------------------------------

/// Small prelude for quick experiments.
///
/// ```no_run
/// use structure_detector::prelude::*;
///
/// # fn main() -> Result<(), DetectorError> {
/// let (w, h) = (80usize, 80usize);
/// let heights = vec![0.0f32; w * h];
/// let patch = ElevationPatch::new(w, h, 0.5, heights, GeoPoint::new(52.09, 5.12))?;
///
/// let detector = StructureDetector::new(DetectorProfile::windmill())?;
/// let result = detector.detect(&patch)?;
/// println!("score={:.3} confidence={:.3}", result.final_score, result.confidence);
/// # Ok(())
/// # }
/// ```
pub mod prelude {
    pub use crate::types::GeoPoint;
    pub use crate::{
        DetectionResult, DetectorError, DetectorProfile, ElevationPatch, Outcome, StructureDetector,
    };
}
