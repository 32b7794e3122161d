//! Detector profile: the immutable configuration every component reads.
//!
//! A profile names the feature modules to run with their weights, polarity
//! preferences and parameters, the geometry used to request the patch, and
//! all decision thresholds. It is validated once and then shared read-only
//! (typically behind an `Arc`) across concurrent detections.
//!
//! Modules
//! - [`params`] – geometry, thresholds and per-feature configuration.
//! - `presets` – tuned profiles such as [`DetectorProfile::windmill`].

pub mod params;
mod presets;

pub use params::{AggregationMethod, FeatureConfig, GeometryConfig, PatchShape, ThresholdConfig};

use crate::error::{DetectorError, Result};
use crate::patch::ElevationPatch;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Detection radius must fit inside the patch with this much extra room.
pub const RADIUS_MARGIN_RATIO: f32 = 1.25;

/// Tolerated relative mismatch between patch and profile resolution before warning.
const RESOLUTION_WARN_RATIO: f32 = 0.01;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorProfile {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub geometry: GeometryConfig,
    pub thresholds: ThresholdConfig,
    pub features: BTreeMap<String, FeatureConfig>,
    pub aggregation_method: AggregationMethod,
    pub max_workers: usize,
    pub enable_refinement: bool,
    pub max_refinement_attempts: usize,
    /// Per-module compute budget; `None` waits indefinitely.
    pub module_timeout_ms: Option<u64>,
    /// How long to keep collecting running modules after an early decision.
    pub decision_grace_ms: u64,
}

impl Default for DetectorProfile {
    fn default() -> Self {
        Self::windmill()
    }
}

impl DetectorProfile {
    /// Parse a profile from JSON text and validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let profile: DetectorProfile = serde_json::from_str(json)
            .map_err(|e| DetectorError::InvalidProfile(format!("malformed JSON: {e}")))?;
        profile.validate()?;
        Ok(profile)
    }

    /// Check every invariant the detector relies on.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(DetectorError::InvalidProfile(msg));

        for (name, feature) in &self.features {
            if !(feature.weight.is_finite() && feature.weight >= 0.0) {
                return invalid(format!("feature `{name}` has invalid weight {}", feature.weight));
            }
        }
        if self.enabled_features().next().is_none() {
            return invalid("no feature module is enabled with a positive weight".into());
        }

        let t = &self.thresholds;
        for (label, v) in [
            ("detection_threshold", t.detection_threshold),
            ("confidence_threshold", t.confidence_threshold),
            ("early_decision_threshold", t.early_decision_threshold),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return invalid(format!("{label} must lie in [0, 1], got {v}"));
            }
        }
        if t.min_modules_for_decision == 0 {
            return invalid("min_modules_for_decision must be at least 1".into());
        }
        if t.max_modules_for_efficiency == 0 {
            return invalid("max_modules_for_efficiency must be at least 1".into());
        }
        if self.max_workers == 0 {
            return invalid("max_workers must be at least 1".into());
        }

        let g = &self.geometry;
        for (label, v) in [
            ("resolution_m", g.resolution_m),
            ("structure_radius_m", g.structure_radius_m),
            ("patch_size_m[0]", g.patch_size_m[0]),
            ("patch_size_m[1]", g.patch_size_m[1]),
        ] {
            if !(v.is_finite() && v > 0.0) {
                return invalid(format!("geometry.{label} must be positive, got {v}"));
            }
        }
        if g.min_structure_size_m < 0.0 || g.min_structure_size_m > g.max_structure_size_m {
            return invalid(format!(
                "structure size range [{}, {}] is empty",
                g.min_structure_size_m, g.max_structure_size_m
            ));
        }
        let diameter = 2.0 * g.structure_radius_m;
        if diameter < g.min_structure_size_m || diameter > g.max_structure_size_m {
            return invalid(format!(
                "detection diameter {diameter} m lies outside the structure size range [{}, {}]",
                g.min_structure_size_m, g.max_structure_size_m
            ));
        }
        if !(g.aspect_ratio_tolerance.is_finite() && g.aspect_ratio_tolerance >= 0.0) {
            return invalid("aspect_ratio_tolerance must be non-negative".into());
        }
        let half = 0.5 * g.patch_size_m[0].min(g.patch_size_m[1]);
        if g.structure_radius_m * RADIUS_MARGIN_RATIO > half {
            return invalid(format!(
                "structure radius {} m does not fit a {:?} m patch with margin",
                g.structure_radius_m, g.patch_size_m
            ));
        }
        Ok(())
    }

    /// Enabled features with a positive weight, in key order.
    pub fn enabled_features(&self) -> impl Iterator<Item = (&str, &FeatureConfig)> {
        self.features
            .iter()
            .filter(|(_, f)| f.enabled && f.weight > 0.0)
            .map(|(k, f)| (k.as_str(), f))
    }

    /// Features that will actually be dispatched.
    ///
    /// When more modules are enabled than `max_modules_for_efficiency`, the
    /// heaviest ones win (ties broken by name). The returned list is in key
    /// order, which is also the dispatch and reporting order.
    pub fn planned_features(&self) -> Vec<(&str, &FeatureConfig)> {
        let mut enabled: Vec<_> = self.enabled_features().collect();
        let cap = self.thresholds.max_modules_for_efficiency;
        if enabled.len() > cap {
            enabled.sort_by(|a, b| b.1.weight.total_cmp(&a.1.weight).then(a.0.cmp(b.0)));
            enabled.truncate(cap);
            enabled.sort_by(|a, b| a.0.cmp(b.0));
        }
        enabled
    }

    /// Sum of planned module weights: the confidence denominator.
    pub fn planned_weight(&self) -> f32 {
        self.planned_features().iter().map(|(_, f)| f.weight).sum()
    }

    /// Validate a patch against this profile's geometry.
    ///
    /// Returns the patch to run on: circle-shaped profiles get the
    /// inscribed-circle mask applied.
    pub fn prepare_patch(&self, patch: &ElevationPatch) -> Result<ElevationPatch> {
        patch.validate()?;
        let g = &self.geometry;
        let needed = g.structure_radius_m * RADIUS_MARGIN_RATIO;
        if patch.half_extent_m() < needed {
            return Err(DetectorError::InvalidPatch(format!(
                "patch half extent {:.2} m is smaller than the {:.2} m the detection radius needs",
                patch.half_extent_m(),
                needed
            )));
        }
        let expected_aspect = g.patch_size_m[0] / g.patch_size_m[1];
        let deviation = (patch.aspect_ratio() / expected_aspect - 1.0).abs();
        if deviation > g.aspect_ratio_tolerance {
            return Err(DetectorError::InvalidPatch(format!(
                "patch aspect ratio {:.3} deviates from {:.3} beyond tolerance {}",
                patch.aspect_ratio(),
                expected_aspect,
                g.aspect_ratio_tolerance
            )));
        }
        if (patch.resolution_m / g.resolution_m - 1.0).abs() > RESOLUTION_WARN_RATIO {
            log::warn!(
                "patch resolution {} m differs from profile `{}` resolution {} m",
                patch.resolution_m,
                self.name,
                g.resolution_m
            );
        }
        let mut prepared = patch.clone();
        if g.patch_shape == PatchShape::Circle {
            prepared.mask_outside_circle();
        }
        Ok(prepared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoPoint;

    fn two_feature_profile() -> DetectorProfile {
        let mut profile = DetectorProfile::windmill();
        profile.features.clear();
        profile.features.insert("volume".into(), FeatureConfig::new(1.0));
        profile.features.insert("dropoff".into(), FeatureConfig::new(2.0));
        profile
    }

    #[test]
    fn windmill_preset_is_valid() {
        DetectorProfile::windmill().validate().unwrap();
    }

    #[test]
    fn negative_weight_is_rejected() {
        let mut p = two_feature_profile();
        p.features.get_mut("volume").unwrap().weight = -0.5;
        assert!(matches!(p.validate(), Err(DetectorError::InvalidProfile(_))));
    }

    #[test]
    fn zero_enabled_modules_is_rejected() {
        let mut p = two_feature_profile();
        for f in p.features.values_mut() {
            f.enabled = false;
        }
        assert!(p.validate().is_err());
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        let mut p = two_feature_profile();
        p.thresholds.detection_threshold = 1.2;
        assert!(p.validate().is_err());
    }

    #[test]
    fn radius_must_fit_with_margin() {
        let mut p = two_feature_profile();
        p.geometry.structure_radius_m = 17.0;
        p.geometry.max_structure_size_m = 40.0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn detection_diameter_must_lie_in_structure_size_range() {
        let mut p = two_feature_profile();
        p.geometry.structure_radius_m = 3.0;
        assert!(matches!(p.validate(), Err(DetectorError::InvalidProfile(_))));

        p.geometry.min_structure_size_m = 4.0;
        assert!(p.validate().is_ok());

        p.geometry.structure_radius_m = 16.0;
        p.geometry.max_structure_size_m = 30.0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn planned_features_respect_efficiency_cap() {
        let mut p = two_feature_profile();
        p.features.insert("entropy".into(), FeatureConfig::new(0.5));
        p.thresholds.max_modules_for_efficiency = 2;
        let planned: Vec<_> = p.planned_features().into_iter().map(|(k, _)| k).collect();
        assert_eq!(planned, vec!["dropoff", "volume"]);
        assert!((p.planned_weight() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn parses_json_with_defaults() {
        let json = r#"{
            "name": "test",
            "features": {
                "volume": {"weight": 1.5},
                "entropy": {"enabled": false},
                "coarse": {"module": "histogram", "polarity_preference": "positive"}
            },
            "max_workers": 2
        }"#;
        let p = DetectorProfile::from_json_str(json).unwrap();
        assert_eq!(p.max_workers, 2);
        assert_eq!(p.features["coarse"].module_kind("coarse"), "histogram");
        assert_eq!(p.enabled_features().count(), 2);
        assert_eq!(p.geometry, GeometryConfig::default());
    }

    #[test]
    fn small_patch_is_rejected() {
        let p = two_feature_profile();
        let patch = ElevationPatch::new(20, 20, 0.5, vec![0.0; 400], GeoPoint::default()).unwrap();
        assert!(matches!(p.prepare_patch(&patch), Err(DetectorError::InvalidPatch(_))));
    }

    #[test]
    fn aspect_ratio_is_checked() {
        let p = two_feature_profile();
        let patch = ElevationPatch::new(120, 80, 0.5, vec![0.0; 9600], GeoPoint::default()).unwrap();
        assert!(p.prepare_patch(&patch).is_err());
    }
}
