//! Parameter groups making up a detector profile.
//!
//! Defaults describe a windmill-mound search at 0.5 m resolution; see
//! [`DetectorProfile::windmill`](super::DetectorProfile::windmill).

use crate::types::Polarity;
use serde::{Deserialize, Serialize};

/// Footprint of the requested patch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchShape {
    Square,
    Rectangle,
    /// Samples outside the inscribed circle are ignored.
    Circle,
}

/// Geometry used to request the patch and to place the detection radius.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    /// Metres per sample the patch should be requested at.
    pub resolution_m: f32,
    /// Detection radius around the patch centre.
    pub structure_radius_m: f32,
    pub min_structure_size_m: f32,
    pub max_structure_size_m: f32,
    pub patch_shape: PatchShape,
    /// Requested extent `[width, height]` in metres.
    pub patch_size_m: [f32; 2],
    /// Allowed relative deviation of the patch aspect ratio.
    pub aspect_ratio_tolerance: f32,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            resolution_m: 0.5,
            structure_radius_m: 8.0,
            min_structure_size_m: 8.0,
            max_structure_size_m: 30.0,
            patch_shape: PatchShape::Square,
            patch_size_m: [40.0, 40.0],
            aspect_ratio_tolerance: 0.1,
        }
    }
}

/// Decision thresholds, all in `[0, 1]` except the module counts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub detection_threshold: f32,
    pub confidence_threshold: f32,
    pub early_decision_threshold: f32,
    pub min_modules_for_decision: usize,
    pub max_modules_for_efficiency: usize,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            detection_threshold: 0.6,
            confidence_threshold: 0.5,
            early_decision_threshold: 0.75,
            min_modules_for_decision: 3,
            max_modules_for_efficiency: 16,
        }
    }
}

impl ThresholdConfig {
    /// Score on the positive side of the neutral prior and at or above the
    /// detection threshold.
    pub fn is_detection(&self, score: f32) -> bool {
        score > NEUTRAL_SCORE && score >= self.detection_threshold
    }

    /// Mirror of [`is_detection`](Self::is_detection) below the prior.
    pub fn is_rejection(&self, score: f32) -> bool {
        score < NEUTRAL_SCORE && score <= 1.0 - self.detection_threshold
    }
}

/// Score carried by an empty or all-neutral evidence set.
const NEUTRAL_SCORE: f32 = 0.5;

/// How module results are folded into the final score.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    /// Fold results in completion order and allow early decisions.
    #[default]
    Streaming,
    /// Await every planned module; never decide early.
    Batch,
}

/// Per-feature entry of the profile's `features` map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Implementation to run; defaults to the feature's key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub enabled: bool,
    pub weight: f32,
    /// Static polarity; `None` lets the module's own rule decide.
    pub polarity_preference: Option<Polarity>,
    /// Module-specific parameters, parsed by the module itself.
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            module: None,
            enabled: true,
            weight: 1.0,
            polarity_preference: None,
            parameters: serde_json::Map::new(),
        }
    }
}

impl FeatureConfig {
    pub fn new(weight: f32) -> Self {
        Self {
            weight,
            ..Default::default()
        }
    }

    pub fn with_polarity(mut self, polarity: Polarity) -> Self {
        self.polarity_preference = Some(polarity);
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Set one module parameter.
    pub fn with_param(mut self, key: &str, value: serde_json::Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    /// Implementation name for a feature keyed `key`.
    pub fn module_kind<'a>(&'a self, key: &'a str) -> &'a str {
        self.module.as_deref().unwrap_or(key)
    }
}
