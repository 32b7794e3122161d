//! Feature modules: independent evidence extractors over an elevation patch.
//!
//! Every module implements [`FeatureModule`], a deterministic pure function
//! of the patch, the profile geometry and the parameters it was built from.
//! Modules fail soft: too little data yields an inconclusive
//! [`FeatureOutput`] rather than an error. Modules are created by name from
//! the profile's `features` map through a [`FeatureRegistry`]; adding a
//! module means registering a factory, the aggregator stays untouched.
//!
//! Built-in modules
//! - [`histogram`] – elevation histogram similarity against a reference.
//! - [`volume`] – volume above a border reference plane, centre-weighted.
//! - [`volume_distribution`] – radial and angular spread of that volume.
//! - [`dropoff`] – radial edge sharpness and its directional uniformity.
//! - [`compactness`] – circularity/symmetry of an angular height profile.
//! - [`entropy`] – elevation or residual entropy with a pivot polarity rule.
//! - [`planarity`] – residual of a plane fitted to the central platform.

pub mod compactness;
pub mod dropoff;
pub mod entropy;
pub mod histogram;
pub mod planarity;
pub mod polarity;
pub mod volume;
pub mod volume_distribution;

mod gradient;
mod surface;

pub use polarity::{PolarityRule, RejectionPolicy};

use crate::error::{DetectorError, ModuleError, Result};
use crate::patch::ElevationPatch;
use crate::profile::{FeatureConfig, GeometryConfig};
use crate::types::Polarity;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Free-form parameter object of one feature entry.
pub type ParamMap = serde_json::Map<String, serde_json::Value>;

/// Capability shared by every evidence extractor.
pub trait FeatureModule: Send + Sync {
    /// Implementation name (`"histogram"`, `"volume"`, ...).
    fn kind(&self) -> &str;

    /// Compute evidence for `patch`. Must not depend on anything but its inputs.
    fn compute(
        &self,
        patch: &ElevationPatch,
        geometry: &GeometryConfig,
    ) -> std::result::Result<FeatureOutput, ModuleError>;
}

/// Raw output of a module before polarity resolution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureOutput {
    /// Magnitude in `[0, 1]`; `None` marks the result inconclusive.
    pub score: Option<f32>,
    /// The module's own magnitude-to-polarity rule.
    pub rule: PolarityRule,
    /// Set by a rejection policy; overrides every other polarity source.
    pub forced_polarity: Option<Polarity>,
    pub metrics: BTreeMap<String, f64>,
    pub notes: Vec<String>,
}

impl FeatureOutput {
    /// Conclusive output; non-finite scores degrade to inconclusive.
    pub fn scored(score: f32) -> Self {
        if !score.is_finite() {
            return Self::inconclusive("non-finite score");
        }
        Self {
            score: Some(score.clamp(0.0, 1.0)),
            ..Default::default()
        }
    }

    pub fn inconclusive(reason: impl Into<String>) -> Self {
        Self {
            score: None,
            notes: vec![reason.into()],
            ..Default::default()
        }
    }

    pub fn with_rule(mut self, rule: PolarityRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn with_metric(mut self, key: &str, value: impl Into<f64>) -> Self {
        self.metrics.insert(key.to_string(), value.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

/// Deserialize a module's typed parameters from its JSON object.
pub fn parse_params<T: DeserializeOwned>(params: &ParamMap) -> std::result::Result<T, String> {
    serde_json::from_value(serde_json::Value::Object(params.clone())).map_err(|e| e.to_string())
}

type Factory =
    Arc<dyn Fn(&ParamMap) -> std::result::Result<Arc<dyn FeatureModule>, String> + Send + Sync>;

/// Name → factory table used to instantiate the profile's feature modules.
#[derive(Clone)]
pub struct FeatureRegistry {
    factories: BTreeMap<String, Factory>,
}

impl Default for FeatureRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl std::fmt::Debug for FeatureRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl FeatureRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry holding the seven built-in modules.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("histogram", histogram::factory);
        registry.register("volume", volume::factory);
        registry.register("volume_distribution", volume_distribution::factory);
        registry.register("dropoff", dropoff::factory);
        registry.register("compactness", compactness::factory);
        registry.register("entropy", entropy::factory);
        registry.register("planarity", planarity::factory);
        registry
    }

    /// Register (or replace) the factory for `kind`.
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&ParamMap) -> std::result::Result<Arc<dyn FeatureModule>, String>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(kind.to_string(), Arc::new(factory));
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Instantiate the module for the feature keyed `key`.
    pub fn build(&self, key: &str, config: &FeatureConfig) -> Result<Arc<dyn FeatureModule>> {
        let kind = config.module_kind(key);
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| DetectorError::UnknownModule {
                name: kind.to_string(),
                known: self.kinds().join(", "),
            })?;
        factory(&config.parameters).map_err(|message| DetectorError::InvalidParameters {
            module: key.to_string(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_registry_knows_all_modules() {
        let registry = FeatureRegistry::with_builtin();
        assert_eq!(
            registry.kinds(),
            vec![
                "compactness",
                "dropoff",
                "entropy",
                "histogram",
                "planarity",
                "volume",
                "volume_distribution"
            ]
        );
    }

    #[test]
    fn unknown_kind_is_an_input_error() {
        let registry = FeatureRegistry::with_builtin();
        let err = registry
            .build("lidar_magic", &FeatureConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, DetectorError::UnknownModule { .. }));
        assert!(err.is_input_error());
    }

    #[test]
    fn unknown_parameter_is_rejected() {
        let registry = FeatureRegistry::with_builtin();
        let config = FeatureConfig::default().with_param("binz", json!(12));
        let err = registry.build("histogram", &config).err().unwrap();
        assert!(matches!(err, DetectorError::InvalidParameters { .. }));
    }

    #[test]
    fn alias_resolves_to_module_kind() {
        let registry = FeatureRegistry::with_builtin();
        let config = FeatureConfig::default().with_module("histogram");
        let module = registry.build("histogram_coarse", &config).unwrap();
        assert_eq!(module.kind(), "histogram");
    }

    #[test]
    fn non_finite_score_is_inconclusive() {
        assert!(FeatureOutput::scored(f32::NAN).score.is_none());
        assert_eq!(FeatureOutput::scored(1.7).score, Some(1.0));
    }
}
