use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Direction in which a piece of evidence counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Positive,
    Negative,
    Neutral,
}

/// Where the resolved polarity of a result came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolaritySource {
    /// Declared by the profile's `polarity_preference`.
    Profile,
    /// Derived from the module's magnitude-to-polarity rule.
    ModuleRule,
    /// Forced by the module's rejection policy.
    Rejection,
    /// No evidence to resolve (inconclusive, failed or skipped).
    Unresolved,
}

/// Geographic centre of a patch in WGS84 degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Lifecycle outcome of one planned module within a detection call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    /// Produced evidence that was aggregated.
    Completed,
    /// Ran but had insufficient data; excluded from weight.
    Inconclusive,
    /// Returned an error, panicked or timed out.
    Failed,
    /// Never started because an early decision was already made.
    Skipped,
    /// Still running when the detector stopped waiting for it.
    Abandoned,
    /// Finished after the early decision; reported but not aggregated.
    LateArrival,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Error,
    Panic,
    Timeout,
}

/// Error marker carried in a failed module's metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModuleFault {
    pub kind: FaultKind,
    pub message: String,
}

impl ModuleFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Raw sub-metrics and error information attached to a result.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureMetadata {
    pub metrics: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ModuleFault>,
}

impl FeatureMetadata {
    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).copied()
    }
}

/// Evidence produced by one feature module, after polarity resolution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureResult {
    /// Feature name as keyed in the profile.
    pub module: String,
    /// Evidence strength in `[0, 1]`; `None` when inconclusive.
    pub score: Option<f32>,
    /// Raw module output before the polarity rule was applied.
    pub magnitude: Option<f32>,
    pub polarity: Polarity,
    pub polarity_source: PolaritySource,
    /// Configured weight of the module.
    pub weight: f32,
    pub status: ModuleStatus,
    pub metadata: FeatureMetadata,
    pub elapsed_ms: f64,
}

impl FeatureResult {
    /// Placeholder for a module that never produced evidence.
    pub fn placeholder(module: impl Into<String>, weight: f32, status: ModuleStatus) -> Self {
        Self {
            module: module.into(),
            score: None,
            magnitude: None,
            polarity: Polarity::Neutral,
            polarity_source: PolaritySource::Unresolved,
            weight,
            status,
            metadata: FeatureMetadata::default(),
            elapsed_ms: 0.0,
        }
    }

    /// Failed-module placeholder carrying the fault in its metadata.
    pub fn failed(module: impl Into<String>, weight: f32, fault: ModuleFault) -> Self {
        let mut result = Self::placeholder(module, weight, ModuleStatus::Failed);
        result.metadata.error = Some(fault);
        result
    }

    pub fn is_inconclusive(&self) -> bool {
        self.score.is_none()
    }

    /// Whether this result's weight enters the aggregation totals.
    pub fn counts_toward_weight(&self) -> bool {
        self.status == ModuleStatus::Completed && self.score.is_some()
    }

    /// Signed evidence contribution `score · weight` (zero for neutral).
    pub fn signed_evidence(&self) -> f32 {
        if !self.counts_toward_weight() {
            return 0.0;
        }
        let s = self.score.unwrap_or(0.0) * self.weight;
        match self.polarity {
            Polarity::Positive => s,
            Polarity::Negative => -s,
            Polarity::Neutral => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_placeholder_carries_fault_and_no_weight() {
        let r = FeatureResult::failed("volume", 1.2, ModuleFault::new(FaultKind::Panic, "boom"));
        assert_eq!(r.status, ModuleStatus::Failed);
        assert!(!r.counts_toward_weight());
        assert_eq!(r.signed_evidence(), 0.0);
        assert_eq!(r.metadata.error.as_ref().map(|f| f.kind), Some(FaultKind::Panic));
    }

    #[test]
    fn polarity_serializes_snake_case() {
        let json = serde_json::to_string(&Polarity::Negative).unwrap();
        assert_eq!(json, "\"negative\"");
    }
}
