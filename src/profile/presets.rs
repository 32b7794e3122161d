use super::{AggregationMethod, DetectorProfile, FeatureConfig, GeometryConfig, ThresholdConfig};
use crate::types::Polarity;
use serde_json::json;
use std::collections::BTreeMap;

impl DetectorProfile {
    /// Profile tuned for domed windmill mounds roughly 10–30 m across.
    ///
    /// Histogram similarity, volume, dropoff and compactness carry the
    /// decision; entropy resolves its polarity from its own pivot rule.
    /// Planarity is configured but disabled because windmill mounds are
    /// domed rather than flat-topped.
    pub fn windmill() -> Self {
        let mut features = BTreeMap::new();
        features.insert(
            "histogram".to_string(),
            FeatureConfig::new(1.5)
                .with_polarity(Polarity::Positive)
                .with_param("metric", json!("bhattacharyya"))
                .with_param("min_similarity", json!(0.5))
                .with_param("rejection", json!("penalize")),
        );
        features.insert(
            "volume".to_string(),
            FeatureConfig::new(1.2)
                .with_polarity(Polarity::Positive)
                .with_param("base_volume_m3", json!(200.0)),
        );
        features.insert(
            "dropoff".to_string(),
            FeatureConfig::new(1.0).with_polarity(Polarity::Positive),
        );
        features.insert(
            "compactness".to_string(),
            FeatureConfig::new(1.0)
                .with_polarity(Polarity::Positive)
                .with_param("fourier_filter", json!(true)),
        );
        features.insert(
            "entropy".to_string(),
            FeatureConfig::new(0.8).with_param("mode", json!("residual")),
        );
        features.insert(
            "volume_distribution".to_string(),
            FeatureConfig::new(0.6).with_polarity(Polarity::Positive),
        );
        features.insert(
            "planarity".to_string(),
            FeatureConfig::new(0.8)
                .with_polarity(Polarity::Positive)
                .with_param("fit", json!("robust"))
                .disabled(),
        );

        Self {
            name: "windmill".to_string(),
            version: "1.0".to_string(),
            description: "Domed windmill mounds, 0.5 m elevation models".to_string(),
            geometry: GeometryConfig::default(),
            thresholds: ThresholdConfig::default(),
            features,
            aggregation_method: AggregationMethod::Streaming,
            max_workers: 4,
            enable_refinement: true,
            max_refinement_attempts: 1,
            module_timeout_ms: Some(10_000),
            decision_grace_ms: 25,
        }
    }
}
