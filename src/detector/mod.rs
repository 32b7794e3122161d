//! Structure detector orchestrating validation, parallel feature extraction,
//! streaming aggregation and optional refinement.
//!
//! Overview
//! - Validates the profile once and instantiates its planned feature
//!   modules through a [`FeatureRegistry`].
//! - Per call, checks the patch against the profile geometry, dispatches
//!   every planned module on a bounded worker pool and folds completions
//!   into a [`StreamingAggregator`](crate::aggregator::StreamingAggregator)
//!   in the order they finish.
//! - In streaming mode the aggregator may decide early; the detector then
//!   stops waiting on outstanding modules after a short grace period.
//! - When the outcome stays undetermined and refinement is enabled, the
//!   patch is re-evaluated at coarser resolutions.
//!
//! Modules
//! - `pipeline` – one streaming pass over the executor.
//! - `refinement` – coarse re-computation passes.
//! - [`observer`] – progress listeners invoked once per aggregated module.
//!
//! A detector is `Send + Sync`; one instance can serve concurrent detections
//! on different patches.

pub mod observer;
mod pipeline;
mod refinement;

pub use observer::{ProgressObserver, ProgressUpdate};

use crate::diagnostics::timing::elapsed_ms;
use crate::diagnostics::{DetectionResult, TimingBreakdown};
use crate::error::Result;
use crate::executor::{ModuleExecutor, PlannedModule};
use crate::features::FeatureRegistry;
use crate::patch::ElevationPatch;
use crate::profile::DetectorProfile;
use log::debug;
use observer::Observers;
use pipeline::{run_pass, PassContext};
use refinement::{is_undetermined, refine};
use std::sync::Arc;
use std::time::Instant;

/// Multi-feature structure detector bound to one validated profile.
pub struct StructureDetector {
    profile: Arc<DetectorProfile>,
    modules: Vec<PlannedModule>,
    executor: ModuleExecutor,
    observers: Observers,
}

impl std::fmt::Debug for StructureDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructureDetector")
            .field("profile", &self.profile.name)
            .field("modules", &self.modules)
            .field("executor", &self.executor)
            .finish()
    }
}

impl StructureDetector {
    /// Create a detector using the built-in feature modules.
    pub fn new(profile: impl Into<Arc<DetectorProfile>>) -> Result<Self> {
        Self::with_registry(profile, &FeatureRegistry::with_builtin())
    }

    /// Create a detector resolving module kinds through `registry`.
    pub fn with_registry(
        profile: impl Into<Arc<DetectorProfile>>,
        registry: &FeatureRegistry,
    ) -> Result<Self> {
        let profile = profile.into();
        profile.validate()?;
        let modules = profile
            .planned_features()
            .into_iter()
            .map(|(name, config)| {
                Ok(PlannedModule {
                    name: name.to_string(),
                    weight: config.weight,
                    preference: config.polarity_preference,
                    module: registry.build(name, config)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let executor = ModuleExecutor::new(profile.max_workers)?;
        debug!(
            "detector for profile `{}` plans {} modules on {} workers",
            profile.name,
            modules.len(),
            executor.workers()
        );
        Ok(Self {
            profile,
            modules,
            executor,
            observers: Observers::default(),
        })
    }

    pub fn add_observer(&mut self, observer: impl ProgressObserver + 'static) {
        self.observers.push(Arc::new(observer));
    }

    pub fn with_observer(mut self, observer: impl ProgressObserver + 'static) -> Self {
        self.add_observer(observer);
        self
    }

    pub fn profile(&self) -> &DetectorProfile {
        &self.profile
    }

    /// Names of the modules every detection dispatches, in planned order.
    pub fn planned_modules(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name.as_str()).collect()
    }

    /// Run detection on one patch.
    ///
    /// Fails only on an invalid patch or when every dispatched module failed;
    /// module faults otherwise surface as failed entries in the result.
    pub fn detect(&self, patch: &ElevationPatch) -> Result<DetectionResult> {
        let total = Instant::now();
        let mut timings = TimingBreakdown::default();

        let start = Instant::now();
        let prepared = Arc::new(self.profile.prepare_patch(patch)?);
        timings.push_since("prepare", start);
        debug!(
            "detecting `{}` on {}x{} patch at ({:.6}, {:.6})",
            self.profile.name, prepared.w, prepared.h, patch.center.lat, patch.center.lon
        );

        let ctx = PassContext {
            executor: &self.executor,
            profile: &self.profile,
            modules: &self.modules,
            observers: &self.observers,
        };
        let start = Instant::now();
        let mut summary = run_pass(&ctx, Arc::clone(&prepared), 0)?;
        timings.push_since("stream", start);

        let t = &self.profile.thresholds;
        let refinement = if self.profile.enable_refinement
            && self.profile.max_refinement_attempts > 0
            && summary.early_decision.is_none()
            && is_undetermined(summary.final_score, summary.confidence, t)
        {
            let (stage, better) = refine(&ctx, &prepared, &summary, &mut timings);
            if let Some(better) = better {
                summary = better;
            }
            Some(stage)
        } else {
            None
        };

        timings.total_ms = elapsed_ms(total);
        debug!(
            "`{}` finished: score={:.3} confidence={:.3} outcome={:?} in {:.2} ms",
            self.profile.name, summary.final_score, summary.confidence, summary.outcome, timings.total_ms
        );
        Ok(DetectionResult {
            profile: self.profile.name.clone(),
            center: patch.center,
            final_score: summary.final_score,
            confidence: summary.confidence,
            detected: summary.detected,
            outcome: summary.outcome,
            modules: summary.modules,
            history: summary.history,
            early_decision: summary.early_decision,
            refinement,
            timings,
        })
    }
}

/// One-shot detection with the built-in modules.
pub fn detect(patch: &ElevationPatch, profile: &DetectorProfile) -> Result<DetectionResult> {
    StructureDetector::new(profile.clone())?.detect(patch)
}
