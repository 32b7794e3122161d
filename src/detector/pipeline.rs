//! One streaming pass: dispatch every planned module, fold completions into
//! the aggregator as they arrive, and stop waiting after an early decision.
//!
//! After the decision the queue is cancelled and the loop keeps draining for
//! the profile's grace period; whatever arrives then is kept as a late
//! arrival, whatever does not is marked abandoned or skipped.

use super::observer::{Observers, ProgressUpdate};
use crate::aggregator::{AggregationSummary, StreamingAggregator};
use crate::error::Result;
use crate::executor::{Delivery, ModuleExecutor, PlannedModule};
use crate::patch::ElevationPatch;
use crate::profile::DetectorProfile;
use crate::types::{FeatureResult, ModuleStatus};
use log::debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything a pass borrows from the detector.
pub(crate) struct PassContext<'a> {
    pub executor: &'a ModuleExecutor,
    pub profile: &'a Arc<DetectorProfile>,
    pub modules: &'a [PlannedModule],
    pub observers: &'a Observers,
}

pub(crate) fn run_pass(
    ctx: &PassContext<'_>,
    patch: Arc<ElevationPatch>,
    pass: usize,
) -> Result<AggregationSummary> {
    let mut aggregator = StreamingAggregator::new(ctx.profile);
    let mut dispatch = ctx
        .executor
        .dispatch(patch, Arc::clone(ctx.profile), ctx.modules);
    let mut grace_until: Option<Instant> = None;

    while let Some(delivery) = dispatch.next(grace_until) {
        match delivery {
            Delivery::Completed(completion) => {
                let result = completion.resolve();
                let name = result.module.clone();
                let Some(snapshot) = aggregator.ingest(result) else {
                    continue;
                };
                if !ctx.observers.is_empty() {
                    if let Some(result) = aggregator.result(&name) {
                        ctx.observers.notify(&ProgressUpdate {
                            module: name.clone(),
                            result: result.clone(),
                            snapshot,
                            state: aggregator.state().clone(),
                            pass,
                        });
                    }
                }
            }
            Delivery::Skipped { name, weight } => {
                aggregator.record(FeatureResult::placeholder(name, weight, ModuleStatus::Skipped));
            }
        }

        if grace_until.is_none() && aggregator.is_decided() {
            dispatch.cancel();
            grace_until =
                Some(Instant::now() + Duration::from_millis(ctx.profile.decision_grace_ms));
        }
    }

    let leftovers = dispatch.abandon();
    if !leftovers.is_empty() {
        debug!("pass {pass}: stopped waiting on {} modules", leftovers.len());
    }
    for (name, weight, status) in leftovers {
        aggregator.record(FeatureResult::placeholder(name, weight, status));
    }
    aggregator.finish()
}
