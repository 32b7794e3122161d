//! Coarse re-computation for undetermined outcomes.
//!
//! Each attempt halves the resolution again (factor `2^attempt`) and re-runs
//! every planned module. Refinement stops at the first determined pass, at
//! the attempt budget, or when the patch can no longer be downsampled.

use super::pipeline::{run_pass, PassContext};
use crate::aggregator::AggregationSummary;
use crate::diagnostics::timing::elapsed_ms;
use crate::diagnostics::{RefinementPass, RefinementStage, TimingBreakdown};
use crate::patch::ElevationPatch;
use crate::profile::ThresholdConfig;
use log::{debug, warn};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

/// Confidence below threshold, or score neither a detection nor a rejection.
pub(crate) fn is_undetermined(score: f32, confidence: f32, t: &ThresholdConfig) -> bool {
    confidence < t.confidence_threshold || !(t.is_detection(score) || t.is_rejection(score))
}

/// Higher confidence wins, then distance from the neutral prior.
fn decisiveness(a: (f32, f32), b: (f32, f32)) -> Ordering {
    a.1.total_cmp(&b.1)
        .then((a.0 - 0.5).abs().total_cmp(&(b.0 - 0.5).abs()))
}

/// Run refinement passes; returns the trace and the summary to report if a
/// pass beat the initial one.
pub(crate) fn refine(
    ctx: &PassContext<'_>,
    patch: &ElevationPatch,
    initial: &AggregationSummary,
    timings: &mut TimingBreakdown,
) -> (RefinementStage, Option<AggregationSummary>) {
    let started = Instant::now();
    let thresholds = &ctx.profile.thresholds;
    let mut passes = Vec::new();
    let mut summaries: Vec<(usize, AggregationSummary)> = Vec::new();

    for attempt in 1..=ctx.profile.max_refinement_attempts {
        let factor = 1usize << attempt.min(16);
        let pass_start = Instant::now();
        let coarse = match patch.downsample(factor) {
            Ok(coarse) => coarse,
            Err(err) => {
                debug!("refinement stops at x{factor}: {err}");
                passes.push(failed_pass(attempt, factor, patch, err.to_string(), pass_start));
                break;
            }
        };
        let (resolution_m, width, height) = (coarse.resolution_m, coarse.w, coarse.h);
        match run_pass(ctx, Arc::new(coarse), attempt) {
            Ok(summary) => {
                let determined =
                    !is_undetermined(summary.final_score, summary.confidence, thresholds);
                debug!(
                    "refinement x{factor}: score={:.3} confidence={:.3} determined={determined}",
                    summary.final_score, summary.confidence
                );
                passes.push(RefinementPass {
                    attempt,
                    downsample_factor: factor,
                    resolution_m,
                    width,
                    height,
                    final_score: summary.final_score,
                    confidence: summary.confidence,
                    determined,
                    error: None,
                    elapsed_ms: elapsed_ms(pass_start),
                });
                timings.push_since(format!("refine_x{factor}"), pass_start);
                summaries.push((passes.len() - 1, summary));
                if determined {
                    break;
                }
            }
            Err(err) => {
                warn!("refinement pass x{factor} failed: {err}");
                let mut pass = failed_pass(attempt, factor, patch, err.to_string(), pass_start);
                pass.resolution_m = resolution_m;
                pass.width = width;
                pass.height = height;
                passes.push(pass);
                break;
            }
        }
    }

    let initial_key = (initial.final_score, initial.confidence);
    let best = summaries
        .into_iter()
        .filter(|(_, s)| {
            decisiveness((s.final_score, s.confidence), initial_key) == Ordering::Greater
        })
        .max_by(|(_, a), (_, b)| {
            decisiveness((a.final_score, a.confidence), (b.final_score, b.confidence))
        });

    let exhausted = !passes.iter().any(|p| p.determined);
    let (selected, summary) = match best {
        Some((index, summary)) => (Some(index), Some(summary)),
        None => (None, None),
    };
    let stage = RefinementStage {
        initial_score: initial.final_score,
        initial_confidence: initial.confidence,
        passes,
        selected,
        exhausted,
        elapsed_ms: elapsed_ms(started),
    };
    (stage, summary)
}

fn failed_pass(
    attempt: usize,
    factor: usize,
    patch: &ElevationPatch,
    error: String,
    started: Instant,
) -> RefinementPass {
    RefinementPass {
        attempt,
        downsample_factor: factor,
        resolution_m: patch.resolution_m * factor as f32,
        width: patch.w / factor,
        height: patch.h / factor,
        final_score: 0.5,
        confidence: 0.0,
        determined: false,
        error: Some(error),
        elapsed_ms: elapsed_ms(started),
    }
}
