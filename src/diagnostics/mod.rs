//! Report data model returned by the detector.
//!
//! `DetectionResult` bundles the decision (score, confidence, outcome) with
//! everything needed to audit it: the per-module breakdown, the streaming
//! history, the early-decision point, the refinement trace and timings.

pub mod refine;
pub mod report;
pub mod timing;

pub use refine::{RefinementPass, RefinementStage};
pub use report::{DetectionResult, EarlyDecision, Outcome};
pub use timing::{StageTiming, TimingBreakdown};
