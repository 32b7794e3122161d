use serde::{Deserialize, Serialize};

/// Coarse re-computation trace for an undetermined first pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinementStage {
    pub initial_score: f32,
    pub initial_confidence: f32,
    pub passes: Vec<RefinementPass>,
    /// Index into `passes` of the reported pass; `None` keeps the initial one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<usize>,
    /// No pass produced a determined outcome within the attempt budget.
    pub exhausted: bool,
    pub elapsed_ms: f64,
}

/// One refinement attempt on a downsampled patch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinementPass {
    pub attempt: usize,
    pub downsample_factor: usize,
    pub resolution_m: f32,
    pub width: usize,
    pub height: usize,
    pub final_score: f32,
    pub confidence: f32,
    pub determined: bool,
    /// Set when the pass could not run (patch too small, every module failed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: f64,
}
