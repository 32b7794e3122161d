//! Error types surfaced by the detector.
//!
//! Only input validation problems and the all-modules-failed case reach the
//! caller. Per-module faults are converted into placeholders by the executor.

use std::path::PathBuf;
use thiserror::Error;

/// Hard failures returned from detection, profile loading and patch loading.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// Patch geometry or samples are unusable.
    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    /// Profile failed validation.
    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    /// A feature entry names a module kind nobody registered.
    #[error("unknown feature module `{name}` (registered: {known})")]
    UnknownModule { name: String, known: String },

    /// Module parameters could not be parsed or are out of range.
    #[error("invalid parameters for module `{module}`: {message}")]
    InvalidParameters { module: String, message: String },

    /// Every dispatched module failed or timed out.
    #[error("all {attempted} dispatched feature modules failed")]
    AllModulesFailed { attempted: usize },

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl DetectorError {
    /// True for the errors raised before any module runs.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            DetectorError::InvalidPatch(_)
                | DetectorError::InvalidProfile(_)
                | DetectorError::UnknownModule { .. }
                | DetectorError::InvalidParameters { .. }
        )
    }
}

/// Failure inside a single feature module's computation.
#[derive(Debug, Clone, Error)]
pub enum ModuleError {
    #[error("numerical failure: {0}")]
    Numerical(String),
}

pub type Result<T> = std::result::Result<T, DetectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_are_classified() {
        assert!(DetectorError::InvalidPatch("empty".into()).is_input_error());
        assert!(DetectorError::UnknownModule {
            name: "x".into(),
            known: "volume".into()
        }
        .is_input_error());
        assert!(!DetectorError::AllModulesFailed { attempted: 3 }.is_input_error());
    }

    #[test]
    fn messages_name_the_module() {
        let err = DetectorError::InvalidParameters {
            module: "histogram".into(),
            message: "bins must be >= 2".into(),
        };
        assert!(err.to_string().contains("histogram"));
    }
}
