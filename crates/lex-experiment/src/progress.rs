//! Progress reporting for experiment runs.
//!
//! The runner reports each stage it enters through an optional
//! [`ProgressCallback`]:
//!
//! ```
//! use std::sync::Arc;
//! use lex_experiment::progress::{ProgressCallback, ProgressUpdate};
//!
//! let callback: ProgressCallback = Arc::new(|update: ProgressUpdate| {
//!     println!("[{}] {:.0}% - {}", update.stage, update.progress * 100.0, update.message);
//! });
//! ```

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// The stage a run is in.
///
/// Stages follow each other in declaration order; [`Complete`](Self::Complete)
/// and [`Failed`](Self::Failed) are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum RunStage {
    /// Reading the dataset.
    #[default]
    Loading,
    /// Separating the label column.
    Splitting,
    /// Scoring the pipeline fold by fold.
    CrossValidating,
    /// Fitting the pipeline on the full dataset.
    Fitting,
    /// Writing parameters, metrics and the model to the tracking store.
    Logging,
    /// Writing promotion metadata.
    Annotating,
    /// Run logged and annotated.
    Complete,
    /// Run aborted by an error.
    Failed,
}

impl RunStage {
    /// Snake-case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Loading => "loading",
            RunStage::Splitting => "splitting",
            RunStage::CrossValidating => "cross_validating",
            RunStage::Fitting => "fitting",
            RunStage::Logging => "logging",
            RunStage::Annotating => "annotating",
            RunStage::Complete => "complete",
            RunStage::Failed => "failed",
        }
    }

    /// Overall progress when the stage starts.
    #[must_use]
    pub fn progress(&self) -> f64 {
        match self {
            RunStage::Loading => 0.0,
            RunStage::Splitting => 0.1,
            RunStage::CrossValidating => 0.15,
            RunStage::Fitting => 0.7,
            RunStage::Logging => 0.85,
            RunStage::Annotating => 0.95,
            RunStage::Complete | RunStage::Failed => 1.0,
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A progress update from the runner.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ProgressUpdate {
    /// Stage being entered.
    pub stage: RunStage,

    /// Overall progress from 0.0 to 1.0. Monotonic within a successful run.
    pub progress: f64,

    /// Human-readable status message.
    pub message: String,
}

impl ProgressUpdate {
    /// Update for entering `stage`.
    pub fn new(stage: RunStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            progress: stage.progress(),
            message: message.into(),
        }
    }
}

/// Callback receiving [`ProgressUpdate`]s. Must be cheap; it runs inline.
pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;
