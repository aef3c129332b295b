//! Stored state of a tracked run.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal and non-terminal statuses a backend records for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Scope open.
    Running,
    /// Closed after everything was logged.
    Finished,
    /// Closed early by an error or panic.
    Failed,
}

impl RunStatus {
    /// Backend spelling of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
        }
    }

    /// Parse the backend spelling. `KILLED` and `SCHEDULED` map onto
    /// `Failed` and `Running`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNNING" | "SCHEDULED" => Some(RunStatus::Running),
            "FINISHED" => Some(RunStatus::Finished),
            "FAILED" | "KILLED" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a run, derived from its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Opened, nothing logged yet.
    Created,
    /// Open with some parameters, metrics or artifacts logged.
    Running,
    /// Closed successfully.
    Logged,
    /// Closed successfully and annotated for promotion.
    PromotionAnnotated,
    /// Closed by a failure.
    Failed,
}

/// Kind of prediction a model makes, for the serving layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictionType {
    /// Two-class classification.
    BinaryClassification,
}

impl PredictionType {
    /// Canonical spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionType::BinaryClassification => "BINARY_CLASSIFICATION",
        }
    }

    /// Parse the canonical spelling.
    pub fn parse(s: &str) -> Option<Self> {
        (s == "BINARY_CLASSIFICATION").then_some(PredictionType::BinaryClassification)
    }
}

/// Metadata a model registry needs to promote a run's model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceInfo {
    /// Kind of prediction.
    pub prediction_type: PredictionType,
    /// Class labels in the model's probability order.
    pub class_labels: Vec<String>,
    /// Execution environment the model is meant to run in.
    pub environment: String,
    /// Label column the model was trained against.
    pub target_column: String,
}

impl InferenceInfo {
    /// Binary classification metadata.
    pub fn binary_classification(
        class_labels: Vec<String>,
        environment: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        Self {
            prediction_type: PredictionType::BinaryClassification,
            class_labels,
            environment: environment.into(),
            target_column: target_column.into(),
        }
    }
}

/// A model artifact attached to a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedArtifact {
    /// Path relative to the run's artifact root.
    pub artifact_path: String,
    /// Backend-specific location accepted by `load_model`.
    pub location: String,
}

/// Everything a backend knows about one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Backend run identifier.
    pub run_id: String,
    /// Human-readable run name.
    pub run_name: String,
    /// Current status.
    pub status: RunStatus,
    /// When the run was opened.
    pub start_time: DateTime<Utc>,
    /// When the run was closed.
    pub end_time: Option<DateTime<Utc>>,
    /// Logged parameters, rendered as text.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Logged metrics.
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    /// Logged model artifacts.
    #[serde(default)]
    pub artifacts: Vec<LoggedArtifact>,
    /// Promotion metadata, once annotated.
    #[serde(default)]
    pub inference: Option<InferenceInfo>,
}

impl RunRecord {
    /// Fresh record in the `RUNNING` status.
    pub fn new(run_id: impl Into<String>, run_name: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            run_name: run_name.into(),
            status: RunStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            artifacts: Vec::new(),
            inference: None,
        }
    }

    /// Derive the lifecycle state.
    pub fn state(&self) -> RunState {
        match self.status {
            RunStatus::Failed => RunState::Failed,
            RunStatus::Finished if self.inference.is_some() => RunState::PromotionAnnotated,
            RunStatus::Finished => RunState::Logged,
            RunStatus::Running
                if self.params.is_empty() && self.metrics.is_empty() && self.artifacts.is_empty() =>
            {
                RunState::Created
            }
            RunStatus::Running => RunState::Running,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let mut record = RunRecord::new("abc", "run-20240101000000");
        assert_eq!(record.state(), RunState::Created);

        record.params.insert("cv_folds".to_string(), "5".to_string());
        assert_eq!(record.state(), RunState::Running);

        record.status = RunStatus::Finished;
        assert_eq!(record.state(), RunState::Logged);

        record.inference = Some(InferenceInfo::binary_classification(
            vec!["0.0".to_string(), "1.0".to_string()],
            "python-3.10",
            "added_product",
        ));
        assert_eq!(record.state(), RunState::PromotionAnnotated);

        record.status = RunStatus::Failed;
        assert_eq!(record.state(), RunState::Failed);
    }

    #[test]
    fn test_status_spelling() {
        assert_eq!(RunStatus::Finished.as_str(), "FINISHED");
        assert_eq!(RunStatus::parse("KILLED"), Some(RunStatus::Failed));
        assert_eq!(RunStatus::parse("nope"), None);
        assert_eq!(
            serde_json::to_string(&PredictionType::BinaryClassification).unwrap(),
            "\"BINARY_CLASSIFICATION\""
        );
    }
}
