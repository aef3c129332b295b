//! Error types for experiment runs.
//!
//! This module provides the error taxonomy of a run using `thiserror`:
//! one variant per collaborator that can fail (dataset store, schema,
//! configuration, model fitting, tracking backend, promotion metadata),
//! plus wrappers for I/O, polars and JSON errors.
//!
//! Errors are serializable as `{code, message}` so callers (and the CLI's
//! `--json` mode) can report them without string matching.

use lex_learning::LexLearningError;
use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// The main error type for experiment runs.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ExperimentError {
    /// The dataset could not be read from its source.
    #[error("Data access error: {0}")]
    DataAccess(String),

    /// The dataset does not have the expected shape (missing column, bad target).
    #[error("Schema error: {0}")]
    Schema(String),

    /// The run configuration is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Fitting or scoring the model failed.
    #[error("Model fit error: {0}")]
    ModelFit(String),

    /// The tracking backend rejected or failed an operation.
    #[error("Tracking store error: {0}")]
    TrackingStore(String),

    /// Promotion metadata could not be written.
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ExperimentError>,
    },
}

impl ExperimentError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ExperimentError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Get a stable error code.
    ///
    /// Context wrappers report the code of the error they wrap.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DataAccess(_) => "DATA_ACCESS_ERROR",
            Self::Schema(_) => "SCHEMA_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::ModelFit(_) => "MODEL_FIT_ERROR",
            Self::TrackingStore(_) => "TRACKING_STORE_ERROR",
            Self::Metadata(_) => "METADATA_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// The innermost error, with context wrappers peeled off.
    pub fn root(&self) -> &ExperimentError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<LexLearningError> for ExperimentError {
    fn from(err: LexLearningError) -> Self {
        let message = err.to_string();
        match err {
            LexLearningError::InvalidConfig(_) => Self::Configuration(message),
            LexLearningError::ColumnNotFound(_) | LexLearningError::InvalidTarget { .. } => {
                Self::Schema(message)
            }
            LexLearningError::InvalidData(_)
            | LexLearningError::TrainingFailed(_)
            | LexLearningError::NotFitted => Self::ModelFit(message),
            LexLearningError::Serialization(_) => Self::TrackingStore(message),
            LexLearningError::Polars(e) => Self::Polars(e),
            _ => Self::ModelFit(message),
        }
    }
}

/// Serialize implementation for structured error reporting.
///
/// Errors are serialized as a struct with `code` and `message` fields.
impl Serialize for ExperimentError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("ExperimentError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for experiment operations.
pub type Result<T> = std::result::Result<T, ExperimentError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, LexLearningError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| ExperimentError::from(e).with_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        assert_eq!(
            ExperimentError::DataAccess("x".to_string()).error_code(),
            "DATA_ACCESS_ERROR"
        );
        assert_eq!(
            ExperimentError::Metadata("x".to_string()).error_code(),
            "METADATA_ERROR"
        );
    }

    #[test]
    fn test_learning_error_mapping() {
        let cases = [
            (LexLearningError::InvalidConfig("x".into()), "CONFIGURATION_ERROR"),
            (LexLearningError::ColumnNotFound("a".into()), "SCHEMA_ERROR"),
            (
                LexLearningError::InvalidTarget {
                    column: "y".into(),
                    reason: "r".into(),
                },
                "SCHEMA_ERROR",
            ),
            (LexLearningError::InvalidData("x".into()), "MODEL_FIT_ERROR"),
            (LexLearningError::TrainingFailed("x".into()), "MODEL_FIT_ERROR"),
            (LexLearningError::NotFitted, "MODEL_FIT_ERROR"),
        ];
        for (err, code) in cases {
            assert_eq!(ExperimentError::from(err).error_code(), code);
        }
    }

    #[test]
    fn test_mapping_keeps_message() {
        let err = ExperimentError::from(LexLearningError::ColumnNotFound("a".into()));
        assert_eq!(err.to_string(), "Schema error: Column 'a' not found");
    }

    #[test]
    fn test_error_serialization() {
        let error = ExperimentError::Schema("Column 'a' not found".to_string());
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("SCHEMA_ERROR"));
        assert!(json.contains("Column 'a' not found"));
    }

    #[test]
    fn test_with_context() {
        let error =
            ExperimentError::TrackingStore("timeout".to_string()).with_context("While logging model");
        assert!(error.to_string().contains("While logging model"));
        assert_eq!(error.error_code(), "TRACKING_STORE_ERROR"); // Preserves original code
        assert!(matches!(error.root(), ExperimentError::TrackingStore(_)));
    }
}
