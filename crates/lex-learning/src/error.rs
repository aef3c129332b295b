//! Error types for the lex-learning crate.
//!
//! This module defines [`LexLearningError`], the main error type used throughout
//! the crate. All public API functions return `Result<T, LexLearningError>`.
//!
//! # Example
//!
//! ```
//! use lex_learning::{Algorithm, ClassifierSpec, LexLearningError, RunConfig};
//!
//! fn configure() -> Result<RunConfig, LexLearningError> {
//!     // Errors are automatically propagated with ?
//!     let config = RunConfig::builder()
//!         .target_column("added_product")
//!         .categorical_columns(["a"])
//!         .numerical_columns(["x"])
//!         .classifier(ClassifierSpec::new(Algorithm::RandomForest))
//!         .build()?;
//!     Ok(config)
//! }
//! # configure().unwrap();
//! ```

use thiserror::Error;

/// The main error type for lex-learning operations.
///
/// This enum covers all error conditions that can occur during:
/// - Run configuration and hyperparameter validation
/// - Feature extraction from a DataFrame
/// - Model fitting (on a fold or on the full dataset)
/// - Prediction and artifact (de)serialization
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LexLearningError {
    /// Invalid run configuration.
    ///
    /// Check the error message for details on which configuration value is invalid
    /// and what values are accepted.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A column named in the configuration is not present in the DataFrame.
    ///
    /// Column names are case-sensitive.
    #[error("Column '{0}' not found")]
    ColumnNotFound(String),

    /// The target column does not hold binary labels.
    ///
    /// Accepted encodings are 0/1 (integer or float), booleans, and the strings
    /// `"0"`, `"1"`, `"0.0"`, `"1.0"`, `"true"`, `"false"`.
    #[error("Invalid target column '{column}': {reason}")]
    InvalidTarget {
        /// Name of the target column.
        column: String,
        /// Why the column was rejected.
        reason: String,
    },

    /// Invalid data provided for fitting or prediction.
    ///
    /// Common causes:
    /// - A numerical feature contains nulls, NaN or infinities
    /// - Fewer rows than cross-validation folds
    /// - Feature and target lengths differ
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Fitting failed.
    ///
    /// Raised, for example, when a training fold contains a single class.
    #[error("Training failed: {0}")]
    TrainingFailed(String),

    /// Prediction was requested from a pipeline that has not been fit.
    #[error("Pipeline is not fitted")]
    NotFitted,

    /// Failed to serialize or deserialize a pipeline artifact.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error raised by polars while reading a DataFrame.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),
}

impl LexLearningError {
    /// Wrap a fit error with the index of the cross-validation fold it came from.
    pub(crate) fn in_fold(self, fold: usize) -> Self {
        match self {
            LexLearningError::TrainingFailed(msg) => {
                LexLearningError::TrainingFailed(format!("fold {fold}: {msg}"))
            }
            LexLearningError::InvalidData(msg) => {
                LexLearningError::InvalidData(format!("fold {fold}: {msg}"))
            }
            other => other,
        }
    }
}

/// Result type alias for lex-learning operations.
pub type Result<T> = std::result::Result<T, LexLearningError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_fold_prefixes_training_errors() {
        let err = LexLearningError::TrainingFailed("single class".to_string()).in_fold(3);
        assert_eq!(err.to_string(), "Training failed: fold 3: single class");
    }

    #[test]
    fn test_in_fold_keeps_other_variants() {
        let err = LexLearningError::ColumnNotFound("a".to_string()).in_fold(1);
        assert!(matches!(err, LexLearningError::ColumnNotFound(ref c) if c == "a"));
    }

    #[test]
    fn test_invalid_target_message() {
        let err = LexLearningError::InvalidTarget {
            column: "added_product".to_string(),
            reason: "value '2' is not a binary label".to_string(),
        };
        assert!(err.to_string().contains("added_product"));
        assert!(err.to_string().contains("'2'"));
    }
}
