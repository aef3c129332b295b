//! Run configuration for a single training experiment.
//!
//! This module provides [`RunConfig`] and its builder. A built config has
//! already been validated: column lists are consistent, the fold count and
//! metric list are usable, and the classifier hyperparameters resolve.
//!
//! # Example
//!
//! ```
//! use lex_learning::{Algorithm, ClassifierSpec, Metric, RunConfig};
//!
//! let config = RunConfig::builder()
//!     .target_column("added_product")
//!     .categorical_columns(["a", "b"])
//!     .numerical_columns(["x"])
//!     .classifier(ClassifierSpec::new(Algorithm::RandomForest).with_param("n_estimators", 50))
//!     .cv_folds(5)
//!     .metrics([Metric::F1Macro, Metric::RocAuc])
//!     .build()
//!     .expect("valid config");
//! assert_eq!(config.cv_folds(), 5);
//! ```

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::classifier::ClassifierSpec;
use crate::error::LexLearningError;
use crate::metrics::Metric;
use crate::types::ParamValue;

/// Default number of cross-validation folds.
pub const DEFAULT_CV_FOLDS: usize = 5;

/// Default random seed.
pub const DEFAULT_RANDOM_SEED: u64 = 42;

/// Validated configuration of one run.
///
/// Use [`RunConfig::builder()`] to construct one.
///
/// # Validation
///
/// [`build()`](RunConfigBuilder::build) rejects:
/// - a missing or empty `target_column`
/// - an empty categorical or numerical list, empty column names, duplicates
///   within a list
/// - a column in both lists, or the target listed as a feature
/// - `cv_folds` below 2, or an empty metric list
/// - unknown, wrongly typed or out-of-range hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunConfig {
    target_column: String,
    categorical_columns: Vec<String>,
    numerical_columns: Vec<String>,
    classifier: ClassifierSpec,
    cv_folds: usize,
    metrics: Vec<Metric>,
    random_seed: u64,
    resolved_hyperparameters: BTreeMap<String, ParamValue>,
}

impl RunConfig {
    /// Create a new builder.
    #[must_use]
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    /// Name of the binary label column.
    #[must_use]
    pub fn target_column(&self) -> &str {
        &self.target_column
    }

    /// Columns one-hot encoded before fitting.
    #[must_use]
    pub fn categorical_columns(&self) -> &[String] {
        &self.categorical_columns
    }

    /// Columns passed through as floats.
    #[must_use]
    pub fn numerical_columns(&self) -> &[String] {
        &self.numerical_columns
    }

    /// Every feature column, categorical first.
    #[must_use]
    pub fn feature_columns(&self) -> Vec<&str> {
        self.categorical_columns
            .iter()
            .chain(&self.numerical_columns)
            .map(String::as_str)
            .collect()
    }

    /// Classifier choice and raw hyperparameters.
    #[must_use]
    pub fn classifier(&self) -> &ClassifierSpec {
        &self.classifier
    }

    /// Number of stratified folds.
    #[must_use]
    pub fn cv_folds(&self) -> usize {
        self.cv_folds
    }

    /// Metrics scored on each fold.
    #[must_use]
    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// Seed for fold shuffling and the classifier.
    #[must_use]
    pub fn random_seed(&self) -> u64 {
        self.random_seed
    }

    /// Effective hyperparameters, defaults included.
    #[must_use]
    pub fn resolved_hyperparameters(&self) -> &BTreeMap<String, ParamValue> {
        &self.resolved_hyperparameters
    }
}

/// Builder for [`RunConfig`].
///
/// Created via [`RunConfig::builder()`]. All setters return `self` to allow
/// method chaining.
#[derive(Debug, Clone)]
pub struct RunConfigBuilder {
    target_column: Option<String>,
    categorical_columns: Vec<String>,
    numerical_columns: Vec<String>,
    classifier: ClassifierSpec,
    cv_folds: usize,
    metrics: Vec<Metric>,
    random_seed: u64,
}

impl Default for RunConfigBuilder {
    fn default() -> Self {
        Self {
            target_column: None,
            categorical_columns: Vec::new(),
            numerical_columns: Vec::new(),
            classifier: ClassifierSpec::default(),
            cv_folds: DEFAULT_CV_FOLDS,
            metrics: vec![Metric::F1Macro, Metric::RocAuc],
            random_seed: DEFAULT_RANDOM_SEED,
        }
    }
}

impl RunConfigBuilder {
    /// Set the target column name (required).
    #[must_use]
    pub fn target_column(mut self, column: impl Into<String>) -> Self {
        self.target_column = Some(column.into());
        self
    }

    /// Set the categorical feature columns, in order.
    #[must_use]
    pub fn categorical_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categorical_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the numerical feature columns, in order.
    #[must_use]
    pub fn numerical_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.numerical_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the classifier (default: random forest with default hyperparameters).
    #[must_use]
    pub fn classifier(mut self, classifier: ClassifierSpec) -> Self {
        self.classifier = classifier;
        self
    }

    /// Set the number of cross-validation folds (default: 5).
    ///
    /// [`build()`](Self::build) returns an error if `folds < 2`.
    #[must_use]
    pub fn cv_folds(mut self, folds: usize) -> Self {
        self.cv_folds = folds;
        self
    }

    /// Set the metrics to score (default: `f1_macro`, `roc_auc`).
    ///
    /// Duplicates are dropped, keeping first occurrence order.
    #[must_use]
    pub fn metrics(mut self, metrics: impl IntoIterator<Item = Metric>) -> Self {
        let mut seen = HashSet::new();
        self.metrics = metrics.into_iter().filter(|m| seen.insert(*m)).collect();
        self
    }

    /// Set the random seed for reproducibility (default: 42).
    #[must_use]
    pub fn random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    /// Build the configuration, validating all settings.
    ///
    /// # Errors
    ///
    /// Returns [`LexLearningError::InvalidConfig`] describing the first
    /// violated constraint.
    pub fn build(self) -> Result<RunConfig, LexLearningError> {
        let target_column = self
            .target_column
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                LexLearningError::InvalidConfig("target_column is required".to_string())
            })?;

        for (kind, columns) in [
            ("categorical_columns", &self.categorical_columns),
            ("numerical_columns", &self.numerical_columns),
        ] {
            if columns.is_empty() {
                return Err(LexLearningError::InvalidConfig(format!(
                    "{kind} must name at least one column"
                )));
            }
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for (kind, columns) in [
            ("categorical_columns", &self.categorical_columns),
            ("numerical_columns", &self.numerical_columns),
        ] {
            let mut in_list: HashSet<&str> = HashSet::new();
            for column in columns {
                if column.trim().is_empty() {
                    return Err(LexLearningError::InvalidConfig(format!(
                        "{kind} contains an empty column name"
                    )));
                }
                if column == &target_column {
                    return Err(LexLearningError::InvalidConfig(format!(
                        "target column '{target_column}' cannot also be a feature"
                    )));
                }
                if !in_list.insert(column) {
                    return Err(LexLearningError::InvalidConfig(format!(
                        "{kind} lists '{column}' more than once"
                    )));
                }
                if !seen.insert(column) {
                    return Err(LexLearningError::InvalidConfig(format!(
                        "column '{column}' is both categorical and numerical"
                    )));
                }
            }
        }

        if self.cv_folds < 2 {
            return Err(LexLearningError::InvalidConfig(
                "cv_folds must be at least 2".to_string(),
            ));
        }

        if self.metrics.is_empty() {
            return Err(LexLearningError::InvalidConfig(
                "at least one metric is required".to_string(),
            ));
        }

        let resolved_hyperparameters = self.classifier.resolve(self.random_seed)?.hyperparameters();

        Ok(RunConfig {
            target_column,
            categorical_columns: self.categorical_columns,
            numerical_columns: self.numerical_columns,
            classifier: self.classifier,
            cv_folds: self.cv_folds,
            metrics: self.metrics,
            random_seed: self.random_seed,
            resolved_hyperparameters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Algorithm;

    fn base() -> RunConfigBuilder {
        RunConfig::builder()
            .target_column("added_product")
            .categorical_columns(["a", "b"])
            .numerical_columns(["x"])
    }

    #[test]
    fn test_defaults() {
        let config = base().build().unwrap();
        assert_eq!(config.cv_folds(), 5);
        assert_eq!(config.random_seed(), 42);
        assert_eq!(config.metrics(), &[Metric::F1Macro, Metric::RocAuc]);
        assert_eq!(config.classifier().algorithm, Algorithm::RandomForest);
        assert_eq!(config.feature_columns(), vec!["a", "b", "x"]);
        assert!(config.resolved_hyperparameters().contains_key("n_estimators"));
    }

    #[test]
    fn test_missing_target() {
        let result = RunConfig::builder().numerical_columns(["x"]).build();
        assert!(result.unwrap_err().to_string().contains("target_column"));

        let result = RunConfig::builder()
            .target_column("  ")
            .numerical_columns(["x"])
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_no_feature_columns() {
        let result = RunConfig::builder().target_column("y").build();
        assert!(result.unwrap_err().to_string().contains("at least one column"));
    }

    #[test]
    fn test_empty_feature_list_rejected() {
        let err = RunConfig::builder()
            .target_column("y")
            .categorical_columns(["a"])
            .build()
            .unwrap_err();
        assert!(matches!(err, LexLearningError::InvalidConfig(_)));
        assert!(err.to_string().contains("numerical_columns"));

        let err = RunConfig::builder()
            .target_column("y")
            .numerical_columns(["x"])
            .build()
            .unwrap_err();
        assert!(matches!(err, LexLearningError::InvalidConfig(_)));
        assert!(err.to_string().contains("categorical_columns"));
    }

    #[test]
    fn test_overlapping_columns() {
        let result = base().numerical_columns(["a"]).build();
        assert!(result.unwrap_err().to_string().contains("both categorical and numerical"));
    }

    #[test]
    fn test_duplicate_and_empty_columns() {
        let result = base().categorical_columns(["a", "a"]).build();
        assert!(result.unwrap_err().to_string().contains("more than once"));

        let result = base().numerical_columns([""]).build();
        assert!(result.unwrap_err().to_string().contains("empty column name"));
    }

    #[test]
    fn test_target_as_feature() {
        let result = base().numerical_columns(["added_product"]).build();
        assert!(result.unwrap_err().to_string().contains("cannot also be a feature"));
    }

    #[test]
    fn test_invalid_cv_folds() {
        let result = base().cv_folds(1).build();
        assert!(result.unwrap_err().to_string().contains("cv_folds"));
        assert!(base().cv_folds(0).build().is_err());
    }

    #[test]
    fn test_empty_metrics() {
        let result = base().metrics([]).build();
        assert!(result.unwrap_err().to_string().contains("metric"));
    }

    #[test]
    fn test_duplicate_metrics_collapse() {
        let config = base()
            .metrics([Metric::Accuracy, Metric::RocAuc, Metric::Accuracy])
            .build()
            .unwrap();
        assert_eq!(config.metrics(), &[Metric::Accuracy, Metric::RocAuc]);
    }

    #[test]
    fn test_invalid_hyperparameter() {
        let result = base()
            .classifier(ClassifierSpec::new(Algorithm::RandomForest).with_param("n_estimators", -3))
            .build();
        assert!(matches!(result, Err(LexLearningError::InvalidConfig(_))));
    }

    #[test]
    fn test_builder_chaining() {
        let config = base()
            .classifier(ClassifierSpec::new(Algorithm::LogisticRegression))
            .cv_folds(10)
            .metrics([Metric::Accuracy])
            .random_seed(123)
            .build()
            .unwrap();

        assert_eq!(config.cv_folds(), 10);
        assert_eq!(config.random_seed(), 123);
        assert_eq!(config.classifier().algorithm, Algorithm::LogisticRegression);
        assert!(config.resolved_hyperparameters().contains_key("learning_rate"));
    }
}
