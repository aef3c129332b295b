//! lex-learning: Binary classification pipelines with stratified cross-validation.
//!
//! This crate provides the modelling half of an experiment run: a validated
//! run configuration, a preprocessing + classifier pipeline, stratified k-fold
//! evaluation, and the parameter/metric records that get logged to a tracking
//! store. Everything is pure Rust; models serialize to JSON.
//!
//! # Features
//!
//! - **Validated configuration**: [`RunConfig`] rejects inconsistent column lists,
//!   bad fold counts and unknown hyperparameters before any data is touched
//! - **One-hot preprocessing**: categorical columns encoded against the categories seen in fit
//! - **Classifiers**: random forest, decision tree, logistic regression
//! - **Stratified cross-validation**: seeded, deterministic fold assignment
//! - **Metrics**: accuracy, precision, recall, F1, macro F1, ROC AUC
//!
//! # Quick Start
//!
//! ```
//! use lex_learning::{
//!     cross_validate, Algorithm, ClassifierSpec, Metric, Pipeline, RunConfig, RunParameters,
//!     StratifiedKFold, Target,
//! };
//! use polars::prelude::*;
//!
//! let df = df!(
//!     "a" => &["u", "v", "u", "v", "u", "v", "u", "v"],
//!     "x" => &[1.0, 9.0, 2.0, 8.0, 1.5, 9.5, 0.5, 7.5],
//!     "added_product" => &[0i64, 1, 0, 1, 0, 1, 0, 1]
//! )?;
//!
//! let config = RunConfig::builder()
//!     .target_column("added_product")
//!     .categorical_columns(["a"])
//!     .numerical_columns(["x"])
//!     .classifier(ClassifierSpec::new(Algorithm::DecisionTree))
//!     .cv_folds(2)
//!     .metrics([Metric::Accuracy])
//!     .build()?;
//!
//! let target = Target::from_column(df.column("added_product")?)?;
//! let features = df.drop("added_product")?;
//! let pipeline = Pipeline::from_config(&config)?;
//!
//! let report = cross_validate(
//!     &pipeline,
//!     &features,
//!     &target,
//!     &StratifiedKFold::new(config.cv_folds(), config.random_seed()),
//!     config.metrics(),
//! )?;
//! assert_eq!(report.folds.len(), 2);
//!
//! let params = RunParameters::builder(&config).build();
//! assert!(params.get("classifier.max_depth").is_some());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Error Handling
//!
//! All fallible operations return [`Result<T, LexLearningError>`]. The error
//! type provides specific variants for different failure modes:
//!
//! - [`LexLearningError::InvalidConfig`] - Invalid run configuration
//! - [`LexLearningError::ColumnNotFound`] - A configured column is missing
//! - [`LexLearningError::InvalidTarget`] - The target is not binary
//! - [`LexLearningError::TrainingFailed`] - Fitting failed (e.g. single-class fold)
//!
//! See [`LexLearningError`] for the complete list.
//!
//! # Model Persistence
//!
//! A fitted [`Pipeline`] round-trips through JSON:
//!
//! ```rust,ignore
//! let json = pipeline.to_json()?;
//! let restored = Pipeline::from_json(&json)?;
//! let predictions = restored.predict(&new_rows)?;
//! ```

mod classifier;
mod config;
mod cross_validation;
mod encoding;
mod error;
mod forest;
mod logistic;
mod metrics;
mod pipeline;
mod tree;
mod types;

// Re-export public API
//
// Configuration types
pub use classifier::{Algorithm, Classifier, ClassifierSpec};
pub use config::{DEFAULT_CV_FOLDS, DEFAULT_RANDOM_SEED, RunConfig, RunConfigBuilder};
// Error types
pub use error::{LexLearningError, Result};
// Preprocessing
pub use encoding::{FeatureFrame, OneHotEncoder, Preprocessor};
// Estimators
pub use forest::{ForestParams, RandomForest};
pub use logistic::{LogisticParams, LogisticRegression};
pub use tree::{DecisionTree, MaxFeatures, TreeParams};
// Pipeline types
pub use pipeline::{Pipeline, PipelineStructure};
// Evaluation
pub use cross_validation::{FoldSplit, StratifiedKFold, cross_validate};
pub use metrics::{DECISION_THRESHOLD, Metric};
// Run records
pub use types::{
    CrossValidationReport, FoldResult, MetricSummary, ParamValue, RunMetrics, RunParameters,
    RunParametersBuilder, Target,
};
