//! Preprocessing plus classifier, fitted and applied as one unit.
//!
//! # Overview
//!
//! A [`Pipeline`] chains two stages:
//!
//! 1. **Preprocessor** - one-hot encode categorical columns, pass numerical columns through
//! 2. **Classifier** - random forest, decision tree or logistic regression
//!
//! # Example
//!
//! ```
//! use lex_learning::{Pipeline, RunConfig, Target};
//! use polars::prelude::*;
//!
//! let df = df!(
//!     "a" => &["u", "v", "u", "v", "u", "v"],
//!     "x" => &[1.0, 9.0, 2.0, 8.0, 1.5, 9.5],
//!     "y" => &[0i64, 1, 0, 1, 0, 1]
//! )?;
//! let config = RunConfig::builder()
//!     .target_column("y")
//!     .categorical_columns(["a"])
//!     .numerical_columns(["x"])
//!     .build()?;
//!
//! let target = Target::from_column(df.column("y")?)?;
//! let mut pipeline = Pipeline::from_config(&config)?;
//! pipeline.fit(&df, &target)?;
//! assert_eq!(pipeline.predict(&df)?.len(), 6);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Thread Safety
//!
//! `Pipeline` is `Send + Sync`; fitted pipelines can be shared across threads
//! for prediction.

use std::collections::BTreeMap;

use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::classifier::{Algorithm, Classifier};
use crate::config::RunConfig;
use crate::encoding::{FeatureFrame, Preprocessor};
use crate::error::{LexLearningError, Result};
use crate::metrics::DECISION_THRESHOLD;
use crate::types::{ParamValue, Target};

/// Binary class values in prediction order.
const BINARY_CLASSES: [f64; 2] = [0.0, 1.0];

/// Shape of a pipeline, independent of fitted state.
///
/// Two pipelines built from the same [`RunConfig`] have equal structures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStructure {
    /// Stage names in execution order.
    pub stages: Vec<String>,
    /// One-hot encoded input columns.
    pub categorical_columns: Vec<String>,
    /// Passthrough input columns.
    pub numerical_columns: Vec<String>,
    /// Final estimator.
    pub algorithm: Algorithm,
    /// Effective hyperparameters of the estimator.
    pub hyperparameters: BTreeMap<String, ParamValue>,
}

/// A preprocessor and classifier fitted together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    preprocessor: Preprocessor,
    classifier: Classifier,
    classes: Option<Vec<f64>>,
}

impl Pipeline {
    /// Build an unfitted pipeline from a validated config.
    ///
    /// # Errors
    ///
    /// Returns [`LexLearningError::InvalidConfig`] if the hyperparameters do
    /// not resolve (cannot happen for a config produced by the builder).
    pub fn from_config(config: &RunConfig) -> Result<Self> {
        let classifier = config.classifier().resolve(config.random_seed())?;
        let preprocessor = Preprocessor::new(
            config.categorical_columns().to_vec(),
            config.numerical_columns().to_vec(),
        );
        debug!(
            algorithm = %classifier.algorithm(),
            categorical = preprocessor.categorical_columns().len(),
            numerical = preprocessor.numerical_columns().len(),
            "Pipeline built"
        );
        Ok(Self {
            preprocessor,
            classifier,
            classes: None,
        })
    }

    /// The classifier's algorithm.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.classifier.algorithm()
    }

    /// The preprocessing stage.
    #[must_use]
    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// The estimator stage.
    #[must_use]
    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Describe the pipeline shape.
    #[must_use]
    pub fn structure(&self) -> PipelineStructure {
        PipelineStructure {
            stages: vec![
                "one_hot_encoder".to_string(),
                "passthrough".to_string(),
                self.algorithm().as_str().to_string(),
            ],
            categorical_columns: self.preprocessor.categorical_columns().to_vec(),
            numerical_columns: self.preprocessor.numerical_columns().to_vec(),
            algorithm: self.algorithm(),
            hyperparameters: self.classifier.hyperparameters(),
        }
    }

    /// A copy with identical configuration and no fitted state.
    #[must_use]
    pub fn unfitted(&self) -> Self {
        Self {
            preprocessor: self.preprocessor.unfitted(),
            classifier: self.classifier.unfitted(),
            classes: None,
        }
    }

    /// Returns `true` once [`fit`](Self::fit) has succeeded.
    #[must_use]
    pub fn is_fitted(&self) -> bool {
        self.classes.is_some()
    }

    /// Fit both stages on `features` and `target`.
    ///
    /// `features` may contain extra columns; only configured columns are read.
    ///
    /// # Errors
    ///
    /// - [`LexLearningError::ColumnNotFound`] for a missing feature column
    /// - [`LexLearningError::InvalidData`] for bad numerical values or a row-count mismatch
    /// - [`LexLearningError::TrainingFailed`] if the target holds a single class
    pub fn fit(&mut self, features: &DataFrame, target: &Target) -> Result<()> {
        let frame = self.preprocessor.extract(features)?;
        self.fit_frame(&frame, target.values())?;
        info!(
            algorithm = %self.algorithm(),
            rows = frame.n_rows(),
            "Pipeline fitted"
        );
        Ok(())
    }

    /// Fit on an already-extracted frame.
    pub(crate) fn fit_frame(&mut self, frame: &FeatureFrame, y: &[f64]) -> Result<()> {
        if frame.n_rows() != y.len() {
            return Err(LexLearningError::InvalidData(format!(
                "features have {} rows but target has {}",
                frame.n_rows(),
                y.len()
            )));
        }
        self.classes = None;
        self.preprocessor.fit(frame);
        let x = self.preprocessor.transform(frame)?;
        self.classifier.fit(&x, y)?;
        self.classes = Some(BINARY_CLASSES.to_vec());
        Ok(())
    }

    /// Positive-class probability per row.
    ///
    /// # Errors
    ///
    /// Returns [`LexLearningError::NotFitted`] before fitting, plus extraction
    /// errors for `features`.
    pub fn predict_proba(&self, features: &DataFrame) -> Result<Vec<f64>> {
        let frame = self.preprocessor.extract(features)?;
        self.predict_proba_frame(&frame)
    }

    pub(crate) fn predict_proba_frame(&self, frame: &FeatureFrame) -> Result<Vec<f64>> {
        if !self.is_fitted() {
            return Err(LexLearningError::NotFitted);
        }
        let x = self.preprocessor.transform(frame)?;
        self.classifier.predict_proba(&x)
    }

    /// Predicted class (`0.0` / `1.0`) per row.
    ///
    /// # Errors
    ///
    /// Same as [`predict_proba`](Self::predict_proba).
    pub fn predict(&self, features: &DataFrame) -> Result<Vec<f64>> {
        Ok(self
            .predict_proba(features)?
            .into_iter()
            .map(|p| if p >= DECISION_THRESHOLD { 1.0 } else { 0.0 })
            .collect())
    }

    /// Class labels in the order the model reports probabilities, rendered
    /// from the float class values (`"0.0"`, `"1.0"`).
    ///
    /// # Errors
    ///
    /// Returns [`LexLearningError::NotFitted`] before fitting.
    pub fn class_labels(&self) -> Result<Vec<String>> {
        let classes = self.classes.as_ref().ok_or(LexLearningError::NotFitted)?;
        Ok(classes.iter().map(|c| format!("{c:?}")).collect())
    }

    /// Names of the columns fed to the classifier.
    ///
    /// # Errors
    ///
    /// Returns [`LexLearningError::NotFitted`] before fitting.
    pub fn feature_names(&self) -> Result<Vec<String>> {
        self.preprocessor.feature_names()
    }

    /// Serialize the pipeline, fitted state included.
    ///
    /// # Errors
    ///
    /// Returns [`LexLearningError::Serialization`] on failure.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Restore a pipeline written by [`to_json`](Self::to_json).
    ///
    /// # Errors
    ///
    /// Returns [`LexLearningError::Serialization`] on malformed input.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

static_assertions::assert_impl_all!(Pipeline: Send, Sync);
