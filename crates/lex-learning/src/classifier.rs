//! Classifier selection and hyperparameter validation.
//!
//! A [`ClassifierSpec`] names an [`Algorithm`] plus loosely-typed hyperparameters
//! (as they arrive from a config file or the command line). [`ClassifierSpec::resolve`]
//! validates them and produces a typed, unfitted [`Classifier`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LexLearningError, Result};
use crate::forest::{ForestParams, RandomForest};
use crate::logistic::{LogisticParams, LogisticRegression};
use crate::tree::{DecisionTree, MaxFeatures, TreeParams};
use crate::types::ParamValue;

/// Supported classification algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Algorithm {
    /// Bagged decision trees.
    #[default]
    RandomForest,
    /// A single CART tree.
    DecisionTree,
    /// L2-regularized logistic regression.
    LogisticRegression,
}

impl Algorithm {
    /// Every supported algorithm.
    pub const ALL: [Algorithm; 3] = [
        Algorithm::RandomForest,
        Algorithm::DecisionTree,
        Algorithm::LogisticRegression,
    ];

    /// Canonical algorithm name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::RandomForest => "random_forest",
            Algorithm::DecisionTree => "decision_tree",
            Algorithm::LogisticRegression => "logistic_regression",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = LexLearningError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Algorithm::ALL
            .into_iter()
            .find(|a| a.as_str() == normalized)
            .ok_or_else(|| {
                LexLearningError::InvalidConfig(format!(
                    "unknown algorithm '{s}'; expected one of: {}",
                    Algorithm::ALL.map(|a| a.as_str()).join(", ")
                ))
            })
    }
}

/// Algorithm choice plus raw hyperparameters.
///
/// Hyperparameters not given fall back to the algorithm defaults.
///
/// # Example
///
/// ```
/// use lex_learning::{Algorithm, ClassifierSpec};
///
/// let spec = ClassifierSpec::new(Algorithm::RandomForest)
///     .with_param("n_estimators", 50)
///     .with_param("max_depth", 6);
/// assert!(spec.resolve(42).is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifierSpec {
    /// The algorithm to fit.
    pub algorithm: Algorithm,
    /// Hyperparameter overrides by name.
    #[serde(default)]
    pub hyperparameters: BTreeMap<String, Value>,
}

impl ClassifierSpec {
    /// Spec with default hyperparameters.
    #[must_use]
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            hyperparameters: BTreeMap::new(),
        }
    }

    /// Override one hyperparameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.hyperparameters.insert(name.into(), value.into());
        self
    }

    /// Validate the hyperparameters and build an unfitted classifier.
    ///
    /// # Errors
    ///
    /// Returns [`LexLearningError::InvalidConfig`] for unknown names, wrongly
    /// typed values and out-of-range values.
    pub fn resolve(&self, seed: u64) -> Result<Classifier> {
        let mut reader = ParamReader::new(self.algorithm, &self.hyperparameters);
        let classifier = match self.algorithm {
            Algorithm::RandomForest => {
                let defaults = ForestParams::default();
                let params = ForestParams {
                    n_estimators: reader.usize("n_estimators", defaults.n_estimators, 1)?,
                    tree: reader.tree(&defaults.tree)?,
                    bootstrap: reader.bool("bootstrap", defaults.bootstrap)?,
                };
                Classifier::RandomForest(RandomForest::new(params, seed))
            }
            Algorithm::DecisionTree => {
                let params = reader.tree(&TreeParams::default())?;
                Classifier::DecisionTree(DecisionTree::new(params, seed))
            }
            Algorithm::LogisticRegression => {
                let defaults = LogisticParams::default();
                let params = LogisticParams {
                    learning_rate: reader.positive_f64("learning_rate", defaults.learning_rate)?,
                    max_iter: reader.usize("max_iter", defaults.max_iter, 1)?,
                    l2: reader.non_negative_f64("l2", defaults.l2)?,
                    tol: reader.positive_f64("tol", defaults.tol)?,
                };
                Classifier::LogisticRegression(LogisticRegression::new(params))
            }
        };
        reader.finish()?;
        Ok(classifier)
    }
}

/// Reads hyperparameters by name, tracking which ones were consumed.
struct ParamReader<'a> {
    algorithm: Algorithm,
    raw: &'a BTreeMap<String, Value>,
    consumed: Vec<&'static str>,
}

impl<'a> ParamReader<'a> {
    fn new(algorithm: Algorithm, raw: &'a BTreeMap<String, Value>) -> Self {
        Self {
            algorithm,
            raw,
            consumed: Vec::new(),
        }
    }

    fn take(&mut self, name: &'static str) -> Option<&'a Value> {
        self.consumed.push(name);
        self.raw.get(name)
    }

    fn invalid(&self, name: &str, expected: &str, value: &Value) -> LexLearningError {
        LexLearningError::InvalidConfig(format!(
            "{} hyperparameter '{name}' must be {expected}, got {value}",
            self.algorithm
        ))
    }

    fn usize(&mut self, name: &'static str, default: usize, min: usize) -> Result<usize> {
        match self.take(name) {
            None => Ok(default),
            Some(value) => value
                .as_u64()
                .and_then(|v| usize::try_from(v).ok())
                .filter(|v| *v >= min)
                .ok_or_else(|| self.invalid(name, &format!("an integer >= {min}"), value)),
        }
    }

    fn optional_usize(&mut self, name: &'static str, min: usize) -> Result<Option<usize>> {
        match self.take(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_u64()
                .and_then(|v| usize::try_from(v).ok())
                .filter(|v| *v >= min)
                .map(Some)
                .ok_or_else(|| {
                    self.invalid(name, &format!("an integer >= {min} or null"), value)
                }),
        }
    }

    fn positive_f64(&mut self, name: &'static str, default: f64) -> Result<f64> {
        match self.take(name) {
            None => Ok(default),
            Some(value) => value
                .as_f64()
                .filter(|v| v.is_finite() && *v > 0.0)
                .ok_or_else(|| self.invalid(name, "a number > 0", value)),
        }
    }

    fn non_negative_f64(&mut self, name: &'static str, default: f64) -> Result<f64> {
        match self.take(name) {
            None => Ok(default),
            Some(value) => value
                .as_f64()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .ok_or_else(|| self.invalid(name, "a number >= 0", value)),
        }
    }

    fn bool(&mut self, name: &'static str, default: bool) -> Result<bool> {
        match self.take(name) {
            None => Ok(default),
            Some(value) => value
                .as_bool()
                .ok_or_else(|| self.invalid(name, "a boolean", value)),
        }
    }

    fn max_features(&mut self, default: MaxFeatures) -> Result<MaxFeatures> {
        const NAME: &str = "max_features";
        let Some(value) = self.take(NAME) else {
            return Ok(default);
        };
        let parsed = match value {
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "sqrt" => Some(MaxFeatures::Sqrt),
                "log2" => Some(MaxFeatures::Log2),
                "all" => Some(MaxFeatures::All),
                _ => None,
            },
            Value::Null => Some(MaxFeatures::All),
            Value::Number(n) => n
                .as_f64()
                .filter(|f| *f > 0.0 && *f <= 1.0)
                .map(MaxFeatures::Fraction),
            _ => None,
        };
        parsed.ok_or_else(|| {
            self.invalid(NAME, "\"sqrt\", \"log2\", \"all\" or a fraction in (0, 1]", value)
        })
    }

    fn tree(&mut self, defaults: &TreeParams) -> Result<TreeParams> {
        Ok(TreeParams {
            max_depth: self.optional_usize("max_depth", 1)?,
            min_samples_split: self.usize("min_samples_split", defaults.min_samples_split, 2)?,
            min_samples_leaf: self.usize("min_samples_leaf", defaults.min_samples_leaf, 1)?,
            max_features: self.max_features(defaults.max_features)?,
        })
    }

    fn finish(self) -> Result<()> {
        let unknown: Vec<&str> = self
            .raw
            .keys()
            .map(String::as_str)
            .filter(|k| !self.consumed.iter().any(|c| c == k))
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(LexLearningError::InvalidConfig(format!(
                "unknown {} hyperparameter(s): {}; accepted: {}",
                self.algorithm,
                unknown.join(", "),
                self.consumed.join(", ")
            )))
        }
    }
}

/// A typed classifier, fitted or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum Classifier {
    /// Random forest.
    RandomForest(RandomForest),
    /// Decision tree.
    DecisionTree(DecisionTree),
    /// Logistic regression.
    LogisticRegression(LogisticRegression),
}

impl Classifier {
    /// The algorithm this classifier implements.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        match self {
            Classifier::RandomForest(_) => Algorithm::RandomForest,
            Classifier::DecisionTree(_) => Algorithm::DecisionTree,
            Classifier::LogisticRegression(_) => Algorithm::LogisticRegression,
        }
    }

    /// Returns `true` once fitted.
    #[must_use]
    pub fn is_fitted(&self) -> bool {
        match self {
            Classifier::RandomForest(m) => m.is_fitted(),
            Classifier::DecisionTree(m) => m.is_fitted(),
            Classifier::LogisticRegression(m) => m.is_fitted(),
        }
    }

    /// A fresh, unfitted classifier with the same hyperparameters and seed.
    #[must_use]
    pub fn unfitted(&self) -> Self {
        match self {
            Classifier::RandomForest(m) => {
                Classifier::RandomForest(RandomForest::new(m.params().clone(), m.seed()))
            }
            Classifier::DecisionTree(m) => {
                Classifier::DecisionTree(DecisionTree::new(m.params().clone(), m.seed()))
            }
            Classifier::LogisticRegression(m) => {
                Classifier::LogisticRegression(LogisticRegression::new(m.params().clone()))
            }
        }
    }

    /// Every hyperparameter with its effective value, defaults included.
    #[must_use]
    pub fn hyperparameters(&self) -> BTreeMap<String, ParamValue> {
        let mut out = BTreeMap::new();
        match self {
            Classifier::RandomForest(m) => {
                let p = m.params();
                out.insert("n_estimators".to_string(), ParamValue::from(p.n_estimators));
                out.insert("bootstrap".to_string(), ParamValue::from(p.bootstrap));
                insert_tree_params(&mut out, &p.tree);
                out.insert("random_state".to_string(), ParamValue::from(m.seed()));
            }
            Classifier::DecisionTree(m) => {
                insert_tree_params(&mut out, m.params());
                out.insert("random_state".to_string(), ParamValue::from(m.seed()));
            }
            Classifier::LogisticRegression(m) => {
                let p = m.params();
                out.insert("learning_rate".to_string(), ParamValue::from(p.learning_rate));
                out.insert("max_iter".to_string(), ParamValue::from(p.max_iter));
                out.insert("l2".to_string(), ParamValue::from(p.l2));
                out.insert("tol".to_string(), ParamValue::from(p.tol));
            }
        }
        out
    }

    /// Fit on a design matrix and binary labels.
    ///
    /// # Errors
    ///
    /// Returns [`LexLearningError::TrainingFailed`] when `y` holds a single
    /// class, plus any error raised by the underlying model.
    pub fn fit(&mut self, x: &Array2<f64>, y: &[f64]) -> Result<()> {
        let positives = y.iter().filter(|v| **v == 1.0).count();
        if positives == 0 || positives == y.len() {
            return Err(LexLearningError::TrainingFailed(format!(
                "training data holds a single class ({} rows, {positives} positive)",
                y.len()
            )));
        }
        match self {
            Classifier::RandomForest(m) => m.fit(x, y),
            Classifier::DecisionTree(m) => m.fit(x, y),
            Classifier::LogisticRegression(m) => m.fit(x, y),
        }
    }

    /// Positive-class probabilities.
    ///
    /// # Errors
    ///
    /// Returns [`LexLearningError::NotFitted`] before fitting.
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Vec<f64>> {
        match self {
            Classifier::RandomForest(m) => m.predict_proba(x),
            Classifier::DecisionTree(m) => m.predict_proba(x),
            Classifier::LogisticRegression(m) => m.predict_proba(x),
        }
    }
}

fn insert_tree_params(out: &mut BTreeMap<String, ParamValue>, p: &TreeParams) {
    out.insert("max_depth".to_string(), ParamValue::from(p.max_depth));
    out.insert(
        "min_samples_split".to_string(),
        ParamValue::from(p.min_samples_split),
    );
    out.insert(
        "min_samples_leaf".to_string(),
        ParamValue::from(p.min_samples_leaf),
    );
    out.insert(
        "max_features".to_string(),
        ParamValue::from(p.max_features.label()),
    );
}
