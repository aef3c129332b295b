//! Common types used throughout the lex-learning crate.
//!
//! This module defines the target column, the run parameter record and the
//! aggregated metrics produced by cross-validation.
//!
//! # Overview
//!
//! - [`Target`]: Binary label column split off the dataset
//! - [`ParamValue`]: A loggable parameter value (scalar or list)
//! - [`RunParameters`]: Sealed parameter record for one run
//! - [`MetricSummary`] / [`RunMetrics`]: Per-metric mean and standard deviation
//! - [`CrossValidationReport`]: Per-fold scores plus the aggregated metrics

use std::collections::BTreeMap;
use std::fmt;

use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::error::{LexLearningError, Result};
use crate::metrics::Metric;

// =============================================================================
// Target
// =============================================================================

/// The label column of a binary classification dataset.
///
/// Values are stored as `0.0` / `1.0`. The source column may be integer, float,
/// boolean or string typed; see [`Target::from_column`] for accepted encodings.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    name: String,
    values: Vec<f64>,
}

impl Target {
    /// Create a target from already-decoded labels.
    ///
    /// # Errors
    ///
    /// Returns [`LexLearningError::InvalidTarget`] if any value is not `0.0` or `1.0`.
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Result<Self> {
        let name = name.into();
        if let Some(bad) = values.iter().find(|v| **v != 0.0 && **v != 1.0) {
            return Err(LexLearningError::InvalidTarget {
                column: name,
                reason: format!("value '{bad}' is not a binary label"),
            });
        }
        Ok(Self { name, values })
    }

    /// Decode a polars column into binary labels.
    ///
    /// Accepted encodings:
    /// - integer or float `0` / `1`
    /// - booleans (`false` → 0, `true` → 1)
    /// - strings `"0"`, `"1"`, `"0.0"`, `"1.0"`, `"true"`, `"false"` (trimmed, case-insensitive)
    ///
    /// # Errors
    ///
    /// Returns [`LexLearningError::InvalidTarget`] on nulls or any other value.
    pub fn from_column(column: &Column) -> Result<Self> {
        let series = column.as_materialized_series();
        let name = series.name().to_string();

        let values = if matches!(series.dtype(), DataType::String) {
            series
                .str()?
                .into_iter()
                .map(|value| match value {
                    Some(raw) => parse_label(raw).ok_or_else(|| LexLearningError::InvalidTarget {
                        column: name.clone(),
                        reason: format!("value '{raw}' is not a binary label"),
                    }),
                    None => Err(null_label(&name)),
                })
                .collect::<Result<Vec<f64>>>()?
        } else {
            let floats = series.cast(&DataType::Float64).map_err(|e| {
                LexLearningError::InvalidTarget {
                    column: name.clone(),
                    reason: format!("cannot interpret {} values as labels: {e}", series.dtype()),
                }
            })?;
            floats
                .f64()?
                .into_iter()
                .map(|value| value.ok_or_else(|| null_label(&name)))
                .collect::<Result<Vec<f64>>>()?
        };

        Self::new(name, values)
    }

    /// Name of the target column.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decoded labels, one per row.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the target has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Count of `(negative, positive)` labels.
    #[must_use]
    pub fn class_counts(&self) -> (usize, usize) {
        let positives = self.values.iter().filter(|v| **v == 1.0).count();
        (self.values.len() - positives, positives)
    }

    /// Labels at the given row indices.
    #[must_use]
    pub fn select(&self, indices: &[usize]) -> Vec<f64> {
        indices.iter().map(|&i| self.values[i]).collect()
    }
}

fn parse_label(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "true" => return Some(1.0),
        "false" => return Some(0.0),
        _ => {}
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|v| *v == 0.0 || *v == 1.0)
}

fn null_label(column: &str) -> LexLearningError {
    LexLearningError::InvalidTarget {
        column: column.to_string(),
        reason: "column contains null values".to_string(),
    }
}

// =============================================================================
// Parameters
// =============================================================================

/// A single run parameter value.
///
/// Tracking backends that only store strings use the [`Display`](fmt::Display)
/// form: lists render as a JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Free text.
    Text(String),
    /// Ordered list of names (columns, metrics, class labels).
    List(Vec<String>),
    /// Explicitly unset (e.g. unlimited `max_depth`).
    Null,
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(v) => f.write_str(v),
            ParamValue::List(items) => {
                let json = serde_json::to_string(items).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
            ParamValue::Null => f.write_str("null"),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        ParamValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<u64> for ParamValue {
    fn from(v: u64) -> Self {
        ParamValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(v: Vec<String>) -> Self {
        ParamValue::List(v)
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(ParamValue::Null, Into::into)
    }
}

/// The sealed parameter record of one run.
///
/// Built with [`RunParameters::builder()`] from a validated [`RunConfig`]; the
/// only way to add entries is through the builder, so a built record cannot be
/// changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParameters(BTreeMap<String, ParamValue>);

impl RunParameters {
    /// Start a parameter record seeded with everything the config defines.
    ///
    /// Seeded keys: `target_column`, `categorical_columns`, `numerical_columns`,
    /// `algorithm`, `cv_folds`, `metrics`, `random_seed`, and one
    /// `classifier.<name>` entry per resolved hyperparameter.
    #[must_use]
    pub fn builder(config: &RunConfig) -> RunParametersBuilder {
        let mut entries = BTreeMap::new();
        entries.insert(
            "target_column".to_string(),
            ParamValue::from(config.target_column()),
        );
        entries.insert(
            "categorical_columns".to_string(),
            ParamValue::List(config.categorical_columns().to_vec()),
        );
        entries.insert(
            "numerical_columns".to_string(),
            ParamValue::List(config.numerical_columns().to_vec()),
        );
        entries.insert(
            "algorithm".to_string(),
            ParamValue::from(config.classifier().algorithm.as_str()),
        );
        entries.insert("cv_folds".to_string(), ParamValue::from(config.cv_folds()));
        entries.insert(
            "metrics".to_string(),
            ParamValue::List(config.metrics().iter().map(|m| m.as_str().to_string()).collect()),
        );
        entries.insert(
            "random_seed".to_string(),
            ParamValue::from(config.random_seed()),
        );
        for (name, value) in config.resolved_hyperparameters() {
            entries.insert(format!("classifier.{name}"), value.clone());
        }
        RunParametersBuilder { entries }
    }

    /// Look up a parameter.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.get(key)
    }

    /// Iterate parameters in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the record is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Flat `key → string` form for backends that store parameters as text.
    #[must_use]
    pub fn to_strings(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }
}

/// Builder for [`RunParameters`].
#[derive(Debug, Clone)]
pub struct RunParametersBuilder {
    entries: BTreeMap<String, ParamValue>,
}

impl RunParametersBuilder {
    /// Record the class-label ordering resolved by the fitted pipeline.
    #[must_use]
    pub fn class_labels(mut self, labels: Vec<String>) -> Self {
        self.entries
            .insert("class_labels".to_string(), ParamValue::List(labels));
        self
    }

    /// Add any extra parameter (e.g. the dataset name).
    #[must_use]
    pub fn insert(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Seal the record.
    #[must_use]
    pub fn build(self) -> RunParameters {
        RunParameters(self.entries)
    }
}

// =============================================================================
// Metrics
// =============================================================================

/// Aggregate of one metric over the cross-validation folds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    /// Arithmetic mean of the fold scores.
    pub mean: f64,
    /// Population standard deviation (ddof = 0) of the fold scores.
    pub std: f64,
    /// Scores in fold order.
    pub fold_scores: Vec<f64>,
}

impl MetricSummary {
    /// Aggregate fold scores. An empty slice yields `NaN` mean and std.
    #[must_use]
    pub fn from_scores(scores: &[f64]) -> Self {
        let k = scores.len() as f64;
        let mean = scores.iter().sum::<f64>() / k;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / k;
        Self {
            mean,
            std: variance.sqrt(),
            fold_scores: scores.to_vec(),
        }
    }
}

/// Aggregated metrics of one run, keyed by metric name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics(BTreeMap<String, MetricSummary>);

impl RunMetrics {
    /// Aggregate per-metric fold scores.
    #[must_use]
    pub fn from_fold_scores(scores: &BTreeMap<Metric, Vec<f64>>) -> Self {
        Self(
            scores
                .iter()
                .map(|(metric, values)| {
                    (metric.as_str().to_string(), MetricSummary::from_scores(values))
                })
                .collect(),
        )
    }

    /// Summary for one metric.
    #[must_use]
    pub fn get(&self, metric: &str) -> Option<&MetricSummary> {
        self.0.get(metric)
    }

    /// Iterate summaries in metric-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetricSummary)> {
        self.0.iter()
    }

    /// Number of metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no metric was computed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Flat `<metric>_mean` / `<metric>_std` mapping for logging.
    #[must_use]
    pub fn flatten(&self) -> BTreeMap<String, f64> {
        let mut flat = BTreeMap::new();
        for (name, summary) in &self.0 {
            flat.insert(format!("{name}_mean"), summary.mean);
            flat.insert(format!("{name}_std"), summary.std);
        }
        flat
    }
}

/// Scores of a single cross-validation fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldResult {
    /// Zero-based fold index.
    pub fold: usize,
    /// Rows used for fitting.
    pub train_size: usize,
    /// Rows held out for scoring.
    pub test_size: usize,
    /// Score per metric name.
    pub scores: BTreeMap<String, f64>,
}

/// Result of [`cross_validate`](crate::cross_validate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidationReport {
    /// Per-fold scores in fold order.
    pub folds: Vec<FoldResult>,
    /// Mean / std per metric across the folds.
    pub metrics: RunMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Algorithm, ClassifierSpec};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_target_from_integer_column() {
        let df = df!("added_product" => &[0i64, 1, 1, 0]).unwrap();
        let target = Target::from_column(df.column("added_product").unwrap()).unwrap();
        assert_eq!(target.name(), "added_product");
        assert_eq!(target.values(), &[0.0, 1.0, 1.0, 0.0]);
        assert_eq!(target.class_counts(), (2, 2));
    }

    #[test]
    fn test_target_from_string_column() {
        let df = df!("y" => &["0", "1.0", " true ", "FALSE"]).unwrap();
        let target = Target::from_column(df.column("y").unwrap()).unwrap();
        assert_eq!(target.values(), &[0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_target_from_bool_column() {
        let df = df!("y" => &[true, false, true]).unwrap();
        let target = Target::from_column(df.column("y").unwrap()).unwrap();
        assert_eq!(target.values(), &[1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_target_rejects_non_binary() {
        let df = df!("y" => &[0i64, 1, 2]).unwrap();
        let err = Target::from_column(df.column("y").unwrap()).unwrap_err();
        assert!(matches!(err, LexLearningError::InvalidTarget { .. }));

        let df = df!("y" => &["yes", "no"]).unwrap();
        assert!(Target::from_column(df.column("y").unwrap()).is_err());
    }

    #[test]
    fn test_target_rejects_nulls() {
        let df = df!("y" => &[Some(1i64), None]).unwrap();
        let err = Target::from_column(df.column("y").unwrap()).unwrap_err();
        assert!(err.to_string().contains("null"));
    }

    #[test]
    fn test_param_value_display() {
        assert_eq!(ParamValue::from(5usize).to_string(), "5");
        assert_eq!(ParamValue::from(0.25).to_string(), "0.25");
        assert_eq!(ParamValue::from("sqrt").to_string(), "sqrt");
        assert_eq!(ParamValue::Null.to_string(), "null");
        assert_eq!(
            ParamValue::List(vec!["a".to_string(), "b".to_string()]).to_string(),
            r#"["a","b"]"#
        );
    }

    #[test]
    fn test_run_parameters_builder_seeds_config() {
        let config = RunConfig::builder()
            .target_column("added_product")
            .categorical_columns(["a", "b"])
            .numerical_columns(["x"])
            .classifier(ClassifierSpec::new(Algorithm::RandomForest).with_param("n_estimators", 10))
            .cv_folds(5)
            .build()
            .unwrap();

        let params = RunParameters::builder(&config)
            .class_labels(vec!["0.0".to_string(), "1.0".to_string()])
            .build();

        assert_eq!(params.get("cv_folds"), Some(&ParamValue::Int(5)));
        assert_eq!(params.get("algorithm"), Some(&ParamValue::from("random_forest")));
        assert_eq!(params.get("classifier.n_estimators"), Some(&ParamValue::Int(10)));
        assert_eq!(
            params.get("categorical_columns"),
            Some(&ParamValue::List(vec!["a".to_string(), "b".to_string()]))
        );
        assert_eq!(
            params.to_strings().get("class_labels").map(String::as_str),
            Some(r#"["0.0","1.0"]"#)
        );
    }

    #[test]
    fn test_metric_summary_population_std() {
        let summary = MetricSummary::from_scores(&[1.0, 2.0, 3.0, 4.0]);
        assert!((summary.mean - 2.5).abs() < 1e-12);
        assert!((summary.std - 1.25f64.sqrt()).abs() < 1e-12);
        assert_eq!(summary.fold_scores.len(), 4);
    }

    #[test]
    fn test_run_metrics_flatten() {
        let mut scores = BTreeMap::new();
        scores.insert(Metric::Accuracy, vec![0.5, 0.7]);
        let metrics = RunMetrics::from_fold_scores(&scores);
        let flat = metrics.flatten();
        assert!((flat["accuracy_mean"] - 0.6).abs() < 1e-12);
        assert!((flat["accuracy_std"] - 0.1).abs() < 1e-12);
        assert_eq!(flat.len(), 2);
    }
}
