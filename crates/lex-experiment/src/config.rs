//! File and command-line settings for a run.
//!
//! [`ExperimentSettings`] is the loosely-typed form a run is described in
//! before validation: every field is optional so a JSON file and command-line
//! flags can be layered with [`ExperimentSettings::merge`]. Turning it into a
//! [`RunConfig`] runs the full validation.
//!
//! ```
//! use lex_experiment::config::ExperimentSettings;
//!
//! let file = ExperimentSettings::from_json_str(
//!     r#"{"dataset": "customers", "target": "added_product", "categorical": ["a"], "numerical": ["x"], "folds": 3}"#,
//! )?;
//! let flags = ExperimentSettings { folds: Some(5), ..Default::default() };
//!
//! let config = file.merge(flags).run_config()?;
//! assert_eq!(config.cv_folds(), 5);
//! # Ok::<(), lex_experiment::ExperimentError>(())
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use lex_learning::{Algorithm, ClassifierSpec, Metric, RunConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ExperimentError, Result, ResultExt};
use crate::runner::DEFAULT_ENVIRONMENT;

/// Experiment name used when none is configured.
pub const DEFAULT_EXPERIMENT: &str = "lex-experiments";

/// Settings for one run, as read from a JSON file or the command line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentSettings {
    /// Dataset name in the dataset source.
    pub dataset: Option<String>,
    /// Label column.
    pub target: Option<String>,
    /// Categorical feature columns.
    pub categorical: Vec<String>,
    /// Numerical feature columns.
    pub numerical: Vec<String>,
    /// Algorithm name (`random_forest`, `decision-tree`, ...).
    pub algorithm: Option<String>,
    /// Hyperparameter overrides.
    pub hyperparameters: BTreeMap<String, Value>,
    /// Number of cross-validation folds.
    pub folds: Option<usize>,
    /// Metric names.
    pub metrics: Vec<String>,
    /// Random seed.
    pub seed: Option<u64>,
    /// Tracking experiment name.
    pub experiment: Option<String>,
    /// Execution environment recorded for promotion.
    pub environment: Option<String>,
}

impl ExperimentSettings {
    /// Read settings from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::Configuration`] if the file cannot be read
    /// or does not hold valid settings.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ExperimentError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text).context(format!("settings file {}", path.display()))
    }

    /// Parse settings from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::Configuration`] for malformed JSON or
    /// unknown keys.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ExperimentError::Configuration(format!("invalid settings: {e}")))
    }

    /// Layer `overrides` on top of `self`. Set scalars and non-empty lists in
    /// `overrides` win; hyperparameters are merged key by key.
    #[must_use]
    pub fn merge(mut self, overrides: ExperimentSettings) -> Self {
        fn pick<T>(base: &mut Option<T>, over: Option<T>) {
            if over.is_some() {
                *base = over;
            }
        }
        fn pick_list(base: &mut Vec<String>, over: Vec<String>) {
            if !over.is_empty() {
                *base = over;
            }
        }

        pick(&mut self.dataset, overrides.dataset);
        pick(&mut self.target, overrides.target);
        pick_list(&mut self.categorical, overrides.categorical);
        pick_list(&mut self.numerical, overrides.numerical);
        pick(&mut self.algorithm, overrides.algorithm);
        self.hyperparameters.extend(overrides.hyperparameters);
        pick(&mut self.folds, overrides.folds);
        pick_list(&mut self.metrics, overrides.metrics);
        pick(&mut self.seed, overrides.seed);
        pick(&mut self.experiment, overrides.experiment);
        pick(&mut self.environment, overrides.environment);
        self
    }

    /// The dataset name.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::Configuration`] if no dataset was given.
    pub fn dataset(&self) -> Result<&str> {
        self.dataset
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| ExperimentError::Configuration("a dataset name is required".to_string()))
    }

    /// Experiment name, or [`DEFAULT_EXPERIMENT`].
    pub fn experiment(&self) -> &str {
        self.experiment.as_deref().unwrap_or(DEFAULT_EXPERIMENT)
    }

    /// Environment name, or the runner default.
    pub fn environment(&self) -> &str {
        self.environment.as_deref().unwrap_or(DEFAULT_ENVIRONMENT)
    }

    /// Validate into a [`RunConfig`]. Unset fields take the builder defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::Configuration`] for unknown algorithms or
    /// metrics and for anything [`RunConfig`] validation rejects.
    pub fn run_config(&self) -> Result<RunConfig> {
        let algorithm = match &self.algorithm {
            Some(name) => name.parse::<Algorithm>()?,
            None => Algorithm::default(),
        };
        let classifier = ClassifierSpec {
            algorithm,
            hyperparameters: self.hyperparameters.clone(),
        };

        let mut builder = RunConfig::builder()
            .categorical_columns(self.categorical.iter().cloned())
            .numerical_columns(self.numerical.iter().cloned())
            .classifier(classifier);
        if let Some(target) = &self.target {
            builder = builder.target_column(target.as_str());
        }
        if let Some(folds) = self.folds {
            builder = builder.cv_folds(folds);
        }
        if !self.metrics.is_empty() {
            let metrics = self
                .metrics
                .iter()
                .map(|m| m.parse::<Metric>())
                .collect::<std::result::Result<Vec<_>, _>>()?;
            builder = builder.metrics(metrics);
        }
        if let Some(seed) = self.seed {
            builder = builder.random_seed(seed);
        }
        Ok(builder.build()?)
    }
}

/// Parse a `name=value` hyperparameter. The value is read as JSON when it
/// parses (`5`, `0.1`, `true`, `null`), otherwise kept as text.
///
/// # Errors
///
/// Returns [`ExperimentError::Configuration`] if there is no `=` or the name
/// is empty.
pub fn parse_param(pair: &str) -> Result<(String, Value)> {
    let (name, raw) = pair.split_once('=').ok_or_else(|| {
        ExperimentError::Configuration(format!("expected name=value, got '{pair}'"))
    })?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ExperimentError::Configuration(format!(
            "empty parameter name in '{pair}'"
        )));
    }
    let raw = raw.trim();
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((name.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_defaults_fill_unset_fields() {
        let settings = ExperimentSettings {
            target: Some("added_product".to_string()),
            categorical: vec!["a".to_string(), "b".to_string()],
            numerical: vec!["x".to_string()],
            ..Default::default()
        };
        let config = settings.run_config().unwrap();
        assert_eq!(config.cv_folds(), lex_learning::DEFAULT_CV_FOLDS);
        assert_eq!(config.metrics(), &[Metric::F1Macro, Metric::RocAuc]);
        assert_eq!(config.classifier().algorithm, Algorithm::RandomForest);
        assert_eq!(settings.experiment(), DEFAULT_EXPERIMENT);
        assert_eq!(settings.environment(), DEFAULT_ENVIRONMENT);
    }

    #[test]
    fn test_merge_prefers_overrides() {
        let base = ExperimentSettings::from_json_str(
            r#"{"dataset": "customers", "numerical": ["x"], "hyperparameters": {"max_depth": 4, "n_estimators": 10}}"#,
        )
        .unwrap();
        let overrides = ExperimentSettings {
            dataset: Some("leads".to_string()),
            hyperparameters: BTreeMap::from([("max_depth".to_string(), json!(8))]),
            ..Default::default()
        };

        let merged = base.merge(overrides);
        assert_eq!(merged.dataset().unwrap(), "leads");
        assert_eq!(merged.numerical, vec!["x"]);
        assert_eq!(merged.hyperparameters["max_depth"], json!(8));
        assert_eq!(merged.hyperparameters["n_estimators"], json!(10));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let err = ExperimentSettings::from_json_str(r#"{"folds": 3, "fold": 4}"#).unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_bad_names_are_configuration_errors() {
        let settings = ExperimentSettings {
            target: Some("y".to_string()),
            categorical: vec!["a".to_string()],
            numerical: vec!["x".to_string()],
            algorithm: Some("xgboost".to_string()),
            ..Default::default()
        };
        assert_eq!(settings.run_config().unwrap_err().error_code(), "CONFIGURATION_ERROR");

        let settings = ExperimentSettings {
            algorithm: None,
            metrics: vec!["log_loss".to_string()],
            ..settings
        };
        assert_eq!(settings.run_config().unwrap_err().error_code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_missing_dataset() {
        assert!(ExperimentSettings::default().dataset().is_err());
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("max_depth=6").unwrap(), ("max_depth".to_string(), json!(6)));
        assert_eq!(parse_param("bootstrap=false").unwrap().1, json!(false));
        assert_eq!(parse_param("max_features=sqrt").unwrap().1, json!("sqrt"));
        assert!(parse_param("max_depth").is_err());
        assert!(parse_param("=3").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, r#"{"dataset": "customers", "seed": 7}"#).unwrap();
        let settings = ExperimentSettings::from_file(&path).unwrap();
        assert_eq!(settings.seed, Some(7));

        let err = ExperimentSettings::from_file(dir.path().join("missing.json")).unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }
}
