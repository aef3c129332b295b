//! The experiment run: load, split, cross-validate, fit, log, annotate.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use lex_experiment::dataset::InMemoryDatasetSource;
//! use lex_experiment::runner::{ExperimentRunner, RunRequest};
//! use lex_experiment::tracking::{InMemoryTrackingStore, RunState};
//! use lex_learning::{Algorithm, ClassifierSpec, Metric, RunConfig};
//! use polars::prelude::*;
//!
//! let df = df!(
//!     "a" => &["u", "v", "u", "v", "u", "v", "u", "v"],
//!     "x" => &[1.0, 9.0, 2.0, 8.0, 1.5, 9.5, 0.5, 7.5],
//!     "added_product" => &[0i64, 1, 0, 1, 0, 1, 0, 1]
//! )?;
//!
//! let store = Arc::new(InMemoryTrackingStore::new());
//! let runner = ExperimentRunner::builder()
//!     .source(Arc::new(InMemoryDatasetSource::new().with_table("customers", df)))
//!     .store(store.clone())
//!     .build()?;
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
//! let outcome = runner.run(&RunRequest::new("customers", config))?;
//! assert_eq!(outcome.state, RunState::PromotionAnnotated);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::sync::Arc;

use lex_learning::{
    CrossValidationReport, Pipeline, RunConfig, RunMetrics, RunParameters, StratifiedKFold,
    cross_validate,
};
use polars::prelude::DataFrame;
use serde::Serialize;
use tracing::{debug, error, info};

use crate::dataset::{DatasetSource, load_dataset, split_target};
use crate::error::{ExperimentError, Result};
use crate::progress::{ProgressCallback, ProgressUpdate, RunStage};
use crate::promotion::annotate_for_promotion;
use crate::tracking::{
    ActiveRun, InferenceInfo, RunState, TrackingStore, artifact_path, run_name_now,
};

/// Environment name recorded for promotion when none is given.
pub const DEFAULT_ENVIRONMENT: &str = "local";

/// What to run: a dataset name, a validated configuration and the
/// environment the model is meant to be served in.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Name of the table in the dataset source.
    pub dataset: String,
    /// Validated run configuration.
    pub config: RunConfig,
    /// Execution environment recorded for promotion.
    pub environment: String,
}

impl RunRequest {
    /// Request with the default environment.
    pub fn new(dataset: impl Into<String>, config: RunConfig) -> Self {
        Self {
            dataset: dataset.into(),
            config,
            environment: DEFAULT_ENVIRONMENT.to_string(),
        }
    }

    /// Set the execution environment.
    #[must_use]
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    /// Tracking-store run id.
    pub run_id: String,
    /// Timestamped run name.
    pub run_name: String,
    /// `<algorithm>-<run_id>`.
    pub artifact_path: String,
    /// Where the store put the model; accepted by `TrackingStore::load_model`.
    pub model_location: String,
    /// Cross-validated metrics.
    pub metrics: RunMetrics,
    /// Per-fold detail of the cross-validation.
    pub cross_validation: CrossValidationReport,
    /// Class labels in probability order.
    pub class_labels: Vec<String>,
    /// Logged parameters.
    pub params: RunParameters,
    /// Lifecycle state the run ended in.
    pub state: RunState,
}

/// Orchestrates experiment runs against injected collaborators.
pub struct ExperimentRunner {
    source: Arc<dyn DatasetSource>,
    store: Arc<dyn TrackingStore>,
    progress_callback: Option<ProgressCallback>,
}

impl ExperimentRunner {
    /// Start building a runner.
    pub fn builder() -> ExperimentRunnerBuilder {
        ExperimentRunnerBuilder::default()
    }

    /// The tracking store runs are logged to.
    pub fn store(&self) -> &dyn TrackingStore {
        self.store.as_ref()
    }

    /// Execute one run.
    ///
    /// Data and schema problems are reported before a tracking run is opened.
    /// Once opened, the tracking run is closed `FAILED` on any error and only
    /// annotated for promotion after it was closed `FINISHED`.
    ///
    /// # Errors
    ///
    /// - [`ExperimentError::DataAccess`] if the dataset cannot be loaded
    /// - [`ExperimentError::Schema`] for a missing or non-binary target, or missing features
    /// - [`ExperimentError::ModelFit`] if a fold or the final fit fails
    /// - [`ExperimentError::TrackingStore`] if the backend fails
    /// - [`ExperimentError::Metadata`] if promotion metadata cannot be written
    pub fn run(&self, request: &RunRequest) -> Result<RunOutcome> {
        let result = self.execute(request);
        match &result {
            Ok(outcome) => {
                self.report(RunStage::Complete, format!("Run {} complete", outcome.run_id));
            }
            Err(e) => {
                error!(dataset = %request.dataset, code = e.error_code(), error = %e, "Run failed");
                self.report(RunStage::Failed, e.to_string());
            }
        }
        result
    }

    fn execute(&self, request: &RunRequest) -> Result<RunOutcome> {
        let config = &request.config;
        let algorithm = config.classifier().algorithm;

        self.report(RunStage::Loading, format!("Loading dataset '{}'", request.dataset));
        let df = load_dataset(self.source.as_ref(), &request.dataset)?;

        self.report(
            RunStage::Splitting,
            format!("Splitting target '{}'", config.target_column()),
        );
        let (features, target) = split_target(&df, config.target_column())?;
        check_feature_columns(&features, config)?;

        let mut pipeline = Pipeline::from_config(config)?;
        debug!(structure = ?pipeline.structure(), "Pipeline built");

        let run = ActiveRun::start(self.store.as_ref(), run_name_now())?;

        self.report(
            RunStage::CrossValidating,
            format!("Cross-validating {algorithm} over {} folds", config.cv_folds()),
        );
        let folds = StratifiedKFold::new(config.cv_folds(), config.random_seed());
        let report = cross_validate(&pipeline, &features, &target, &folds, config.metrics())?;
        for (name, summary) in report.metrics.iter() {
            info!(metric = %name, mean = summary.mean, std = summary.std, "Cross-validation score");
        }

        self.report(
            RunStage::Fitting,
            format!("Fitting {algorithm} on {} rows", target.len()),
        );
        pipeline.fit(&features, &target)?;
        let class_labels = pipeline.class_labels()?;

        self.report(RunStage::Logging, format!("Logging run {}", run.run_id()));
        let params = RunParameters::builder(config)
            .class_labels(class_labels.clone())
            .insert("dataset", request.dataset.as_str())
            .build();
        run.log_params(&params)?;
        run.log_metrics(&report.metrics)?;
        let artifact_path = artifact_path(algorithm, run.run_id());
        let model_location = run.log_model(&pipeline, &artifact_path)?;

        let run_name = run.run_name().to_string();
        let run_id = run.finish()?;

        self.report(RunStage::Annotating, format!("Annotating run {run_id} for promotion"));
        let inference = InferenceInfo::binary_classification(
            class_labels.clone(),
            request.environment.clone(),
            config.target_column(),
        );
        annotate_for_promotion(self.store.as_ref(), &run_id, &inference)?;

        let state = self.store.get_run(&run_id)?.state();
        info!(run_id = %run_id, artifact = %artifact_path, state = ?state, "Run logged");

        Ok(RunOutcome {
            run_id,
            run_name,
            artifact_path,
            model_location,
            metrics: report.metrics.clone(),
            cross_validation: report,
            class_labels,
            params,
            state,
        })
    }

    fn report(&self, stage: RunStage, message: impl Into<String>) {
        let update = ProgressUpdate::new(stage, message);
        debug!(stage = %update.stage, progress = update.progress, message = %update.message, "Progress");
        if let Some(callback) = &self.progress_callback {
            callback(update);
        }
    }
}

impl std::fmt::Debug for ExperimentRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentRunner")
            .field("has_progress_callback", &self.progress_callback.is_some())
            .finish_non_exhaustive()
    }
}

/// Every configured feature must be a column of the dataset.
fn check_feature_columns(features: &DataFrame, config: &RunConfig) -> Result<()> {
    let available: Vec<&str> = features
        .get_column_names()
        .iter()
        .map(|c| c.as_str())
        .collect();
    let missing: Vec<&str> = config
        .feature_columns()
        .into_iter()
        .filter(|c| !available.contains(c))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ExperimentError::Schema(format!(
            "feature columns not found: {}; available columns: {}",
            missing.join(", "),
            available.join(", ")
        )))
    }
}

/// Builder for [`ExperimentRunner`].
#[derive(Default)]
pub struct ExperimentRunnerBuilder {
    source: Option<Arc<dyn DatasetSource>>,
    store: Option<Arc<dyn TrackingStore>>,
    progress_callback: Option<ProgressCallback>,
}

impl ExperimentRunnerBuilder {
    /// Where datasets are read from.
    #[must_use]
    pub fn source(mut self, source: Arc<dyn DatasetSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Where runs are logged.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn TrackingStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Receive a [`ProgressUpdate`] as each stage starts.
    #[must_use]
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    /// Build the runner.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::Configuration`] if the source or the store
    /// is missing.
    pub fn build(self) -> Result<ExperimentRunner> {
        let source = self.source.ok_or_else(|| {
            ExperimentError::Configuration("a dataset source is required".to_string())
        })?;
        let store = self.store.ok_or_else(|| {
            ExperimentError::Configuration("a tracking store is required".to_string())
        })?;
        Ok(ExperimentRunner {
            source,
            store,
            progress_callback: self.progress_callback,
        })
    }
}

static_assertions::assert_impl_all!(ExperimentRunner: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::InMemoryDatasetSource;
    use crate::tracking::{InMemoryTrackingStore, RunStatus};
    use lex_learning::{Algorithm, ClassifierSpec, Metric};
    use parking_lot::Mutex;
    use polars::prelude::*;

    fn frame() -> DataFrame {
        df!(
            "a" => &["u", "v", "u", "v", "u", "v", "u", "v", "u", "v"],
            "x" => &[1.0, 9.0, 2.0, 8.0, 1.5, 9.5, 0.5, 7.5, 1.2, 8.8],
            "added_product" => &[0i64, 1, 0, 1, 0, 1, 0, 1, 0, 1]
        )
        .unwrap()
    }

    fn config(target: &str) -> RunConfig {
        RunConfig::builder()
            .target_column(target)
            .categorical_columns(["a"])
            .numerical_columns(["x"])
            .classifier(ClassifierSpec::new(Algorithm::DecisionTree))
            .cv_folds(2)
            .metrics([Metric::Accuracy, Metric::RocAuc])
            .build()
            .unwrap()
    }

    fn runner(store: Arc<InMemoryTrackingStore>, stages: Arc<Mutex<Vec<RunStage>>>) -> ExperimentRunner {
        ExperimentRunner::builder()
            .source(Arc::new(InMemoryDatasetSource::new().with_table("customers", frame())))
            .store(store)
            .on_progress(move |update| stages.lock().push(update.stage))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let err = ExperimentRunner::builder().build().unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_successful_run_reports_every_stage() {
        let store = Arc::new(InMemoryTrackingStore::new());
        let stages = Arc::new(Mutex::new(Vec::new()));
        let outcome = runner(store.clone(), stages.clone())
            .run(&RunRequest::new("customers", config("added_product")).environment("py310"))
            .unwrap();

        assert_eq!(
            *stages.lock(),
            vec![
                RunStage::Loading,
                RunStage::Splitting,
                RunStage::CrossValidating,
                RunStage::Fitting,
                RunStage::Logging,
                RunStage::Annotating,
                RunStage::Complete,
            ]
        );
        assert_eq!(outcome.artifact_path, format!("decision_tree-{}", outcome.run_id));
        assert_eq!(outcome.class_labels, vec!["0.0", "1.0"]);
        assert_eq!(outcome.metrics.get("accuracy").unwrap().fold_scores.len(), 2);

        let record = store.get_run(&outcome.run_id).unwrap();
        assert_eq!(record.status, RunStatus::Finished);
        assert_eq!(record.params["class_labels"], r#"["0.0","1.0"]"#);
        assert!(record.metrics.contains_key("roc_auc_mean"));
        assert_eq!(record.inference.unwrap().environment, "py310");

        let model = store.load_model(&outcome.model_location).unwrap();
        assert!(model.is_fitted());
    }

    #[test]
    fn test_missing_feature_is_schema_error_before_run() {
        let store = Arc::new(InMemoryTrackingStore::new());
        let stages = Arc::new(Mutex::new(Vec::new()));
        let config = RunConfig::builder()
            .target_column("added_product")
            .categorical_columns(["a"])
            .numerical_columns(["x", "income"])
            .build()
            .unwrap();

        let err = runner(store.clone(), stages.clone())
            .run(&RunRequest::new("customers", config))
            .unwrap_err();
        assert_eq!(err.error_code(), "SCHEMA_ERROR");
        assert!(err.to_string().contains("income"));
        assert!(store.runs().is_empty());
        assert_eq!(stages.lock().last(), Some(&RunStage::Failed));
    }

    #[test]
    fn test_unknown_dataset_is_data_access_error() {
        let store = Arc::new(InMemoryTrackingStore::new());
        let err = runner(store, Arc::new(Mutex::new(Vec::new())))
            .run(&RunRequest::new("missing", config("added_product")))
            .unwrap_err();
        assert_eq!(err.error_code(), "DATA_ACCESS_ERROR");
    }
}
