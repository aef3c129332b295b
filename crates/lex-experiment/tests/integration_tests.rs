//! Integration tests for experiment runs.
//!
//! These tests drive whole runs against the CSV fixture and the bundled
//! tracking stores.

use lex_experiment::{
    CsvDatasetSource, ExperimentError, ExperimentRunner, FileTrackingStore, FolderProvider,
    InMemoryTrackingStore, InferenceInfo, LocalFolderProvider, RunRecord, RunRequest, RunStage,
    RunState, RunStatus, TrackingStore,
};
use lex_learning::{
    Algorithm, ClassifierSpec, Metric, Pipeline, RunConfig, RunMetrics, RunParameters,
};
use parking_lot::Mutex;
use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::Arc;

// ============================================================================
// Helper Functions
// ============================================================================

fn fixtures_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn load_csv(filename: &str) -> DataFrame {
    let path = fixtures_path().join(filename);
    CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path))
        .expect("Failed to create CSV reader")
        .finish()
        .expect("Failed to read CSV file")
}

fn customers_config(target: &str) -> RunConfig {
    RunConfig::builder()
        .target_column(target)
        .categorical_columns(["a", "b"])
        .numerical_columns(["x"])
        .classifier(ClassifierSpec::new(Algorithm::RandomForest).with_param("n_estimators", 20))
        .cv_folds(5)
        .metrics([Metric::F1Macro, Metric::RocAuc])
        .random_seed(42)
        .build()
        .unwrap()
}

fn runner_with(
    store: Arc<dyn TrackingStore>,
    stages: Arc<Mutex<Vec<RunStage>>>,
) -> ExperimentRunner {
    ExperimentRunner::builder()
        .source(Arc::new(CsvDatasetSource::new(fixtures_path())))
        .store(store)
        .on_progress(move |update| stages.lock().push(update.stage))
        .build()
        .unwrap()
}

/// Delegates to an in-memory store but rejects every model upload.
struct FailingModelStore {
    inner: InMemoryTrackingStore,
}

impl TrackingStore for FailingModelStore {
    fn start_run(&self, run_name: &str) -> lex_experiment::Result<String> {
        self.inner.start_run(run_name)
    }

    fn log_params(&self, run_id: &str, params: &RunParameters) -> lex_experiment::Result<()> {
        self.inner.log_params(run_id, params)
    }

    fn log_metrics(&self, run_id: &str, metrics: &RunMetrics) -> lex_experiment::Result<()> {
        self.inner.log_metrics(run_id, metrics)
    }

    fn log_model(
        &self,
        _run_id: &str,
        _artifact_path: &str,
        _pipeline: &Pipeline,
    ) -> lex_experiment::Result<String> {
        Err(ExperimentError::TrackingStore(
            "artifact store unavailable".to_string(),
        ))
    }

    fn end_run(&self, run_id: &str, status: RunStatus) -> lex_experiment::Result<()> {
        self.inner.end_run(run_id, status)
    }

    fn set_run_inference_info(
        &self,
        run_id: &str,
        info: &InferenceInfo,
    ) -> lex_experiment::Result<()> {
        self.inner.set_run_inference_info(run_id, info)
    }

    fn get_run(&self, run_id: &str) -> lex_experiment::Result<RunRecord> {
        self.inner.get_run(run_id)
    }

    fn load_model(&self, location: &str) -> lex_experiment::Result<Pipeline> {
        self.inner.load_model(location)
    }
}

// ============================================================================
// Full Runs
// ============================================================================

#[test]
fn test_fixture_shape() {
    let df = load_csv("customers.csv");
    assert_eq!(df.height(), 100);
    let names: Vec<&str> = df.get_column_names().iter().map(|c| c.as_str()).collect();
    assert_eq!(names, ["a", "b", "x", "added_product"]);

    let positives = df
        .column("added_product")
        .unwrap()
        .as_materialized_series()
        .i64()
        .unwrap()
        .sum()
        .unwrap();
    assert_eq!(positives, 30);
}

#[test]
fn test_full_run_customers() {
    let store = Arc::new(InMemoryTrackingStore::new());
    let stages = Arc::new(Mutex::new(Vec::new()));
    let runner = runner_with(store.clone(), stages.clone());

    let outcome = runner
        .run(&RunRequest::new("customers", customers_config("added_product")).environment("python-3.10"))
        .unwrap();

    // five fold scores and an aggregate per metric
    for metric in ["f1_macro", "roc_auc"] {
        let summary = outcome.metrics.get(metric).unwrap();
        assert_eq!(summary.fold_scores.len(), 5);
        let mean = summary.fold_scores.iter().sum::<f64>() / 5.0;
        assert!((summary.mean - mean).abs() < 1e-12);
        assert!(summary.std >= 0.0);
    }
    assert_eq!(outcome.cross_validation.folds.len(), 5);
    for fold in &outcome.cross_validation.folds {
        assert_eq!(fold.train_size + fold.test_size, 100);
    }

    assert!(outcome.artifact_path.contains("random_forest"));
    assert!(outcome.artifact_path.contains(&outcome.run_id));
    assert_eq!(outcome.class_labels, vec!["0.0", "1.0"]);
    assert!(outcome.run_name.starts_with("run-"));
    assert_eq!(outcome.run_name.len(), "run-YYYYMMDDHHMMSS".len());
    assert_eq!(outcome.state, RunState::PromotionAnnotated);

    let record = store.get_run(&outcome.run_id).unwrap();
    assert_eq!(record.status, RunStatus::Finished);
    assert_eq!(record.params["target_column"], "added_product");
    assert_eq!(record.params["cv_folds"], "5");
    assert_eq!(record.params["classifier.n_estimators"], "20");
    assert!(record.metrics.contains_key("f1_macro_mean"));
    assert!(record.metrics.contains_key("roc_auc_std"));
    assert_eq!(
        record.inference,
        Some(InferenceInfo::binary_classification(
            vec!["0.0".to_string(), "1.0".to_string()],
            "python-3.10",
            "added_product",
        ))
    );

    assert_eq!(stages.lock().last(), Some(&RunStage::Complete));
}

#[test]
fn test_logged_model_predicts() {
    let store = Arc::new(InMemoryTrackingStore::new());
    let runner = runner_with(store.clone(), Arc::new(Mutex::new(Vec::new())));
    let outcome = runner
        .run(&RunRequest::new("customers", customers_config("added_product")))
        .unwrap();

    let model = store.load_model(&outcome.model_location).unwrap();
    let features = load_csv("customers.csv").drop("added_product").unwrap();
    let proba = model.predict_proba(&features).unwrap();
    assert_eq!(proba.len(), 100);
    assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));

    let predictions = model.predict(&features).unwrap();
    assert!(predictions.iter().all(|p| *p == 0.0 || *p == 1.0));
}

#[test]
fn test_runs_are_reproducible() {
    let store = Arc::new(InMemoryTrackingStore::new());
    let runner = runner_with(store, Arc::new(Mutex::new(Vec::new())));
    let request = RunRequest::new("customers", customers_config("added_product"));

    let first = runner.run(&request).unwrap();
    let second = runner.run(&request).unwrap();
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.metrics, second.metrics);
}

// ============================================================================
// Failure Paths
// ============================================================================

#[test]
fn test_invalid_target_fails_before_cross_validation() {
    let store = Arc::new(InMemoryTrackingStore::new());
    let stages = Arc::new(Mutex::new(Vec::new()));
    let runner = runner_with(store.clone(), stages.clone());

    let err = runner
        .run(&RunRequest::new("customers", customers_config("churned")))
        .unwrap_err();

    assert!(matches!(err, ExperimentError::Schema(_)));
    let stages = stages.lock();
    assert!(!stages.contains(&RunStage::CrossValidating));
    assert_eq!(stages.last(), Some(&RunStage::Failed));
    assert!(store.runs().is_empty());
}

#[test]
fn test_non_binary_target_is_schema_error() {
    let store = Arc::new(InMemoryTrackingStore::new());
    let config = RunConfig::builder()
        .target_column("x")
        .categorical_columns(["a", "b"])
        .numerical_columns(["added_product"])
        .build()
        .unwrap();

    let err = runner_with(store, Arc::new(Mutex::new(Vec::new())))
        .run(&RunRequest::new("customers", config))
        .unwrap_err();
    assert_eq!(err.error_code(), "SCHEMA_ERROR");
}

#[test]
fn test_log_model_failure_closes_run_failed() {
    let store = Arc::new(FailingModelStore {
        inner: InMemoryTrackingStore::new(),
    });
    let stages = Arc::new(Mutex::new(Vec::new()));
    let runner = runner_with(store.clone(), stages.clone());

    let err = runner
        .run(&RunRequest::new("customers", customers_config("added_product")))
        .unwrap_err();
    assert_eq!(err.error_code(), "TRACKING_STORE_ERROR");

    let runs = store.inner.runs();
    assert_eq!(runs.len(), 1);
    let record = &runs[0];
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.state(), RunState::Failed);
    assert_ne!(record.state(), RunState::Logged);
    assert!(record.inference.is_none());
    assert!(!stages.lock().contains(&RunStage::Annotating));
}

#[test]
fn test_missing_dataset_is_data_access_error() {
    let store = Arc::new(InMemoryTrackingStore::new());
    let err = runner_with(store, Arc::new(Mutex::new(Vec::new())))
        .run(&RunRequest::new("no_such_table", customers_config("added_product")))
        .unwrap_err();
    assert_eq!(err.error_code(), "DATA_ACCESS_ERROR");
}

// ============================================================================
// File Tracking Store
// ============================================================================

#[test]
fn test_file_store_full_run() {
    let root = tempfile::tempdir().unwrap();
    let folder = LocalFolderProvider::new(root.path())
        .get_or_create("mlruns", "filesystem_managed")
        .unwrap();
    let store = Arc::new(FileTrackingStore::in_folder(&folder, "lex-experiments").unwrap());

    let runner = runner_with(store.clone(), Arc::new(Mutex::new(Vec::new())));
    let outcome = runner
        .run(&RunRequest::new("customers", customers_config("added_product")))
        .unwrap();

    let run_dir = root
        .path()
        .join("filesystem_managed/mlruns/lex-experiments")
        .join(&outcome.run_id);
    for file in ["meta.json", "params.json", "metrics.json", "inference.json"] {
        assert!(run_dir.join(file).is_file(), "{file} missing");
    }
    assert!(
        run_dir
            .join("artifacts")
            .join(&outcome.artifact_path)
            .join("pipeline.json")
            .is_file()
    );

    let record = store.get_run(&outcome.run_id).unwrap();
    assert_eq!(record.state(), RunState::PromotionAnnotated);
    assert_eq!(record.params["class_labels"], r#"["0.0","1.0"]"#);
    assert_eq!(record.artifacts.len(), 1);

    let model = store.load_model(&outcome.model_location).unwrap();
    assert!(model.is_fitted());
    assert_eq!(model.class_labels().unwrap(), outcome.class_labels);
}
