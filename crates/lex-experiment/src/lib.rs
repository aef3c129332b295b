//! Experiment-run orchestration.
//!
//! One run takes a named dataset, splits off a binary label, cross-validates a
//! preprocessing + classifier [`Pipeline`](lex_learning::Pipeline), fits it on
//! the full data, logs parameters, metrics and the model to a tracking store,
//! and finally annotates the run so a model registry can promote it.
//!
//! # Overview
//!
//! - **Ports**: [`DatasetSource`], [`FolderProvider`] and [`TrackingStore`]
//!   are traits; every collaborator is injected
//! - **Adapters**: CSV and in-memory datasets; in-memory, file and MLflow
//!   tracking stores (MLflow behind the `mlflow` feature, on by default)
//! - **Run scope**: [`ActiveRun`] closes its run as `FAILED` when dropped
//!   early, so no run is left open
//! - **Progress reporting**: stage updates through a callback
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lex_experiment::{CsvDatasetSource, ExperimentRunner, FileTrackingStore, RunRequest};
//! use lex_learning::RunConfig;
//!
//! let runner = ExperimentRunner::builder()
//!     .source(Arc::new(CsvDatasetSource::new("data")))
//!     .store(Arc::new(FileTrackingStore::new("mlruns", "lex-experiments")?))
//!     .on_progress(|update| println!("[{:.0}%] {}", update.progress * 100.0, update.message))
//!     .build()?;
//!
//! let config = RunConfig::builder()
//!     .target_column("added_product")
//!     .categorical_columns(["a", "b"])
//!     .numerical_columns(["x"])
//!     .build()?;
//!
//! let outcome = runner.run(&RunRequest::new("customers", config))?;
//! println!("{} -> {}", outcome.run_id, outcome.model_location);
//! ```
//!
//! # Error Handling
//!
//! Every operation returns [`Result<T, ExperimentError>`](Result). Each variant
//! names the collaborator that failed and has a stable
//! [`error_code`](ExperimentError::error_code).

pub mod config;
pub mod dataset;
pub mod error;
pub mod folder;
pub mod progress;
pub mod promotion;
pub mod runner;
pub mod tracking;

// Re-export main types for convenience
pub use config::{DEFAULT_EXPERIMENT, ExperimentSettings, parse_param};
pub use dataset::{CsvDatasetSource, DatasetSource, InMemoryDatasetSource, load_dataset, split_target};
pub use error::{ExperimentError, Result, ResultExt};
pub use folder::{FolderProvider, LocalFolderProvider, ManagedFolder};
pub use progress::{ProgressCallback, ProgressUpdate, RunStage};
pub use promotion::annotate_for_promotion;
pub use runner::{DEFAULT_ENVIRONMENT, ExperimentRunner, ExperimentRunnerBuilder, RunOutcome, RunRequest};
#[cfg(feature = "mlflow")]
pub use tracking::{MlflowConfig, MlflowTrackingStore};
pub use tracking::{
    ActiveRun, FileTrackingStore, InMemoryTrackingStore, InferenceInfo, RunRecord, RunState,
    RunStatus, TrackingStore,
};
