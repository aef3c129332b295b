//! Experiment tracking: the [`TrackingStore`] port, its adapters, and the
//! [`ActiveRun`] scope guard.
//!
//! # Run scope
//!
//! A run is opened with [`ActiveRun::start`] and closed with
//! [`ActiveRun::finish`]. If the guard is dropped without `finish` (an early
//! return through `?`, or a panic) the run is closed as `FAILED`, so no run is
//! ever left `RUNNING`.
//!
//! ```
//! use lex_experiment::tracking::{ActiveRun, InMemoryTrackingStore, RunStatus, TrackingStore};
//!
//! let store = InMemoryTrackingStore::new();
//! let run_id = {
//!     let run = ActiveRun::start(&store, "run-20240101120000")?;
//!     run.run_id().to_string()
//!     // dropped here without finish()
//! };
//! assert_eq!(store.get_run(&run_id)?.status, RunStatus::Failed);
//! # Ok::<(), lex_experiment::ExperimentError>(())
//! ```

mod file;
mod memory;
#[cfg(feature = "mlflow")]
mod mlflow;
mod record;

use chrono::{DateTime, Local, TimeZone};
use lex_learning::{Algorithm, Pipeline, RunMetrics, RunParameters};
use tracing::{debug, info, warn};

use crate::error::Result;

pub use file::FileTrackingStore;
pub use memory::InMemoryTrackingStore;
#[cfg(feature = "mlflow")]
pub use mlflow::{MlflowConfig, MlflowTrackingStore};
pub use record::{InferenceInfo, LoggedArtifact, PredictionType, RunRecord, RunState, RunStatus};

/// A backend that records runs, their parameters, metrics and model artifacts.
///
/// Every method that fails returns [`ExperimentError::TrackingStore`](crate::ExperimentError::TrackingStore).
/// Nothing is retried.
pub trait TrackingStore: Send + Sync {
    /// Open a run and return its id.
    fn start_run(&self, run_name: &str) -> Result<String>;

    /// Record the run's parameters.
    fn log_params(&self, run_id: &str, params: &RunParameters) -> Result<()>;

    /// Record the run's metrics (flattened to `<metric>_mean` / `<metric>_std`).
    fn log_metrics(&self, run_id: &str, metrics: &RunMetrics) -> Result<()>;

    /// Store a fitted pipeline under `artifact_path` and return its location.
    fn log_model(&self, run_id: &str, artifact_path: &str, pipeline: &Pipeline) -> Result<String>;

    /// Close the run with `status`.
    fn end_run(&self, run_id: &str, status: RunStatus) -> Result<()>;

    /// Attach promotion metadata to a run.
    fn set_run_inference_info(&self, run_id: &str, info: &InferenceInfo) -> Result<()>;

    /// Fetch a run's record.
    fn get_run(&self, run_id: &str) -> Result<RunRecord>;

    /// Reload a pipeline from a location returned by [`log_model`](Self::log_model).
    fn load_model(&self, location: &str) -> Result<Pipeline>;
}

/// Generate a run id: 32 lowercase hex characters.
pub fn new_run_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// Timestamped run name, `run-YYYYMMDDHHMMSS`.
pub fn run_name_at<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("run-{}", time.format("%Y%m%d%H%M%S"))
}

/// Run name for the current local time.
pub fn run_name_now() -> String {
    run_name_at(&Local::now())
}

/// Artifact path of a run's model, `<algorithm>-<run_id>`.
pub fn artifact_path(algorithm: Algorithm, run_id: &str) -> String {
    format!("{algorithm}-{run_id}")
}

/// An open tracking run. Closes the run as `FAILED` on drop unless
/// [`finish`](Self::finish) was called.
pub struct ActiveRun<'a> {
    store: &'a dyn TrackingStore,
    run_id: String,
    run_name: String,
    finished: bool,
}

impl<'a> ActiveRun<'a> {
    /// Open a run named `run_name`.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the run cannot be created.
    pub fn start(store: &'a dyn TrackingStore, run_name: impl Into<String>) -> Result<Self> {
        let run_name = run_name.into();
        let run_id = store.start_run(&run_name)?;
        info!(run_id = %run_id, run_name = %run_name, "Tracking run started");
        Ok(Self {
            store,
            run_id,
            run_name,
            finished: false,
        })
    }

    /// Backend run id.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run name.
    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    /// Log the parameter record.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub fn log_params(&self, params: &RunParameters) -> Result<()> {
        self.store.log_params(&self.run_id, params)?;
        debug!(run_id = %self.run_id, count = params.len(), "Parameters logged");
        Ok(())
    }

    /// Log aggregated metrics.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub fn log_metrics(&self, metrics: &RunMetrics) -> Result<()> {
        self.store.log_metrics(&self.run_id, metrics)?;
        debug!(run_id = %self.run_id, metrics = ?metrics.flatten(), "Metrics logged");
        Ok(())
    }

    /// Log a fitted pipeline and return its location.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub fn log_model(&self, pipeline: &Pipeline, artifact_path: &str) -> Result<String> {
        let location = self.store.log_model(&self.run_id, artifact_path, pipeline)?;
        info!(run_id = %self.run_id, location = %location, "Model logged");
        Ok(location)
    }

    /// Close the run as `FINISHED` and return its id.
    ///
    /// # Errors
    ///
    /// Returns the store's error; the guard then still closes the run as
    /// `FAILED` when it drops.
    pub fn finish(mut self) -> Result<String> {
        self.store.end_run(&self.run_id, RunStatus::Finished)?;
        self.finished = true;
        info!(run_id = %self.run_id, "Tracking run finished");
        Ok(std::mem::take(&mut self.run_id))
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(run_id = %self.run_id, "Run scope left without finishing; marking run FAILED");
        if let Err(e) = self.store.end_run(&self.run_id, RunStatus::Failed) {
            warn!(run_id = %self.run_id, error = %e, "Failed to close run");
        }
    }
}

impl std::fmt::Debug for ActiveRun<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveRun")
            .field("run_id", &self.run_id)
            .field("run_name", &self.run_name)
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_run_name_format() {
        let time = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(7, 5, 1)
            .unwrap()
            .and_utc();
        assert_eq!(run_name_at(&time), "run-20240309070501");
    }

    #[test]
    fn test_run_id_shape() {
        let id = new_run_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(id, new_run_id());
    }

    #[test]
    fn test_artifact_path() {
        assert_eq!(
            artifact_path(Algorithm::RandomForest, "abc123"),
            "random_forest-abc123"
        );
    }

    #[test]
    fn test_finish_marks_finished() {
        let store = InMemoryTrackingStore::new();
        let run = ActiveRun::start(&store, "run-x").unwrap();
        let run_id = run.finish().unwrap();
        let record = store.get_run(&run_id).unwrap();
        assert_eq!(record.status, RunStatus::Finished);
        assert!(record.end_time.is_some());
    }

    #[test]
    fn test_drop_marks_failed() {
        let store = InMemoryTrackingStore::new();
        let run_id = {
            let run = ActiveRun::start(&store, "run-x").unwrap();
            run.run_id().to_string()
        };
        assert_eq!(store.get_run(&run_id).unwrap().state(), RunState::Failed);
    }

    #[test]
    fn test_panic_marks_failed() {
        let store = InMemoryTrackingStore::new();
        let run_id = std::sync::Mutex::new(String::new());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let run = ActiveRun::start(&store, "run-x").unwrap();
            *run_id.lock().unwrap() = run.run_id().to_string();
            panic!("boom");
        }));
        assert!(result.is_err());
        let run_id = run_id.into_inner().unwrap();
        assert_eq!(store.get_run(&run_id).unwrap().status, RunStatus::Failed);
    }
}
