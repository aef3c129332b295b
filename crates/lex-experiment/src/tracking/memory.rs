//! In-process tracking store.

use std::collections::HashMap;

use chrono::Utc;
use lex_learning::{Pipeline, RunMetrics, RunParameters};
use parking_lot::Mutex;

use super::{InferenceInfo, LoggedArtifact, RunRecord, RunStatus, TrackingStore, new_run_id};
use crate::error::{ExperimentError, Result};

const SCHEME: &str = "memory://";

#[derive(Debug, Default)]
struct Inner {
    runs: HashMap<String, RunRecord>,
    // location -> serialized pipeline
    models: HashMap<String, String>,
}

/// Keeps runs and model artifacts in memory. Useful for tests and for
/// embedding the runner without a tracking server.
#[derive(Debug, Default)]
pub struct InMemoryTrackingStore {
    inner: Mutex<Inner>,
}

impl InMemoryTrackingStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every run, in no particular order.
    pub fn runs(&self) -> Vec<RunRecord> {
        self.inner.lock().runs.values().cloned().collect()
    }

    fn with_run<T>(&self, run_id: &str, f: impl FnOnce(&mut RunRecord) -> Result<T>) -> Result<T> {
        let mut inner = self.inner.lock();
        let record = inner
            .runs
            .get_mut(run_id)
            .ok_or_else(|| unknown_run(run_id))?;
        f(record)
    }
}

fn unknown_run(run_id: &str) -> ExperimentError {
    ExperimentError::TrackingStore(format!("run '{run_id}' not found"))
}

fn ensure_open(record: &RunRecord) -> Result<()> {
    if record.status == RunStatus::Running {
        Ok(())
    } else {
        Err(ExperimentError::TrackingStore(format!(
            "run '{}' is already {}",
            record.run_id, record.status
        )))
    }
}

impl TrackingStore for InMemoryTrackingStore {
    fn start_run(&self, run_name: &str) -> Result<String> {
        let run_id = new_run_id();
        self.inner
            .lock()
            .runs
            .insert(run_id.clone(), RunRecord::new(run_id.clone(), run_name));
        Ok(run_id)
    }

    fn log_params(&self, run_id: &str, params: &RunParameters) -> Result<()> {
        self.with_run(run_id, |record| {
            ensure_open(record)?;
            record.params.extend(params.to_strings());
            Ok(())
        })
    }

    fn log_metrics(&self, run_id: &str, metrics: &RunMetrics) -> Result<()> {
        self.with_run(run_id, |record| {
            ensure_open(record)?;
            record.metrics.extend(metrics.flatten());
            Ok(())
        })
    }

    fn log_model(&self, run_id: &str, artifact_path: &str, pipeline: &Pipeline) -> Result<String> {
        let json = pipeline.to_json()?;
        let location = format!("{SCHEME}{run_id}/{artifact_path}");
        let mut inner = self.inner.lock();
        let record = inner
            .runs
            .get_mut(run_id)
            .ok_or_else(|| unknown_run(run_id))?;
        ensure_open(record)?;
        record.artifacts.push(LoggedArtifact {
            artifact_path: artifact_path.to_string(),
            location: location.clone(),
        });
        inner.models.insert(location.clone(), json);
        Ok(location)
    }

    fn end_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        self.with_run(run_id, |record| {
            record.status = status;
            record.end_time = Some(Utc::now());
            Ok(())
        })
    }

    fn set_run_inference_info(&self, run_id: &str, info: &InferenceInfo) -> Result<()> {
        self.with_run(run_id, |record| {
            record.inference = Some(info.clone());
            Ok(())
        })
    }

    fn get_run(&self, run_id: &str) -> Result<RunRecord> {
        self.inner
            .lock()
            .runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| unknown_run(run_id))
    }

    fn load_model(&self, location: &str) -> Result<Pipeline> {
        let inner = self.inner.lock();
        let json = inner.models.get(location).ok_or_else(|| {
            ExperimentError::TrackingStore(format!("no model stored at '{location}'"))
        })?;
        Ok(Pipeline::from_json(json)?)
    }
}

static_assertions::assert_impl_all!(InMemoryTrackingStore: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::RunState;

    #[test]
    fn test_unknown_run() {
        let store = InMemoryTrackingStore::new();
        let err = store.get_run("missing").unwrap_err();
        assert_eq!(err.error_code(), "TRACKING_STORE_ERROR");
    }

    #[test]
    fn test_closed_run_rejects_logging() {
        let store = InMemoryTrackingStore::new();
        let run_id = store.start_run("run-x").unwrap();
        store.end_run(&run_id, RunStatus::Finished).unwrap();
        let err = store
            .log_metrics(&run_id, &RunMetrics::default())
            .unwrap_err();
        assert!(err.to_string().contains("already FINISHED"));
    }

    #[test]
    fn test_start_run_is_created() {
        let store = InMemoryTrackingStore::new();
        let run_id = store.start_run("run-x").unwrap();
        let record = store.get_run(&run_id).unwrap();
        assert_eq!(record.run_name, "run-x");
        assert_eq!(record.state(), RunState::Created);
        assert_eq!(store.runs().len(), 1);
    }
}
