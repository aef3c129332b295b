//! Filesystem tracking store.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<experiment>/<run_id>/
//!     meta.json        run id, name, status, timestamps, artifacts
//!     params.json      typed run parameters
//!     metrics.json     flattened metrics
//!     inference.json   promotion metadata (once annotated)
//!     artifacts/<artifact_path>/pipeline.json
//! ```
//!
//! Every file is written to a temporary sibling and renamed into place.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use lex_learning::{Pipeline, RunMetrics, RunParameters};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{InferenceInfo, LoggedArtifact, RunRecord, RunStatus, TrackingStore, new_run_id};
use crate::error::{ExperimentError, Result};
use crate::folder::ManagedFolder;

const META_FILE: &str = "meta.json";
const PARAMS_FILE: &str = "params.json";
const METRICS_FILE: &str = "metrics.json";
const INFERENCE_FILE: &str = "inference.json";
const MODEL_FILE: &str = "pipeline.json";
const ARTIFACTS_DIR: &str = "artifacts";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RunMeta {
    run_id: String,
    run_name: String,
    experiment: String,
    status: RunStatus,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    artifacts: Vec<LoggedArtifact>,
}

/// Stores runs as JSON files in a directory tree.
#[derive(Debug)]
pub struct FileTrackingStore {
    root: PathBuf,
    experiment: String,
    // serializes read-modify-write of meta.json
    lock: Mutex<()>,
}

impl FileTrackingStore {
    /// Store runs for `experiment` under `root`.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::TrackingStore`] if the experiment directory
    /// cannot be created.
    pub fn new(root: impl Into<PathBuf>, experiment: impl Into<String>) -> Result<Self> {
        let root = root.into();
        let experiment = experiment.into();
        let dir = root.join(&experiment);
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        Ok(Self {
            root,
            experiment,
            lock: Mutex::new(()),
        })
    }

    /// Store rooted in a managed folder.
    ///
    /// # Errors
    ///
    /// See [`FileTrackingStore::new`].
    pub fn in_folder(folder: &ManagedFolder, experiment: impl Into<String>) -> Result<Self> {
        Self::new(folder.path(), experiment)
    }

    /// Experiment name runs are filed under.
    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(&self.experiment).join(run_id)
    }

    fn existing_run_dir(&self, run_id: &str) -> Result<PathBuf> {
        if run_id.is_empty() || run_id.contains(['/', '\\', '.']) {
            return Err(ExperimentError::TrackingStore(format!(
                "invalid run id '{run_id}'"
            )));
        }
        let dir = self.run_dir(run_id);
        if dir.join(META_FILE).is_file() {
            Ok(dir)
        } else {
            Err(ExperimentError::TrackingStore(format!(
                "run '{run_id}' not found"
            )))
        }
    }

    fn read_meta(&self, dir: &Path) -> Result<RunMeta> {
        read_json(&dir.join(META_FILE))
    }

    fn update_meta(&self, run_id: &str, f: impl FnOnce(&mut RunMeta) -> Result<()>) -> Result<()> {
        let _guard = self.lock.lock();
        let dir = self.existing_run_dir(run_id)?;
        let mut meta = self.read_meta(&dir)?;
        f(&mut meta)?;
        write_json(&dir.join(META_FILE), &meta)
    }

    fn open_run_dir(&self, run_id: &str) -> Result<PathBuf> {
        let dir = self.existing_run_dir(run_id)?;
        let meta = self.read_meta(&dir)?;
        if meta.status != RunStatus::Running {
            return Err(ExperimentError::TrackingStore(format!(
                "run '{run_id}' is already {}",
                meta.status
            )));
        }
        Ok(dir)
    }
}

fn io_error(path: &Path, e: std::io::Error) -> ExperimentError {
    ExperimentError::TrackingStore(format!("{}: {e}", path.display()))
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents).map_err(|e| io_error(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_error(path, e))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| ExperimentError::TrackingStore(format!("cannot encode {}: {e}", path.display())))?;
    write_atomic(path, &json)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    serde_json::from_str(&text)
        .map_err(|e| ExperimentError::TrackingStore(format!("corrupt {}: {e}", path.display())))
}

fn read_optional_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if path.is_file() {
        read_json(path).map(Some)
    } else {
        Ok(None)
    }
}

impl TrackingStore for FileTrackingStore {
    fn start_run(&self, run_name: &str) -> Result<String> {
        let run_id = new_run_id();
        let meta = RunMeta {
            run_id: run_id.clone(),
            run_name: run_name.to_string(),
            experiment: self.experiment.clone(),
            status: RunStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            artifacts: Vec::new(),
        };
        write_json(&self.run_dir(&run_id).join(META_FILE), &meta)?;
        debug!(run_id = %run_id, dir = %self.run_dir(&run_id).display(), "Run directory created");
        Ok(run_id)
    }

    fn log_params(&self, run_id: &str, params: &RunParameters) -> Result<()> {
        let dir = self.open_run_dir(run_id)?;
        write_json(&dir.join(PARAMS_FILE), params)
    }

    fn log_metrics(&self, run_id: &str, metrics: &RunMetrics) -> Result<()> {
        let dir = self.open_run_dir(run_id)?;
        write_json(&dir.join(METRICS_FILE), &metrics.flatten())
    }

    fn log_model(&self, run_id: &str, artifact_path: &str, pipeline: &Pipeline) -> Result<String> {
        if artifact_path.is_empty() || artifact_path.contains("..") {
            return Err(ExperimentError::TrackingStore(format!(
                "invalid artifact path '{artifact_path}'"
            )));
        }
        let dir = self.open_run_dir(run_id)?;
        let model_file = dir.join(ARTIFACTS_DIR).join(artifact_path).join(MODEL_FILE);
        write_atomic(&model_file, &pipeline.to_json()?)?;

        let location = model_file.display().to_string();
        self.update_meta(run_id, |meta| {
            meta.artifacts.push(LoggedArtifact {
                artifact_path: artifact_path.to_string(),
                location: location.clone(),
            });
            Ok(())
        })?;
        Ok(location)
    }

    fn end_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        self.update_meta(run_id, |meta| {
            meta.status = status;
            meta.end_time = Some(Utc::now());
            Ok(())
        })
    }

    fn set_run_inference_info(&self, run_id: &str, info: &InferenceInfo) -> Result<()> {
        let dir = self.existing_run_dir(run_id)?;
        write_json(&dir.join(INFERENCE_FILE), info)
    }

    fn get_run(&self, run_id: &str) -> Result<RunRecord> {
        let dir = self.existing_run_dir(run_id)?;
        let meta = self.read_meta(&dir)?;
        let params: Option<RunParameters> = read_optional_json(&dir.join(PARAMS_FILE))?;
        let metrics: Option<BTreeMap<String, f64>> = read_optional_json(&dir.join(METRICS_FILE))?;
        let inference: Option<InferenceInfo> = read_optional_json(&dir.join(INFERENCE_FILE))?;

        Ok(RunRecord {
            run_id: meta.run_id,
            run_name: meta.run_name,
            status: meta.status,
            start_time: meta.start_time,
            end_time: meta.end_time,
            params: params.map(|p| p.to_strings()).unwrap_or_default(),
            metrics: metrics.unwrap_or_default(),
            artifacts: meta.artifacts,
            inference,
        })
    }

    fn load_model(&self, location: &str) -> Result<Pipeline> {
        let text = fs::read_to_string(location).map_err(|e| io_error(Path::new(location), e))?;
        Ok(Pipeline::from_json(&text)?)
    }
}

static_assertions::assert_impl_all!(FileTrackingStore: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::RunState;

    #[test]
    fn test_run_lifecycle_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTrackingStore::new(dir.path(), "lex-experiments").unwrap();

        let run_id = store.start_run("run-20240101000000").unwrap();
        let run_dir = dir.path().join("lex-experiments").join(&run_id);
        assert!(run_dir.join("meta.json").is_file());
        assert_eq!(store.get_run(&run_id).unwrap().state(), RunState::Created);

        store.end_run(&run_id, RunStatus::Finished).unwrap();
        let info = InferenceInfo::binary_classification(
            vec!["0.0".to_string(), "1.0".to_string()],
            "python-3.10",
            "added_product",
        );
        store.set_run_inference_info(&run_id, &info).unwrap();

        let record = store.get_run(&run_id).unwrap();
        assert_eq!(record.state(), RunState::PromotionAnnotated);
        assert_eq!(record.inference, Some(info));
        assert!(!run_dir.join("meta.json.tmp").exists());
    }

    #[test]
    fn test_unknown_and_invalid_run_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTrackingStore::new(dir.path(), "exp").unwrap();
        assert!(store.get_run("0123456789abcdef0123456789abcdef").is_err());
        assert!(store.get_run("../exp").is_err());
    }

    #[test]
    fn test_finished_run_rejects_params() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTrackingStore::new(dir.path(), "exp").unwrap();
        let run_id = store.start_run("run-x").unwrap();
        store.end_run(&run_id, RunStatus::Failed).unwrap();
        let err = store.log_metrics(&run_id, &RunMetrics::default()).unwrap_err();
        assert!(err.to_string().contains("already FAILED"));
    }
}
