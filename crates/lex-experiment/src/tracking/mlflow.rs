//! MLflow tracking server backend, over the REST API.
//!
//! Runs are created in one experiment (resolved by name, created on first
//! use). Parameters and metrics go through `runs/log-batch`; the fitted
//! pipeline is uploaded as `pipeline.json` through the artifact proxy.
//! Promotion metadata and artifact locations are kept as run tags.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lex_learning::{Pipeline, RunMetrics, RunParameters};
use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::{InferenceInfo, LoggedArtifact, PredictionType, RunRecord, RunStatus, TrackingStore};
use crate::config::DEFAULT_EXPERIMENT;
use crate::error::{ExperimentError, Result};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

const API: &str = "api/2.0/mlflow";
const ARTIFACT_API: &str = "api/2.0/mlflow-artifacts/artifacts";
const MODEL_FILE: &str = "pipeline.json";
const RUNS_SCHEME: &str = "runs:/";

// log-batch accepts at most 100 params per request
const PARAM_BATCH: usize = 100;

const RUN_NAME_TAG: &str = "mlflow.runName";
const ARTIFACT_TAG_PREFIX: &str = "lex.artifact.";
const TAG_PREDICTION_TYPE: &str = "inference.prediction_type";
const TAG_CLASS_LABELS: &str = "inference.class_labels";
const TAG_ENVIRONMENT: &str = "inference.environment";
const TAG_TARGET_COLUMN: &str = "inference.target_column";

/// Connection settings for an MLflow tracking server.
#[derive(Debug, Clone)]
pub struct MlflowConfig {
    /// Server base URL, e.g. `http://localhost:5000`.
    pub tracking_uri: String,
    /// Experiment name.
    pub experiment: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl MlflowConfig {
    /// Settings for `tracking_uri` with the default experiment and timeout.
    pub fn new(tracking_uri: impl Into<String>) -> Self {
        Self {
            tracking_uri: tracking_uri.into(),
            experiment: DEFAULT_EXPERIMENT.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Set the experiment name.
    pub fn experiment(mut self, experiment: impl Into<String>) -> Self {
        self.experiment = experiment.into();
        self
    }

    /// Set the request timeout in seconds.
    pub fn timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyValue {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct MetricValue {
    key: String,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct RunInfo {
    run_id: String,
    #[serde(default)]
    run_name: Option<String>,
    status: String,
    start_time: Option<i64>,
    end_time: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct RunData {
    #[serde(default)]
    metrics: Vec<MetricValue>,
    #[serde(default)]
    params: Vec<KeyValue>,
    #[serde(default)]
    tags: Vec<KeyValue>,
}

#[derive(Debug, Deserialize)]
struct Run {
    info: RunInfo,
    #[serde(default)]
    data: RunData,
}

#[derive(Debug, Deserialize)]
struct RunEnvelope {
    run: Run,
}

#[derive(Debug, Deserialize)]
struct Experiment {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct ExperimentEnvelope {
    experiment: Experiment,
}

#[derive(Debug, Deserialize)]
struct CreatedExperiment {
    experiment_id: String,
}

/// Tracking store backed by an MLflow server.
pub struct MlflowTrackingStore {
    base_url: String,
    experiment: String,
    experiment_id: String,
    client: Client,
}

impl MlflowTrackingStore {
    /// Connect to the server and resolve (or create) the experiment.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::TrackingStore`] if the client cannot be
    /// built or the server cannot be reached.
    pub fn connect(config: MlflowConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| store_error("failed to build HTTP client", e))?;

        let base_url = config.tracking_uri.trim_end_matches('/').to_string();
        let mut store = Self {
            base_url,
            experiment: config.experiment,
            experiment_id: String::new(),
            client,
        };
        store.experiment_id = store.resolve_experiment()?;
        info!(
            tracking_uri = %store.base_url,
            experiment = %store.experiment,
            experiment_id = %store.experiment_id,
            "Connected to MLflow"
        );
        Ok(store)
    }

    /// Experiment id runs are created in.
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    fn resolve_experiment(&self) -> Result<String> {
        let response = self
            .client
            .get(self.api_url("experiments/get-by-name"))
            .query(&[("experiment_name", self.experiment.as_str())])
            .send()
            .map_err(|e| store_error("experiments/get-by-name", e))?;

        if response.status().is_success() {
            let envelope: ExperimentEnvelope = decode(response, "experiments/get-by-name")?;
            return Ok(envelope.experiment.experiment_id);
        }

        let failure = api_failure(response, "experiments/get-by-name");
        if !failure.0.contains("RESOURCE_DOES_NOT_EXIST") {
            return Err(ExperimentError::TrackingStore(failure.1));
        }

        debug!(experiment = %self.experiment, "Creating MLflow experiment");
        let created: CreatedExperiment =
            self.post("experiments/create", &json!({ "name": self.experiment }))?;
        Ok(created.experiment_id)
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/{API}/{endpoint}", self.base_url)
    }

    fn artifact_url(&self, run_id: &str, artifact_path: &str) -> String {
        format!(
            "{}/{ARTIFACT_API}/{}/{run_id}/artifacts/{artifact_path}/{MODEL_FILE}",
            self.base_url, self.experiment_id
        )
    }

    fn post<B: Serialize, R: DeserializeOwned>(&self, endpoint: &str, body: &B) -> Result<R> {
        let response = self
            .client
            .post(self.api_url(endpoint))
            .json(body)
            .send()
            .map_err(|e| store_error(endpoint, e))?;
        if !response.status().is_success() {
            return Err(ExperimentError::TrackingStore(api_failure(response, endpoint).1));
        }
        decode(response, endpoint)
    }

    fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        let _: serde_json::Value = self.post(
            "runs/set-tag",
            &json!({ "run_id": run_id, "key": key, "value": value }),
        )?;
        Ok(())
    }

    fn log_batch(&self, run_id: &str, body: serde_json::Value) -> Result<()> {
        let mut body = body;
        body["run_id"] = json!(run_id);
        let _: serde_json::Value = self.post("runs/log-batch", &body)?;
        Ok(())
    }
}

impl std::fmt::Debug for MlflowTrackingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MlflowTrackingStore")
            .field("base_url", &self.base_url)
            .field("experiment", &self.experiment)
            .field("experiment_id", &self.experiment_id)
            .finish()
    }
}

fn store_error(what: &str, e: impl std::fmt::Display) -> ExperimentError {
    ExperimentError::TrackingStore(format!("{what}: {e}"))
}

fn decode<R: DeserializeOwned>(response: Response, endpoint: &str) -> Result<R> {
    let text = response.text().map_err(|e| store_error(endpoint, e))?;
    // empty bodies decode as `{}`
    let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
    serde_json::from_str(text).map_err(|e| store_error(&format!("{endpoint}: bad response"), e))
}

/// `(error_code, message)` of a failed call.
fn api_failure(response: Response, endpoint: &str) -> (String, String) {
    let status = response.status();
    let body = response.text().unwrap_or_default();
    match serde_json::from_str::<ApiError>(&body) {
        Ok(err) => (
            err.error_code.clone(),
            format!("MLflow {endpoint} failed ({status}): {} {}", err.error_code, err.message),
        ),
        Err(_) => (String::new(), format!("MLflow {endpoint} failed ({status}): {body}")),
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis_to_time(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}

/// Split `runs:/<run_id>/<artifact_path>` into its parts.
fn parse_location(location: &str) -> Option<(&str, &str)> {
    let rest = location.strip_prefix(RUNS_SCHEME)?;
    let (run_id, path) = rest.split_once('/')?;
    (!run_id.is_empty() && !path.is_empty()).then_some((run_id, path))
}

fn inference_from_tags(tags: &BTreeMap<String, String>) -> Option<InferenceInfo> {
    let prediction_type = PredictionType::parse(tags.get(TAG_PREDICTION_TYPE)?)?;
    let class_labels: Vec<String> = serde_json::from_str(tags.get(TAG_CLASS_LABELS)?).ok()?;
    Some(InferenceInfo {
        prediction_type,
        class_labels,
        environment: tags.get(TAG_ENVIRONMENT)?.clone(),
        target_column: tags.get(TAG_TARGET_COLUMN)?.clone(),
    })
}

fn record_from_run(run: Run) -> Result<RunRecord> {
    let status = RunStatus::parse(&run.info.status).ok_or_else(|| {
        ExperimentError::TrackingStore(format!("unknown run status '{}'", run.info.status))
    })?;
    let tags: BTreeMap<String, String> = run
        .data
        .tags
        .into_iter()
        .map(|t| (t.key, t.value))
        .collect();

    let artifacts = tags
        .iter()
        .filter_map(|(key, location)| {
            key.strip_prefix(ARTIFACT_TAG_PREFIX).map(|path| LoggedArtifact {
                artifact_path: path.to_string(),
                location: location.clone(),
            })
        })
        .collect();

    Ok(RunRecord {
        run_name: run
            .info
            .run_name
            .or_else(|| tags.get(RUN_NAME_TAG).cloned())
            .unwrap_or_default(),
        run_id: run.info.run_id,
        status,
        start_time: millis_to_time(run.info.start_time).unwrap_or_default(),
        end_time: millis_to_time(run.info.end_time),
        params: run.data.params.into_iter().map(|p| (p.key, p.value)).collect(),
        metrics: run.data.metrics.into_iter().map(|m| (m.key, m.value)).collect(),
        artifacts,
        inference: inference_from_tags(&tags),
    })
}

impl TrackingStore for MlflowTrackingStore {
    fn start_run(&self, run_name: &str) -> Result<String> {
        let envelope: RunEnvelope = self.post(
            "runs/create",
            &json!({
                "experiment_id": self.experiment_id,
                "run_name": run_name,
                "start_time": now_millis(),
                "tags": [{ "key": RUN_NAME_TAG, "value": run_name }],
            }),
        )?;
        Ok(envelope.run.info.run_id)
    }

    fn log_params(&self, run_id: &str, params: &RunParameters) -> Result<()> {
        let params: Vec<KeyValue> = params
            .to_strings()
            .into_iter()
            .map(|(key, value)| KeyValue { key, value })
            .collect();
        for chunk in params.chunks(PARAM_BATCH) {
            self.log_batch(run_id, json!({ "params": chunk }))?;
        }
        Ok(())
    }

    fn log_metrics(&self, run_id: &str, metrics: &RunMetrics) -> Result<()> {
        let timestamp = now_millis();
        let metrics: Vec<serde_json::Value> = metrics
            .flatten()
            .into_iter()
            .map(|(key, value)| json!({ "key": key, "value": value, "timestamp": timestamp, "step": 0 }))
            .collect();
        self.log_batch(run_id, json!({ "metrics": metrics }))
    }

    fn log_model(&self, run_id: &str, artifact_path: &str, pipeline: &Pipeline) -> Result<String> {
        let body = pipeline.to_json()?;
        let response = self
            .client
            .put(self.artifact_url(run_id, artifact_path))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .map_err(|e| store_error("artifact upload", e))?;
        if !response.status().is_success() {
            return Err(ExperimentError::TrackingStore(
                api_failure(response, "artifact upload").1,
            ));
        }

        let location = format!("{RUNS_SCHEME}{run_id}/{artifact_path}");
        self.set_tag(run_id, &format!("{ARTIFACT_TAG_PREFIX}{artifact_path}"), &location)?;
        Ok(location)
    }

    fn end_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        let _: serde_json::Value = self.post(
            "runs/update",
            &json!({ "run_id": run_id, "status": status.as_str(), "end_time": now_millis() }),
        )?;
        Ok(())
    }

    fn set_run_inference_info(&self, run_id: &str, info: &InferenceInfo) -> Result<()> {
        let labels = serde_json::to_string(&info.class_labels)?;
        self.set_tag(run_id, TAG_PREDICTION_TYPE, info.prediction_type.as_str())?;
        self.set_tag(run_id, TAG_CLASS_LABELS, &labels)?;
        self.set_tag(run_id, TAG_ENVIRONMENT, &info.environment)?;
        self.set_tag(run_id, TAG_TARGET_COLUMN, &info.target_column)
    }

    fn get_run(&self, run_id: &str) -> Result<RunRecord> {
        let response = self
            .client
            .get(self.api_url("runs/get"))
            .query(&[("run_id", run_id)])
            .send()
            .map_err(|e| store_error("runs/get", e))?;
        if !response.status().is_success() {
            return Err(ExperimentError::TrackingStore(api_failure(response, "runs/get").1));
        }
        let envelope: RunEnvelope = decode(response, "runs/get")?;
        record_from_run(envelope.run)
    }

    fn load_model(&self, location: &str) -> Result<Pipeline> {
        let (run_id, artifact_path) = parse_location(location).ok_or_else(|| {
            ExperimentError::TrackingStore(format!("not a run artifact location: '{location}'"))
        })?;
        let response = self
            .client
            .get(self.artifact_url(run_id, artifact_path))
            .send()
            .map_err(|e| store_error("artifact download", e))?;
        if !response.status().is_success() {
            return Err(ExperimentError::TrackingStore(
                api_failure(response, "artifact download").1,
            ));
        }
        let text = response.text().map_err(|e| store_error("artifact download", e))?;
        Ok(Pipeline::from_json(&text)?)
    }
}

static_assertions::assert_impl_all!(MlflowTrackingStore: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::RunState;

    #[test]
    fn test_parse_location() {
        assert_eq!(
            parse_location("runs:/abc/random_forest-abc"),
            Some(("abc", "random_forest-abc"))
        );
        assert_eq!(parse_location("memory://abc/x"), None);
        assert_eq!(parse_location("runs:/abc"), None);
    }

    #[test]
    fn test_record_from_run() {
        let json = r#"{
            "run": {
                "info": {"run_id": "abc", "status": "FINISHED", "start_time": 1704067200000, "end_time": 1704067260000},
                "data": {
                    "metrics": [{"key": "roc_auc_mean", "value": 0.8}],
                    "params": [{"key": "cv_folds", "value": "5"}],
                    "tags": [
                        {"key": "mlflow.runName", "value": "run-20240101000000"},
                        {"key": "lex.artifact.random_forest-abc", "value": "runs:/abc/random_forest-abc"},
                        {"key": "inference.prediction_type", "value": "BINARY_CLASSIFICATION"},
                        {"key": "inference.class_labels", "value": "[\"0.0\",\"1.0\"]"},
                        {"key": "inference.environment", "value": "python-3.10"},
                        {"key": "inference.target_column", "value": "added_product"}
                    ]
                }
            }
        }"#;
        let envelope: RunEnvelope = serde_json::from_str(json).unwrap();
        let record = record_from_run(envelope.run).unwrap();

        assert_eq!(record.run_name, "run-20240101000000");
        assert_eq!(record.metrics["roc_auc_mean"], 0.8);
        assert_eq!(record.params["cv_folds"], "5");
        assert_eq!(record.artifacts.len(), 1);
        assert_eq!(record.artifacts[0].artifact_path, "random_forest-abc");
        assert_eq!(record.state(), RunState::PromotionAnnotated);
        let info = record.inference.unwrap();
        assert_eq!(info.class_labels, vec!["0.0", "1.0"]);
        assert_eq!(record.end_time.unwrap().timestamp(), 1704067260);
    }

    #[test]
    fn test_partial_inference_tags_are_ignored() {
        let mut tags = BTreeMap::new();
        tags.insert(TAG_PREDICTION_TYPE.to_string(), "BINARY_CLASSIFICATION".to_string());
        assert_eq!(inference_from_tags(&tags), None);
    }

    #[test]
    fn test_connect_unreachable_server() {
        let config = MlflowConfig::new("http://127.0.0.1:9").timeout_secs(2);
        let err = MlflowTrackingStore::connect(config).unwrap_err();
        assert_eq!(err.error_code(), "TRACKING_STORE_ERROR");
    }
}
