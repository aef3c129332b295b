//! Promotion metadata for logged runs.

use tracing::info;

use crate::error::{ExperimentError, Result};
use crate::tracking::{InferenceInfo, RunStatus, TrackingStore};

/// Attach inference metadata to a logged run so a registry can promote its
/// model. Writes metadata only; no model version is created.
///
/// # Errors
///
/// Returns [`ExperimentError::Metadata`] if the run is unknown, is not
/// `FINISHED`, or the store rejects the write. A failure leaves the run
/// logged without metadata.
pub fn annotate_for_promotion(
    store: &dyn TrackingStore,
    run_id: &str,
    info: &InferenceInfo,
) -> Result<()> {
    let record = store
        .get_run(run_id)
        .map_err(|e| ExperimentError::Metadata(format!("unknown run '{run_id}': {e}")))?;

    if record.status != RunStatus::Finished {
        return Err(ExperimentError::Metadata(format!(
            "run '{run_id}' is {}; only finished runs can be annotated",
            record.status
        )));
    }
    if info.class_labels.is_empty() {
        return Err(ExperimentError::Metadata(
            "class labels must not be empty".to_string(),
        ));
    }

    store
        .set_run_inference_info(run_id, info)
        .map_err(|e| ExperimentError::Metadata(format!("failed to annotate run '{run_id}': {e}")))?;

    info!(
        run_id,
        prediction_type = info.prediction_type.as_str(),
        environment = %info.environment,
        target = %info.target_column,
        "Run annotated for promotion"
    );
    Ok(())
}
