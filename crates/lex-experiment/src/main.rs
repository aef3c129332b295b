//! CLI entry point for experiment runs.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use dotenv::dotenv;
use lex_experiment::{
    CsvDatasetSource, ExperimentRunner, ExperimentSettings, FileTrackingStore, FolderProvider,
    InMemoryTrackingStore, LocalFolderProvider, RunOutcome, RunRequest, TrackingStore, parse_param,
};
use lex_learning::Algorithm;
use tracing::{debug, info, warn};

#[cfg(feature = "mlflow")]
use lex_experiment::{MlflowConfig, MlflowTrackingStore};

/// CLI-compatible algorithm enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliAlgorithm {
    /// Bagged decision trees
    RandomForest,
    /// A single CART tree
    DecisionTree,
    /// L2-regularized logistic regression
    LogisticRegression,
}

impl From<CliAlgorithm> for Algorithm {
    fn from(cli: CliAlgorithm) -> Self {
        match cli {
            CliAlgorithm::RandomForest => Algorithm::RandomForest,
            CliAlgorithm::DecisionTree => Algorithm::DecisionTree,
            CliAlgorithm::LogisticRegression => Algorithm::LogisticRegression,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    author = "Lex Machina Team",
    version,
    about = "Cross-validate a binary classifier and log it to an experiment tracker",
    long_about = "Loads a dataset, cross-validates a preprocessing + classifier pipeline, \
                  fits it on the full data, logs parameters, metrics and the model to a \
                  tracking store, and annotates the run for promotion.\n\n\
                  ENVIRONMENT VARIABLES:\n  \
                  MLFLOW_TRACKING_URI   MLflow server used when --tracking-uri is not given\n  \
                  LEX_DATA_DIR          Default directory holding <dataset>.csv files\n\n\
                  EXAMPLES:\n  \
                  # Log to a local folder\n  \
                  lex-experiment --dataset customers --target added_product \\\n      \
                  --categorical a,b --numerical x --storage-root ./store\n\n  \
                  # Settings from a file, one override\n  \
                  lex-experiment --config run.json --folds 10\n\n  \
                  # Machine-readable output\n  \
                  lex-experiment --config run.json --json | jq .metrics"
)]
struct Args {
    /// Dataset name; read from <data-dir>/<dataset>.csv
    #[arg(short, long)]
    dataset: Option<String>,

    /// Binary label column
    #[arg(short, long)]
    target: Option<String>,

    /// Categorical feature columns (comma separated)
    #[arg(long, value_delimiter = ',')]
    categorical: Vec<String>,

    /// Numerical feature columns (comma separated)
    #[arg(long, value_delimiter = ',')]
    numerical: Vec<String>,

    /// Classifier to fit
    #[arg(short, long, value_enum)]
    algorithm: Option<CliAlgorithm>,

    /// Hyperparameter override, name=value (repeatable)
    #[arg(short, long = "param")]
    params: Vec<String>,

    /// Number of stratified cross-validation folds
    #[arg(short, long)]
    folds: Option<usize>,

    /// Metric to compute (repeatable): accuracy, precision, recall, f1, f1_macro, roc_auc
    #[arg(short, long = "metric")]
    metrics: Vec<String>,

    /// Random seed for fold assignment and model fitting
    #[arg(long)]
    seed: Option<u64>,

    /// Directory holding dataset CSV files (default: $LEX_DATA_DIR or .)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Managed folder the file tracking store writes to
    #[arg(long, default_value = "mlruns")]
    folder: String,

    /// Connection the managed folder lives on
    #[arg(long, default_value = "filesystem_managed")]
    connection: String,

    /// Root directory for managed folders; enables the file tracking store
    #[arg(long)]
    storage_root: Option<PathBuf>,

    /// Tracking experiment name
    #[arg(short, long)]
    experiment: Option<String>,

    /// MLflow tracking server URL
    #[arg(long)]
    tracking_uri: Option<String>,

    /// Execution environment recorded for promotion
    #[arg(long)]
    environment: Option<String>,

    /// JSON settings file; flags given on the command line take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Suppress progress output (only show warnings and the final result)
    #[arg(short, long)]
    quiet: bool,

    /// Output the run outcome as JSON to stdout instead of a summary
    ///
    /// Disables all logs and progress output.
    #[arg(long)]
    json: bool,
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is completely disabled to ensure
/// only JSON is written to stdout.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    // .env first so RUST_LOG and the tracking variables can come from it
    dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level, args.quiet, args.json);

    let settings = load_settings(&args)?;
    let dataset = settings.dataset()?.to_string();
    let config = settings.run_config()?;
    debug!(?settings, "Settings resolved");

    let store = build_store(&args, settings.experiment())?;
    let data_dir = args
        .data_dir
        .clone()
        .or_else(|| env::var_os("LEX_DATA_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    info!(data_dir = %data_dir.display(), dataset = %dataset, "Dataset source");

    let mut builder = ExperimentRunner::builder()
        .source(Arc::new(CsvDatasetSource::new(data_dir)))
        .store(store);
    if !args.quiet && !args.json {
        builder = builder.on_progress(|update| {
            println!(
                "[{:>3.0}%] {}: {}",
                update.progress * 100.0,
                update.stage,
                update.message
            );
        });
    }
    let runner = builder.build()?;

    let request = RunRequest::new(dataset, config).environment(settings.environment());
    match runner.run(&request) {
        Ok(outcome) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_summary(&outcome);
            }
            Ok(())
        }
        Err(e) => {
            if args.json {
                println!("{}", serde_json::json!({ "error": &e }));
            }
            Err(anyhow!(e).context("Experiment run failed"))
        }
    }
}

/// Settings file (if any) overlaid with command-line flags.
fn load_settings(args: &Args) -> Result<ExperimentSettings> {
    let base = match &args.config {
        Some(path) => ExperimentSettings::from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => ExperimentSettings::default(),
    };

    let hyperparameters: BTreeMap<String, serde_json::Value> = args
        .params
        .iter()
        .map(|p| parse_param(p))
        .collect::<lex_experiment::Result<_>>()?;

    let flags = ExperimentSettings {
        dataset: args.dataset.clone(),
        target: args.target.clone(),
        categorical: args.categorical.clone(),
        numerical: args.numerical.clone(),
        algorithm: args
            .algorithm
            .map(|a| Algorithm::from(a).as_str().to_string()),
        hyperparameters,
        folds: args.folds,
        metrics: args.metrics.clone(),
        seed: args.seed,
        experiment: args.experiment.clone(),
        environment: args.environment.clone(),
    };
    Ok(base.merge(flags))
}

/// Pick the tracking backend: MLflow, then a managed folder, then memory.
fn build_store(args: &Args, experiment: &str) -> Result<Arc<dyn TrackingStore>> {
    let tracking_uri = args
        .tracking_uri
        .clone()
        .or_else(|| env::var("MLFLOW_TRACKING_URI").ok())
        .filter(|uri| !uri.trim().is_empty());

    if let Some(uri) = tracking_uri {
        return connect_mlflow(uri, experiment);
    }

    if let Some(root) = &args.storage_root {
        let folder = LocalFolderProvider::new(root).get_or_create(&args.folder, &args.connection)?;
        info!(path = %folder.path().display(), "Using file tracking store");
        return Ok(Arc::new(FileTrackingStore::in_folder(&folder, experiment)?));
    }

    warn!("No tracking backend configured; the run is kept in memory only");
    Ok(Arc::new(InMemoryTrackingStore::new()))
}

#[cfg(feature = "mlflow")]
fn connect_mlflow(uri: String, experiment: &str) -> Result<Arc<dyn TrackingStore>> {
    let store = MlflowTrackingStore::connect(MlflowConfig::new(uri).experiment(experiment))?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "mlflow"))]
fn connect_mlflow(uri: String, _experiment: &str) -> Result<Arc<dyn TrackingStore>> {
    Err(anyhow!(
        "MLflow support not compiled in (tracking URI {uri}); rebuild with --features mlflow"
    ))
}

/// Print a human-readable summary of the run.
fn print_summary(outcome: &RunOutcome) {
    println!();
    println!("{}", "=".repeat(80));
    println!("RUN COMPLETE");
    println!("{}", "=".repeat(80));
    println!();
    println!("Run:       {} ({})", outcome.run_name, outcome.run_id);
    println!("State:     {:?}", outcome.state);
    println!("Artifact:  {}", outcome.artifact_path);
    println!("Location:  {}", outcome.model_location);
    println!("Classes:   {}", outcome.class_labels.join(", "));
    println!();

    println!("{:<12} {:>8} {:>8}   Folds", "Metric", "Mean", "Std");
    println!("{}", "-".repeat(80));
    for (name, summary) in outcome.metrics.iter() {
        let folds: Vec<String> = summary
            .fold_scores
            .iter()
            .map(|s| format!("{s:.3}"))
            .collect();
        println!(
            "{:<12} {:>8.4} {:>8.4}   {}",
            name,
            summary.mean,
            summary.std,
            folds.join(" ")
        );
    }
    println!();
}
