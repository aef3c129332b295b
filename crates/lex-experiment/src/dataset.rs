//! Dataset access: the [`DatasetSource`] port, its adapters, and the
//! loader/splitter steps of a run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use lex_learning::Target;
use parking_lot::RwLock;
use polars::prelude::*;
use tracing::{debug, info};

use crate::error::{ExperimentError, Result};

/// A named-table store the run reads its dataset from.
pub trait DatasetSource: Send + Sync {
    /// Fetch the table called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ExperimentError::DataAccess`] if the table is missing or unreadable.
    fn get_table(&self, name: &str) -> Result<DataFrame>;
}

/// Reads `<root>/<name>.csv` files with a header row.
#[derive(Debug, Clone)]
pub struct CsvDatasetSource {
    root: PathBuf,
}

impl CsvDatasetSource {
    /// Source rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the CSV files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Dataset names are plain file stems; anything that could leave `root` is refused.
    fn path_for(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(ExperimentError::DataAccess(format!(
                "invalid dataset name '{name}'"
            )));
        }
        Ok(self.root.join(format!("{name}.csv")))
    }
}

impl DatasetSource for CsvDatasetSource {
    fn get_table(&self, name: &str) -> Result<DataFrame> {
        let path = self.path_for(name)?;
        if !path.is_file() {
            return Err(ExperimentError::DataAccess(format!(
                "dataset '{name}' not found at {}",
                path.display()
            )));
        }

        CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.clone()))
            .and_then(|reader| reader.finish())
            .map_err(|e| {
                ExperimentError::DataAccess(format!(
                    "failed to read dataset '{name}' from {}: {e}",
                    path.display()
                ))
            })
    }
}

/// Holds tables in memory, keyed by name.
#[derive(Debug, Default)]
pub struct InMemoryDatasetSource {
    tables: RwLock<HashMap<String, DataFrame>>,
}

impl InMemoryDatasetSource {
    /// Empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with_table(self, name: impl Into<String>, df: DataFrame) -> Self {
        self.insert(name, df);
        self
    }

    /// Add or replace a table.
    pub fn insert(&self, name: impl Into<String>, df: DataFrame) {
        self.tables.write().insert(name.into(), df);
    }
}

impl DatasetSource for InMemoryDatasetSource {
    fn get_table(&self, name: &str) -> Result<DataFrame> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ExperimentError::DataAccess(format!("dataset '{name}' not found")))
    }
}

static_assertions::assert_impl_all!(CsvDatasetSource: Send, Sync);
static_assertions::assert_impl_all!(InMemoryDatasetSource: Send, Sync);

/// Load a dataset by name.
///
/// # Errors
///
/// Returns [`ExperimentError::DataAccess`] if the source cannot provide it.
pub fn load_dataset(source: &dyn DatasetSource, name: &str) -> Result<DataFrame> {
    let df = source.get_table(name)?;
    info!(
        dataset = name,
        rows = df.height(),
        columns = df.width(),
        "Dataset loaded"
    );
    Ok(df)
}

/// Split the label column off a dataset.
///
/// Returns the remaining columns and the decoded binary [`Target`].
///
/// # Errors
///
/// Returns [`ExperimentError::Schema`] if the column is absent or does not
/// hold binary labels.
pub fn split_target(df: &DataFrame, target_column: &str) -> Result<(DataFrame, Target)> {
    let column = df.column(target_column).map_err(|_| {
        ExperimentError::Schema(format!(
            "target column '{target_column}' not found; available columns: {}",
            df.get_column_names()
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    })?;
    let target = Target::from_column(column)?;
    let features = df.drop(target_column)?;

    let (negatives, positives) = target.class_counts();
    debug!(
        target = target_column,
        negatives,
        positives,
        features = features.width(),
        "Target split"
    );
    Ok((features, target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sample() -> DataFrame {
        df!(
            "a" => &["u", "v", "u"],
            "x" => &[1.0, 2.0, 3.0],
            "added_product" => &[0i64, 1, 0]
        )
        .unwrap()
    }

    #[test]
    fn test_in_memory_source() {
        let source = InMemoryDatasetSource::new().with_table("customers", sample());
        let df = load_dataset(&source, "customers").unwrap();
        assert_eq!(df.height(), 3);

        let err = load_dataset(&source, "missing").unwrap_err();
        assert_eq!(err.error_code(), "DATA_ACCESS_ERROR");
    }

    #[test]
    fn test_csv_source() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("customers.csv"), "a,x,added_product\nu,1.5,0\nv,2.5,1\n").unwrap();

        let source = CsvDatasetSource::new(dir.path());
        let df = source.get_table("customers").unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(df.width(), 3);

        let err = source.get_table("nope").unwrap_err();
        assert!(matches!(err, ExperimentError::DataAccess(_)));
    }

    #[test]
    fn test_csv_source_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        fs::create_dir(&data).unwrap();
        fs::write(dir.path().join("secret.csv"), "a,x\nu,1.0\n").unwrap();

        let source = CsvDatasetSource::new(&data);
        for name in ["../secret", "..", "", "sub/table", "sub\\table"] {
            let err = source.get_table(name).unwrap_err();
            assert_eq!(err.error_code(), "DATA_ACCESS_ERROR", "{name:?}");
            assert!(err.to_string().contains("invalid dataset name"), "{name:?}");
        }
    }

    #[test]
    fn test_split_target() {
        let (features, target) = split_target(&sample(), "added_product").unwrap();
        assert_eq!(features.height(), target.len());
        assert!(features.column("added_product").is_err());
        assert_eq!(target.values(), &[0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_split_target_missing_column() {
        let err = split_target(&sample(), "churned").unwrap_err();
        assert_eq!(err.error_code(), "SCHEMA_ERROR");
        assert!(err.to_string().contains("churned"));
    }

    #[test]
    fn test_split_target_non_binary() {
        let df = df!("x" => &[1.0, 2.0], "y" => &[3i64, 4]).unwrap();
        let err = split_target(&df, "y").unwrap_err();
        assert_eq!(err.error_code(), "SCHEMA_ERROR");
    }
}
