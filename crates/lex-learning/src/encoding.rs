//! Feature extraction and the column preprocessor.
//!
//! Categorical columns are one-hot encoded against the categories seen during
//! fit; numerical columns pass through as `f64`. The result is a dense
//! [`Array2<f64>`] with the one-hot block first.

use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{LexLearningError, Result};

/// Feature columns pulled out of a DataFrame, in configured order.
///
/// Extraction happens once per dataset; cross-validation folds are cheap row
/// subsets of the same frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    categorical: Vec<Vec<Option<String>>>,
    numerical: Vec<Vec<f64>>,
    n_rows: usize,
}

impl FeatureFrame {
    /// Read the named columns from `df`.
    ///
    /// Categorical values are cast to strings; numerical values are cast to
    /// `f64`.
    ///
    /// # Errors
    ///
    /// - [`LexLearningError::ColumnNotFound`] for a missing column
    /// - [`LexLearningError::InvalidData`] for nulls or NaN in a numerical column,
    ///   or a numerical column that cannot be cast
    pub fn extract(df: &DataFrame, categorical: &[String], numerical: &[String]) -> Result<Self> {
        let column = |name: &str| {
            df.column(name)
                .map(Column::as_materialized_series)
                .map_err(|_| LexLearningError::ColumnNotFound(name.to_string()))
        };

        let categorical = categorical
            .iter()
            .map(|name| {
                let strings = column(name)?.cast(&DataType::String)?;
                Ok(strings
                    .str()?
                    .into_iter()
                    .map(|v| v.map(str::to_string))
                    .collect())
            })
            .collect::<Result<Vec<Vec<Option<String>>>>>()?;

        let numerical = numerical
            .iter()
            .map(|name| {
                let series = column(name)?;
                let floats = series.cast(&DataType::Float64).map_err(|e| {
                    LexLearningError::InvalidData(format!(
                        "numerical column '{name}' ({}) cannot be read as numbers: {e}",
                        series.dtype()
                    ))
                })?;
                floats
                    .f64()?
                    .into_iter()
                    .map(|v| match v {
                        Some(x) if x.is_finite() => Ok(x),
                        _ => Err(LexLearningError::InvalidData(format!(
                            "numerical column '{name}' contains null, NaN or infinite values"
                        ))),
                    })
                    .collect::<Result<Vec<f64>>>()
            })
            .collect::<Result<Vec<Vec<f64>>>>()?;

        Ok(Self {
            categorical,
            numerical,
            n_rows: df.height(),
        })
    }

    /// Number of rows.
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Rows at `indices`, in the given order.
    #[must_use]
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            categorical: self
                .categorical
                .iter()
                .map(|col| indices.iter().map(|&i| col[i].clone()).collect())
                .collect(),
            numerical: self
                .numerical
                .iter()
                .map(|col| indices.iter().map(|&i| col[i]).collect())
                .collect(),
            n_rows: indices.len(),
        }
    }
}

/// One-hot encoder over sorted distinct categories.
///
/// Unseen categories and nulls encode to all zeros.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OneHotEncoder {
    categories: Vec<Vec<String>>,
}

impl OneHotEncoder {
    /// Learn the categories of each column.
    #[must_use]
    pub fn fit(columns: &[Vec<Option<String>>]) -> Self {
        let categories = columns
            .iter()
            .map(|col| {
                let mut distinct: Vec<String> = col.iter().flatten().cloned().collect();
                distinct.sort_unstable();
                distinct.dedup();
                distinct
            })
            .collect();
        Self { categories }
    }

    /// Learned categories per column.
    #[must_use]
    pub fn categories(&self) -> &[Vec<String>] {
        &self.categories
    }

    /// Total number of one-hot outputs.
    #[must_use]
    pub fn n_outputs(&self) -> usize {
        self.categories.iter().map(Vec::len).sum()
    }

    /// Output position of `value` within column `col`'s block.
    fn position(&self, col: usize, value: Option<&str>) -> Option<usize> {
        let value = value?;
        self.categories[col]
            .binary_search_by(|c| c.as_str().cmp(value))
            .ok()
    }
}

/// Column transformer: one-hot encoding for categorical columns, passthrough
/// for numerical columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    categorical_columns: Vec<String>,
    numerical_columns: Vec<String>,
    encoder: Option<OneHotEncoder>,
}

impl Preprocessor {
    /// Unfitted preprocessor for the given columns.
    #[must_use]
    pub fn new(categorical_columns: Vec<String>, numerical_columns: Vec<String>) -> Self {
        Self {
            categorical_columns,
            numerical_columns,
            encoder: None,
        }
    }

    /// Categorical input columns.
    #[must_use]
    pub fn categorical_columns(&self) -> &[String] {
        &self.categorical_columns
    }

    /// Numerical input columns.
    #[must_use]
    pub fn numerical_columns(&self) -> &[String] {
        &self.numerical_columns
    }

    /// Returns `true` once categories have been learned.
    #[must_use]
    pub fn is_fitted(&self) -> bool {
        self.encoder.is_some()
    }

    /// Same columns, no learned state.
    #[must_use]
    pub fn unfitted(&self) -> Self {
        Self::new(self.categorical_columns.clone(), self.numerical_columns.clone())
    }

    /// Extract this preprocessor's columns from a DataFrame.
    ///
    /// # Errors
    ///
    /// See [`FeatureFrame::extract`].
    pub fn extract(&self, df: &DataFrame) -> Result<FeatureFrame> {
        FeatureFrame::extract(df, &self.categorical_columns, &self.numerical_columns)
    }

    /// Learn categories from `frame`.
    pub fn fit(&mut self, frame: &FeatureFrame) {
        self.encoder = Some(OneHotEncoder::fit(&frame.categorical));
    }

    /// Encode `frame` into a dense design matrix.
    ///
    /// # Errors
    ///
    /// Returns [`LexLearningError::NotFitted`] before [`fit`](Self::fit).
    pub fn transform(&self, frame: &FeatureFrame) -> Result<Array2<f64>> {
        let encoder = self.encoder.as_ref().ok_or(LexLearningError::NotFitted)?;
        let n_onehot = encoder.n_outputs();
        let mut x = Array2::<f64>::zeros((frame.n_rows, n_onehot + frame.numerical.len()));

        let mut offset = 0;
        for (col, values) in frame.categorical.iter().enumerate() {
            for (row, value) in values.iter().enumerate() {
                if let Some(pos) = encoder.position(col, value.as_deref()) {
                    x[[row, offset + pos]] = 1.0;
                }
            }
            offset += encoder.categories[col].len();
        }

        for (j, values) in frame.numerical.iter().enumerate() {
            for (row, value) in values.iter().enumerate() {
                x[[row, n_onehot + j]] = *value;
            }
        }
        Ok(x)
    }

    /// Output feature names: `<column>_<category>` for the one-hot block, then
    /// the numerical column names.
    ///
    /// # Errors
    ///
    /// Returns [`LexLearningError::NotFitted`] before [`fit`](Self::fit).
    pub fn feature_names(&self) -> Result<Vec<String>> {
        let encoder = self.encoder.as_ref().ok_or(LexLearningError::NotFitted)?;
        let onehot = self
            .categorical_columns
            .iter()
            .zip(&encoder.categories)
            .flat_map(|(col, cats)| cats.iter().map(move |cat| format!("{col}_{cat}")));
        Ok(onehot.chain(self.numerical_columns.iter().cloned()).collect())
    }
}
