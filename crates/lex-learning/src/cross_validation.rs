//! Stratified k-fold cross-validation.
//!
//! Each class's rows are shuffled with a seeded RNG and dealt round-robin
//! across the folds, so every fold keeps roughly the overall class balance and
//! fold sizes differ by at most one.

use std::collections::BTreeMap;

use polars::prelude::DataFrame;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::error::{LexLearningError, Result};
use crate::metrics::Metric;
use crate::pipeline::Pipeline;
use crate::types::{CrossValidationReport, FoldResult, RunMetrics, Target};

/// Train/test row indices of one fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldSplit {
    /// Zero-based fold index.
    pub fold: usize,
    /// Rows to fit on, ascending.
    pub train_indices: Vec<usize>,
    /// Rows to score on, ascending.
    pub test_indices: Vec<usize>,
}

/// Stratified k-fold splitter.
///
/// # Example
///
/// ```
/// use lex_learning::StratifiedKFold;
///
/// let y = [0.0, 0.0, 0.0, 0.0, 1.0, 1.0];
/// let folds = StratifiedKFold::new(2, 42).split(&y)?;
/// assert_eq!(folds.len(), 2);
/// assert_eq!(folds[0].test_indices.len(), 3);
/// # Ok::<(), lex_learning::LexLearningError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StratifiedKFold {
    n_splits: usize,
    shuffle: bool,
    seed: u64,
}

impl StratifiedKFold {
    /// Shuffled splitter with `n_splits` folds.
    #[must_use]
    pub fn new(n_splits: usize, seed: u64) -> Self {
        Self {
            n_splits,
            shuffle: true,
            seed,
        }
    }

    /// Keep rows in their original order within each class.
    #[must_use]
    pub fn without_shuffle(mut self) -> Self {
        self.shuffle = false;
        self
    }

    /// Number of folds.
    #[must_use]
    pub fn n_splits(&self) -> usize {
        self.n_splits
    }

    /// Partition row indices into folds.
    ///
    /// Every row appears in exactly one test set.
    ///
    /// # Errors
    ///
    /// Returns [`LexLearningError::InvalidData`] if `n_splits < 2` or there are
    /// fewer rows than folds.
    pub fn split(&self, y: &[f64]) -> Result<Vec<FoldSplit>> {
        if self.n_splits < 2 {
            return Err(LexLearningError::InvalidData(format!(
                "n_splits must be at least 2, got {}",
                self.n_splits
            )));
        }
        if y.len() < self.n_splits {
            return Err(LexLearningError::InvalidData(format!(
                "cannot split {} rows into {} folds",
                y.len(),
                self.n_splits
            )));
        }

        let (mut negatives, mut positives): (Vec<usize>, Vec<usize>) =
            (0..y.len()).partition(|&i| y[i] != 1.0);

        if self.shuffle {
            let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
            negatives.shuffle(&mut rng);
            positives.shuffle(&mut rng);
        }

        let mut tests: Vec<Vec<usize>> = vec![Vec::new(); self.n_splits];
        for (position, row) in negatives.into_iter().chain(positives).enumerate() {
            tests[position % self.n_splits].push(row);
        }

        Ok(tests
            .into_iter()
            .enumerate()
            .map(|(fold, mut test_indices)| {
                test_indices.sort_unstable();
                let mut in_test = vec![false; y.len()];
                for &i in &test_indices {
                    in_test[i] = true;
                }
                let train_indices = (0..y.len()).filter(|&i| !in_test[i]).collect();
                FoldSplit {
                    fold,
                    train_indices,
                    test_indices,
                }
            })
            .collect())
    }
}

/// Fit a fresh copy of `pipeline` per fold and score the held-out rows.
///
/// `pipeline` itself is never fitted; each fold works on
/// [`Pipeline::unfitted`]. Features are extracted once and sliced per fold.
///
/// # Errors
///
/// - extraction errors for `features` (missing columns, bad numerical values)
/// - [`LexLearningError::InvalidData`] for fewer rows than folds, or a
///   row-count mismatch between `features` and `target`
/// - [`LexLearningError::TrainingFailed`] when a training fold holds a single
///   class; the message names the fold
pub fn cross_validate(
    pipeline: &Pipeline,
    features: &DataFrame,
    target: &Target,
    splitter: &StratifiedKFold,
    metrics: &[Metric],
) -> Result<CrossValidationReport> {
    let frame = pipeline.preprocessor().extract(features)?;
    if frame.n_rows() != target.len() {
        return Err(LexLearningError::InvalidData(format!(
            "features have {} rows but target has {}",
            frame.n_rows(),
            target.len()
        )));
    }

    let splits = splitter.split(target.values())?;
    let mut per_metric: BTreeMap<Metric, Vec<f64>> = BTreeMap::new();
    let mut folds = Vec::with_capacity(splits.len());

    for split in &splits {
        let mut model = pipeline.unfitted();
        let train_y = target.select(&split.train_indices);
        model
            .fit_frame(&frame.select(&split.train_indices), &train_y)
            .map_err(|e| e.in_fold(split.fold))?;

        let test_y = target.select(&split.test_indices);
        let proba = model
            .predict_proba_frame(&frame.select(&split.test_indices))
            .map_err(|e| e.in_fold(split.fold))?;

        let mut scores = BTreeMap::new();
        for metric in metrics {
            let score = metric
                .score(&test_y, &proba)
                .map_err(|e| e.in_fold(split.fold))?;
            per_metric.entry(*metric).or_default().push(score);
            scores.insert(metric.as_str().to_string(), score);
        }

        debug!(
            fold = split.fold,
            train = split.train_indices.len(),
            test = split.test_indices.len(),
            ?scores,
            "Fold scored"
        );
        folds.push(FoldResult {
            fold: split.fold,
            train_size: split.train_indices.len(),
            test_size: split.test_indices.len(),
            scores,
        });
    }

    let metrics = RunMetrics::from_fold_scores(&per_metric);
    info!(
        folds = folds.len(),
        metrics = ?metrics.flatten(),
        "Cross-validation complete"
    );
    Ok(CrossValidationReport { folds, metrics })
}
