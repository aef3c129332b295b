//! Random forest: bagged decision trees with per-split feature sub-sampling.

use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LexLearningError, Result};
use crate::tree::{DecisionTree, MaxFeatures, TreeParams};

/// Random forest hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    /// Number of trees.
    pub n_estimators: usize,
    /// Limits applied to every tree.
    pub tree: TreeParams,
    /// Draw a bootstrap sample per tree instead of using every row.
    pub bootstrap: bool,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            tree: TreeParams {
                max_features: MaxFeatures::Sqrt,
                ..TreeParams::default()
            },
            bootstrap: true,
        }
    }
}

/// Ensemble of [`DecisionTree`]s averaged into one probability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    seed: u64,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Create an unfitted forest.
    #[must_use]
    pub fn new(params: ForestParams, seed: u64) -> Self {
        Self {
            params,
            seed,
            trees: Vec::new(),
        }
    }

    /// Hyperparameters.
    #[must_use]
    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    /// Seed driving bootstrap sampling and tree seeds.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns `true` once every tree has been fit.
    #[must_use]
    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    /// Fit `n_estimators` trees.
    ///
    /// # Errors
    ///
    /// Returns [`LexLearningError::InvalidData`] if `x` is empty or its row count
    /// differs from `y`.
    pub fn fit(&mut self, x: &Array2<f64>, y: &[f64]) -> Result<()> {
        let n = x.nrows();
        if n == 0 {
            return Err(LexLearningError::InvalidData(
                "cannot fit a forest on zero rows".to_string(),
            ));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut trees = Vec::with_capacity(self.params.n_estimators);
        for _ in 0..self.params.n_estimators {
            let indices: Vec<usize> = if self.params.bootstrap {
                (0..n).map(|_| rng.gen_range(0..n)).collect()
            } else {
                (0..n).collect()
            };
            let mut tree = DecisionTree::new(self.params.tree.clone(), rng.r#gen::<u64>());
            tree.fit_rows(x, y, indices)?;
            trees.push(tree);
        }

        debug!(
            n_estimators = trees.len(),
            n_rows = n,
            n_features = x.ncols(),
            "Random forest fitted"
        );
        self.trees = trees;
        Ok(())
    }

    /// Mean of the trees' positive-class probabilities.
    ///
    /// # Errors
    ///
    /// Returns [`LexLearningError::NotFitted`] before fitting.
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Vec<f64>> {
        if self.trees.is_empty() {
            return Err(LexLearningError::NotFitted);
        }
        let mut total = vec![0.0; x.nrows()];
        for tree in &self.trees {
            for (acc, p) in total.iter_mut().zip(tree.predict_proba(x)?) {
                *acc += p;
            }
        }
        let n_trees = self.trees.len() as f64;
        Ok(total.into_iter().map(|sum| sum / n_trees).collect())
    }
}
