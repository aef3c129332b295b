//! CART decision tree for binary classification.
//!
//! Splits minimize weighted Gini impurity. Leaves store the fraction of
//! positive samples, which is the tree's positive-class probability.

use ndarray::{Array2, ArrayView1};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{LexLearningError, Result};

/// Number of features considered at each split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    /// `ceil(sqrt(n_features))`
    Sqrt,
    /// `ceil(log2(n_features))`
    Log2,
    /// Every feature.
    All,
    /// A fraction in `(0, 1]` of the features, rounded up.
    Fraction(f64),
}

impl MaxFeatures {
    /// Resolve to a concrete feature count in `1..=n_features`.
    #[must_use]
    pub fn resolve(self, n_features: usize) -> usize {
        let n = n_features as f64;
        let k = match self {
            MaxFeatures::Sqrt => n.sqrt().ceil(),
            MaxFeatures::Log2 => n.log2().ceil(),
            MaxFeatures::All => n,
            MaxFeatures::Fraction(f) => (n * f).ceil(),
        };
        (k as usize).clamp(1, n_features.max(1))
    }

    /// Name used when logging the hyperparameter.
    #[must_use]
    pub fn label(self) -> String {
        match self {
            MaxFeatures::Sqrt => "sqrt".to_string(),
            MaxFeatures::Log2 => "log2".to_string(),
            MaxFeatures::All => "all".to_string(),
            MaxFeatures::Fraction(f) => f.to_string(),
        }
    }
}

/// Growth limits of a single tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    /// Maximum depth; `None` grows until leaves are pure.
    pub max_depth: Option<usize>,
    /// Minimum samples required to split a node.
    pub min_samples_split: usize,
    /// Minimum samples required in each child.
    pub min_samples_leaf: usize,
    /// Features considered per split.
    pub max_features: MaxFeatures,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
        }
    }
}

/// Node of the flattened tree; children are indices into the node list.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum TreeNode {
    Leaf {
        proba: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

enum Side {
    Left,
    Right,
}

/// A node waiting to be grown.
struct PendingNode {
    indices: Vec<usize>,
    depth: usize,
    parent: Option<(usize, Side)>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// A binary classification tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    params: TreeParams,
    seed: u64,
    n_features: usize,
    nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// Create an unfitted tree.
    #[must_use]
    pub fn new(params: TreeParams, seed: u64) -> Self {
        Self {
            params,
            seed,
            n_features: 0,
            nodes: Vec::new(),
        }
    }

    /// Growth limits.
    #[must_use]
    pub fn params(&self) -> &TreeParams {
        &self.params
    }

    /// Seed for feature sub-sampling.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns `true` once [`fit`](Self::fit) has succeeded.
    #[must_use]
    pub fn is_fitted(&self) -> bool {
        !self.nodes.is_empty()
    }

    /// Fit on every row of `x`.
    ///
    /// # Errors
    ///
    /// Returns [`LexLearningError::InvalidData`] if `x` is empty or its row count
    /// differs from `y`.
    pub fn fit(&mut self, x: &Array2<f64>, y: &[f64]) -> Result<()> {
        let indices: Vec<usize> = (0..x.nrows()).collect();
        self.fit_rows(x, y, indices)
    }

    /// Fit on a subset of rows (indices may repeat, as in a bootstrap sample).
    pub(crate) fn fit_rows(&mut self, x: &Array2<f64>, y: &[f64], indices: Vec<usize>) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(LexLearningError::InvalidData(format!(
                "feature matrix has {} rows but target has {}",
                x.nrows(),
                y.len()
            )));
        }
        if indices.is_empty() {
            return Err(LexLearningError::InvalidData(
                "cannot fit a tree on zero rows".to_string(),
            ));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut nodes = Vec::new();
        self.grow(&mut nodes, x, y, indices, &mut rng);
        self.n_features = x.ncols();
        self.nodes = nodes;
        Ok(())
    }

    /// Positive-class probability for each row.
    ///
    /// # Errors
    ///
    /// Returns [`LexLearningError::NotFitted`] before fitting and
    /// [`LexLearningError::InvalidData`] on a feature-count mismatch.
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Vec<f64>> {
        if self.nodes.is_empty() {
            return Err(LexLearningError::NotFitted);
        }
        if x.ncols() != self.n_features {
            return Err(LexLearningError::InvalidData(format!(
                "expected {} features, got {}",
                self.n_features,
                x.ncols()
            )));
        }
        Ok(x.rows().into_iter().map(|row| self.descend(row)).collect())
    }

    /// Depth of the fitted tree (a lone leaf has depth 0).
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = if self.nodes.is_empty() { Vec::new() } else { vec![(0, 0)] };
        while let Some((id, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            if let TreeNode::Split { left, right, .. } = &self.nodes[id] {
                stack.push((*left, depth + 1));
                stack.push((*right, depth + 1));
            }
        }
        deepest
    }

    /// Grow the tree for `indices` depth-first with an explicit work stack,
    /// so unbounded depth cannot exhaust the call stack.
    fn grow(
        &self,
        nodes: &mut Vec<TreeNode>,
        x: &Array2<f64>,
        y: &[f64],
        indices: Vec<usize>,
        rng: &mut ChaCha8Rng,
    ) {
        let mut pending = vec![PendingNode {
            indices,
            depth: 0,
            parent: None,
        }];

        while let Some(PendingNode {
            indices,
            depth,
            parent,
        }) = pending.pop()
        {
            let id = nodes.len();
            if let Some((parent_id, side)) = parent {
                if let TreeNode::Split { left, right, .. } = &mut nodes[parent_id] {
                    match side {
                        Side::Left => *left = id,
                        Side::Right => *right = id,
                    }
                }
            }

            let n = indices.len();
            let positives: f64 = indices.iter().map(|&i| y[i]).sum();
            let proba = positives / n as f64;

            let depth_reached = self.params.max_depth.is_some_and(|max| depth >= max);
            let pure = positives == 0.0 || positives == n as f64;
            let split = if depth_reached
                || pure
                || n < self.params.min_samples_split
                || n < 2 * self.params.min_samples_leaf
            {
                None
            } else {
                self.best_split(x, y, &indices, positives, rng)
            };

            let Some(split) = split else {
                nodes.push(TreeNode::Leaf { proba });
                continue;
            };

            let (left, right): (Vec<usize>, Vec<usize>) = indices
                .into_iter()
                .partition(|&i| x[[i, split.feature]] <= split.threshold);

            // children are patched in when they are popped
            nodes.push(TreeNode::Split {
                feature: split.feature,
                threshold: split.threshold,
                left: id,
                right: id,
            });
            // right first so the left subtree is grown first
            pending.push(PendingNode {
                indices: right,
                depth: depth + 1,
                parent: Some((id, Side::Right)),
            });
            pending.push(PendingNode {
                indices: left,
                depth: depth + 1,
                parent: Some((id, Side::Left)),
            });
        }
    }

    fn descend(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                TreeNode::Leaf { proba } => return *proba,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    fn best_split(
        &self,
        x: &Array2<f64>,
        y: &[f64],
        indices: &[usize],
        positives: f64,
        rng: &mut ChaCha8Rng,
    ) -> Option<SplitCandidate> {
        let n = indices.len();
        let n_features = x.ncols();
        let k = self.params.max_features.resolve(n_features);

        let mut features: Vec<usize> = (0..n_features).collect();
        let candidates: Vec<usize> = if k < n_features {
            let (chosen, _) = features.partial_shuffle(rng, k);
            chosen.to_vec()
        } else {
            features
        };

        let parent = gini(positives, n as f64);
        let min_leaf = self.params.min_samples_leaf;
        let mut best: Option<SplitCandidate> = None;
        let mut column: Vec<(f64, f64)> = Vec::with_capacity(n);

        for feature in candidates {
            column.clear();
            column.extend(indices.iter().map(|&i| (x[[i, feature]], y[i])));
            column.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_pos = 0.0;
            for w in 0..n - 1 {
                left_pos += column[w].1;
                if column[w].0 == column[w + 1].0 {
                    continue;
                }
                let left_n = w + 1;
                let right_n = n - left_n;
                if left_n < min_leaf || right_n < min_leaf {
                    continue;
                }

                let weighted = (left_n as f64 * gini(left_pos, left_n as f64)
                    + right_n as f64 * gini(positives - left_pos, right_n as f64))
                    / n as f64;
                let gain = parent - weighted;
                if gain > 1e-12 && best.as_ref().is_none_or(|b| gain > b.gain) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: (column[w].0 + column[w + 1].0) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }
}

fn gini(positives: f64, n: f64) -> f64 {
    let p = positives / n;
    1.0 - p * p - (1.0 - p) * (1.0 - p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_max_features_resolve() {
        assert_eq!(MaxFeatures::Sqrt.resolve(10), 4);
        assert_eq!(MaxFeatures::Log2.resolve(8), 3);
        assert_eq!(MaxFeatures::All.resolve(7), 7);
        assert_eq!(MaxFeatures::Fraction(0.5).resolve(5), 3);
        assert_eq!(MaxFeatures::Log2.resolve(1), 1);
    }

    #[test]
    fn test_tree_separates_threshold() {
        let x = array![[1.0], [2.0], [3.0], [10.0], [11.0], [12.0]];
        let y = [0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let mut tree = DecisionTree::new(TreeParams::default(), 0);
        tree.fit(&x, &y).unwrap();

        assert_eq!(tree.depth(), 1);
        let proba = tree.predict_proba(&array![[0.0], [6.0], [20.0]]).unwrap();
        assert_eq!(proba, vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_unbounded_depth_grows_to_purity() {
        // alternating labels need one leaf per row
        let n = 2000;
        let x = Array2::from_shape_fn((n, 1), |(i, _)| i as f64);
        let y: Vec<f64> = (0..n).map(|i| (i % 2) as f64).collect();
        let mut tree = DecisionTree::new(TreeParams::default(), 0);
        tree.fit(&x, &y).unwrap();

        assert!(tree.depth() >= 11);
        assert_eq!(tree.predict_proba(&x).unwrap(), y);
    }

    #[test]
    fn test_max_depth_limits_growth() {
        let x = array![[1.0, 0.0], [2.0, 1.0], [3.0, 0.0], [4.0, 1.0]];
        let y = [0.0, 1.0, 0.0, 1.0];
        let params = TreeParams {
            max_depth: Some(0),
            ..TreeParams::default()
        };
        let mut tree = DecisionTree::new(params, 0);
        tree.fit(&x, &y).unwrap();
        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.predict_proba(&x).unwrap(), vec![0.5; 4]);
    }

    #[test]
    fn test_min_samples_leaf_blocks_small_children() {
        let x = array![[1.0], [2.0], [3.0]];
        let y = [1.0, 0.0, 0.0];
        let params = TreeParams {
            min_samples_leaf: 2,
            ..TreeParams::default()
        };
        let mut tree = DecisionTree::new(params, 0);
        tree.fit(&x, &y).unwrap();
        assert_eq!(tree.depth(), 0);
    }

    #[test]
    fn test_predict_before_fit() {
        let tree = DecisionTree::new(TreeParams::default(), 0);
        let err = tree.predict_proba(&array![[1.0]]).unwrap_err();
        assert!(matches!(err, LexLearningError::NotFitted));
    }

    #[test]
    fn test_feature_count_mismatch() {
        let mut tree = DecisionTree::new(TreeParams::default(), 0);
        tree.fit(&array![[1.0], [2.0]], &[0.0, 1.0]).unwrap();
        assert!(tree.predict_proba(&array![[1.0, 2.0]]).is_err());
    }
}
