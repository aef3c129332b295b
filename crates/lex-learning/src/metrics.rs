//! Binary classification scoring.
//!
//! Scores are computed from true labels and positive-class probabilities.
//! Hard predictions use a 0.5 threshold. Ratios with a zero denominator score 0.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LexLearningError, Result};

/// Decision threshold applied to positive-class probabilities.
pub const DECISION_THRESHOLD: f64 = 0.5;

/// A cross-validation scoring metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Metric {
    /// Fraction of correct predictions.
    Accuracy,
    /// Precision of the positive class.
    Precision,
    /// Recall of the positive class.
    Recall,
    /// F1 of the positive class.
    F1,
    /// Unweighted mean of per-class F1.
    F1Macro,
    /// Area under the ROC curve.
    RocAuc,
}

impl Metric {
    /// Every supported metric.
    pub const ALL: [Metric; 6] = [
        Metric::Accuracy,
        Metric::Precision,
        Metric::Recall,
        Metric::F1,
        Metric::F1Macro,
        Metric::RocAuc,
    ];

    /// Canonical metric name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Accuracy => "accuracy",
            Metric::Precision => "precision",
            Metric::Recall => "recall",
            Metric::F1 => "f1",
            Metric::F1Macro => "f1_macro",
            Metric::RocAuc => "roc_auc",
        }
    }

    /// Score predictions against true labels.
    ///
    /// # Errors
    ///
    /// Returns [`LexLearningError::InvalidData`] when the slices are empty or of
    /// different lengths, or for [`Metric::RocAuc`] when `y_true` holds one class.
    pub fn score(&self, y_true: &[f64], proba: &[f64]) -> Result<f64> {
        if y_true.len() != proba.len() {
            return Err(LexLearningError::InvalidData(format!(
                "cannot score {} predictions against {} labels",
                proba.len(),
                y_true.len()
            )));
        }
        if y_true.is_empty() {
            return Err(LexLearningError::InvalidData(
                "cannot score an empty fold".to_string(),
            ));
        }

        let counts = Confusion::from_predictions(y_true, proba);
        Ok(match self {
            Metric::Accuracy => ratio(counts.tp + counts.tn, counts.total()),
            Metric::Precision => counts.precision(),
            Metric::Recall => counts.recall(),
            Metric::F1 => counts.f1(),
            Metric::F1Macro => (counts.f1() + counts.inverted().f1()) / 2.0,
            Metric::RocAuc => roc_auc(y_true, proba)?,
        })
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = LexLearningError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Metric::ALL
            .into_iter()
            .find(|m| m.as_str() == normalized)
            .ok_or_else(|| {
                LexLearningError::InvalidConfig(format!(
                    "unknown metric '{s}'; expected one of: {}",
                    Metric::ALL.map(|m| m.as_str()).join(", ")
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Confusion {
    tp: usize,
    fp: usize,
    tn: usize,
    fn_: usize,
}

impl Confusion {
    fn from_predictions(y_true: &[f64], proba: &[f64]) -> Self {
        let mut counts = Confusion::default();
        for (&truth, &p) in y_true.iter().zip(proba) {
            match (truth == 1.0, p >= DECISION_THRESHOLD) {
                (true, true) => counts.tp += 1,
                (false, true) => counts.fp += 1,
                (false, false) => counts.tn += 1,
                (true, false) => counts.fn_ += 1,
            }
        }
        counts
    }

    fn total(&self) -> usize {
        self.tp + self.fp + self.tn + self.fn_
    }

    /// Same counts with the negative class treated as positive.
    fn inverted(&self) -> Self {
        Confusion {
            tp: self.tn,
            fp: self.fn_,
            tn: self.tp,
            fn_: self.fp,
        }
    }

    fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    fn f1(&self) -> f64 {
        ratio(2 * self.tp, 2 * self.tp + self.fp + self.fn_)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Rank-sum (Mann-Whitney) AUC with average ranks for ties.
fn roc_auc(y_true: &[f64], proba: &[f64]) -> Result<f64> {
    let n_pos = y_true.iter().filter(|y| **y == 1.0).count();
    let n_neg = y_true.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(LexLearningError::InvalidData(
            "roc_auc is undefined when only one class is present in y_true".to_string(),
        ));
    }

    let mut order: Vec<usize> = (0..proba.len()).collect();
    order.sort_by(|&a, &b| proba[a].total_cmp(&proba[b]));

    let mut rank_sum_pos = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end + 1 < order.len() && proba[order[end + 1]] == proba[order[start]] {
            end += 1;
        }
        // ranks are 1-based; tied block shares the mean rank
        let avg_rank = (start + end) as f64 / 2.0 + 1.0;
        for &idx in &order[start..=end] {
            if y_true[idx] == 1.0 {
                rank_sum_pos += avg_rank;
            }
        }
        start = end + 1;
    }

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Ok((rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}
