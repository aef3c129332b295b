//! L2-regularized logistic regression trained with batch gradient descent.
//!
//! Features are standardized internally with the training mean and standard
//! deviation; constant columns keep a scale of 1.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LexLearningError, Result};

/// Logistic regression hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    /// Gradient descent step size.
    pub learning_rate: f64,
    /// Maximum number of iterations.
    pub max_iter: usize,
    /// L2 penalty strength (not applied to the intercept).
    pub l2: f64,
    /// Stop once the largest gradient component falls below this value.
    pub tol: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            max_iter: 1000,
            l2: 0.01,
            tol: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FittedLogistic {
    means: Vec<f64>,
    scales: Vec<f64>,
    weights: Vec<f64>,
    intercept: f64,
    n_iter: usize,
}

/// Binary logistic regression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    params: LogisticParams,
    fitted: Option<FittedLogistic>,
}

impl LogisticRegression {
    /// Create an unfitted model.
    #[must_use]
    pub fn new(params: LogisticParams) -> Self {
        Self {
            params,
            fitted: None,
        }
    }

    /// Hyperparameters.
    #[must_use]
    pub fn params(&self) -> &LogisticParams {
        &self.params
    }

    /// Returns `true` once [`fit`](Self::fit) has succeeded.
    #[must_use]
    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Iterations used by the last fit.
    #[must_use]
    pub fn n_iter(&self) -> Option<usize> {
        self.fitted.as_ref().map(|f| f.n_iter)
    }

    /// Fit the weights.
    ///
    /// # Errors
    ///
    /// Returns [`LexLearningError::InvalidData`] on empty input or mismatched
    /// lengths, and [`LexLearningError::TrainingFailed`] if the weights diverge.
    pub fn fit(&mut self, x: &Array2<f64>, y: &[f64]) -> Result<()> {
        let (n, d) = x.dim();
        if n == 0 || n != y.len() {
            return Err(LexLearningError::InvalidData(format!(
                "feature matrix has {n} rows but target has {}",
                y.len()
            )));
        }

        let means = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(d));
        let scales = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 1e-12 { s } else { 1.0 });
        let xs = (x - &means) / &scales;
        let y = Array1::from(y.to_vec());

        let mut weights = Array1::<f64>::zeros(d);
        let mut intercept = 0.0;
        let mut n_iter = self.params.max_iter;

        for iter in 0..self.params.max_iter {
            let proba = (xs.dot(&weights) + intercept).mapv(sigmoid);
            let error = &proba - &y;

            let grad_w = xs.t().dot(&error) / n as f64 + &weights * self.params.l2;
            let grad_b = error.sum() / n as f64;

            weights = weights - &grad_w * self.params.learning_rate;
            intercept -= self.params.learning_rate * grad_b;

            let max_grad = grad_w.iter().fold(grad_b.abs(), |acc, g| acc.max(g.abs()));
            if max_grad < self.params.tol {
                n_iter = iter + 1;
                break;
            }
        }

        if !intercept.is_finite() || weights.iter().any(|w| !w.is_finite()) {
            return Err(LexLearningError::TrainingFailed(
                "logistic regression weights diverged; lower the learning rate".to_string(),
            ));
        }

        debug!(n_iter, n_features = d, "Logistic regression fitted");
        self.fitted = Some(FittedLogistic {
            means: means.to_vec(),
            scales: scales.to_vec(),
            weights: weights.to_vec(),
            intercept,
            n_iter,
        });
        Ok(())
    }

    /// Positive-class probability for each row.
    ///
    /// # Errors
    ///
    /// Returns [`LexLearningError::NotFitted`] before fitting and
    /// [`LexLearningError::InvalidData`] on a feature-count mismatch.
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Vec<f64>> {
        let fitted = self.fitted.as_ref().ok_or(LexLearningError::NotFitted)?;
        if x.ncols() != fitted.weights.len() {
            return Err(LexLearningError::InvalidData(format!(
                "expected {} features, got {}",
                fitted.weights.len(),
                x.ncols()
            )));
        }
        let means = Array1::from(fitted.means.clone());
        let scales = Array1::from(fitted.scales.clone());
        let weights = Array1::from(fitted.weights.clone());
        let xs = (x - &means) / &scales;
        Ok((xs.dot(&weights) + fitted.intercept).mapv(sigmoid).to_vec())
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_logistic_learns_direction() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [7.0], [8.0], [9.0], [10.0]];
        let y = [0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        let mut model = LogisticRegression::new(LogisticParams::default());
        model.fit(&x, &y).unwrap();

        let proba = model.predict_proba(&array![[0.0], [10.0]]).unwrap();
        assert!(proba[0] < 0.2, "low end scored {}", proba[0]);
        assert!(proba[1] > 0.8, "high end scored {}", proba[1]);
    }

    #[test]
    fn test_constant_column_is_harmless() {
        let x = array![[1.0, 5.0], [2.0, 5.0], [8.0, 5.0], [9.0, 5.0]];
        let y = [0.0, 0.0, 1.0, 1.0];
        let mut model = LogisticRegression::new(LogisticParams::default());
        model.fit(&x, &y).unwrap();
        let proba = model.predict_proba(&x).unwrap();
        assert!(proba.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_not_fitted() {
        let model = LogisticRegression::new(LogisticParams::default());
        assert!(model.n_iter().is_none());
        assert!(matches!(
            model.predict_proba(&array![[1.0]]),
            Err(LexLearningError::NotFitted)
        ));
    }
}
