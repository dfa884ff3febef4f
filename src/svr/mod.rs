//! Epsilon support vector regression with an RBF kernel
//!
//! One-dimensional inputs only: the gene selectors regress a dispersion
//! statistic on log mean expression.

mod smo;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScError};

/// Configurable parameters for SVR fitting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SvrParams {
    /// Box constraint
    pub c: f64,
    /// Half-width of the insensitive tube
    pub epsilon: f64,
    /// RBF kernel coefficient; `150 / n_samples` when unset
    pub gamma: Option<f64>,
    /// KKT violation tolerance
    pub tol: f64,
    /// Cap on SMO iterations (at least `100 * n_samples` are always allowed)
    pub max_iter: usize,
}

impl Default for SvrParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            epsilon: 0.1,
            gamma: None,
            tol: 1e-3,
            max_iter: 10_000_000,
        }
    }
}

impl SvrParams {
    /// Kernel coefficient used for `n` training samples
    pub fn gamma_for(&self, n: usize) -> f64 {
        self.gamma.unwrap_or(150.0 / n.max(1) as f64)
    }
}

/// A fitted regression function `f(x) = sum_i coef_i K(x_i, x) - rho`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportVectorRegression {
    support: Vec<f64>,
    coef: Vec<f64>,
    rho: f64,
    gamma: f64,
    pub converged: bool,
}

fn rbf(gamma: f64, a: f64, b: f64) -> f64 {
    let d = a - b;
    (-gamma * d * d).exp()
}

impl SupportVectorRegression {
    /// Fit `y ~ f(x)`
    pub fn fit(x: &[f64], y: &[f64], params: &SvrParams) -> Result<Self> {
        if x.len() != y.len() {
            return Err(ScError::DimensionMismatch {
                expected: format!("{} targets", x.len()),
                got: format!("{} targets", y.len()),
            });
        }
        if x.is_empty() {
            return Err(ScError::RegressionFailed {
                reason: "no training samples".to_string(),
            });
        }
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(ScError::RegressionFailed {
                reason: "training data contains non-finite values".to_string(),
            });
        }

        let gamma = params.gamma_for(x.len());
        let kernel = |i: usize, j: usize| rbf(gamma, x[i], x[j]);
        let max_iter = params.max_iter.max(100 * x.len());
        let solution = smo::solve_epsilon_svr(y, &kernel, params.c, params.epsilon, params.tol, max_iter);

        if !solution.converged {
            log::warn!("SVR solver reached {} iterations without converging", solution.iterations);
        } else {
            log::debug!("SVR converged after {} iterations", solution.iterations);
        }

        // keep support vectors only
        let (support, coef): (Vec<f64>, Vec<f64>) = x
            .iter()
            .zip(solution.coef.iter())
            .filter(|(_, &c)| c != 0.0)
            .map(|(&xi, &c)| (xi, c))
            .unzip();

        Ok(Self {
            support,
            coef,
            rho: solution.rho,
            gamma,
            converged: solution.converged,
        })
    }

    pub fn predict(&self, x: f64) -> f64 {
        self.support
            .iter()
            .zip(self.coef.iter())
            .map(|(&s, &c)| c * rbf(self.gamma, s, x))
            .sum::<f64>()
            - self.rho
    }

    pub fn n_support(&self) -> usize {
        self.support.len()
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }
}
