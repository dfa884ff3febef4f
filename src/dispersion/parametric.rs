//! Parametric dispersion fit: `disp = a + b / mu`
//!
//! Repeatedly keeps the genes whose residual `disp / (a + b/mu)` lies in
//! `(initial_a, 10000)` and refits a Gamma GLM on them, starting from the
//! previous coefficients.

use super::{DispersionRow, DispersionTable};
use crate::error::{Result, ScError};
use crate::glm::{fit_gamma_identity, GammaGlmFit, GlmFitParams};
use crate::progress::ProgressSink;

/// Upper residual bound for genes entering the fit
const MAX_RESIDUAL: f64 = 10000.0;

/// Refits allowed after the first before giving up
const MAX_REFITS: usize = 10;

/// Outcome of [`parametric_dispersion_fit`]
#[derive(Debug, Clone)]
pub struct ParametricFit {
    pub fit: GammaGlmFit,
    pub coefs: [f64; 2],
    /// Rows that entered the final GLM, aligned with `fit`
    pub good: DispersionTable,
    pub converged: bool,
}

fn good_rows(table: &DispersionTable, coefs: [f64; 2], initial_a: f64) -> Vec<DispersionRow> {
    table
        .rows
        .iter()
        .filter(|row| {
            let residual = row.disp / (coefs[0] + coefs[1] / row.mu);
            residual > initial_a && residual < MAX_RESIDUAL
        })
        .cloned()
        .collect()
}

/// Fit the dispersion-mean curve with residual-based gene filtering
///
/// The intercept is clamped to at least `initial_coefs[0]`. Negative or
/// non-positive coefficients and non-convergence are reported as warnings on
/// `sink`, never as errors.
pub fn parametric_dispersion_fit(
    table: &DispersionTable,
    initial_coefs: [f64; 2],
    glm_params: &GlmFitParams,
    sink: &dyn ProgressSink,
) -> Result<ParametricFit> {
    let initial_a = initial_coefs[0];
    let mut coefs = initial_coefs;
    let mut iter = 0;

    loop {
        let good = good_rows(table, coefs, initial_a);
        if good.len() < 2 {
            return Err(ScError::DispersionFitFailed {
                reason: format!(
                    "only {} genes have residuals in ({}, {}); try a different lower detection limit",
                    good.len(),
                    initial_a,
                    MAX_RESIDUAL
                ),
            });
        }

        let x: Vec<f64> = good.iter().map(|r| 1.0 / r.mu).collect();
        let y: Vec<f64> = good.iter().map(|r| r.disp).collect();
        let fit = fit_gamma_identity(&x, &y, coefs, glm_params)?;

        let old = coefs;
        coefs = fit.coefficients;
        if coefs[0] < initial_a {
            coefs[0] = initial_a;
        }
        if coefs[1] < 0.0 {
            sink.warning("Parametric dispersion fit may be failed.");
        }

        let change: f64 = coefs
            .iter()
            .zip(old.iter())
            .map(|(new, old)| (new / old).ln().powi(2))
            .sum();
        log::debug!(
            "dispersion fit iteration {}: a = {:.6e}, b = {:.6e}, change = {:.3e}",
            iter,
            coefs[0],
            coefs[1],
            change
        );

        if change < coefs[0] {
            return Ok(ParametricFit {
                fit,
                coefs,
                good: DispersionTable { rows: good },
                converged: true,
            });
        }

        iter += 1;
        if iter > MAX_REFITS {
            sink.warning("Dispersion fit didn't converge");
            return Ok(ParametricFit {
                fit,
                coefs,
                good: DispersionTable { rows: good },
                converged: false,
            });
        }
        if !coefs.iter().all(|&c| c > 0.0) {
            sink.warning("Parametric dispersion fit may be failed.");
        }
    }
}
