//! Cook's distance outlier filtering
//!
//! Cook's distance measures the influence of each observation on the fitted
//! dispersion-mean curve. Observations with high distance are dropped before
//! the curve is refit.
//!
//! Formula: `cooks = PearsonResSq / (p * scale) * H / (1 - H)^2`

use crate::glm::GammaGlmFit;

/// Cook's distance of every observation of a Gamma GLM fit
///
/// Observations with leverage at or above 1 get an infinite distance.
pub fn calculate_cooks_distance(fit: &GammaGlmFit) -> Vec<f64> {
    let p = fit.n_params() as f64;
    let scale = if fit.scale > 0.0 { fit.scale } else { f64::MIN_POSITIVE };

    fit.pearson_residuals
        .iter()
        .zip(fit.hat_diagonals.iter())
        .map(|(&r, &h)| {
            if h >= 1.0 {
                return f64::INFINITY;
            }
            let one_minus_h = 1.0 - h;
            (r * r) / (p * scale) * h / (one_minus_h * one_minus_h)
        })
        .collect()
}

/// Default cutoff `4 / n` for `n` fitted observations
pub fn default_cooks_cutoff(n_obs: usize) -> f64 {
    if n_obs == 0 {
        f64::INFINITY
    } else {
        4.0 / n_obs as f64
    }
}

/// Mark observations whose Cook's distance exceeds the default cutoff
///
/// Non-finite distances (lost during fitting) are outliers too.
pub fn flag_outliers(fit: &GammaGlmFit) -> Vec<bool> {
    let cutoff = default_cooks_cutoff(fit.n_obs());
    calculate_cooks_distance(fit)
        .into_iter()
        .map(|d| !d.is_finite() || d > cutoff)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glm::{fit_gamma_identity, GlmFitParams};

    #[test]
    fn test_default_cooks_cutoff() {
        assert!((default_cooks_cutoff(40) - 0.1).abs() < 1e-12);
        assert!(default_cooks_cutoff(0).is_infinite());
    }

    #[test]
    fn test_gross_outlier_is_flagged() {
        let means: Vec<f64> = (1..=40).map(|i| i as f64 * 5.0).collect();
        let x: Vec<f64> = means.iter().map(|m| 1.0 / m).collect();
        let mut y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, &xi)| (0.05 + 2.0 * xi) * if i % 2 == 0 { 1.05 } else { 0.95 })
            .collect();
        // low-mean gene with a huge dispersion: high leverage and a large residual
        y[0] *= 30.0;

        let fit = fit_gamma_identity(&x, &y, [0.05, 2.0], &GlmFitParams::default()).unwrap();
        let cooks = calculate_cooks_distance(&fit);
        assert_eq!(cooks.len(), 40);
        assert!(cooks.iter().all(|d| *d >= 0.0));

        let outliers = flag_outliers(&fit);
        assert!(outliers[0], "planted outlier should exceed 4/n");
        assert!(outliers.iter().filter(|&&o| o).count() < 10);
    }
}
