//! Fano-factor based highly variable gene detection
//!
//! The expected Fano factor of a gene is modelled as `A^2 * mean + B^2`:
//! `A` is the smallest coefficient of variation among the 20 most expressed
//! genes, and `B^2` the median Fano factor of a winsorized core of genes
//! (10th-90th percentile in both mean and Fano factor).

use ndarray::Axis;
use serde::{Deserialize, Serialize};

use crate::data::{ExpressionMatrix, MatrixStats};
use crate::stats::{argsort_descending, median, nan_std, quantile};

/// Genes used to estimate the CV floor `A`
const N_TOP_MEAN_GENES: usize = 20;

/// Configurable parameters for Fano selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanoParams {
    /// Manual Fano-ratio threshold; `1 + std(fano in core)` when unset
    pub expected_fano_threshold: Option<f64>,
    /// Select exactly this many genes by Fano ratio instead of thresholding
    pub numgenes: Option<usize>,
    pub minimal_mean: f64,
}

impl Default for FanoParams {
    fn default() -> Self {
        Self {
            expected_fano_threshold: None,
            numgenes: None,
            minimal_mean: 0.5,
        }
    }
}

/// Per-gene statistics from [`get_highvar_genes_sparse`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoStats {
    pub mean: Vec<f64>,
    pub var: Vec<f64>,
    pub fano: Vec<f64>,
    pub expected_fano: Vec<f64>,
    pub high_var: Vec<bool>,
    pub fano_ratio: Vec<f64>,
}

/// Fitted parameters of the expected-Fano line
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FanoParameters {
    pub a: f64,
    pub b: f64,
    /// Threshold used, `None` when selecting a fixed number of genes
    pub t: Option<f64>,
    pub minimal_mean: f64,
}

/// Find highly variable genes from sparse-safe first and second moments
pub fn get_highvar_genes_sparse(matrix: &ExpressionMatrix, params: &FanoParams) -> (FanoStats, FanoParameters) {
    let mean = matrix.mean(Axis(0)).to_vec();
    let var = matrix.variance(Axis(0)).to_vec();
    let fano: Vec<f64> = mean.iter().zip(var.iter()).map(|(m, v)| v / m).collect();

    let a = argsort_descending(&mean)
        .into_iter()
        .take(N_TOP_MEAN_GENES)
        .map(|g| var[g].sqrt() / mean[g])
        .filter(|cv| !cv.is_nan())
        .fold(f64::NAN, f64::min);

    let (mean_lo, mean_hi) = (quantile(&mean, 0.10), quantile(&mean, 0.90));
    let (fano_lo, fano_hi) = (quantile(&fano, 0.10), quantile(&fano, 0.90));
    let core_fano: Vec<f64> = mean
        .iter()
        .zip(fano.iter())
        .filter(|(&m, &f)| f > fano_lo && f < fano_hi && m > mean_lo && m < mean_hi)
        .map(|(_, &f)| f)
        .collect();
    let b = median(&core_fano).sqrt();

    let expected_fano: Vec<f64> = mean.iter().map(|m| a * a * m + b * b).collect();
    let fano_ratio: Vec<f64> = fano.iter().zip(expected_fano.iter()).map(|(f, e)| f / e).collect();

    let n = mean.len();
    let (high_var, t) = match params.numgenes {
        Some(k) => {
            let mut mask = vec![false; n];
            for g in argsort_descending(&fano_ratio).into_iter().take(k.min(n)) {
                mask[g] = true;
            }
            (mask, None)
        }
        None => {
            let t = params
                .expected_fano_threshold
                .filter(|&t| t != 0.0)
                .unwrap_or_else(|| 1.0 + nan_std(&core_fano));
            let mask = fano_ratio
                .iter()
                .zip(mean.iter())
                .map(|(&r, &m)| r > t && m > params.minimal_mean)
                .collect();
            (mask, Some(t))
        }
    };

    log::debug!("expected fano line: A = {:.4}, B = {:.4}, T = {:?}", a, b, t);

    (
        FanoStats {
            mean,
            var,
            fano,
            expected_fano,
            high_var,
            fano_ratio,
        },
        FanoParameters {
            a,
            b,
            t,
            minimal_mean: params.minimal_mean,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::MersenneTwister;
    use ndarray::Array2;

    /// Poisson-like genes plus a few with inflated variance
    fn fixture(noisy: &[usize]) -> ExpressionMatrix {
        let mut rng = MersenneTwister::new(2024);
        let counts = Array2::from_shape_fn((300, 60), |(_, j)| {
            let mean = 1.0 + 0.5 * j as f64;
            let sd = if noisy.contains(&j) { 4.0 * mean.sqrt() + 3.0 } else { mean.sqrt() };
            (mean + sd * rng.standard_normal()).max(0.0)
        });
        ExpressionMatrix::Dense(counts)
    }

    #[test]
    fn test_numgenes_selects_noisy_genes() {
        let noisy = [7, 21, 33, 48];
        let m = fixture(&noisy);
        let params = FanoParams {
            numgenes: Some(4),
            ..Default::default()
        };
        let (stats, fit) = get_highvar_genes_sparse(&m, &params);
        assert!(fit.t.is_none());
        assert!(fit.a > 0.0 && fit.b > 0.0);
        let picked: Vec<usize> = (0..60).filter(|&g| stats.high_var[g]).collect();
        assert_eq!(picked, noisy.to_vec());
    }

    #[test]
    fn test_threshold_mode_respects_minimal_mean() {
        let m = fixture(&[30]);
        let params = FanoParams {
            minimal_mean: 1e6,
            ..Default::default()
        };
        let (stats, fit) = get_highvar_genes_sparse(&m, &params);
        assert!(fit.t.unwrap() > 1.0);
        assert!(stats.high_var.iter().all(|&h| !h));
    }

    #[test]
    fn test_zero_gene_does_not_panic() {
        let mut counts = Array2::from_elem((10, 5), 2.0);
        counts[[3, 1]] = 6.0;
        counts.column_mut(4).fill(0.0);
        let (stats, _) = get_highvar_genes_sparse(&ExpressionMatrix::Dense(counts), &FanoParams::default());
        assert!(stats.fano[4].is_nan());
        assert!(!stats.high_var[4]);
    }
}
