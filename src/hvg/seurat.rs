//! Seurat-style binned dispersion normalization
//!
//! Genes are binned by (log) mean expression; each gene's (log) dispersion is
//! z-scored against the other genes of its bin.

use ndarray::Axis;
use serde::{Deserialize, Serialize};

use crate::data::{ExpressionMatrix, MatrixStats};
use crate::progress::ProgressSink;
use crate::stats::{argsort_descending, nan_mean, nan_std};

/// Configurable parameters for Seurat dispersion selection.
/// Cutoff defaults are Seurat's.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeuratDispersionParams {
    pub n_bins: usize,
    /// log1p the mean and ln the dispersion before binning
    pub log_mean_and_dispersion: bool,
    pub min_disp: f64,
    /// Upper dispersion cutoff; unbounded when `None`
    pub max_disp: Option<f64>,
    pub min_mean: f64,
    pub max_mean: f64,
}

impl Default for SeuratDispersionParams {
    fn default() -> Self {
        Self {
            n_bins: 20,
            log_mean_and_dispersion: true,
            min_disp: 0.5,
            max_disp: None,
            min_mean: 0.0125,
            max_mean: 3.0,
        }
    }
}

/// Result of [`select_genes_by_seurat_dispersion`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeuratDispersionResult {
    /// Per-gene bin mean of dispersion (0 for single-gene bins)
    pub mean: Vec<f64>,
    /// Per-gene squared bin standard deviation of dispersion
    pub variance: Vec<f64>,
    pub dispersion_norm: Vec<f64>,
    pub mask: Vec<bool>,
}

/// Assign each value to one of `n_bins` equal-width right-closed intervals
///
/// The range is widened by 0.1% on the low edge so the minimum falls in the
/// first bin; a constant input is widened by 0.1% on both sides. NaN gets no
/// bin.
pub fn cut_equal_width(values: &[f64], n_bins: usize) -> Vec<Option<usize>> {
    let n_bins = n_bins.max(1);
    let (mut lo, mut hi) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return vec![None; values.len()];
    }

    let edges: Vec<f64> = if lo == hi {
        let pad = if lo == 0.0 { 0.001 } else { 0.001 * lo.abs() };
        lo -= pad;
        hi += pad;
        (0..=n_bins)
            .map(|k| lo + (hi - lo) * k as f64 / n_bins as f64)
            .collect()
    } else {
        let mut e: Vec<f64> = (0..=n_bins)
            .map(|k| lo + (hi - lo) * k as f64 / n_bins as f64)
            .collect();
        e[0] -= (hi - lo) * 0.001;
        e
    };

    values
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                return None;
            }
            // first edge >= v closes the interval containing v
            let k = edges.partition_point(|&e| e < v);
            Some(k.saturating_sub(1).min(n_bins - 1))
        })
        .collect()
}

/// Normalize dispersions within mean bins and select genes
///
/// `mean` and `variance` are per-gene moments of the expression matrix.
/// With `n_top_genes`, exactly `min(n_top_genes, n)` genes with the largest
/// normalized dispersion are selected, ties resolved by gene order; without
/// it, the four cutoffs of `params` are combined on the (transformed) gene
/// mean and normalized dispersion.
pub fn seurat_binned_dispersion(
    mean: &[f64],
    variance: &[f64],
    n_top_genes: Option<usize>,
    params: &SeuratDispersionParams,
    sink: &dyn ProgressSink,
) -> SeuratDispersionResult {
    let n = mean.len();
    let mut gene_mean: Vec<f64> = mean.to_vec();
    let mut dispersion: Vec<f64> = mean.iter().zip(variance.iter()).map(|(m, v)| v / m).collect();

    if params.log_mean_and_dispersion {
        gene_mean.iter_mut().for_each(|m| *m = m.ln_1p());
        dispersion.iter_mut().for_each(|d| {
            *d = if *d == 0.0 { f64::NAN } else { d.ln() };
        });
    }

    let bins = cut_equal_width(&gene_mean, params.n_bins);
    let n_bins = params.n_bins.max(1);
    let mut members: Vec<Vec<f64>> = vec![Vec::new(); n_bins];
    for (b, &d) in bins.iter().zip(dispersion.iter()) {
        if let Some(b) = b {
            members[*b].push(d);
        }
    }

    let mut bin_mean: Vec<f64> = members.iter().map(|m| nan_mean(m)).collect();
    let mut bin_std: Vec<f64> = members.iter().map(|m| nan_std(m)).collect();
    // bins whose std is undefined: backfill std from the mean, report mean 0
    let single: Vec<bool> = bin_std.iter().map(|s| s.is_nan()).collect();
    for b in 0..n_bins {
        if single[b] {
            bin_std[b] = bin_mean[b];
            bin_mean[b] = 0.0;
        }
    }

    let mut out_mean = vec![f64::NAN; n];
    let mut out_var = vec![f64::NAN; n];
    let mut dispersion_norm = vec![0.0; n];
    for g in 0..n {
        if let Some(b) = bins[g] {
            out_mean[g] = bin_mean[b];
            out_var[g] = bin_std[b] * bin_std[b];
            if !single[b] {
                let z = (dispersion[g] - bin_mean[b]) / bin_std[b];
                dispersion_norm[g] = if z.is_nan() { 0.0 } else { z };
            }
        }
    }

    let mask = match n_top_genes {
        Some(n_top) => {
            sink.info_indent(&format!("choose {} top genes", n_top), 2);
            let mut mask = vec![false; n];
            for &g in argsort_descending(&dispersion_norm).iter().take(n_top.min(n)) {
                mask[g] = true;
            }
            mask
        }
        None => {
            sink.info_indent("choose genes by mean and dispersion norm threshold", 2);
            let max_disp = params.max_disp.unwrap_or(f64::INFINITY);
            gene_mean
                .iter()
                .zip(dispersion_norm.iter())
                .map(|(&m, &d)| m > params.min_mean && m < params.max_mean && d > params.min_disp && d < max_disp)
                .collect()
        }
    };

    SeuratDispersionResult {
        mean: out_mean,
        variance: out_var,
        dispersion_norm,
        mask,
    }
}

/// [`seurat_binned_dispersion`] on the per-gene mean and sample variance of a matrix
pub fn select_genes_by_seurat_dispersion(
    matrix: &ExpressionMatrix,
    n_top_genes: Option<usize>,
    params: &SeuratDispersionParams,
    sink: &dyn ProgressSink,
) -> SeuratDispersionResult {
    let mean = matrix.mean(Axis(0));
    let var = matrix.variance_ddof(Axis(0), 1);
    seurat_binned_dispersion(
        mean.as_slice().unwrap_or(&[]),
        var.as_slice().unwrap_or(&[]),
        n_top_genes,
        params,
        sink,
    )
}
