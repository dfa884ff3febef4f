//! Highly variable genes by SVR residuals of dispersion against mean
//!
//! A smooth curve of a dispersion statistic (log2 CV or Fano factor) as a
//! function of mean expression is fitted with an RBF support vector
//! regression; a gene's score is how far it sits above that curve.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Axis};
use serde::{Deserialize, Serialize};

use super::fano::{get_highvar_genes_sparse, FanoParams};
use crate::data::{AnnotatedMatrix, Column, ExpressionMatrix, MatrixStats, X_LAYER};
use crate::dispersion::size_factor_key;
use crate::error::{Result, ScError};
use crate::progress::ProgressSink;
use crate::stats::{argsort_descending, nth_largest, quantile_sorted};
use crate::svr::{SupportVectorRegression, SvrParams};

/// Dispersion statistic regressed on mean expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SvrAlgorithm {
    /// log2 coefficient of variation against log2 mean
    CvDispersion,
    /// Fano factor against mean
    FanoDispersion,
}

impl fmt::Display for SvrAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SvrAlgorithm::CvDispersion => write!(f, "cv_dispersion"),
            SvrAlgorithm::FanoDispersion => write!(f, "fano_dispersion"),
        }
    }
}

impl FromStr for SvrAlgorithm {
    type Err = ScError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cv_dispersion" => Ok(SvrAlgorithm::CvDispersion),
            "fano_dispersion" => Ok(SvrAlgorithm::FanoDispersion),
            other => Err(ScError::InvalidConfig {
                reason: format!("The algorithm {} is not existed", other),
            }),
        }
    }
}

/// Configurable parameters for SVR gene scoring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SvrSelectParams {
    /// Divide each cell by its size factor first
    pub relative_expr: bool,
    /// Cell metadata column overriding the per-layer size factor
    pub total_szfactor: Option<String>,
    pub min_expr_cells: usize,
    pub min_expr_avg: f64,
    /// Upper bound on mean expression; unbounded when `None`
    pub max_expr_avg: Option<f64>,
    pub winsorize: bool,
    /// Lower and upper percentiles of the winsorization
    pub winsor_perc: (f64, f64),
    /// Negate scores to rank genes from least to most noisy
    pub sort_inverse: bool,
    /// Score every gene and cell instead of the `use_for_pca` subsets
    pub use_all_genes_cells: bool,
    pub svr: SvrParams,
}

impl Default for SvrSelectParams {
    fn default() -> Self {
        Self {
            relative_expr: true,
            total_szfactor: Some("total_Size_Factor".to_string()),
            min_expr_cells: 0,
            min_expr_avg: 0.0,
            max_expr_avg: None,
            winsorize: false,
            winsor_perc: (1.0, 99.5),
            sort_inverse: false,
            use_all_genes_cells: false,
            svr: SvrParams::default(),
        }
    }
}

/// Scores written by [`select_genes_by_svr`], one entry per gene of the store
#[derive(Debug, Clone)]
pub struct SvrResult {
    pub log_m: Vec<f64>,
    pub log_cv: Vec<f64>,
    pub score: Vec<f64>,
    pub model: SupportVectorRegression,
}

/// Gene metadata prefix of the SVR columns for a layer
pub fn svr_prefix(layer: &str) -> String {
    if layer == X_LAYER {
        String::new()
    } else {
        format!("{}_", layer)
    }
}

/// Per-gene mean and dispersion statistic for the SVR fit
///
/// For [`SvrAlgorithm::CvDispersion`] returns `log2(mean)` and `log2(sd/mean)`
/// with sample standard deviation; genes with zero mean get `(0, 0)`. With
/// `winsorize`, each gene is clipped to its `winsor_perc` percentiles first.
/// For [`SvrAlgorithm::FanoDispersion`] returns the raw mean and Fano factor.
pub fn get_mean_cv(
    matrix: &ExpressionMatrix,
    algorithm: SvrAlgorithm,
    winsorize: bool,
    winsor_perc: (f64, f64),
) -> (Vec<f64>, Vec<f64>) {
    match algorithm {
        SvrAlgorithm::FanoDispersion => {
            let (stats, _) = get_highvar_genes_sparse(matrix, &FanoParams::default());
            (stats.mean, stats.fano)
        }
        SvrAlgorithm::CvDispersion => {
            let (mu, sigma): (Vec<f64>, Vec<f64>) = if winsorize {
                (0..matrix.n_genes())
                    .map(|j| winsorized_moments(matrix.column(j), winsor_perc))
                    .unzip()
            } else {
                let mu = matrix.mean(Axis(0));
                let sd = matrix.variance_ddof(Axis(0), 1).mapv(f64::sqrt);
                (mu.to_vec(), sd.to_vec())
            };

            mu.iter()
                .zip(sigma.iter())
                .map(|(&m, &s)| if m == 0.0 { (0.0, 0.0) } else { (m.log2(), (s / m).log2()) })
                .unzip()
        }
    }
}

/// Mean and sample sd of a column clipped to its percentiles
fn winsorized_moments(column: Array1<f64>, perc: (f64, f64)) -> (f64, f64) {
    let mut sorted = column.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let down = quantile_sorted(&sorted, perc.0 / 100.0);
    let up = quantile_sorted(&sorted, perc.1 / 100.0);
    let clipped = column.mapv(|x| x.clamp(down, up));
    let mean = clipped.mean().unwrap_or(f64::NAN);
    let sd = if clipped.len() > 1 { clipped.std(1.0) } else { f64::NAN };
    (mean, sd)
}

/// Fit the SVR curve `target ~ ground`; `gamma` defaults to `150 / n`
pub fn get_prediction_by_svr(ground: &[f64], target: &[f64], gamma: Option<f64>) -> Result<SupportVectorRegression> {
    let params = SvrParams {
        gamma,
        ..Default::default()
    };
    SupportVectorRegression::fit(ground, target, &params)
}

/// Top-N mask by SVR residual of log2 CV against log2 mean
///
/// Genes whose log mean or log CV is not finite (zero mean, NaN input) are
/// left out of the fit and get NaN scores. The threshold is the `n_top_genes`-th largest score and every
/// gene scoring at least that much is selected, so exact ties at the
/// threshold can yield more than `n_top_genes` genes.
pub fn get_highly_variable_mask_by_dispersion_svr(
    mean: &[f64],
    var: &[f64],
    n_top_genes: usize,
    svr_gamma: Option<f64>,
    sink: &dyn ProgressSink,
) -> Result<(Vec<bool>, Vec<f64>)> {
    if mean.len() != var.len() {
        return Err(ScError::DimensionMismatch {
            expected: format!("{} variances", mean.len()),
            got: format!("{} variances", var.len()),
        });
    }
    let n = mean.len();
    let gamma = svr_gamma.unwrap_or(150.0 / n.max(1) as f64);

    let mean_log: Vec<f64> = mean.iter().map(|m| m.log2()).collect();
    let cv_log: Vec<f64> = mean.iter().zip(var.iter()).map(|(m, v)| (v.sqrt() / m).log2()).collect();
    let valid: Vec<usize> = (0..n)
        .filter(|&g| mean_log[g].is_finite() && cv_log[g].is_finite())
        .collect();
    if valid.len() < n {
        sink.warning(
            "mean and cv_log contain NAN values. We exclude them in SVR training. \
             Please use related gene filtering methods to filter genes with zero means.",
        );
    }

    let x: Vec<f64> = valid.iter().map(|&g| mean_log[g]).collect();
    let y: Vec<f64> = valid.iter().map(|&g| cv_log[g]).collect();
    let model = get_prediction_by_svr(&x, &y, Some(gamma))?;

    let mut scores = vec![f64::NAN; n];
    for (k, &g) in valid.iter().enumerate() {
        scores[g] = y[k] - model.predict(x[k]);
    }

    let mask = match nth_largest(&scores, n_top_genes.min(n)).or_else(|| scores_floor(&scores)) {
        Some(threshold) => scores.iter().map(|&s| s >= threshold).collect(),
        None => vec![false; n],
    };
    Ok((mask, scores))
}

/// Smallest non-NaN score, used when fewer than N genes could be scored
fn scores_floor(scores: &[f64]) -> Option<f64> {
    scores.iter().copied().filter(|s| !s.is_nan()).reduce(f64::min)
}

/// Size factors for a layer: the `total_szfactor` column when present, else
/// the layer's own size factor column
fn lookup_size_factors<A: AnnotatedMatrix>(store: &A, layer: &str, params: &SvrSelectParams) -> Option<Vec<f64>> {
    params
        .total_szfactor
        .as_deref()
        .and_then(|key| store.obs_float(key))
        .or_else(|| store.obs_float(&size_factor_key(layer)))
}

/// Scale by size factors and keep the genes passing the expression filters
fn valid_cm_from(
    mut cm: ExpressionMatrix,
    size_factors: Option<Vec<f64>>,
    params: &SvrSelectParams,
) -> Result<(ExpressionMatrix, Vec<bool>)> {
    if let (Some(sf), true) = (size_factors, params.relative_expr) {
        cm = cm.scale_rows_by_inverse(&sf)?;
    }

    let mut min_expr_cells = params.min_expr_cells;
    if params.winsorize {
        let trimmed = (100.0 - params.winsor_perc.1) * cm.n_cells() as f64 * 0.01;
        if (min_expr_cells as f64) <= trimmed {
            min_expr_cells = trimmed.ceil() as usize + 2;
        }
    }

    let expressed = cm.count_above(0.0, Axis(0));
    let mean = cm.mean(Axis(0));
    let max_avg = params.max_expr_avg.unwrap_or(f64::INFINITY);
    let detected: Vec<bool> = expressed
        .iter()
        .zip(mean.iter())
        .map(|(&c, &m)| c >= min_expr_cells && m <= max_avg && m >= params.min_expr_avg)
        .collect();

    let keep: Vec<usize> = (0..detected.len()).filter(|&g| detected[g]).collect();
    Ok((cm.select_genes(&keep), detected))
}

/// Matrix of a layer scaled by size factors, restricted to detected genes
///
/// Returns the filtered matrix and the detection mask over the layer's genes.
pub fn get_valid_cm<A: AnnotatedMatrix>(
    store: &A,
    layer: &str,
    params: &SvrSelectParams,
) -> Result<(ExpressionMatrix, Vec<bool>)> {
    let cm = store.require_layer(layer)?.clone();
    valid_cm_from(cm, lookup_size_factors(store, layer, params), params)
}

fn bool_column<A: AnnotatedMatrix>(store: &A, key: &str, obs: bool) -> Option<Vec<bool>> {
    let column = if obs { store.obs_column(key) } else { store.var_column(key) };
    column.and_then(|c| c.as_bool()).map(|v| v.to_vec())
}

/// Score genes of a layer by SVR residual and write `{prefix}log_m`,
/// `{prefix}log_cv` and `{prefix}score` into the gene metadata
///
/// Unless `use_all_genes_cells` is set, only cells flagged `use_for_pca` and
/// genes flagged `use_for_pca` (or `pass_basic_filter`) are evaluated. Genes
/// outside the evaluated subset or not detected keep NaN statistics and a
/// score of negative infinity. Detected genes with a non-finite statistic are
/// left out of the fit with a warning and get NaN `log_cv` and score.
pub fn select_genes_by_svr<A: AnnotatedMatrix>(
    store: &mut A,
    layer: &str,
    filter: Option<&[bool]>,
    algorithm: SvrAlgorithm,
    params: &SvrSelectParams,
    sink: &dyn ProgressSink,
) -> Result<SvrResult> {
    let n_vars = store.n_vars();
    let gene_subset: Vec<bool> = if params.use_all_genes_cells {
        filter.map(|f| f.to_vec()).unwrap_or_else(|| vec![true; n_vars])
    } else {
        bool_column(store, "use_for_pca", false)
            .or_else(|| bool_column(store, "pass_basic_filter", false))
            .or_else(|| filter.map(|f| f.to_vec()))
            .unwrap_or_else(|| vec![true; n_vars])
    };
    if gene_subset.len() != n_vars {
        return Err(ScError::DimensionMismatch {
            expected: format!("{} gene filter entries", n_vars),
            got: format!("{} gene filter entries", gene_subset.len()),
        });
    }
    let gene_idx: Vec<usize> = (0..n_vars).filter(|&g| gene_subset[g]).collect();
    let cell_idx: Option<Vec<usize>> = if params.use_all_genes_cells {
        None
    } else {
        bool_column(store, "use_for_pca", true).map(|m| (0..m.len()).filter(|&c| m[c]).collect())
    };

    let mut matrix = store.require_layer(layer)?.select_genes(&gene_idx);
    let mut size_factors = lookup_size_factors(&*store, layer, params);
    if let Some(cells) = &cell_idx {
        matrix = matrix.select_cells(cells);
        size_factors = size_factors.map(|sf| cells.iter().map(|&c| sf[c]).collect());
    }
    let (cm, detected) = valid_cm_from(matrix, size_factors, params)?;

    let (mean, cv) = get_mean_cv(&cm, algorithm, params.winsorize, params.winsor_perc);
    let finite: Vec<bool> = mean.iter().zip(cv.iter()).map(|(m, c)| m.is_finite() && c.is_finite()).collect();
    if finite.iter().any(|&f| !f) {
        sink.warning(
            "mean and cv_log contain NAN values. We exclude them in SVR training. \
             Please use related gene filtering methods to filter genes with zero means.",
        );
    }
    let train_x: Vec<f64> = (0..mean.len()).filter(|&k| finite[k]).map(|k| mean[k]).collect();
    let train_y: Vec<f64> = (0..cv.len()).filter(|&k| finite[k]).map(|k| cv[k]).collect();
    let model = get_prediction_by_svr(&train_x, &train_y, params.svr.gamma)?;
    let sign = if params.sort_inverse { -1.0 } else { 1.0 };

    let mut log_m = vec![f64::NAN; n_vars];
    let mut log_cv = vec![f64::NAN; n_vars];
    let mut score = vec![f64::NEG_INFINITY; n_vars];
    let detected_genes = gene_idx.iter().zip(detected.iter()).filter(|(_, &d)| d).map(|(&g, _)| g);
    for (k, g) in detected_genes.enumerate() {
        log_m[g] = mean[k];
        if finite[k] {
            log_cv[g] = cv[k];
            score[g] = sign * (cv[k] - model.predict(mean[k]));
        } else {
            score[g] = f64::NAN;
        }
    }

    let prefix = svr_prefix(layer);
    for (key, values) in [("log_m", &log_m), ("log_cv", &log_cv), ("score", &score)] {
        let name = format!("{}{}", prefix, key);
        sink.info_insert(&name, "var");
        store.set_var_column(&name, Column::Float(values.clone()))?;
    }

    Ok(SvrResult {
        log_m,
        log_cv,
        score,
        model,
    })
}

/// Top-N mask from the stored `{prefix}score` column
///
/// Only finite scores compete. Exactly `min(n_top_genes, finite scores)` genes
/// are selected, highest scores first; ties keep gene order.
pub fn get_svr_filter<A: AnnotatedMatrix>(store: &A, layer: &str, n_top_genes: usize) -> Result<Vec<bool>> {
    let key = format!("{}score", svr_prefix(layer));
    let score = store.require_var_float(&key)?;
    let valid: Vec<usize> = (0..score.len()).filter(|&g| score[g].is_finite()).collect();
    let mut mask = vec![false; score.len()];
    if valid.is_empty() || n_top_genes == 0 {
        return Ok(mask);
    }

    let valid_scores: Vec<f64> = valid.iter().map(|&g| score[g]).collect();
    let order = argsort_descending(&valid_scores);
    for &k in order.iter().take(n_top_genes) {
        mask[valid[k]] = true;
    }
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CellDataSet;
    use crate::progress::tests::RecordingSink;
    use crate::progress::NullSink;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!("cv_dispersion".parse::<SvrAlgorithm>().unwrap(), SvrAlgorithm::CvDispersion);
        assert!(matches!("svr".parse::<SvrAlgorithm>(), Err(ScError::InvalidConfig { .. })));
    }

    #[test]
    fn test_mean_cv_zero_gene() {
        let m = ExpressionMatrix::Dense(array![[1.0, 0.0], [3.0, 0.0]]);
        let (log_m, log_cv) = get_mean_cv(&m, SvrAlgorithm::CvDispersion, false, (1.0, 99.5));
        assert_relative_eq!(log_m[0], 1.0);
        assert_relative_eq!(log_cv[0], (2.0f64.sqrt() / 2.0).log2(), epsilon = 1e-12);
        assert_eq!((log_m[1], log_cv[1]), (0.0, 0.0));
    }

    #[test]
    fn test_winsorize_clips_outlier() {
        let mut col = vec![1.0; 99];
        col.push(1000.0);
        let (mean, _) = winsorized_moments(Array1::from_vec(col), (1.0, 95.0));
        assert_relative_eq!(mean, 1.0);
    }

    #[test]
    fn test_nan_genes_excluded_with_warning() {
        let mean: Vec<f64> = (0..30).map(|i| if i == 4 { 0.0 } else { 1.0 + i as f64 }).collect();
        let var: Vec<f64> = mean.iter().map(|m| m * 1.5).collect();
        let sink = RecordingSink::default();
        let (mask, scores) = get_highly_variable_mask_by_dispersion_svr(&mean, &var, 5, None, &sink).unwrap();
        assert!(scores[4].is_nan());
        assert!(!mask[4]);
        assert_eq!(scores.len(), 30);
        assert_eq!(sink.warnings().len(), 1);
        assert!(mask.iter().filter(|&&m| m).count() >= 5);
    }

    #[test]
    fn test_svr_filter_from_stored_scores() {
        let mut ds = CellDataSet::from_matrix(ExpressionMatrix::Dense(array![[1.0, 2.0, 3.0, 4.0]])).unwrap();
        ds.set_var_column("score", Column::Float(vec![0.5, f64::NEG_INFINITY, 2.0, 0.5]))
            .unwrap();
        assert_eq!(get_svr_filter(&ds, "X", 2).unwrap(), vec![true, false, true, false]);
        assert_eq!(get_svr_filter(&ds, "X", 10).unwrap(), vec![true, false, true, true]);
        assert!(get_svr_filter(&ds, "spliced", 2).is_err());
    }

    #[test]
    fn test_svr_filter_prefers_higher_score_over_earlier_tie() {
        let mut ds = CellDataSet::from_matrix(ExpressionMatrix::Dense(array![[1.0, 2.0, 3.0]])).unwrap();
        ds.set_var_column("score", Column::Float(vec![0.5, 0.5, 2.0])).unwrap();
        assert_eq!(get_svr_filter(&ds, "X", 2).unwrap(), vec![true, false, true]);
        assert_eq!(get_svr_filter(&ds, "X", 1).unwrap(), vec![false, false, true]);
    }

    #[test]
    fn test_select_genes_by_svr_excludes_constant_gene() {
        let counts = ndarray::Array2::from_shape_fn((40, 12), |(i, j)| {
            if j == 3 {
                4.0
            } else {
                ((i * 7 + j * 3) % 11) as f64 + j as f64
            }
        });
        let mut ds = CellDataSet::from_matrix(ExpressionMatrix::Dense(counts)).unwrap();
        let sink = RecordingSink::default();
        let res = select_genes_by_svr(
            &mut ds,
            "X",
            None,
            SvrAlgorithm::CvDispersion,
            &SvrSelectParams::default(),
            &sink,
        )
        .unwrap();
        assert_relative_eq!(res.log_m[3], 2.0);
        assert!(res.log_cv[3].is_nan());
        assert!(res.score[3].is_nan());
        assert!(res.score.iter().enumerate().all(|(g, s)| g == 3 || s.is_finite()));
        assert_eq!(sink.warnings().len(), 1);
    }

    #[test]
    fn test_valid_cm_detection_mask() {
        let mut ds = CellDataSet::from_matrix(ExpressionMatrix::Dense(array![
            [0.0, 1.0, 9.0],
            [0.0, 2.0, 9.0],
            [0.0, 0.0, 9.0]
        ]))
        .unwrap();
        ds.obs_mut().insert("Size_Factor", Column::Float(vec![1.0, 1.0, 1.0])).unwrap();
        let params = SvrSelectParams {
            min_expr_cells: 1,
            max_expr_avg: Some(5.0),
            ..Default::default()
        };
        let (cm, detected) = get_valid_cm(&ds, "X", &params).unwrap();
        assert_eq!(detected, vec![false, true, false]);
        assert_eq!(cm.n_genes(), 1);
    }

    #[test]
    fn test_select_genes_by_svr_writes_columns() {
        let counts = ndarray::Array2::from_shape_fn((40, 12), |(i, j)| ((i * 7 + j * 3) % 11) as f64 + j as f64);
        let mut ds = CellDataSet::from_matrix(ExpressionMatrix::Dense(counts)).unwrap();
        let res = select_genes_by_svr(
            &mut ds,
            "X",
            None,
            SvrAlgorithm::CvDispersion,
            &SvrSelectParams::default(),
            &NullSink,
        )
        .unwrap();
        assert_eq!(res.score.len(), 12);
        assert!(ds.require_var_float("log_m").is_ok());
        assert!(ds.require_var_float("log_cv").is_ok());
        assert_eq!(ds.require_var_float("score").unwrap(), res.score);
    }
}
