//! Dispersion estimation for negative binomial count data
//!
//! Per-gene method-of-moments dispersions are regressed on the mean with a
//! Gamma GLM (`disp = a + b / mu`), optionally dropping Cook's distance
//! outliers and refitting.

mod moments;
mod parametric;

pub use moments::disp_calc_helper_nb;
pub use parametric::{parametric_dispersion_fit, ParametricFit};

use serde::{Deserialize, Serialize};

use crate::data::{AnnotatedMatrix, X_LAYER};
use crate::error::{Result, ScError};
use crate::filter::flag_outliers;
use crate::glm::GlmFitParams;
use crate::progress::ProgressSink;
use crate::stats::argsort_descending;

/// Configurable parameters for dispersion estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispersionParams {
    /// A gene must exceed `lower_detection_limit` in more than this many cells
    pub min_cells_detected: usize,
    /// Rounded counts at or below this value count as undetected
    pub lower_detection_limit: f64,
    /// Drop Cook's distance outliers and refit
    pub remove_outliers: bool,
    /// Starting `[a, b]`; `a` is also the residual and intercept floor
    pub initial_coefs: [f64; 2],
    pub glm: GlmFitParams,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            min_cells_detected: 1,
            lower_detection_limit: 1.0,
            remove_outliers: false,
            initial_coefs: [1e-6, 1.0],
            glm: GlmFitParams::default(),
        }
    }
}

/// One gene of a dispersion table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispersionRow {
    /// Column of the gene in the matrix the table was built from
    pub gene_index: usize,
    pub gene_id: String,
    /// Mean normalized expression; NaN when the gene mean is zero
    pub mu: f64,
    /// Method-of-moments dispersion; NaN when `mu` is
    pub disp: f64,
}

/// Mean/dispersion pairs of the genes entering a fit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispersionTable {
    pub rows: Vec<DispersionRow>,
}

impl DispersionTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows with a finite mean
    pub fn valid(&self) -> DispersionTable {
        DispersionTable {
            rows: self.rows.iter().filter(|r| r.mu.is_finite()).cloned().collect(),
        }
    }

    fn without(&self, drop: &[bool]) -> DispersionTable {
        DispersionTable {
            rows: self
                .rows
                .iter()
                .zip(drop.iter())
                .filter(|(_, &d)| !d)
                .map(|(r, _)| r.clone())
                .collect(),
        }
    }
}

/// Fitted dispersion-mean relationship
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispersionFitResult {
    /// `[a, b]` of `disp = a + b / mu`
    pub coefs: [f64; 2],
    /// Genes kept by the first fit, before any outlier removal
    pub disp_table: DispersionTable,
    pub converged: bool,
}

impl DispersionFitResult {
    /// Fitted dispersion at mean `mu`
    pub fn disp_func(&self, mu: f64) -> f64 {
        self.coefs[0] + self.coefs[1] / mu
    }

    /// Key under which callers conventionally store the fit for `layer`
    pub fn storage_key(layer: &str) -> String {
        if layer == X_LAYER {
            "dispFitInfo".to_string()
        } else {
            format!("{}_dispFitInfo", layer)
        }
    }
}

/// Size factor column for a layer: `Size_Factor` for `X`, `<layer>_Size_Factor` otherwise
pub fn size_factor_key(layer: &str) -> String {
    if layer == X_LAYER {
        "Size_Factor".to_string()
    } else {
        format!("{}_Size_Factor", layer)
    }
}

/// Estimate the dispersion-mean relationship of one layer
///
/// Size factors are read from the cell metadata (see [`size_factor_key`]);
/// when absent, or for `X_*` layers, counts are used as they are.
pub fn estimate_dispersion<A: AnnotatedMatrix>(
    store: &A,
    layer: &str,
    params: &DispersionParams,
    sink: &dyn ProgressSink,
) -> Result<DispersionFitResult> {
    let matrix = store.require_layer(layer)?;

    let size_factors = if layer.starts_with("X_") {
        None
    } else {
        let sf = store.obs_float(&size_factor_key(layer));
        if sf.is_none() {
            sink.debug(&format!("no {} in cell metadata, using raw counts", size_factor_key(layer)));
        }
        sf
    };

    let table = disp_calc_helper_nb(matrix, size_factors.as_deref(), store.gene_ids(), params)?;
    let table = table.valid();
    if table.is_empty() {
        return Err(ScError::EmptyData {
            reason: "Parametric dispersion fitting failed, please set a different lower detection limit".to_string(),
        });
    }

    let mut res = parametric_dispersion_fit(&table, params.initial_coefs, &params.glm, sink)?;
    // outlier removal changes the coefficients only; the reported table is the first fit's
    let good = res.good.clone();

    if params.remove_outliers {
        let outliers = flag_outliers(&res.fit);
        let n_outliers = outliers.iter().filter(|&&o| o).count();
        sink.info(&format!("Removing {} outliers", n_outliers));
        let kept = res.good.without(&outliers);
        res = parametric_dispersion_fit(&kept, params.initial_coefs, &params.glm, sink)?;
    }

    sink.info_insert(&DispersionFitResult::storage_key(layer), "uns");

    Ok(DispersionFitResult {
        coefs: res.coefs,
        disp_table: good,
        converged: res.converged,
    })
}

/// One row of [`top_table`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopTableRow {
    pub gene_id: String,
    pub mean_expression: f64,
    pub dispersion_fit: f64,
    pub dispersion_empirical: f64,
}

/// Fitted genes ranked by empirical dispersion, highest first
pub fn top_table(fit: &DispersionFitResult) -> Vec<TopTableRow> {
    let empirical: Vec<f64> = fit.disp_table.rows.iter().map(|r| r.disp).collect();
    argsort_descending(&empirical)
        .into_iter()
        .map(|i| {
            let row = &fit.disp_table.rows[i];
            TopTableRow {
                gene_id: row.gene_id.clone(),
                mean_expression: row.mu,
                dispersion_fit: fit.disp_func(row.mu),
                dispersion_empirical: row.disp,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CellDataSet, Column, ExpressionMatrix};
    use crate::progress::tests::RecordingSink;
    use crate::progress::NullSink;
    use crate::rng::MersenneTwister;
    use ndarray::Array2;

    /// Gamma-Poisson-ish counts: gene j has mean `5 + 3j` and overdispersion
    fn nb_like_counts(n_cells: usize, n_genes: usize, seed: u32) -> Array2<f64> {
        let mut rng = MersenneTwister::new(seed);
        Array2::from_shape_fn((n_cells, n_genes), |(_, j)| {
            let mean = 5.0 + 3.0 * j as f64;
            let noisy = mean * (1.0 + 0.5 * rng.standard_normal()).max(0.05);
            (noisy + noisy.sqrt() * rng.standard_normal()).max(0.0).round()
        })
    }

    #[test]
    fn test_estimate_dispersion_end_to_end() {
        let counts = nb_like_counts(200, 40, 42);
        let mut ds = CellDataSet::from_matrix(ExpressionMatrix::Dense(counts)).unwrap();
        ds.obs_mut().insert("Size_Factor", Column::Float(vec![1.0; 200])).unwrap();

        let sink = RecordingSink::default();
        let fit = estimate_dispersion(&ds, "X", &DispersionParams::default(), &sink).unwrap();

        assert!(fit.coefs[0] >= 1e-6);
        assert!(!fit.disp_table.is_empty());
        assert!(fit.disp_func(10.0).is_finite());

        let table = top_table(&fit);
        assert_eq!(table.len(), fit.disp_table.len());
        assert!(table.windows(2).all(|w| w[0].dispersion_empirical >= w[1].dispersion_empirical));
    }

    #[test]
    fn test_remove_outliers_refits_on_subset() {
        let counts = nb_like_counts(150, 50, 7);
        let ds = CellDataSet::from_matrix(ExpressionMatrix::Dense(counts)).unwrap();
        let params = DispersionParams {
            remove_outliers: true,
            ..Default::default()
        };
        let sink = RecordingSink::default();
        let fit = estimate_dispersion(&ds, "X", &params, &sink).unwrap();
        let plain = estimate_dispersion(&ds, "X", &DispersionParams::default(), &NullSink).unwrap();
        assert!(fit.disp_table.len() <= 50);
        assert_eq!(fit.disp_table, plain.disp_table);
        assert!(sink
            .messages
            .borrow()
            .iter()
            .any(|(_, m)| m.starts_with("Removing") && m.ends_with("outliers")));
    }

    #[test]
    fn test_all_zero_layer_is_empty_data() {
        let ds = CellDataSet::from_matrix(ExpressionMatrix::Dense(Array2::zeros((10, 4)))).unwrap();
        match estimate_dispersion(&ds, "X", &DispersionParams::default(), &NullSink) {
            Err(ScError::EmptyData { .. }) => {}
            other => panic!("expected EmptyData, got {:?}", other.map(|f| f.coefs)),
        }
    }

    #[test]
    fn test_missing_layer() {
        let ds = CellDataSet::from_matrix(ExpressionMatrix::Dense(Array2::ones((3, 3)))).unwrap();
        assert!(matches!(
            estimate_dispersion(&ds, "spliced", &DispersionParams::default(), &NullSink),
            Err(ScError::MissingKey { .. })
        ));
    }

    #[test]
    fn test_fit_result_serializes() {
        let fit = DispersionFitResult {
            coefs: [0.1, 2.0],
            disp_table: DispersionTable {
                rows: vec![DispersionRow { gene_index: 3, gene_id: "g3".into(), mu: 4.0, disp: 0.6 }],
            },
            converged: true,
        };
        let json = serde_json::to_string(&fit).unwrap();
        let back: DispersionFitResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.disp_table, fit.disp_table);
        assert_eq!(DispersionFitResult::storage_key("spliced"), "spliced_dispFitInfo");
    }
}
