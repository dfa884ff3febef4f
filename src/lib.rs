//! rust_scselect: highly variable gene selection and cell sub-sampling for
//! single-cell expression data
//!
//! Genes are scored by Gini coefficient, Seurat binned dispersion, or the SVR
//! residual of a dispersion statistic against mean expression; the chosen
//! genes are flagged in the gene metadata of an annotated matrix. Cells can
//! be sub-sampled with a topology representing network.
//!
//! # Example
//!
//! ```ignore
//! use rust_scselect::prelude::*;
//!
//! let mut ds = CellDataSet::from_matrix(ExpressionMatrix::Dense(counts))?;
//! let config = GeneSelectionConfig::from_json(r#"{"sort_by": "cv_dispersion", "n_top_genes": 2000}"#)?;
//! let mask = select_highly_variable_genes(&mut ds, &config, &LogSink::new())?;
//! ```

pub mod data;
pub mod dispersion;
pub mod error;
pub mod filter;
pub mod glm;
pub mod hvg;
pub mod progress;
pub mod rng;
pub mod sampling;
pub mod stats;
pub mod svr;
pub mod transform;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::data::{AnnotatedMatrix, CellDataSet, Column, ExpressionMatrix, MatrixStats, X_LAYER};
    pub use crate::dispersion::{estimate_dispersion, top_table, DispersionFitResult, DispersionParams};
    pub use crate::error::{Result, ScError};
    pub use crate::hvg::{
        gini, select_genes_by_seurat_recipe, select_genes_monocle, GeneScorer, GeneSelectionConfig, USE_FOR_PCA,
    };
    pub use crate::progress::{LogSink, NullSink, ProgressSink};
    pub use crate::sampling::{sample, trn, SamplingConfig, SamplingMethod, TrnParams, TrnSample};
    pub use crate::transform::{vst_exprs, NormMethod};
}

use prelude::*;

/// Select highly variable genes with the recipe matching `config.sort_by`
///
/// Seurat dispersion goes through [`select_genes_by_seurat_recipe`], every
/// other scorer through [`select_genes_monocle`].
pub fn select_highly_variable_genes<A: AnnotatedMatrix>(
    store: &mut A,
    config: &GeneSelectionConfig,
    sink: &dyn ProgressSink,
) -> Result<Vec<bool>> {
    sink.info(&format!("selecting highly variable genes by {}", config.sort_by));
    match config.sort_by {
        GeneScorer::SeuratDispersion => select_genes_by_seurat_recipe(store, config, sink),
        GeneScorer::Gini | GeneScorer::CvDispersion | GeneScorer::FanoDispersion => {
            select_genes_monocle(store, config, sink)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::MersenneTwister;
    use ndarray::{Array2, Axis};

    #[test]
    fn test_full_pipeline() {
        // 120 cells x 40 genes, overdispersed counts with four bursty genes
        let bursty = [4, 13, 22, 31];
        let mut rng = MersenneTwister::new(2023);
        let counts = Array2::from_shape_fn((120, 40), |(i, j)| {
            let mean = 4.0 + 1.5 * j as f64;
            if bursty.contains(&j) {
                if i % 12 == 0 {
                    (12.0 * mean).round()
                } else {
                    0.0
                }
            } else {
                let noisy = mean * (1.0 + 0.3 * rng.standard_normal()).max(0.1);
                (noisy + noisy.sqrt() * rng.standard_normal()).max(0.0).round()
            }
        });
        let mut ds = CellDataSet::from_matrix(ExpressionMatrix::Dense(counts)).unwrap();
        let sink = NullSink;

        // dispersion fit and variance stabilized expression
        let fit = estimate_dispersion(&ds, X_LAYER, &DispersionParams::default(), &sink).unwrap();
        assert!(fit.coefs[0] >= DispersionParams::default().initial_coefs[0]);
        assert!(!top_table(&fit).is_empty());
        let vst = vst_exprs(&fit, ds.x(), true).unwrap();
        assert_eq!(vst.dim(), (120, 40));

        // gene selection
        let config = GeneSelectionConfig {
            n_top_genes: Some(4),
            sort_by: GeneScorer::CvDispersion,
            ..Default::default()
        };
        let mask = select_highly_variable_genes(&mut ds, &config, &sink).unwrap();
        let chosen: Vec<usize> = (0..40).filter(|&g| mask[g]).collect();
        assert_eq!(chosen, bursty.to_vec());
        assert_eq!(ds.require_var_bool(USE_FOR_PCA).unwrap(), mask);

        // sub-sample cells on the selected genes
        let selected_genes: Vec<usize> = chosen.clone();
        let coords = ds.x().to_dense().select(Axis(1), &selected_genes);
        let cells: Vec<usize> = (0..120).collect();
        let params = SamplingConfig {
            method: SamplingMethod::Trn,
            trn: TrnParams {
                tmax: 20.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let picked = sampling::sample_with_config(&cells, 10, Some(coords.view()), None, &params, &sink).unwrap();
        assert_eq!(picked.len(), 10);
        assert!(picked.iter().all(|&c| c < 120));
    }

    #[test]
    fn test_unknown_scorer_name() {
        let err = GeneSelectionConfig::from_json(r#"{"sort_by": "pca"}"#).unwrap_err();
        assert!(matches!(err, ScError::JsonError(_)));
        assert!("pca".parse::<GeneScorer>().is_err());
    }
}
