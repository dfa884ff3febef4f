//! Highly variable gene scoring and selection

mod fano;
mod gini;
mod select;
mod seurat;
mod svr;

pub use fano::{get_highvar_genes_sparse, FanoParameters, FanoParams, FanoStats};
pub use gini::{gini, gini_key, top_table_gini};
pub use select::{
    select_genes_by_seurat_recipe, select_genes_monocle, GeneScorer, GeneSelectionConfig, PASS_BASIC_FILTER,
    USE_FOR_PCA,
};
pub use seurat::{
    cut_equal_width, select_genes_by_seurat_dispersion, seurat_binned_dispersion, SeuratDispersionParams,
    SeuratDispersionResult,
};
pub use svr::{
    get_highly_variable_mask_by_dispersion_svr, get_mean_cv, get_prediction_by_svr, get_svr_filter, get_valid_cm,
    select_genes_by_svr, svr_prefix, SvrAlgorithm, SvrResult, SvrSelectParams,
};
