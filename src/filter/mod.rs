//! Filtering helpers for dispersion fitting and gene exclusion

mod cooks;
mod exprs_fraction;

pub use cooks::{calculate_cooks_distance, default_cooks_cutoff, flag_outliers};
pub use exprs_fraction::compute_gene_exp_fraction;
