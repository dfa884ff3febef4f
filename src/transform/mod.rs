//! Expression transforms
//!
//! Log-like transforms applied in place to layers, and the variance
//! stabilizing transform derived from a dispersion fit.

mod log;
mod vst;

pub use log::{
    freeman_tukey, freeman_tukey_inverse, is_log1p_transformed, log1p, log2, log_plus_one, transform_layers,
    NormMethod, SPLICED_LAYER,
};
pub use vst::vst_exprs;
