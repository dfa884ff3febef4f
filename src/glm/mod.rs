//! Generalized Linear Model fitting for the dispersion-mean trend

mod gamma;

pub use gamma::{fit_gamma_identity, GammaGlmFit, GlmFitParams};
