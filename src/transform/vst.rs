//! Variance stabilizing transformation from a parametric dispersion fit
//!
//! With `disp(q) = a + b / q`, the transform is
//! `vst(q) = log2((1 + b + 2aq + 2 sqrt(aq(1 + b + aq))) / (4a))`.

use ndarray::Array2;
use rayon::prelude::*;

use crate::data::ExpressionMatrix;
use crate::dispersion::DispersionFitResult;
use crate::error::{Result, ScError};

/// Single value parametric VST, applied to zero counts as well
fn vst_parametric_single(q: f64, asympt_disp: f64, extra_pois: f64) -> f64 {
    let a = asympt_disp;
    let e = extra_pois;
    let q = q.max(0.0);

    let numerator = 1.0 + e + 2.0 * a * q + 2.0 * (a * q * (1.0 + e + a * q)).sqrt();
    (numerator / (4.0 * a)).log2()
}

/// Variance-stabilized expression, cells x genes
///
/// `matrix` must already be normalized (e.g. by size factors). With
/// `round_vals` entries are rounded to the nearest integer first.
pub fn vst_exprs(fit: &DispersionFitResult, matrix: &ExpressionMatrix, round_vals: bool) -> Result<Array2<f64>> {
    let [a, b] = fit.coefs;
    if !(a > 0.0) || !b.is_finite() {
        return Err(ScError::InvalidInput {
            reason: format!("dispersion coefficients ({}, {}) do not define a transform", a, b),
        });
    }

    let mut counts = matrix.to_dense();
    if round_vals {
        counts.mapv_inplace(f64::round);
    }

    let transform = |q: &mut f64| *q = vst_parametric_single(*q, a, b);
    match counts.as_slice_mut() {
        Some(values) => values.par_iter_mut().for_each(transform),
        None => counts.iter_mut().for_each(transform),
    }

    log::debug!("vst applied with asymptDisp = {}, extraPois = {}", a, b);
    Ok(counts)
}
