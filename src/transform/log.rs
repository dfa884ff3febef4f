//! Elementwise log-like transforms of expression layers
//!
//! Every transform maps zero to zero, so sparse layers only touch their
//! stored entries.

use std::fmt;

use ndarray::Axis;
use serde::{Deserialize, Serialize};

use crate::data::{AnnotatedMatrix, ExpressionMatrix, MatrixStats, X_LAYER};
use crate::error::{Result, ScError};
use crate::progress::ProgressSink;
use crate::rng::MersenneTwister;

/// Layer compared with `X` by [`is_log1p_transformed`]
pub const SPLICED_LAYER: &str = "spliced";

/// Genes sampled by [`is_log1p_transformed`]
const N_PROBE_GENES: usize = 10;

/// Transform applied to expression layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormMethod {
    /// `ln(1 + x)`
    Log1p,
    /// `ln(x + 1)`, kept under its own name for stored metadata
    Log,
    /// `log2(x + 1)`
    Log2,
    /// `sqrt(x) + sqrt(x + 1) - 1`
    FreemanTukey,
}

impl fmt::Display for NormMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NormMethod::Log1p => "log1p",
            NormMethod::Log => "log",
            NormMethod::Log2 => "log2",
            NormMethod::FreemanTukey => "Freeman_Tukey",
        };
        write!(f, "{}", name)
    }
}

pub fn log1p(matrix: &mut ExpressionMatrix) {
    matrix.map_stored(f64::ln_1p);
}

pub fn log_plus_one(matrix: &mut ExpressionMatrix) {
    matrix.map_stored(|x| (x + 1.0).ln());
}

pub fn log2(matrix: &mut ExpressionMatrix) {
    matrix.map_stored(|x| (x + 1.0).log2());
}

/// Freeman-Tukey transform shifted so that zero stays zero
pub fn freeman_tukey(matrix: &mut ExpressionMatrix) {
    matrix.map_stored(|x| x.sqrt() + (x + 1.0).sqrt() - 1.0);
}

/// Inverse of [`freeman_tukey`]
pub fn freeman_tukey_inverse(matrix: &mut ExpressionMatrix) {
    matrix.map_stored(|y| {
        let t = y + 1.0;
        (t * t - 1.0).powi(2) / (4.0 * t * t)
    });
}

impl NormMethod {
    pub fn apply(&self, matrix: &mut ExpressionMatrix) {
        match self {
            NormMethod::Log1p => log1p(matrix),
            NormMethod::Log => log_plus_one(matrix),
            NormMethod::Log2 => log2(matrix),
            NormMethod::FreemanTukey => freeman_tukey(matrix),
        }
    }
}

/// Apply `method` in place to each named layer
pub fn transform_layers<A: AnnotatedMatrix>(
    store: &mut A,
    layers: &[&str],
    method: NormMethod,
    sink: &dyn ProgressSink,
) -> Result<()> {
    sink.debug(&format!("[{}] transform applied to layers: {:?}", method, layers));
    for &layer in layers {
        let matrix = store.layer_mut(layer).ok_or_else(|| ScError::MissingKey {
            key: layer.to_string(),
            location: "layers".to_string(),
        })?;
        method.apply(matrix);
    }
    Ok(())
}

/// Whether `X` looks log-transformed relative to the `spliced` layer
///
/// Cell totals over a few randomly drawn genes are compared between the two
/// layers; any difference beyond `1e-4 + 1e-5 * |spliced|` means `X` was
/// transformed.
pub fn is_log1p_transformed<A: AnnotatedMatrix>(store: &A, seed: u32) -> Result<bool> {
    let x = store.require_layer(X_LAYER)?;
    let spliced = store.require_layer(SPLICED_LAYER)?;
    if x.n_genes() == 0 {
        return Ok(false);
    }

    let genes = MersenneTwister::new(seed).randint(x.n_genes(), N_PROBE_GENES);
    let x_totals = MatrixStats::sum(&x.select_genes(&genes), Axis(1));
    let spliced_totals = MatrixStats::sum(&spliced.select_genes(&genes), Axis(1));

    let close = x_totals
        .iter()
        .zip(spliced_totals.iter())
        .all(|(a, b)| (a - b).abs() <= 1e-4 + 1e-5 * b.abs());
    Ok(!close)
}
