//! Data structures for single-cell expression analysis

mod dataset;
mod matrix;
mod metadata;

pub use dataset::{AnnotatedMatrix, CellDataSet, X_LAYER};
pub use matrix::{ExpressionMatrix, MatrixStats, GINI_EPSILON};
pub use metadata::{CellMetadata, Column, GeneMetadata};
