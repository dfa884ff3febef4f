//! Error types for rust_scselect

use thiserror::Error;

/// Main error type for gene selection and sampling operations
#[derive(Error, Debug)]
pub enum ScError {
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Missing key '{key}' in {location}")]
    MissingKey { key: String, location: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Invalid expression matrix: {reason}")]
    InvalidMatrix { reason: String },

    #[error("Empty data: {reason}")]
    EmptyData { reason: String },

    #[error("Dispersion fit failed: {reason}")]
    DispersionFitFailed { reason: String },

    #[error("Regression failed: {reason}")]
    RegressionFailed { reason: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result type alias for rust_scselect operations
pub type Result<T> = std::result::Result<T, ScError>;
