//! Error types for data operations.

use thiserror::Error;

/// Result type for data operations.
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors that can occur while ingesting prices or building return series.
#[derive(Debug, Error)]
pub enum DataError {
    /// Input table is missing one or more required columns
    #[error("Input schema error: missing required columns {0:?}")]
    MissingColumns(Vec<String>),

    /// Data parsing error
    #[error("Data parsing error: {0}")]
    Parse(String),

    /// Not enough usable data left to continue
    #[error("Insufficient data: {reason}")]
    InsufficientData {
        /// What was missing
        reason: String,
    },

    /// Invalid configuration parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Polars error
    #[error("Polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    /// Array shape error
    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl DataError {
    /// Whether the error is an input-schema problem that must abort the run.
    pub const fn is_schema_error(&self) -> bool {
        matches!(self, Self::MissingColumns(_))
    }
}
