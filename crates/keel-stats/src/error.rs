//! Error types for statistical routines.

use thiserror::Error;

/// Result type for statistical routines.
pub type Result<T> = std::result::Result<T, StatsError>;

/// Errors raised by regressions and unit-root tests.
#[derive(Debug, Error)]
pub enum StatsError {
    /// Series too short for the requested computation
    #[error("Insufficient data: need at least {required} observations, got {actual}")]
    InsufficientData {
        /// Minimum number of observations
        required: usize,
        /// Observations supplied
        actual: usize,
    },

    /// Input contains NaN or infinite values
    #[error("Series contains non-finite values")]
    NonFinite,

    /// Design matrix is rank deficient
    #[error("Singular design matrix")]
    SingularDesign,

    /// Dimension mismatch between response and regressors
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid configuration parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}
