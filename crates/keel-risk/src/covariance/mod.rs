//! Asset covariance estimation and conditioning
//!
//! Provides the sample covariance of aligned asset returns and the numerical
//! repair that keeps it invertible before it reaches the optimizer.

pub mod sample;
pub mod utils;

pub use sample::SampleCovariance;
pub use utils::{
    ConditionedCovariance, ConditioningOutcome, EigenDecomposition, condition_covariance,
    is_positive_definite, jacobi_eigendecomp, min_eigenvalue,
};

use ndarray::Array2;
use thiserror::Error;

/// Errors that can occur during covariance estimation
#[derive(Debug, Error)]
pub enum CovarianceError {
    /// Insufficient data for estimation
    #[error("Insufficient data: need at least {required} observations, got {actual}")]
    InsufficientData {
        /// Required number of observations
        required: usize,
        /// Actual number of observations
        actual: usize,
    },

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension
        expected: usize,
        /// Actual dimension
        actual: usize,
    },

    /// Matrix contains NaN or infinite entries
    #[error("Matrix contains non-finite entries")]
    NonFinite,

    /// Jacobi sweeps did not bring the off-diagonal mass below tolerance
    #[error("Eigendecomposition did not converge after {sweeps} sweeps")]
    NoConvergence {
        /// Sweeps performed
        sweeps: usize,
    },

    /// Even the `epsilon * I` substitute could not be decomposed
    #[error("Covariance conditioning failed: {0}")]
    ConditioningFailed(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Trait for covariance matrix estimators
pub trait CovarianceEstimator {
    /// Estimate the covariance matrix from asset returns
    ///
    /// # Arguments
    /// * `returns` - Matrix where each row is a time period and each column is an asset
    ///
    /// # Returns
    /// * Estimated covariance matrix (N x N where N is number of assets)
    fn estimate(&self, returns: &Array2<f64>) -> Result<Array2<f64>, CovarianceError>;
}

/// A symmetric covariance matrix indexed by an ordered symbol list
#[derive(Debug, Clone)]
pub struct CovarianceMatrix {
    /// Row and column labels
    pub symbols: Vec<String>,
    /// K x K matrix
    pub matrix: Array2<f64>,
}

impl CovarianceMatrix {
    /// Pair a matrix with its labels.
    ///
    /// # Errors
    /// Returns an error if the matrix is not square or does not match the labels.
    pub fn new(symbols: Vec<String>, matrix: Array2<f64>) -> Result<Self, CovarianceError> {
        if matrix.nrows() != matrix.ncols() {
            return Err(CovarianceError::DimensionMismatch {
                expected: matrix.nrows(),
                actual: matrix.ncols(),
            });
        }
        if matrix.nrows() != symbols.len() {
            return Err(CovarianceError::DimensionMismatch {
                expected: symbols.len(),
                actual: matrix.nrows(),
            });
        }
        Ok(Self { symbols, matrix })
    }

    /// Number of assets.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the matrix is empty.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Restrict to the assets at `keep`, preserving order.
    pub fn select(&self, keep: &[usize]) -> Self {
        let symbols = keep.iter().map(|&i| self.symbols[i].clone()).collect();
        let matrix = Array2::from_shape_fn((keep.len(), keep.len()), |(i, j)| {
            self.matrix[[keep[i], keep[j]]]
        });
        Self { symbols, matrix }
    }
}
