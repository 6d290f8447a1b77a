//! Sample covariance estimator
//!
//! Unbiased (`ddof = 1`) covariance of aligned asset returns.

use super::{CovarianceError, CovarianceEstimator};
use ndarray::{Array2, Axis};

/// Sample covariance with a configurable delta degrees of freedom
#[derive(Debug, Clone, Copy)]
pub struct SampleCovariance {
    ddof: usize,
}

impl Default for SampleCovariance {
    fn default() -> Self {
        Self { ddof: 1 }
    }
}

impl SampleCovariance {
    /// Create an estimator dividing by `T - ddof`.
    pub const fn with_ddof(ddof: usize) -> Self {
        Self { ddof }
    }
}

impl CovarianceEstimator for SampleCovariance {
    fn estimate(&self, returns: &Array2<f64>) -> Result<Array2<f64>, CovarianceError> {
        let n_periods = returns.nrows();
        if n_periods <= self.ddof {
            return Err(CovarianceError::InsufficientData {
                required: self.ddof + 1,
                actual: n_periods,
            });
        }

        let mean = returns
            .mean_axis(Axis(0))
            .ok_or(CovarianceError::InsufficientData {
                required: 1,
                actual: 0,
            })?;
        let centered = returns - &mean;
        let cov = centered.t().dot(&centered) / (n_periods - self.ddof) as f64;

        Ok(cov)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_sample_covariance() {
        let returns = array![[0.01, 0.02], [0.03, -0.01], [-0.02, 0.00]];
        let cov = SampleCovariance::default().estimate(&returns).unwrap();

        // means: 0.00666..., 0.00333...
        let var_a = ((0.01_f64 - 0.02 / 3.0).powi(2)
            + (0.03_f64 - 0.02 / 3.0).powi(2)
            + (-0.02_f64 - 0.02 / 3.0).powi(2))
            / 2.0;
        assert_abs_diff_eq!(cov[[0, 0]], var_a, epsilon = 1e-15);
        assert_abs_diff_eq!(cov[[0, 1]], cov[[1, 0]], epsilon = 1e-18);
    }

    #[test]
    fn test_anti_correlated_pair() {
        let returns = array![[0.01, -0.01], [-0.01, 0.01], [0.01, -0.01], [-0.01, 0.01]];
        let cov = SampleCovariance::default().estimate(&returns).unwrap();
        assert_abs_diff_eq!(cov[[0, 1]], -cov[[0, 0]], epsilon = 1e-18);
    }

    #[test]
    fn test_single_period_is_insufficient() {
        let returns = array![[0.01, 0.02]];
        assert!(SampleCovariance::default().estimate(&returns).is_err());
    }
}
