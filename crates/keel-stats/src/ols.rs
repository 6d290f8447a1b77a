//! Ordinary least squares.

use crate::{
    error::{Result, StatsError},
    linalg::Cholesky,
};
use ndarray::{Array1, Array2, ArrayView1};

/// Fitted OLS regression.
#[derive(Debug, Clone)]
pub struct OlsFit {
    /// Coefficients, in design-matrix column order
    pub coefficients: Array1<f64>,
    /// Standard errors of the coefficients
    pub std_errors: Array1<f64>,
    /// Residual sum of squares
    pub sse: f64,
    /// Residual variance `sse / (n - k)`, NaN for an exactly determined fit
    pub sigma2: f64,
    /// Centered R², `1 - sse / sst`
    pub r_squared: f64,
    /// Observations used
    pub nobs: usize,
    /// Number of regressors
    pub k: usize,
}

impl OlsFit {
    /// t-statistic of coefficient `i`.
    pub fn t_value(&self, i: usize) -> f64 {
        self.coefficients[i] / self.std_errors[i]
    }

    /// Akaike information criterion up to an additive constant, `n ln(sse / n) + 2k`.
    pub fn aic(&self) -> f64 {
        let n = self.nobs as f64;
        n * (self.sse / n).ln() + 2.0 * self.k as f64
    }
}

/// Regress `y` on the columns of `x`.
///
/// No intercept is added; include a column of ones if one is wanted. With
/// `nobs == k` the fit is exact and has no residual degrees of freedom, so
/// `sigma2` and the standard errors are NaN.
///
/// # Errors
/// Fails when the dimensions disagree, when `nobs < k`, or when `x'x` is singular.
pub fn ols(y: ArrayView1<'_, f64>, x: &Array2<f64>) -> Result<OlsFit> {
    let n = y.len();
    let k = x.ncols();
    if x.nrows() != n {
        return Err(StatsError::DimensionMismatch {
            expected: n,
            actual: x.nrows(),
        });
    }
    if n < k {
        return Err(StatsError::InsufficientData {
            required: k,
            actual: n,
        });
    }

    let xtx = x.t().dot(x);
    let xty = x.t().dot(&y);
    let chol = Cholesky::new(&xtx)?;
    let coefficients = chol.solve(xty.view());

    let residuals = &y - &x.dot(&coefficients);
    let sse = residuals.dot(&residuals);
    let (sigma2, std_errors) = if n > k {
        let sigma2 = (sse / (n - k) as f64).max(0.0);
        let std_errors = chol.inverse_diagonal().mapv(|d| (d * sigma2).max(0.0).sqrt());
        (sigma2, std_errors)
    } else {
        (f64::NAN, Array1::from_elem(k, f64::NAN))
    };

    let mean = y.sum() / n as f64;
    let sst = y.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
    let r_squared = if sst > 0.0 { 1.0 - sse / sst } else { 0.0 };

    Ok(OlsFit {
        coefficients,
        std_errors,
        sse,
        sigma2,
        r_squared,
        nobs: n,
        k,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, array};

    #[test]
    fn test_exact_line() {
        let xs = array![1.0, 2.0, 3.0, 4.0, 5.0];
        let y = xs.mapv(|v| 0.5 + 2.0 * v);
        let mut x = Array2::ones((5, 2));
        x.column_mut(1).assign(&xs);

        let fit = ols(y.view(), &x).unwrap();
        assert_abs_diff_eq!(fit.coefficients[0], 0.5, epsilon = 1e-10);
        assert_abs_diff_eq!(fit.coefficients[1], 2.0, epsilon = 1e-10);
        assert_abs_diff_eq!(fit.r_squared, 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(fit.sse, 0.0, epsilon = 1e-18);
    }

    #[test]
    fn test_standard_errors() {
        // y = [1, 3, 2, 5, 4] on x = [1..5]: slope 0.8, intercept 0.6, sse 3.6
        let y = array![1.0, 3.0, 2.0, 5.0, 4.0];
        let mut x = Array2::ones((5, 2));
        x.column_mut(1)
            .assign(&Array1::from(vec![1.0, 2.0, 3.0, 4.0, 5.0]));

        let fit = ols(y.view(), &x).unwrap();
        assert_abs_diff_eq!(fit.coefficients[1], 0.8, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.coefficients[0], 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.sse, 3.6, epsilon = 1e-12);
        // se(slope) = sqrt(sigma2 / Sxx) = sqrt(1.2 / 10)
        assert_abs_diff_eq!(fit.std_errors[1], (0.12_f64).sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(fit.r_squared, 0.64, epsilon = 1e-12);
    }

    #[test]
    fn test_too_few_observations() {
        let y = array![1.0];
        let x = Array2::ones((1, 2));
        assert!(matches!(
            ols(y.view(), &x),
            Err(StatsError::InsufficientData { required: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_exactly_determined() {
        let y = array![1.0, 5.0];
        let x = array![[1.0, 0.0], [1.0, 2.0]];
        let fit = ols(y.view(), &x).unwrap();

        assert_abs_diff_eq!(fit.coefficients[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.coefficients[1], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fit.r_squared, 1.0, epsilon = 1e-12);
        assert!(fit.sigma2.is_nan());
        assert!(fit.std_errors.iter().all(|se| se.is_nan()));
    }

    #[test]
    fn test_collinear_design() {
        let y = array![1.0, 2.0, 3.0, 4.0];
        let x = Array2::ones((4, 2));
        assert!(matches!(ols(y.view(), &x), Err(StatsError::SingularDesign)));
    }
}
