//! Small dense linear-algebra helpers.
//!
//! The systems solved here are tiny (regressors of a single-equation fit, or
//! the free set of a portfolio QP), so a plain Cholesky factorization on
//! `ndarray` storage is enough.

use crate::error::{Result, StatsError};
use ndarray::{Array1, Array2, ArrayView1};

/// Pivots below this are treated as zero.
const PIVOT_TOLERANCE: f64 = 1e-14;

/// Lower-triangular Cholesky factor `L` with `A = L L'`.
#[derive(Debug, Clone)]
pub struct Cholesky {
    lower: Array2<f64>,
}

impl Cholesky {
    /// Factor a symmetric positive-definite matrix.
    ///
    /// # Errors
    /// Returns [`StatsError::SingularDesign`] if a pivot is not positive or the
    /// matrix contains non-finite entries, and a dimension error if it is not square.
    pub fn new(a: &Array2<f64>) -> Result<Self> {
        let n = a.nrows();
        if a.ncols() != n {
            return Err(StatsError::DimensionMismatch {
                expected: n,
                actual: a.ncols(),
            });
        }
        let scale = a.diag().iter().fold(0.0_f64, |m, v| m.max(v.abs())).max(1.0);

        let mut lower = Array2::<f64>::zeros((n, n));
        for j in 0..n {
            let mut diag = a[[j, j]];
            for k in 0..j {
                diag -= lower[[j, k]] * lower[[j, k]];
            }
            if !diag.is_finite() || diag <= PIVOT_TOLERANCE * scale {
                return Err(StatsError::SingularDesign);
            }
            let pivot = diag.sqrt();
            lower[[j, j]] = pivot;
            for i in (j + 1)..n {
                let mut sum = a[[i, j]];
                for k in 0..j {
                    sum -= lower[[i, k]] * lower[[j, k]];
                }
                lower[[i, j]] = sum / pivot;
            }
        }
        Ok(Self { lower })
    }

    /// Dimension of the factored matrix.
    pub fn dim(&self) -> usize {
        self.lower.nrows()
    }

    /// Solve `A x = b`.
    pub fn solve(&self, b: ArrayView1<'_, f64>) -> Array1<f64> {
        let n = self.dim();
        let l = &self.lower;

        // L z = b
        let mut z = Array1::<f64>::zeros(n);
        for i in 0..n {
            let mut sum = b[i];
            for k in 0..i {
                sum -= l[[i, k]] * z[k];
            }
            z[i] = sum / l[[i, i]];
        }

        // L' x = z
        let mut x = Array1::<f64>::zeros(n);
        for i in (0..n).rev() {
            let mut sum = z[i];
            for k in (i + 1)..n {
                sum -= l[[k, i]] * x[k];
            }
            x[i] = sum / l[[i, i]];
        }
        x
    }

    /// Diagonal of `A^-1`.
    pub fn inverse_diagonal(&self) -> Array1<f64> {
        let n = self.dim();
        let mut diag = Array1::<f64>::zeros(n);
        let mut unit = Array1::<f64>::zeros(n);
        for i in 0..n {
            unit[i] = 1.0;
            diag[i] = self.solve(unit.view())[i];
            unit[i] = 0.0;
        }
        diag
    }
}
