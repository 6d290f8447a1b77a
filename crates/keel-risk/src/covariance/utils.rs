//! Utilities for covariance matrix manipulation
//!
//! This module provides the symmetric eigendecomposition used to inspect a
//! covariance matrix, and the conditioning step that guarantees every
//! eigenvalue is at least a small positive floor before optimization.

use super::CovarianceError;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Maximum cyclic Jacobi sweeps before giving up
pub const MAX_SWEEPS: usize = 100;

/// Off-diagonal Frobenius norm, relative to the full norm, treated as converged
const RELATIVE_TOLERANCE: f64 = 1e-14;

/// Result of eigenvalue decomposition
#[derive(Debug, Clone)]
pub struct EigenDecomposition {
    /// Eigenvalues (sorted in descending order)
    pub eigenvalues: Array1<f64>,
    /// Eigenvectors (columns are eigenvectors)
    pub eigenvectors: Array2<f64>,
    /// Sweeps used
    pub sweeps: usize,
}

impl EigenDecomposition {
    /// Smallest eigenvalue.
    pub fn min_eigenvalue(&self) -> f64 {
        self.eigenvalues
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min)
    }
}

/// What conditioning did to the matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ConditioningOutcome {
    /// Smallest eigenvalue already at or above the floor
    Unchanged {
        /// Smallest eigenvalue found
        min_eigenvalue: f64,
    },
    /// A multiple of the identity was added
    Shifted {
        /// Smallest eigenvalue before the shift
        min_eigenvalue: f64,
        /// Amount added to the diagonal
        shift: f64,
    },
    /// Decomposition failed and `epsilon * I` was substituted
    Substituted {
        /// Why the decomposition failed
        reason: String,
    },
}

/// A covariance matrix ready for optimization
#[derive(Debug, Clone)]
pub struct ConditionedCovariance {
    /// Conditioned matrix
    pub matrix: Array2<f64>,
    /// What was done to obtain it
    pub outcome: ConditioningOutcome,
}

impl ConditionedCovariance {
    /// Whether the original matrix had to be discarded.
    pub const fn is_degraded(&self) -> bool {
        matches!(self.outcome, ConditioningOutcome::Substituted { .. })
    }
}

/// Lift the spectrum of `cov` so its smallest eigenvalue is at least `epsilon`
///
/// If `lambda_min < epsilon`, `(|lambda_min| + epsilon) * I` is added. When the
/// eigendecomposition fails (non-finite entries or no convergence) the matrix is
/// replaced by `epsilon * I` and the outcome records the substitution.
///
/// # Errors
/// Returns [`CovarianceError::ConditioningFailed`] if even the substitute cannot
/// be decomposed, and [`CovarianceError::InvalidParameter`] for a non-positive
/// `epsilon`.
pub fn condition_covariance(
    cov: &Array2<f64>,
    epsilon: f64,
) -> Result<ConditionedCovariance, CovarianceError> {
    if !(epsilon > 0.0 && epsilon.is_finite()) {
        return Err(CovarianceError::InvalidParameter(format!(
            "epsilon must be positive and finite, got {epsilon}"
        )));
    }
    let n = cov.nrows();

    match jacobi_eigendecomp(cov, MAX_SWEEPS) {
        Ok(decomp) => {
            let min_eigenvalue = decomp.min_eigenvalue();
            if min_eigenvalue < epsilon {
                let shift = min_eigenvalue.abs() + epsilon;
                debug!(min_eigenvalue, shift, "Shifting covariance spectrum");
                let matrix = cov + &(Array2::<f64>::eye(n) * shift);
                Ok(ConditionedCovariance {
                    matrix,
                    outcome: ConditioningOutcome::Shifted {
                        min_eigenvalue,
                        shift,
                    },
                })
            } else {
                Ok(ConditionedCovariance {
                    matrix: cov.clone(),
                    outcome: ConditioningOutcome::Unchanged { min_eigenvalue },
                })
            }
        }
        Err(e) => {
            warn!(error = %e, epsilon, "Eigendecomposition failed, substituting epsilon * I");
            let substitute = Array2::<f64>::eye(n) * epsilon;
            let check = jacobi_eigendecomp(&substitute, MAX_SWEEPS)
                .map_err(|e2| CovarianceError::ConditioningFailed(e2.to_string()))?;
            if check.min_eigenvalue() < epsilon * (1.0 - 1e-12) {
                return Err(CovarianceError::ConditioningFailed(
                    "substitute matrix is not positive definite".to_string(),
                ));
            }
            Ok(ConditionedCovariance {
                matrix: substitute,
                outcome: ConditioningOutcome::Substituted {
                    reason: e.to_string(),
                },
            })
        }
    }
}

/// Smallest eigenvalue of a symmetric matrix
///
/// # Errors
/// Propagates decomposition failures.
pub fn min_eigenvalue(matrix: &Array2<f64>) -> Result<f64, CovarianceError> {
    Ok(jacobi_eigendecomp(matrix, MAX_SWEEPS)?.min_eigenvalue())
}

/// Check if a matrix is positive definite with a custom tolerance
///
/// # Returns
/// * `true` if the matrix is square and all eigenvalues are greater than tolerance
pub fn is_positive_definite(cov: &Array2<f64>, tolerance: f64) -> bool {
    if cov.nrows() != cov.ncols() {
        return false;
    }

    // Quick check: diagonal elements must be positive
    for i in 0..cov.nrows() {
        if cov[[i, i]] <= 0.0 {
            return false;
        }
    }

    match jacobi_eigendecomp(cov, MAX_SWEEPS) {
        Ok(decomp) => decomp.eigenvalues.iter().all(|&v| v > tolerance),
        Err(_) => false,
    }
}

/// Cyclic Jacobi eigenvalue decomposition for symmetric matrices
///
/// Each sweep rotates away every off-diagonal pair in row order. Iteration stops
/// once the off-diagonal Frobenius norm is negligible relative to the matrix.
///
/// # Arguments
/// * `matrix` - Symmetric matrix to decompose
/// * `max_sweeps` - Maximum number of full sweeps
///
/// # Returns
/// * Eigenvalues and eigenvectors
///
/// # Errors
/// Fails on non-square or non-finite input, or when the sweeps do not converge.
pub fn jacobi_eigendecomp(
    matrix: &Array2<f64>,
    max_sweeps: usize,
) -> Result<EigenDecomposition, CovarianceError> {
    let n = matrix.nrows();
    if n != matrix.ncols() {
        return Err(CovarianceError::DimensionMismatch {
            expected: n,
            actual: matrix.ncols(),
        });
    }
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(CovarianceError::NonFinite);
    }

    // Initialize: A = symmetrized input, V = identity
    let mut a = (matrix + &matrix.t()) / 2.0;
    let mut v = Array2::<f64>::eye(n);
    let total_norm = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let threshold = RELATIVE_TOLERANCE * total_norm;

    let mut sweeps = 0;
    loop {
        if off_diagonal_norm(&a) <= threshold {
            break;
        }
        if sweeps == max_sweeps {
            return Err(CovarianceError::NoConvergence { sweeps });
        }
        for p in 0..n {
            for q in (p + 1)..n {
                if a[[p, q]] == 0.0 {
                    continue;
                }
                let (cos_theta, sin_theta) = compute_rotation(a[[p, p]], a[[q, q]], a[[p, q]]);
                apply_jacobi_rotation(&mut a, &mut v, p, q, cos_theta, sin_theta);
            }
        }
        sweeps += 1;
    }

    let eigenvalues: Array1<f64> = a.diag().to_owned();
    if eigenvalues.iter().any(|v| !v.is_finite()) {
        return Err(CovarianceError::NonFinite);
    }

    // Sort eigenvalues and eigenvectors in descending order
    let mut indices: Vec<usize> = (0..n).collect();
    indices.sort_by(|&i, &j| eigenvalues[j].total_cmp(&eigenvalues[i]));

    let sorted_eigenvalues = indices.iter().map(|&i| eigenvalues[i]).collect();
    let mut sorted_eigenvectors = Array2::<f64>::zeros((n, n));
    for (new_idx, &old_idx) in indices.iter().enumerate() {
        sorted_eigenvectors
            .column_mut(new_idx)
            .assign(&v.column(old_idx));
    }

    Ok(EigenDecomposition {
        eigenvalues: sorted_eigenvalues,
        eigenvectors: sorted_eigenvectors,
        sweeps,
    })
}

fn off_diagonal_norm(matrix: &Array2<f64>) -> f64 {
    let n = matrix.nrows();
    let mut sum = 0.0;
    for i in 0..n {
        for j in (i + 1)..n {
            sum += 2.0 * matrix[[i, j]] * matrix[[i, j]];
        }
    }
    sum.sqrt()
}

/// Compute the rotation (cos, sin) that annihilates `a[p, q]`
fn compute_rotation(app: f64, aqq: f64, apq: f64) -> (f64, f64) {
    let tau = (aqq - app) / (2.0 * apq);
    let t = if tau >= 0.0 {
        1.0 / (tau + (1.0 + tau * tau).sqrt())
    } else {
        -1.0 / (-tau + (1.0 + tau * tau).sqrt())
    };

    let cos_theta = 1.0 / (1.0 + t * t).sqrt();
    let sin_theta = t * cos_theta;

    (cos_theta, sin_theta)
}

/// Apply a Jacobi rotation to matrix A and eigenvector matrix V
fn apply_jacobi_rotation(
    a: &mut Array2<f64>,
    v: &mut Array2<f64>,
    p: usize,
    q: usize,
    cos_theta: f64,
    sin_theta: f64,
) {
    let n = a.nrows();

    let app = a[[p, p]];
    let aqq = a[[q, q]];
    let apq = a[[p, q]];

    a[[p, p]] = cos_theta * cos_theta * app - 2.0 * cos_theta * sin_theta * apq
        + sin_theta * sin_theta * aqq;
    a[[q, q]] = sin_theta * sin_theta * app
        + 2.0 * cos_theta * sin_theta * apq
        + cos_theta * cos_theta * aqq;
    a[[p, q]] = 0.0;
    a[[q, p]] = 0.0;

    for i in 0..n {
        if i != p && i != q {
            let aip = a[[i, p]];
            let aiq = a[[i, q]];

            a[[i, p]] = cos_theta * aip - sin_theta * aiq;
            a[[p, i]] = a[[i, p]];

            a[[i, q]] = sin_theta * aip + cos_theta * aiq;
            a[[q, i]] = a[[i, q]];
        }
    }

    for i in 0..n {
        let vip = v[[i, p]];
        let viq = v[[i, q]];

        v[[i, p]] = cos_theta * vip - sin_theta * viq;
        v[[i, q]] = sin_theta * vip + cos_theta * viq;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_jacobi_eigendecomp_identity() {
        let decomp = jacobi_eigendecomp(&Array2::<f64>::eye(3), MAX_SWEEPS).unwrap();
        for &val in decomp.eigenvalues.iter() {
            assert_abs_diff_eq!(val, 1.0, epsilon = 1e-12);
        }
        assert_eq!(decomp.sweeps, 0);
    }

    #[test]
    fn test_jacobi_eigendecomp_symmetric() {
        let matrix = array![[4.0, 1.0, 0.5], [1.0, 3.0, 0.2], [0.5, 0.2, 2.0]];
        let decomp = jacobi_eigendecomp(&matrix, MAX_SWEEPS).unwrap();

        // Trace and eigenvector equation A v = lambda v
        assert_abs_diff_eq!(decomp.eigenvalues.sum(), 9.0, epsilon = 1e-10);
        for k in 0..3 {
            let vk = decomp.eigenvectors.column(k);
            let av = matrix.dot(&vk);
            for i in 0..3 {
                assert_abs_diff_eq!(av[i], decomp.eigenvalues[k] * vk[i], epsilon = 1e-10);
            }
        }
        assert!(decomp.eigenvalues[0] >= decomp.eigenvalues[1]);
        assert!(decomp.eigenvalues[1] >= decomp.eigenvalues[2]);
    }

    #[test]
    fn test_non_finite_input_fails() {
        let matrix = array![[1.0, f64::NAN], [f64::NAN, 1.0]];
        assert!(matches!(
            jacobi_eigendecomp(&matrix, MAX_SWEEPS),
            Err(CovarianceError::NonFinite)
        ));
    }

    #[test]
    fn test_sweep_budget_exhausted() {
        let matrix = array![[2.0, 1.0], [1.0, 2.0]];
        assert!(matches!(
            jacobi_eigendecomp(&matrix, 0),
            Err(CovarianceError::NoConvergence { sweeps: 0 })
        ));
    }

    #[test]
    fn test_condition_singular_matrix() {
        // Perfectly anti-correlated pair: eigenvalues 2 and 0
        let cov = array![[1.0, -1.0], [-1.0, 1.0]];
        let conditioned = condition_covariance(&cov, 1e-6).unwrap();

        assert!(matches!(
            conditioned.outcome,
            ConditioningOutcome::Shifted { .. }
        ));
        assert!(!conditioned.is_degraded());
        let min = min_eigenvalue(&conditioned.matrix).unwrap();
        assert!(min >= 1e-6 - 1e-12, "min eigenvalue {min}");
    }

    #[test]
    fn test_condition_indefinite_matrix() {
        let cov = array![[1.0, 2.0], [2.0, 1.0]];
        let conditioned = condition_covariance(&cov, 1e-6).unwrap();
        match conditioned.outcome {
            ConditioningOutcome::Shifted {
                min_eigenvalue,
                shift,
            } => {
                assert_abs_diff_eq!(min_eigenvalue, -1.0, epsilon = 1e-12);
                assert_abs_diff_eq!(shift, 1.0 + 1e-6, epsilon = 1e-12);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        let min = min_eigenvalue(&conditioned.matrix).unwrap();
        assert_abs_diff_eq!(min, 1e-6, epsilon = 1e-12);
    }

    #[test]
    fn test_well_conditioned_matrix_is_unchanged() {
        let cov = array![[2.0, 0.5], [0.5, 1.0]];
        let conditioned = condition_covariance(&cov, 1e-6).unwrap();
        assert!(matches!(
            conditioned.outcome,
            ConditioningOutcome::Unchanged { .. }
        ));
        assert_eq!(conditioned.matrix, cov);
    }

    #[test]
    fn test_non_finite_matrix_is_substituted() {
        let cov = array![[1.0, f64::INFINITY], [f64::INFINITY, 1.0]];
        let conditioned = condition_covariance(&cov, 1e-6).unwrap();
        assert!(conditioned.is_degraded());
        assert_eq!(conditioned.matrix, Array2::<f64>::eye(2) * 1e-6);
    }

    #[test]
    fn test_invalid_epsilon() {
        let cov = Array2::<f64>::eye(2);
        assert!(condition_covariance(&cov, 0.0).is_err());
    }

    #[test]
    fn test_is_positive_definite() {
        assert!(is_positive_definite(&array![[2.0, 0.5], [0.5, 1.0]], 1e-10));
        assert!(!is_positive_definite(&array![[1.0, 2.0], [2.0, 1.0]], 1e-10));
    }
}
