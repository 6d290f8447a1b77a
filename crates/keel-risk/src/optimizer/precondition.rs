//! Input preparation ahead of the solver

use ndarray::{Array1, Array2};

/// Quantile of `values` with linear interpolation between order statistics.
///
/// `values` must be non-empty and free of NaN.
pub(crate) fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let h = (sorted.len() - 1) as f64 * q.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Clamp every entry into the `[lower, upper]` quantile band.
pub(crate) fn winsorize(values: &Array1<f64>, lower: f64, upper: f64) -> Array1<f64> {
    if values.is_empty() {
        return values.clone();
    }
    let slice: Vec<f64> = values.to_vec();
    let lo = quantile(&slice, lower);
    let hi = quantile(&slice, upper);
    values.mapv(|v| v.clamp(lo, hi))
}

/// Divide by the largest absolute entry. Returns the matrix and the scale.
///
/// A zero matrix is returned unchanged with scale one.
pub(crate) fn normalize_scale(matrix: &Array2<f64>) -> (Array2<f64>, f64) {
    let scale = matrix.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    if scale > 0.0 && scale.is_finite() {
        (matrix / scale, scale)
    } else {
        (matrix.clone(), 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_quantile_linear() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_abs_diff_eq!(quantile(&v, 0.5), 3.0, epsilon = 1e-15);
        assert_abs_diff_eq!(quantile(&v, 0.05), 1.2, epsilon = 1e-12);
        assert_abs_diff_eq!(quantile(&v, 0.95), 4.8, epsilon = 1e-12);
        assert_abs_diff_eq!(quantile(&[7.0], 0.3), 7.0, epsilon = 1e-15);
    }

    #[test]
    fn test_winsorize() {
        let mu = array![1.0, 2.0, 3.0, 4.0, 100.0];
        let w = winsorize(&mu, 0.05, 0.95);
        // 95th percentile: 4 + 0.8 * 96
        assert_abs_diff_eq!(w[4], 80.8, epsilon = 1e-10);
        assert_abs_diff_eq!(w[0], 1.2, epsilon = 1e-12);
        assert_eq!(w[2], 3.0);
    }

    #[test]
    fn test_normalize_scale() {
        let m = array![[4.0, -8.0], [-8.0, 2.0]];
        let (scaled, scale) = normalize_scale(&m);
        assert_eq!(scale, 8.0);
        assert_eq!(scaled[[0, 1]], -1.0);

        let (zero, unit) = normalize_scale(&Array2::zeros((2, 2)));
        assert_eq!(unit, 1.0);
        assert_eq!(zero.sum(), 0.0);
    }
}
