//! MacKinnon response surfaces for the constant-only Dickey-Fuller test.
//!
//! p-values follow MacKinnon (1994), critical values follow the finite-sample
//! surface of MacKinnon (2010), both for a single series with a constant term.

use super::CriticalValues;
use statrs::distribution::{ContinuousCDF, Normal};

/// Statistic above which the p-value is 1.
const TAU_MAX: f64 = 2.74;
/// Statistic below which the p-value is 0.
const TAU_MIN: f64 = -18.83;
/// Boundary between the small-p and large-p polynomials.
const TAU_STAR: f64 = -1.61;

const SMALL_P: [f64; 3] = [2.1659, 1.4412, 0.038269];
const LARGE_P: [f64; 4] = [1.7339, 0.93202, -0.12745, -0.010368];

/// `[c0, c1, c2, c3]` with `crit = c0 + c1/n + c2/n^2 + c3/n^3`.
const CRIT_1PCT: [f64; 4] = [-3.43035, -6.5393, -16.786, -79.433];
const CRIT_5PCT: [f64; 4] = [-2.86154, -2.8903, -4.234, -40.040];
const CRIT_10PCT: [f64; 4] = [-2.56677, -1.5384, -2.809, 0.0];

fn polyval(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// Approximate p-value of an ADF statistic.
pub(crate) fn p_value(statistic: f64) -> f64 {
    if statistic > TAU_MAX {
        return 1.0;
    }
    if statistic < TAU_MIN {
        return 0.0;
    }
    let z = if statistic <= TAU_STAR {
        polyval(&SMALL_P, statistic)
    } else {
        polyval(&LARGE_P, statistic)
    };
    match Normal::new(0.0, 1.0) {
        Ok(normal) => normal.cdf(z),
        Err(_) => f64::NAN,
    }
}

/// Finite-sample critical values for `nobs` regression observations.
pub(crate) fn critical_values(nobs: usize) -> CriticalValues {
    let inv = 1.0 / nobs.max(1) as f64;
    CriticalValues {
        one_percent: polyval(&CRIT_1PCT, inv),
        five_percent: polyval(&CRIT_5PCT, inv),
        ten_percent: polyval(&CRIT_10PCT, inv),
    }
}
