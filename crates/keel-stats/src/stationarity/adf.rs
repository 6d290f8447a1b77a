//! Augmented Dickey-Fuller regression with AIC lag selection.
//!
//! The test regresses `dx_t` on a constant, the lagged level `x_{t-1}` and `p`
//! lagged differences. Candidate lags are compared on the sample left after
//! reserving `maxlag` differences, then the winner is refitted on every row
//! its own lag order allows.

use super::{CriticalValues, mackinnon};
use crate::{
    error::{Result, StatsError},
    ols::{OlsFit, ols},
};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Shortest series the regression can be fitted on.
pub const MIN_OBSERVATIONS: usize = 4;

/// Outcome of one ADF test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdfTest {
    /// t-statistic of the lagged level coefficient
    pub statistic: f64,
    /// MacKinnon approximate p-value
    pub p_value: f64,
    /// Lagged differences included
    pub lags_used: usize,
    /// Observations in the final regression
    pub nobs: usize,
    /// Finite-sample critical values
    pub critical_values: CriticalValues,
}

/// Schwert rule `ceil(12 * (n / 100)^(1/4))`, capped at `n / 2 - 2`.
pub(crate) fn default_max_lag(n: usize) -> usize {
    let schwert = (12.0 * (n as f64 / 100.0).powf(0.25)).ceil() as usize;
    schwert.min((n / 2).saturating_sub(2))
}

fn difference(x: &[f64]) -> Vec<f64> {
    x.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Fit the ADF regression with `lags` lagged differences on the last `nobs` rows.
fn fit(x: &[f64], dx: &[f64], lags: usize, nobs: usize) -> Result<OlsFit> {
    let start = dx.len() - nobs;
    let k = 2 + lags;
    let mut design = Array2::<f64>::zeros((nobs, k));
    let mut response = Array1::<f64>::zeros(nobs);

    for (row, t) in (start..dx.len()).enumerate() {
        response[row] = dx[t];
        design[[row, 0]] = 1.0;
        design[[row, 1]] = x[t];
        for i in 1..=lags {
            design[[row, 1 + i]] = dx[t - i];
        }
    }
    ols(response.view(), &design)
}

/// Run the augmented Dickey-Fuller test with a constant term.
///
/// `max_lag` defaults to the Schwert rule. The lag minimizing AIC is selected.
///
/// # Errors
/// Fails on series shorter than [`MIN_OBSERVATIONS`], on non-finite values, and
/// on degenerate (for example constant) series whose regression is singular.
pub fn adf(x: &[f64], max_lag: Option<usize>) -> Result<AdfTest> {
    let n = x.len();
    if n < MIN_OBSERVATIONS {
        return Err(StatsError::InsufficientData {
            required: MIN_OBSERVATIONS,
            actual: n,
        });
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(StatsError::NonFinite);
    }

    let cap = default_max_lag(n);
    let max_lag = max_lag.map_or(cap, |m| m.min(cap));
    let dx = difference(x);

    let common_nobs = dx.len() - max_lag;
    let mut best: Option<(f64, usize)> = None;
    for lag in 0..=max_lag {
        // Rank-deficient candidates (exactly periodic differences) are not selectable
        let Ok(candidate) = fit(x, &dx, lag, common_nobs) else {
            continue;
        };
        let aic = candidate.aic();
        if aic.is_finite() && best.is_none_or(|(score, _)| aic < score) {
            best = Some((aic, lag));
        }
    }
    let lags_used = best.map_or(0, |(_, lag)| lag);

    let final_fit = fit(x, &dx, lags_used, dx.len() - lags_used)?;
    let statistic = final_fit.t_value(1);
    if !statistic.is_finite() {
        return Err(StatsError::SingularDesign);
    }

    Ok(AdfTest {
        statistic,
        p_value: mackinnon::p_value(statistic),
        lags_used,
        nobs: final_fit.nobs,
        critical_values: mackinnon::critical_values(final_fit.nobs),
    })
}
