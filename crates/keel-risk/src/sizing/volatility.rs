//! Close-price volatility proxy used for stop distances

use keel_data::{PriceTable, Result, frame};
use polars::prelude::*;
use std::collections::BTreeMap;

/// Volatility below this fraction of the last close is rounding noise left by
/// the rolling variance of a flat series.
const FLAT_TOLERANCE: f64 = 1e-9;

/// Latest rolling sample standard deviation (`ddof = 1`) of closes per symbol.
///
/// Each symbol's value covers its last `window` closes. Symbols with fewer
/// closes, or with a flat or non-finite result, are left out.
///
/// # Errors
/// Returns an error if the query over the price frame fails.
pub fn rolling_volatility(table: &PriceTable, window: usize) -> Result<BTreeMap<String, f64>> {
    let latest = table
        .frame()
        .clone()
        .lazy()
        .sort(["symbol", "date"], SortMultipleOptions::default())
        .with_column(
            col("close")
                .rolling_std(RollingOptionsFixedWindow {
                    window_size: window,
                    min_periods: window,
                    ..Default::default()
                })
                .over([col("symbol")])
                .alias("volatility"),
        )
        .group_by([col("symbol")])
        .agg([col("volatility").last(), col("close").last()])
        .filter(
            col("volatility")
                .is_finite()
                .and(col("volatility").gt(col("close") * lit(FLAT_TOLERANCE))),
        )
        .collect()?;

    Ok(frame::strings(&latest, "symbol")?
        .into_iter()
        .zip(frame::floats(&latest, "volatility")?)
        .collect())
}
