//! Return series construction and panel alignment.
//!
//! Turns a validated [`PriceTable`] into per-symbol close-to-close simple
//! returns, volume percentage changes, and a market proxy. The panel can then
//! be aligned into a dense `T x N` matrix for covariance estimation.
//!
//! All tabular work runs as polars lazy queries over the long price frame;
//! results are read back into Rust types only once they are final.

use crate::{
    error::{DataError, Result},
    frame,
    quality::{DataQualityReport, QualityIssue, Stage},
    table::PriceTable,
};
use chrono::NaiveDate;
use ndarray::Array2;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// How gaps left after the coverage filter are handled during alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingReturnPolicy {
    /// Replace missing returns with zero and count the fills
    #[default]
    FillZero,
    /// Drop every date on which any retained symbol has no return
    DropDates,
}

/// Configuration for the return series builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReturnsConfig {
    /// Minimum fraction of panel dates a symbol must have returns on (default: 0.90)
    pub min_coverage: f64,
    /// Gap handling after the coverage filter (default: fill with zero)
    pub missing_policy: MissingReturnPolicy,
}

impl Default for ReturnsConfig {
    fn default() -> Self {
        Self {
            min_coverage: 0.90,
            missing_policy: MissingReturnPolicy::FillZero,
        }
    }
}

/// Source of the market-proxy return series.
#[derive(Debug, Clone, Default)]
pub enum MarketSource {
    /// Equal-weighted mean of all asset returns available on each date
    #[default]
    EqualWeighted,
    /// Externally supplied index returns
    External(ReturnSeries),
}

/// A date-indexed series of simple returns, sorted by date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReturnSeries {
    dates: Vec<NaiveDate>,
    values: Vec<f64>,
}

impl ReturnSeries {
    /// Build a series from parallel date and value vectors.
    ///
    /// Pairs are sorted by date. Later duplicates of a date are discarded.
    ///
    /// # Errors
    /// Returns an error if the vectors differ in length.
    pub fn new(dates: Vec<NaiveDate>, values: Vec<f64>) -> Result<Self> {
        if dates.len() != values.len() {
            return Err(DataError::InvalidParameter(format!(
                "{} dates but {} values",
                dates.len(),
                values.len()
            )));
        }
        let mut pairs: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for (d, v) in dates.into_iter().zip(values) {
            pairs.entry(d).or_insert(v);
        }
        Ok(pairs.into_iter().collect())
    }

    /// Dates, ascending.
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Values in date order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of observations.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the series is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value on a given date.
    pub fn get(&self, date: NaiveDate) -> Option<f64> {
        self.dates
            .binary_search(&date)
            .ok()
            .map(|idx| self.values[idx])
    }

    /// Arithmetic mean, `None` when empty.
    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
        }
    }

    /// Iterate over `(date, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.dates.iter().copied().zip(self.values.iter().copied())
    }
}

impl FromIterator<(NaiveDate, f64)> for ReturnSeries {
    fn from_iter<I: IntoIterator<Item = (NaiveDate, f64)>>(iter: I) -> Self {
        let (dates, values) = iter.into_iter().unzip();
        Self { dates, values }
    }
}

/// Derived series for one symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolReturns {
    /// Ticker
    pub symbol: String,
    /// Close-to-close simple returns
    pub close: ReturnSeries,
    /// Volume percentage changes
    pub volume: ReturnSeries,
}

/// Per-symbol return series plus the market proxy.
#[derive(Debug, Clone, Default)]
pub struct ReturnPanel {
    frame: DataFrame,
    series: BTreeMap<String, SymbolReturns>,
    market: ReturnSeries,
    quality: DataQualityReport,
}

impl ReturnPanel {
    /// Symbols in the panel, sorted. Includes symbols with empty series.
    pub fn symbols(&self) -> Vec<&str> {
        self.series.keys().map(String::as_str).collect()
    }

    /// Derived series for a symbol.
    pub fn get(&self, symbol: &str) -> Option<&SymbolReturns> {
        self.series.get(symbol)
    }

    /// Close returns for a symbol.
    pub fn close_returns(&self, symbol: &str) -> Option<&ReturnSeries> {
        self.series.get(symbol).map(|s| &s.close)
    }

    /// Iterate over every symbol's series in symbol order.
    pub fn iter(&self) -> impl Iterator<Item = &SymbolReturns> {
        self.series.values()
    }

    /// Market-proxy returns.
    pub const fn market(&self) -> &ReturnSeries {
        &self.market
    }

    /// Finite close returns in long format: `date, symbol, close_return`.
    pub const fn frame(&self) -> &DataFrame {
        &self.frame
    }

    /// Drops and fills applied while building the panel.
    pub const fn quality(&self) -> &DataQualityReport {
        &self.quality
    }

    /// Align close returns into a dense matrix.
    ///
    /// Symbols below `min_coverage` of the union of dates are excluded. Remaining
    /// gaps follow `missing_policy`. Quality events are recorded into `quality`.
    ///
    /// # Errors
    /// Returns [`DataError::InsufficientData`] when no symbol or no date survives.
    pub fn align(
        &self,
        config: &ReturnsConfig,
        quality: &mut DataQualityReport,
    ) -> Result<AlignedReturns> {
        let returns = self.frame.clone().lazy();

        let n_dates = frame::count(
            &returns
                .clone()
                .select([col("date").n_unique().alias("dates")])
                .collect()?,
            "dates",
        )?;
        if n_dates == 0 {
            return Err(DataError::InsufficientData {
                reason: "no symbol has any return observations".to_string(),
            });
        }

        let coverage = returns
            .clone()
            .group_by([col("symbol")])
            .agg([(col("date").count().cast(DataType::Float64) / lit(n_dates as f64))
                .alias("coverage")])
            .sort(["symbol"], SortMultipleOptions::default())
            .collect()?;

        let excluded = coverage
            .clone()
            .lazy()
            .filter(col("coverage").lt(lit(config.min_coverage)))
            .collect()?;
        for (symbol, symbol_coverage) in frame::strings(&excluded, "symbol")?
            .into_iter()
            .zip(frame::floats(&excluded, "coverage")?)
        {
            warn!(
                symbol = %symbol,
                coverage = symbol_coverage,
                min_coverage = config.min_coverage,
                "Excluding low-coverage symbol"
            );
            quality.record_symbol(Stage::Returns, QualityIssue::LowCoverage, &symbol);
        }

        let retained = coverage
            .lazy()
            .filter(col("coverage").gt_eq(lit(config.min_coverage)))
            .select([col("symbol")])
            .collect()?;
        let n_symbols = retained.height();
        if n_symbols == 0 {
            return Err(DataError::InsufficientData {
                reason: format!(
                    "no symbol reaches the minimum return coverage of {}",
                    config.min_coverage
                ),
            });
        }

        let kept = returns.join(
            retained.clone().lazy(),
            [col("symbol")],
            [col("symbol")],
            JoinArgs::new(JoinType::Inner),
        );
        let union = kept
            .clone()
            .select([col("date")])
            .unique_stable(None, UniqueKeepStrategy::First)
            .sort(["date"], SortMultipleOptions::default())
            .collect()?;

        let dates = match config.missing_policy {
            MissingReturnPolicy::FillZero => union,
            MissingReturnPolicy::DropDates => {
                let complete = kept
                    .clone()
                    .group_by([col("date")])
                    .agg([len().cast(DataType::Int64).alias("symbols")])
                    .filter(col("symbols").eq(lit(n_symbols as i64)))
                    .select([col("date")])
                    .sort(["date"], SortMultipleOptions::default())
                    .collect()?;
                quality.record(
                    Stage::Returns,
                    QualityIssue::DroppedDates,
                    union.height() - complete.height(),
                );
                complete
            }
        };
        if dates.height() == 0 {
            return Err(DataError::InsufficientData {
                reason: "no date has returns for every retained symbol".to_string(),
            });
        }

        // Every (date, symbol) pair, with nulls where a symbol has no return
        let grid = dates
            .clone()
            .lazy()
            .cross_join(retained.clone().lazy(), None)
            .join(
                kept,
                [col("date"), col("symbol")],
                [col("date"), col("symbol")],
                JoinArgs::new(JoinType::Left),
            )
            .sort(["date", "symbol"], SortMultipleOptions::default())
            .collect()?;
        let fills = grid.column("close_return")?.null_count();
        let filled = grid
            .lazy()
            .select([col("close_return").fill_null(lit(0.0))])
            .collect()?;
        quality.record(Stage::Returns, QualityIssue::FilledReturns, fills);

        let dates = frame::dates(&dates, "date")?;
        let matrix = Array2::from_shape_vec(
            (dates.len(), n_symbols),
            frame::floats(&filled, "close_return")?,
        )?;

        info!(
            dates = dates.len(),
            symbols = n_symbols,
            filled = fills,
            "Aligned return panel"
        );

        Ok(AlignedReturns {
            dates,
            symbols: frame::strings(&retained, "symbol")?,
            returns: matrix,
        })
    }
}

/// Dense `T x N` return matrix over a common date index.
#[derive(Debug, Clone)]
pub struct AlignedReturns {
    /// Row index
    pub dates: Vec<NaiveDate>,
    /// Column index, sorted
    pub symbols: Vec<String>,
    /// Returns, one row per date and one column per symbol
    pub returns: Array2<f64>,
}

impl AlignedReturns {
    /// Number of dates.
    pub fn n_periods(&self) -> usize {
        self.returns.nrows()
    }

    /// Number of symbols.
    pub fn n_assets(&self) -> usize {
        self.returns.ncols()
    }

    /// Historical mean return per symbol.
    pub fn mean_returns(&self) -> Vec<f64> {
        self.returns
            .mean_axis(ndarray::Axis(0))
            .map(|m| m.to_vec())
            .unwrap_or_default()
    }

    /// Column index of a symbol.
    pub fn index_of(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol)
    }
}

/// Builds a [`ReturnPanel`] from validated prices.
#[derive(Debug, Clone)]
pub struct ReturnsBuilder {
    config: ReturnsConfig,
}

impl ReturnsBuilder {
    /// Create a builder with a validated configuration.
    ///
    /// # Errors
    /// Returns an error if `min_coverage` is outside `[0, 1]`.
    pub fn new(config: ReturnsConfig) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.min_coverage) {
            return Err(DataError::InvalidParameter(format!(
                "min_coverage must be in [0, 1], got {}",
                config.min_coverage
            )));
        }
        Ok(Self { config })
    }

    /// Create a builder with the default configuration.
    pub fn try_default() -> Result<Self> {
        Self::new(ReturnsConfig::default())
    }

    /// Builder configuration.
    pub const fn config(&self) -> &ReturnsConfig {
        &self.config
    }

    /// Derive return series for every symbol in `table`.
    ///
    /// Symbols with fewer than two observations get empty series and are
    /// counted as short. Returns whose previous value is zero are dropped and
    /// counted as non-finite.
    ///
    /// # Errors
    /// Returns a polars error if a query over the price frame fails.
    pub fn build(&self, table: &PriceTable, market: MarketSource) -> Result<ReturnPanel> {
        let mut quality = DataQualityReport::new();
        let mut series: BTreeMap<String, SymbolReturns> = BTreeMap::new();
        for (symbol, observations) in table.iter() {
            if observations.len() < 2 {
                debug!(symbol, observations = observations.len(), "Short history");
                quality.record_symbol(Stage::Returns, QualityIssue::ShortHistory, symbol);
            }
            series.insert(
                symbol.to_string(),
                SymbolReturns {
                    symbol: symbol.to_string(),
                    ..Default::default()
                },
            );
        }

        let changes = table
            .frame()
            .clone()
            .lazy()
            .sort(["symbol", "date"], SortMultipleOptions::default())
            .with_columns([
                pct_change("close").alias("close_return"),
                pct_change("volume").alias("volume_change"),
            ])
            .select([
                col("date"),
                col("symbol"),
                col("close_return"),
                col("volume_change"),
            ])
            .collect()?;

        let dropped = changes
            .clone()
            .lazy()
            .select([
                non_finite("close_return").sum().alias("close"),
                non_finite("volume_change").sum().alias("volume"),
            ])
            .collect()?;
        quality.record(
            Stage::Returns,
            QualityIssue::NonFiniteReturns,
            frame::count(&dropped, "close")? + frame::count(&dropped, "volume")?,
        );

        let close = finite(&changes, "close_return")?;
        let volume = finite(&changes, "volume_change")?;
        for (symbol, returns) in split_by_symbol(&close, "close_return")? {
            if let Some(entry) = series.get_mut(&symbol) {
                entry.close = returns;
            }
        }
        for (symbol, changes) in split_by_symbol(&volume, "volume_change")? {
            if let Some(entry) = series.get_mut(&symbol) {
                entry.volume = changes;
            }
        }

        let market = match market {
            MarketSource::EqualWeighted => equal_weighted_market(&close)?,
            MarketSource::External(index) => index,
        };

        info!(
            symbols = series.len(),
            market_dates = market.len(),
            "Built return series"
        );

        Ok(ReturnPanel {
            frame: close,
            series,
            market,
            quality,
        })
    }
}

/// Percentage change from the previous row of the same symbol.
///
/// The first row of each symbol has no previous value and yields null.
fn pct_change(name: &str) -> Expr {
    col(name) / col(name).shift(lit(1)).over([col("symbol")]) - lit(1.0)
}

/// Changes that exist but are infinite or NaN.
fn non_finite(name: &str) -> Expr {
    col(name)
        .is_not_null()
        .and(col(name).is_finite().not())
}

/// Keep the rows where `name` is finite.
fn finite(changes: &DataFrame, name: &str) -> Result<DataFrame> {
    Ok(changes
        .clone()
        .lazy()
        .filter(col(name).is_finite())
        .select([col("date"), col("symbol"), col(name)])
        .collect()?)
}

/// Read a long frame sorted by symbol then date into per-symbol series.
fn split_by_symbol(long: &DataFrame, name: &str) -> Result<BTreeMap<String, ReturnSeries>> {
    let mut grouped: BTreeMap<String, Vec<(NaiveDate, f64)>> = BTreeMap::new();
    for ((symbol, date), value) in frame::strings(long, "symbol")?
        .into_iter()
        .zip(frame::dates(long, "date")?)
        .zip(frame::floats(long, name)?)
    {
        grouped.entry(symbol).or_default().push((date, value));
    }
    Ok(grouped
        .into_iter()
        .map(|(symbol, pairs)| (symbol, pairs.into_iter().collect()))
        .collect())
}

fn equal_weighted_market(close: &DataFrame) -> Result<ReturnSeries> {
    let market = close
        .clone()
        .lazy()
        .group_by([col("date")])
        .agg([col("close_return").mean().alias("market_return")])
        .sort(["date"], SortMultipleOptions::default())
        .collect()?;
    Ok(frame::dates(&market, "date")?
        .into_iter()
        .zip(frame::floats(&market, "market_return")?)
        .collect())
}
