//! Price table ingestion.
//!
//! Converts a polars `DataFrame` of daily OHLCV rows into a validated long
//! frame and per-symbol observation lists sorted by date. Column names are
//! matched case-insensitively, extra columns (indicators and the like) are
//! ignored.

use crate::{
    error::{DataError, Result},
    frame,
    quality::{DataQualityReport, QualityIssue, Stage},
};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Columns every input table must carry (matched case-insensitively).
pub const REQUIRED_COLUMNS: [&str; 7] = ["date", "symbol", "open", "high", "low", "close", "volume"];

const PRICE_FIELDS: [&str; 5] = ["open", "high", "low", "close", "volume"];

const ROW_OK: &str = "ok";
const ROW_INVALID: &str = "invalid";
const ROW_NEGATIVE_CLOSE: &str = "negative_close";

/// A single daily bar for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    /// Ticker, normalized to uppercase
    pub symbol: String,
    /// Trading date
    pub date: NaiveDate,
    /// Opening price
    pub open: f64,
    /// Session high
    pub high: f64,
    /// Session low
    pub low: f64,
    /// Closing price
    pub close: f64,
    /// Traded volume
    pub volume: f64,
}

/// Validated price history for a universe of symbols.
///
/// The validated rows are kept as a long frame with lowercase columns
/// `date, symbol, open, high, low, close, volume`, sorted by symbol then date,
/// and as per-symbol observation lists. Every row that was dropped on the way
/// in is counted in [`PriceTable::quality`].
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    frame: DataFrame,
    series: BTreeMap<String, Vec<PriceObservation>>,
    quality: DataQualityReport,
}

impl PriceTable {
    /// Build a table from a polars `DataFrame`.
    ///
    /// Dates may be stored as `Date`, `Datetime` or `YYYY-MM-DD` strings.
    ///
    /// # Errors
    /// Returns [`DataError::MissingColumns`] if any required column is absent,
    /// or a polars error if a column cannot be cast to its expected type.
    pub fn from_frame(frame: &DataFrame) -> Result<Self> {
        let resolved = resolve_columns(frame)?;
        let [date, symbol, open, high, low, close, volume] = &resolved;

        let normalized = frame.clone().lazy().select([
            date_expr(frame.column(date)?.dtype(), date)?.alias("date"),
            col(symbol.as_str()).cast(DataType::String).alias("symbol"),
            col(open.as_str()).cast(DataType::Float64).alias("open"),
            col(high.as_str()).cast(DataType::Float64).alias("high"),
            col(low.as_str()).cast(DataType::Float64).alias("low"),
            col(close.as_str()).cast(DataType::Float64).alias("close"),
            col(volume.as_str()).cast(DataType::Float64).alias("volume"),
        ]);
        Self::validate(normalized)
    }

    /// Build a table from already-parsed observations.
    ///
    /// The same validation as [`PriceTable::from_frame`] applies.
    ///
    /// # Errors
    /// Returns a polars error if the rows cannot be assembled into a frame.
    pub fn from_observations(rows: Vec<PriceObservation>) -> Result<Self> {
        let column = |name: &str, field: fn(&PriceObservation) -> f64| {
            Column::new(name.into(), rows.iter().map(field).collect::<Vec<f64>>())
        };
        let frame = DataFrame::new(vec![
            Column::new(
                "date".into(),
                rows.iter().map(|o| o.date).collect::<Vec<NaiveDate>>(),
            ),
            Column::new(
                "symbol".into(),
                rows.iter().map(|o| o.symbol.as_str()).collect::<Vec<&str>>(),
            ),
            column("open", |o| o.open),
            column("high", |o| o.high),
            column("low", |o| o.low),
            column("close", |o| o.close),
            column("volume", |o| o.volume),
        ])?;
        Self::validate(frame.lazy())
    }

    /// Flag, count and drop bad rows, then deduplicate on `(symbol, date)`.
    fn validate(normalized: LazyFrame) -> Result<Self> {
        let incomplete = PRICE_FIELDS.iter().fold(
            col("date").is_null().or(col("symbol").is_null()),
            |acc, field| acc.or(col(*field).is_null()),
        );
        let non_finite = PRICE_FIELDS
            .iter()
            .fold(lit(false), |acc, field| acc.or(col(*field).is_finite().not()));

        let flagged = normalized
            .with_column(
                col("symbol")
                    .str()
                    .strip_chars(lit(NULL))
                    .str()
                    .to_uppercase()
                    .alias("symbol"),
            )
            .with_column(
                when(incomplete)
                    .then(lit(ROW_INVALID))
                    .when(col("symbol").eq(lit("")).or(non_finite))
                    .then(lit(ROW_INVALID))
                    .when(col("close").lt(lit(0.0)))
                    .then(lit(ROW_NEGATIVE_CLOSE))
                    .when(col("volume").lt(lit(0.0)).or(col("high").lt(col("low"))))
                    .then(lit(ROW_INVALID))
                    .otherwise(lit(ROW_OK))
                    .alias("status"),
            )
            .collect()?;
        let total = flagged.height();

        let counts = flagged
            .clone()
            .lazy()
            .select([
                col("status").eq(lit(ROW_INVALID)).sum().alias("invalid"),
                col("status")
                    .eq(lit(ROW_NEGATIVE_CLOSE))
                    .sum()
                    .alias("negative_close"),
            ])
            .collect()?;
        let invalid = frame::count(&counts, "invalid")?;
        let negative_close = frame::count(&counts, "negative_close")?;

        let valid = flagged
            .lazy()
            .filter(col("status").eq(lit(ROW_OK)))
            .select(REQUIRED_COLUMNS.map(col))
            .collect()?;
        let validated = valid
            .clone()
            .lazy()
            .unique_stable(
                Some(vec!["symbol".into(), "date".into()]),
                UniqueKeepStrategy::First,
            )
            .sort(["symbol", "date"], SortMultipleOptions::default())
            .collect()?;
        let duplicates = valid.height() - validated.height();

        let mut quality = DataQualityReport::new();
        quality.record(Stage::Ingest, QualityIssue::InvalidRows, invalid);
        quality.record(Stage::Ingest, QualityIssue::NegativeClose, negative_close);
        quality.record(Stage::Ingest, QualityIssue::DuplicateRows, duplicates);

        let series = observations(&validated)?;
        info!(
            rows = total,
            symbols = series.len(),
            invalid,
            negative_close,
            duplicates,
            "Ingested price table"
        );

        Ok(Self {
            frame: validated,
            series,
            quality,
        })
    }

    /// Validated rows as a long frame, sorted by symbol then date.
    pub const fn frame(&self) -> &DataFrame {
        &self.frame
    }

    /// Symbols in the table, sorted.
    pub fn symbols(&self) -> Vec<&str> {
        self.series.keys().map(String::as_str).collect()
    }

    /// Number of symbols.
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// Whether the table holds no symbols.
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Observations for a symbol, sorted by date.
    pub fn series(&self, symbol: &str) -> Option<&[PriceObservation]> {
        self.series.get(symbol).map(Vec::as_slice)
    }

    /// Iterate over `(symbol, observations)` pairs in symbol order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[PriceObservation])> {
        self.series.iter().map(|(s, o)| (s.as_str(), o.as_slice()))
    }

    /// Close prices for a symbol, in date order.
    pub fn closes(&self, symbol: &str) -> Option<Vec<f64>> {
        self.series
            .get(symbol)
            .map(|obs| obs.iter().map(|o| o.close).collect())
    }

    /// Rows dropped during ingestion.
    pub const fn quality(&self) -> &DataQualityReport {
        &self.quality
    }
}

/// Map each required column to the frame's actual column name.
fn resolve_columns(frame: &DataFrame) -> Result<[String; 7]> {
    let names: Vec<String> = frame
        .get_column_names()
        .into_iter()
        .map(|n| n.to_string())
        .collect();

    let mut missing = Vec::new();
    let mut resolved: [String; 7] = Default::default();
    for (slot, required) in resolved.iter_mut().zip(REQUIRED_COLUMNS) {
        match names.iter().find(|n| n.eq_ignore_ascii_case(required)) {
            Some(name) => *slot = name.clone(),
            None => missing.push(required.to_string()),
        }
    }

    if missing.is_empty() {
        debug!(columns = ?resolved, "Resolved input columns");
        Ok(resolved)
    } else {
        Err(DataError::MissingColumns(missing))
    }
}

/// Expression turning the raw date column into a `Date`.
///
/// Strings are read from their first ten characters, so timestamps keep only
/// their day. Unparseable strings become nulls and are dropped as invalid rows.
fn date_expr(dtype: &DataType, name: &str) -> Result<Expr> {
    match dtype {
        DataType::Date => Ok(col(name)),
        DataType::Datetime(_, _) => Ok(col(name).cast(DataType::Date)),
        DataType::String => Ok(col(name).str().head(lit(10)).str().to_date(StrptimeOptions {
            format: Some("%Y-%m-%d".into()),
            strict: false,
            exact: true,
            cache: true,
        })),
        other => Err(DataError::Parse(format!(
            "date column has unsupported type {other}"
        ))),
    }
}

/// Group a validated frame into per-symbol observations.
fn observations(validated: &DataFrame) -> Result<BTreeMap<String, Vec<PriceObservation>>> {
    let dates = frame::dates(validated, "date")?;
    let symbols = frame::strings(validated, "symbol")?;
    let [opens, highs, lows, closes, volumes] = [
        frame::floats(validated, "open")?,
        frame::floats(validated, "high")?,
        frame::floats(validated, "low")?,
        frame::floats(validated, "close")?,
        frame::floats(validated, "volume")?,
    ];

    let mut series: BTreeMap<String, Vec<PriceObservation>> = BTreeMap::new();
    for (i, symbol) in symbols.into_iter().enumerate() {
        series.entry(symbol.clone()).or_default().push(PriceObservation {
            symbol,
            date: dates[i],
            open: opens[i],
            high: highs[i],
            low: lows[i],
            close: closes[i],
            volume: volumes[i],
        });
    }
    Ok(series)
}
