//! File input.

use chrono::NaiveDate;
use keel_data::{DataError, ReturnSeries, Result};
use polars::prelude::*;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Read a price table from CSV with a header row.
///
/// Column names and types are resolved later by
/// [`PriceTable::from_frame`](keel_data::PriceTable::from_frame).
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
pub fn read_prices(path: impl AsRef<Path>) -> Result<DataFrame> {
    let path = path.as_ref();
    let frame = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    info!(
        path = %path.display(),
        rows = frame.height(),
        columns = frame.width(),
        "Read price file"
    );
    Ok(frame)
}

#[derive(Debug, Deserialize)]
struct MarketRow {
    #[serde(alias = "Date", alias = "DATE")]
    date: NaiveDate,
    #[serde(rename = "return", alias = "Return", alias = "RETURN")]
    value: f64,
}

/// Read an external market return series from CSV with `date,return` columns.
///
/// # Errors
/// Returns [`DataError::Parse`] if a row cannot be read.
pub fn read_market_returns(path: impl AsRef<Path>) -> Result<ReturnSeries> {
    let path = path.as_ref();
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| DataError::Parse(format!("{}: {e}", path.display())))?;

    let mut dates = Vec::new();
    let mut values = Vec::new();
    for row in rdr.deserialize::<MarketRow>() {
        let row = row.map_err(|e| DataError::Parse(format!("{}: {e}", path.display())))?;
        dates.push(row.date);
        values.push(row.value);
    }
    ReturnSeries::new(dates, values)
}
