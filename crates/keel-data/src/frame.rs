//! Column extraction where polars frames hand over to Rust types.
//!
//! Every helper expects a column without nulls; a null is a parse error.

use crate::error::{DataError, Result};
use chrono::NaiveDate;
use polars::prelude::*;

fn null_in(name: &str) -> DataError {
    DataError::Parse(format!("unexpected null in column {name}"))
}

/// Read a `Date` column.
///
/// # Errors
/// Returns an error if the column is missing, not a date, or holds nulls.
pub fn dates(frame: &DataFrame, name: &str) -> Result<Vec<NaiveDate>> {
    frame
        .column(name)?
        .date()?
        .as_date_iter()
        .map(|d| d.ok_or_else(|| null_in(name)))
        .collect()
}

/// Read a `Float64` column.
///
/// # Errors
/// Returns an error if the column is missing, not `Float64`, or holds nulls.
pub fn floats(frame: &DataFrame, name: &str) -> Result<Vec<f64>> {
    frame
        .column(name)?
        .f64()?
        .into_iter()
        .map(|v| v.ok_or_else(|| null_in(name)))
        .collect()
}

/// Read a `String` column.
///
/// # Errors
/// Returns an error if the column is missing, not a string, or holds nulls.
pub fn strings(frame: &DataFrame, name: &str) -> Result<Vec<String>> {
    frame
        .column(name)?
        .str()?
        .into_iter()
        .map(|s| s.map(str::to_string).ok_or_else(|| null_in(name)))
        .collect()
}

/// Read the first row of an integer column as a count.
///
/// The column is cast to `Int64` first, so boolean sums and `len()` results
/// of any index width are accepted. An empty frame counts as zero.
///
/// # Errors
/// Returns an error if the column is missing or cannot be cast.
pub fn count(frame: &DataFrame, name: &str) -> Result<usize> {
    let column = frame.column(name)?.cast(&DataType::Int64)?;
    Ok(column
        .i64()?
        .get(0)
        .map_or(0, |n| usize::try_from(n).unwrap_or_default()))
}
