//! The stationary dataset: every (possibly differenced) close series in long
//! format, one row per symbol and date.

use crate::export::{ExportError, ExportFormat, Exporter, utf8};
use keel_stats::StationarySeries;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Row of the stationary dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StationaryPoint {
    /// Ticker.
    pub symbol: String,
    /// Observation date.
    pub date: chrono::NaiveDate,
    /// Close, or its first difference.
    pub value: f64,
    /// `stationary` or `differenced`.
    pub state: String,
}

/// Long-format table of transformed close series.
#[derive(Debug, Clone, Default)]
pub struct StationaryDataset {
    points: Vec<StationaryPoint>,
}

impl StationaryDataset {
    /// Flatten `series` in the given order.
    pub fn new(series: &[StationarySeries]) -> Self {
        let points = series
            .iter()
            .flat_map(|s| {
                s.dates
                    .iter()
                    .zip(s.values.iter())
                    .map(move |(&date, &value)| StationaryPoint {
                        symbol: s.symbol.clone(),
                        date,
                        value,
                        state: s.state.to_string(),
                    })
            })
            .collect();
        Self { points }
    }

    /// Rows in order.
    pub fn points(&self) -> &[StationaryPoint] {
        &self.points
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the dataset has no rows.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Build a `DataFrame` with columns `symbol, date, value, state`.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be assembled.
    pub fn to_frame(&self) -> Result<DataFrame, ExportError> {
        let symbols: Vec<&str> = self.points.iter().map(|p| p.symbol.as_str()).collect();
        let dates: Vec<String> = self
            .points
            .iter()
            .map(|p| p.date.format("%Y-%m-%d").to_string())
            .collect();
        let values: Vec<f64> = self.points.iter().map(|p| p.value).collect();
        let states: Vec<&str> = self.points.iter().map(|p| p.state.as_str()).collect();

        let frame = df!(
            "symbol" => symbols,
            "date" => dates,
            "value" => values,
            "state" => states,
        )?;
        Ok(frame)
    }
}

impl Exporter for StationaryDataset {
    fn export_to_string(&self, format: ExportFormat) -> Result<String, ExportError> {
        match format {
            ExportFormat::Csv => {
                let mut frame = self.to_frame()?;
                let mut buffer = Vec::new();
                CsvWriter::new(&mut buffer)
                    .include_header(true)
                    .finish(&mut frame)?;
                utf8(buffer)
            }
            ExportFormat::Json | ExportFormat::PrettyJson => {
                self.points.export_to_string(format)
            }
        }
    }
}
