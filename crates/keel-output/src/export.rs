//! Export of result tables.
//!
//! Tables are slices of flat records. Any `[R]` with `R: Serialize` can be
//! rendered as CSV (one row per record, header from the field names) or as a
//! JSON array.

use serde::Serialize;
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during export operations.
#[derive(Debug, Error)]
pub enum ExportError {
    /// CSV serialization error.
    #[error("CSV serialization error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization error.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// DataFrame construction or writing error.
    #[error("DataFrame error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid format error.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Export format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    /// Comma-separated values format.
    #[default]
    Csv,

    /// Compact JSON format.
    Json,

    /// Pretty-printed JSON format.
    PrettyJson,
}

impl ExportFormat {
    /// Get the file extension for this format.
    pub const fn extension(&self) -> &str {
        match self {
            Self::Csv => "csv",
            Self::Json | Self::PrettyJson => "json",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Csv => write!(f, "csv"),
            Self::Json => write!(f, "json"),
            Self::PrettyJson => write!(f, "pretty-json"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "pretty-json" | "pretty_json" | "pretty" => Ok(Self::PrettyJson),
            other => Err(ExportError::InvalidFormat(format!(
                "unknown format '{other}' (expected csv, json or pretty-json)"
            ))),
        }
    }
}

/// Trait for exporting data in various formats.
pub trait Exporter {
    /// Export data to a string in the specified format.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    fn export_to_string(&self, format: ExportFormat) -> Result<String, ExportError>;

    /// Export data to a file in the specified format.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or file writing fails.
    fn export_to_file(&self, path: &Path, format: ExportFormat) -> Result<(), ExportError> {
        let content = self.export_to_string(format)?;
        let mut file = File::create(path)?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }
}

impl<R: Serialize> Exporter for [R] {
    fn export_to_string(&self, format: ExportFormat) -> Result<String, ExportError> {
        match format {
            ExportFormat::Csv => {
                let mut wtr = csv::Writer::from_writer(vec![]);
                for record in self {
                    wtr.serialize(record)?;
                }
                utf8(wtr.into_inner().map_err(|e| e.into_error())?)
            }
            ExportFormat::Json => Ok(serde_json::to_string(self)?),
            ExportFormat::PrettyJson => Ok(serde_json::to_string_pretty(self)?),
        }
    }
}

pub(crate) fn utf8(bytes: Vec<u8>) -> Result<String, ExportError> {
    String::from_utf8(bytes).map_err(|e| ExportError::InvalidFormat(e.to_string()))
}

/// Write `table` as `<dir>/<name>.<ext>`, creating `dir` if needed.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the export fails.
pub fn write_table<T>(
    dir: &Path,
    name: &str,
    table: &T,
    format: ExportFormat,
) -> Result<PathBuf, ExportError>
where
    T: Exporter + ?Sized,
{
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{name}.{}", format.extension()));
    table.export_to_file(&path, format)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Row {
        symbol: String,
        weight: f64,
    }

    fn rows() -> Vec<Row> {
        vec![
            Row {
                symbol: "AAPL".to_string(),
                weight: 0.6,
            },
            Row {
                symbol: "MSFT".to_string(),
                weight: 0.4,
            },
        ]
    }

    #[test]
    fn test_csv_export() {
        let csv = rows().export_to_string(ExportFormat::Csv).unwrap();
        assert_eq!(csv, "symbol,weight\nAAPL,0.6\nMSFT,0.4\n");
    }

    #[test]
    fn test_json_export() {
        let json = rows().export_to_string(ExportFormat::Json).unwrap();
        assert_eq!(
            json,
            r#"[{"symbol":"AAPL","weight":0.6},{"symbol":"MSFT","weight":0.4}]"#
        );
    }

    #[test]
    fn test_pretty_json_export() {
        let json = rows().export_to_string(ExportFormat::PrettyJson).unwrap();
        assert!(json.contains("\"AAPL\""));
        assert!(json.contains("  ")); // Indentation indicates pretty format
    }

    #[test]
    fn test_empty_csv_has_no_rows() {
        let empty: Vec<Row> = Vec::new();
        assert!(empty.export_to_string(ExportFormat::Csv).unwrap().is_empty());
    }

    #[rstest]
    #[case("csv", ExportFormat::Csv)]
    #[case("JSON", ExportFormat::Json)]
    #[case("pretty-json", ExportFormat::PrettyJson)]
    fn test_format_from_str(#[case] text: &str, #[case] expected: ExportFormat) {
        assert_eq!(text.parse::<ExportFormat>().unwrap(), expected);
    }

    #[test]
    fn test_format_from_str_invalid() {
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
