//! Run configuration.
//!
//! [`KeelConfig`] bundles the per-stage configurations. It is read from JSON;
//! any section or field left out takes its default.

use keel_data::{DataError, ReturnsBuilder, ReturnsConfig};
use keel_factors::{CapmConfig, CapmError, CapmEstimator};
use keel_risk::{OptimizerConfig, OptimizerError, SizingConfig, SizingError};
use keel_stats::{AdfConfig, StationarityTester, StatsError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// JSON was malformed or had fields of the wrong type.
    #[error("Failed to parse config: {0}")]
    Json(#[from] serde_json::Error),

    /// Return builder settings out of range.
    #[error("Invalid returns config: {0}")]
    Returns(#[from] DataError),

    /// Stationarity settings out of range.
    #[error("Invalid stationarity config: {0}")]
    Stationarity(#[from] StatsError),

    /// CAPM settings out of range.
    #[error("Invalid CAPM config: {0}")]
    Capm(#[from] CapmError),

    /// Optimizer settings out of range.
    #[error("Invalid optimizer config: {0}")]
    Optimizer(#[from] OptimizerError),

    /// Sizing settings out of range.
    #[error("Invalid sizing config: {0}")]
    Sizing(#[from] SizingError),
}

/// Configuration for a full run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeelConfig {
    /// Return construction and panel alignment
    pub returns: ReturnsConfig,
    /// ADF test settings
    pub stationarity: AdfConfig,
    /// Risk-free rate and sampling frequency
    pub capm: CapmConfig,
    /// Objective, conditioning and cleaning
    pub optimizer: OptimizerConfig,
    /// Risk budget and sector caps
    pub sizing: SizingConfig,
}

impl KeelConfig {
    /// Parse and validate a JSON document.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or a value is out of range.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or [`KeelConfig::from_json`] fails.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Pretty-printed JSON.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every section by building its stage.
    ///
    /// # Errors
    /// Returns the first section that fails validation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ReturnsBuilder::new(self.returns.clone())?;
        StationarityTester::new(self.stationarity.clone())?;
        CapmEstimator::new(self.capm.clone())?;
        self.optimizer.validate()?;
        self.sizing.validate()?;
        Ok(())
    }

    /// Periods per year used to annualize reported figures.
    pub const fn periods_per_year(&self) -> usize {
        self.capm.periods_per_year
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_risk::Objective;

    #[test]
    fn test_empty_document_is_default() {
        let config = KeelConfig::from_json("{}").unwrap();
        assert_eq!(config.capm.periods_per_year, 252);
        assert_eq!(config.sizing.atr_window, 14);
        assert_eq!(config.optimizer.objective, Objective::MaxSharpe);
    }

    #[test]
    fn test_partial_section() {
        let config = KeelConfig::from_json(
            r#"{"sizing": {"portfolio_value": 250000.0, "sector_caps": {"Energy": 0.4}}}"#,
        )
        .unwrap();
        assert_eq!(config.sizing.portfolio_value, 250_000.0);
        assert_eq!(config.sizing.risk_per_trade, 0.02);
        assert_eq!(config.sizing.cap_for("Energy"), 0.4);
        assert_eq!(config.sizing.cap_for("Tech"), 0.25);
    }

    #[test]
    fn test_out_of_range_is_rejected() {
        let err = KeelConfig::from_json(r#"{"stationarity": {"significance": 2.0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Stationarity(_)));

        let err = KeelConfig::from_json(r#"{"sizing": {"risk_per_trade": -1.0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Sizing(_)));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            KeelConfig::from_json("{ not json"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_json_round_trip_keeps_objective() {
        let mut config = KeelConfig::default();
        config.optimizer.objective = Objective::TargetReturn(0.001);
        let json = config.to_json().unwrap();
        let back = KeelConfig::from_json(&json).unwrap();
        assert_eq!(back.optimizer.objective, Objective::TargetReturn(0.001));
    }
}
