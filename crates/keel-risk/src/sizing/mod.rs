//! Risk-managed position sizing
//!
//! Each position risks a fixed fraction of the portfolio over a stop distance
//! proportional to a close-price volatility proxy:
//!
//! ```text
//! position_size = (V * r) / (m * volatility)
//! ```
//!
//! With an optimizer allocation the risk budget of symbol `i` is `V * r * w_i`.
//! Positions are then grouped by sector and capped in a single pass, see
//! [`sector`].

pub mod sector;
pub mod volatility;

pub use sector::{SectorExposure, SectorLookup, rebalance_sectors};
pub use volatility::rolling_volatility;

use crate::optimizer::PortfolioWeights;
use keel_data::{DataError, DataQualityReport, PriceTable, QualityIssue, Stage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Sizing errors
#[derive(Debug, Error)]
pub enum SizingError {
    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Volatility proxy could not be computed
    #[error("Volatility error: {0}")]
    Volatility(#[from] DataError),

    /// No symbol could be sized
    #[error("No position could be sized from {candidates} candidate symbol(s)")]
    NoPositions {
        /// Symbols considered
        candidates: usize,
    },
}

/// Position sizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Portfolio value V
    pub portfolio_value: f64,
    /// Fraction of V risked per trade
    pub risk_per_trade: f64,
    /// Stop distance in units of volatility
    pub stop_loss_multiplier: f64,
    /// Closes used for the volatility proxy
    pub atr_window: usize,
    /// Default sector cap
    pub max_sector_exposure: f64,
    /// Per-sector caps overriding the default
    pub sector_caps: BTreeMap<String, f64>,
}

impl Default for SizingConfig {
    /// `V = 100_000`, 2% risk per trade, stop at 2x volatility over 14 closes,
    /// sectors capped at 25%.
    fn default() -> Self {
        Self {
            portfolio_value: 100_000.0,
            risk_per_trade: 0.02,
            stop_loss_multiplier: 2.0,
            atr_window: 14,
            max_sector_exposure: 0.25,
            sector_caps: BTreeMap::new(),
        }
    }
}

impl SizingConfig {
    /// Check ranges.
    ///
    /// # Errors
    /// Returns [`SizingError::InvalidParameter`] for out-of-range values.
    pub fn validate(&self) -> Result<(), SizingError> {
        if !(self.portfolio_value > 0.0 && self.portfolio_value.is_finite()) {
            return Err(SizingError::InvalidParameter(format!(
                "portfolio value must be positive, got {}",
                self.portfolio_value
            )));
        }
        if !(self.risk_per_trade > 0.0 && self.risk_per_trade <= 1.0) {
            return Err(SizingError::InvalidParameter(format!(
                "risk per trade must be in (0, 1], got {}",
                self.risk_per_trade
            )));
        }
        if !(self.stop_loss_multiplier > 0.0 && self.stop_loss_multiplier.is_finite()) {
            return Err(SizingError::InvalidParameter(format!(
                "stop-loss multiplier must be positive, got {}",
                self.stop_loss_multiplier
            )));
        }
        if self.atr_window < 2 {
            return Err(SizingError::InvalidParameter(format!(
                "ATR window must be at least 2, got {}",
                self.atr_window
            )));
        }
        let caps = std::iter::once(("default", self.max_sector_exposure))
            .chain(self.sector_caps.iter().map(|(s, &c)| (s.as_str(), c)));
        for (sector, cap) in caps {
            if !(cap > 0.0 && cap <= 1.0) {
                return Err(SizingError::InvalidParameter(format!(
                    "sector cap for {sector} must be in (0, 1], got {cap}"
                )));
            }
        }
        Ok(())
    }

    /// Cap applying to `sector`.
    pub fn cap_for(&self, sector: &str) -> f64 {
        self.sector_caps
            .get(sector)
            .copied()
            .unwrap_or(self.max_sector_exposure)
    }

    /// `(V * r * share) / (m * volatility)`.
    pub fn position_size(&self, volatility: f64, share: f64) -> f64 {
        self.portfolio_value * self.risk_per_trade * share
            / (self.stop_loss_multiplier * volatility)
    }
}

/// Which symbols to size and how their risk budget is split
#[derive(Debug, Clone)]
pub enum SizingBasis {
    /// Every mapped symbol with the full risk budget
    RawRisk,
    /// Symbols with a positive weight, budget scaled by the weight
    Allocation(PortfolioWeights),
}

/// One sized position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSizingResult {
    /// Ticker
    pub symbol: String,
    /// Volatility proxy
    pub atr: f64,
    /// Position size after the sector cap
    pub position_size: f64,
    /// Sector label
    pub sector: String,
    /// Share of total position size
    pub weight: f64,
}

/// Sized positions and sector exposure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SizingPlan {
    /// Positions ordered by symbol
    pub positions: Vec<PositionSizingResult>,
    /// Sector exposure ordered by sector
    pub sectors: Vec<SectorExposure>,
}

impl SizingPlan {
    /// Sum of final position weights per sector.
    pub fn sector_allocation(&self) -> BTreeMap<String, f64> {
        self.sectors
            .iter()
            .map(|e| (e.sector.clone(), e.final_weight))
            .collect()
    }
}

/// Volatility-based position sizer
#[derive(Debug, Clone)]
pub struct PositionSizer {
    config: SizingConfig,
}

impl PositionSizer {
    /// Create a sizer.
    ///
    /// # Errors
    /// Returns an error if the configuration is out of range.
    pub fn new(config: SizingConfig) -> Result<Self, SizingError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Create a sizer with default configuration.
    ///
    /// # Errors
    /// Never fails for the default configuration.
    pub fn try_default() -> Result<Self, SizingError> {
        Self::new(SizingConfig::default())
    }

    /// Get the configuration.
    pub const fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Size positions from closes in `table`.
    ///
    /// Unmapped symbols and symbols without a usable volatility proxy are
    /// excluded and counted in `quality`.
    ///
    /// # Errors
    /// Returns [`SizingError::NoPositions`] when nothing could be sized, or
    /// [`SizingError::Volatility`] if the volatility query fails.
    pub fn size<L>(
        &self,
        table: &PriceTable,
        sectors: &L,
        basis: &SizingBasis,
        quality: &mut DataQualityReport,
    ) -> Result<SizingPlan, SizingError>
    where
        L: SectorLookup + ?Sized,
    {
        let candidates: Vec<(String, f64)> = match basis {
            SizingBasis::RawRisk => table
                .symbols()
                .into_iter()
                .map(|s| (s.to_string(), 1.0))
                .collect(),
            SizingBasis::Allocation(weights) => weights
                .positive()
                .map(|(s, w)| (s.to_string(), w))
                .collect(),
        };
        let n_candidates = candidates.len();

        let mut mapped = Vec::with_capacity(candidates.len());
        for (symbol, share) in candidates {
            match sectors.sector(&symbol) {
                Some(sector) => mapped.push((symbol, sector.to_string(), share)),
                None => {
                    warn!(symbol = %symbol, "No sector mapping, excluded from sizing");
                    quality.record_symbol(Stage::Sizing, QualityIssue::UnmappedSymbols, &symbol);
                }
            }
        }

        let window = self.config.atr_window;
        let volatility = rolling_volatility(table, window)?;
        let sized: Vec<(String, Option<PositionSizingResult>)> = mapped
            .into_iter()
            .map(|(symbol, sector, share)| {
                let position = volatility.get(&symbol).map(|&atr| {
                    let position_size = self.config.position_size(atr, share);
                    debug!(symbol = %symbol, atr, position_size, "Sized position");
                    PositionSizingResult {
                        symbol: symbol.clone(),
                        atr,
                        position_size,
                        sector,
                        weight: 0.0,
                    }
                });
                (symbol, position)
            })
            .collect();

        let mut positions = Vec::with_capacity(sized.len());
        for (symbol, position) in sized {
            match position {
                Some(p) if p.position_size > 0.0 && p.position_size.is_finite() => {
                    positions.push(p);
                }
                _ => {
                    warn!(symbol = %symbol, window, "No usable volatility, excluded from sizing");
                    quality.record_symbol(Stage::Sizing, QualityIssue::MissingVolatility, &symbol);
                }
            }
        }
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        if positions.is_empty() {
            return Err(SizingError::NoPositions {
                candidates: n_candidates,
            });
        }

        let sectors = rebalance_sectors(&mut positions, |s| self.config.cap_for(s));
        positions.retain(|p| p.weight > 0.0);

        info!(
            positions = positions.len(),
            sectors = sectors.len(),
            capped = sectors.iter().filter(|e| e.capped).count(),
            "Positions sized"
        );

        Ok(SizingPlan { positions, sectors })
    }
}
