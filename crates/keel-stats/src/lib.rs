#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/keel/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod linalg;
pub mod ols;
pub mod stationarity;

pub use error::{Result, StatsError};
pub use linalg::Cholesky;
pub use ols::{OlsFit, ols};
pub use stationarity::{
    AdfConfig, AdfTest, CriticalValues, MIN_OBSERVATIONS, SkippedSeries, StationarityReport,
    StationarityRun, StationarySeries, StationarityState, StationarityTester, adf,
};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
