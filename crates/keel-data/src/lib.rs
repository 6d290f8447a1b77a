#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/keel/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod frame;
pub mod quality;
pub mod returns;
pub mod table;

pub use error::{DataError, Result};
pub use quality::{DataQualityReport, QualityEntry, QualityIssue, Stage};
pub use returns::{
    AlignedReturns, MarketSource, MissingReturnPolicy, ReturnPanel, ReturnSeries, ReturnsBuilder,
    ReturnsConfig, SymbolReturns,
};
pub use table::{PriceObservation, PriceTable, REQUIRED_COLUMNS};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
