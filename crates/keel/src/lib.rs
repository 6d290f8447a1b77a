#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/keel/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod io;
pub mod pipeline;
pub mod universe;

// Re-export main types from sub-crates
pub use keel_data as data;
pub use keel_factors as factors;
pub use keel_output as output;
pub use keel_risk as risk;
pub use keel_stats as stats;

pub use config::{ConfigError, KeelConfig};
pub use pipeline::{
    Pipeline, PipelineError, PipelineOptions, PipelineOutput, Prepared, TableName, write_capm,
    write_quality, write_sizing, write_stationarity,
};
pub use universe::{SectorMapping, SectorMappingError, Universe};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
