#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/keel/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod covariance;
pub mod optimizer;
pub mod sizing;

// Re-export main types
pub use covariance::{
    ConditionedCovariance, ConditioningOutcome, CovarianceError, CovarianceEstimator,
    CovarianceMatrix, SampleCovariance, condition_covariance,
};
pub use optimizer::{
    Attempt, AttemptOutcome, ExpectedReturnSource, MeanVarianceOptimizer, Objective,
    OptimizationInput, OptimizationResult, OptimizerConfig, OptimizerError, PortfolioPerformance,
    PortfolioWeights, ResultQuality,
};
pub use sizing::{
    PositionSizer, PositionSizingResult, SectorExposure, SectorLookup, SizingBasis, SizingConfig,
    SizingError, SizingPlan,
};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
