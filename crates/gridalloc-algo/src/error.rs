//! Error types for the allocation pipeline.

use gridalloc_core::error::ConfigError;
use thiserror::Error;

pub use crate::refiner::RefinerError;

/// A failed allocation run.
#[derive(Error, Debug)]
pub enum AllocError {
    /// The configuration was rejected by the validator.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The enabled set is empty.
    #[error("no enabled items to allocate")]
    NoEnabledItems,

    /// The cumulative-allocation axis cannot represent a negative command.
    #[error("reference command {0} is negative")]
    NegativeCommand(f32),

    /// The DP found no feasible trajectory through the grid.
    #[error("infeasible: {0}")]
    Infeasible(String),

    /// The refiner could not even be set up (recoverable refiner failures
    /// fall back to the coarse solution instead).
    #[error(transparent)]
    Refiner(#[from] RefinerError),
}

/// Convenience alias for pipeline results.
pub type AllocResult<T> = Result<T, AllocError>;
