//! Configuration error type.
//!
//! Every way a problem description can be rejected before the solvers run
//! is a variant here. `check` returns the first violation it finds; the
//! out-of-range variants are produced at the parse boundary (TOML, string
//! or raw discriminant input), since the typed enums cannot hold invalid
//! values.

use thiserror::Error;

/// A rejected problem description.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Unknown allocation policy selector.
    #[error("unknown allocation type `{0}`")]
    TypeOutOfRange(String),

    /// Unknown refiner backend selector.
    #[error("unknown refiner backend `{0}`")]
    AlgorithmOutOfRange(String),

    /// The DP grid step must be at least 1.0.
    #[error("allocation resolution must be at least 1.0, got {0}")]
    ResolutionTooLow(f32),

    /// An enabled item has `lower_bound >= upper_bound`.
    #[error("item {index}: lower_bound must be strictly below upper_bound")]
    BoundsInverted { index: u32 },

    /// An enabled item's assigned factor lies outside `[0, 1]`.
    #[error("item {index}: assigned_factor must lie in [0, 1]")]
    FactorOutOfRange { index: u32 },

    /// A resonance zone is inverted, leaves the capacity band, or overlaps
    /// its predecessor.
    #[error("item {index}: resonance zone outside the capacity band or out of order")]
    ResonanceOutOfBand { index: u32 },

    /// The enabled set must begin with the item at position 0.
    #[error("the first enabled item must sit at position 0")]
    FirstEnabledNotZero,

    /// Assigned factors over the enabled items sum past the 1.1 limit.
    #[error("assigned factors over enabled items sum to {0}, limit is 1.1")]
    FactorSumExceeded(f32),
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;
