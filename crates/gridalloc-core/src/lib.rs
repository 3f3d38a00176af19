//! # gridalloc-core: Problem Description for Grid-Tied Allocation
//!
//! This crate holds everything the allocation solvers need to know about a
//! problem before they run: the per-machine capacity description
//! ([`ItemConfig`]), the run parameters ([`OptimizerConfig`]) with their
//! validator, the shared float-tolerance predicates, and the unified
//! configuration error type.
//!
//! The solvers themselves live in `gridalloc-algo`; the configuration is
//! immutable for the duration of a solve.

pub mod config;
pub mod error;
pub mod units;

pub use config::{
    global_config, install_global_config, AllocationType, ItemConfig, OptimizerConfig,
    RefinerBackendKind, Resonance,
};
pub use error::{ConfigError, ConfigResult};
