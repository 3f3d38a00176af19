//! # gridalloc-algo: The Allocation Pipeline
//!
//! Given a scalar reference command and the current per-machine outputs,
//! this crate assigns each enabled machine a new output so that the
//! outputs sum to (approximately) the command, stay inside each machine's
//! capacity interval, avoid every resonance band, and sit as close as
//! possible to a policy-derived preferred operating point.
//!
//! The pipeline, in stage order:
//!
//! 1. **Small-load fast path** ([`SmallLoadAssignment`]): closed-form
//!    greedy redistribution when the command change is inside a dead-band.
//! 2. **Coarse DP** ([`GriddedStGraph`]): Bellman sweep over a
//!    (machine, cumulative allocation) grid with forbidden-zone pruning,
//!    optionally fanning each column out over a thread pool.
//! 3. **Refiner** ([`refiner::Refiner`]): bounded equality-constrained
//!    minimiser that snaps the DP solution off-grid, confined to one
//!    feasible sub-band per machine. Two backends: an exact QP on
//!    Clarabel and an exterior-penalty L-BFGS.
//!
//! [`GridTiedAllocation`] wires the stages together with the early-exit
//! rules (fast-path hit, exact policy reference, refiner disabled).
//!
//! ## Example
//!
//! ```
//! use gridalloc_algo::GridTiedAllocation;
//! use gridalloc_core::config::{AllocationType, ItemConfig, OptimizerConfig};
//!
//! let config = OptimizerConfig {
//!     allocation_type: AllocationType::Proportional,
//!     allocation_resolution: 10.0,
//!     items: vec![
//!         ItemConfig {
//!             index: 0,
//!             enabled: true,
//!             lower_bound: 0.0,
//!             upper_bound: 100.0,
//!             assigned_factor: 0.5,
//!             resonances: Vec::new(),
//!         },
//!         ItemConfig {
//!             index: 1,
//!             enabled: true,
//!             lower_bound: 0.0,
//!             upper_bound: 100.0,
//!             assigned_factor: 0.5,
//!             resonances: Vec::new(),
//!         },
//!     ],
//!     ..OptimizerConfig::default()
//! };
//!
//! let allocator = GridTiedAllocation::new(config);
//! let solution = allocator.process(&[20.0, 20.0], 90.0)?;
//! assert_eq!(solution.entries.len(), 2);
//! # Ok::<(), gridalloc_algo::AllocError>(())
//! ```

pub mod allocation;
pub mod cost;
pub mod dp;
pub mod error;
pub mod policy;
pub mod refiner;
pub mod small_load;
pub mod types;

pub use allocation::GridTiedAllocation;
pub use dp::GriddedStGraph;
pub use error::{AllocError, AllocResult};
pub use refiner::{
    PenaltyLbfgs, QpBackend, RefineProblem, RefineTolerances, Refiner, RefinerBackend,
    RefinerError,
};
pub use small_load::SmallLoadAssignment;
pub use types::{AllocationEntry, AllocationMethod, AllocationSolution};
