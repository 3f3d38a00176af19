//! Pipeline orchestrator.
//!
//! Stage order per call: validate the configuration, try the small-load
//! fast path, run the coarse DP, then refine unless the DP already
//! returned the exact policy or refinement is disabled. Recoverable
//! refiner failures keep the coarse solution.

use std::time::Instant;

use tracing::{debug, warn};

use gridalloc_core::config::OptimizerConfig;

use crate::dp::GriddedStGraph;
use crate::error::AllocError;
use crate::refiner::{Refiner, RefinerError};
use crate::small_load::SmallLoadAssignment;
use crate::types::{AllocationMethod, AllocationSolution};

/// Grid-tied allocation of a scalar command across the enabled machines.
///
/// Construct once per configuration; [`GridTiedAllocation::process`] may
/// be called repeatedly with fresh states and commands.
pub struct GridTiedAllocation {
    config: OptimizerConfig,
}

impl GridTiedAllocation {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Allocate `reference_command` across the enabled machines.
    ///
    /// On success every entry lies in its capacity interval and outside
    /// every resonance, in configuration order. The sum matches the
    /// command to within `allocation_resolution` on the DP path and to
    /// within the refiner's equality tolerance otherwise.
    ///
    /// # Panics
    ///
    /// Panics if `current_state` is too short to be indexed by an enabled
    /// item's `index`.
    pub fn process(
        &self,
        current_state: &[f32],
        reference_command: f32,
    ) -> Result<AllocationSolution, AllocError> {
        let start = Instant::now();
        self.config.check()?;

        if self.config.small_load_enabled {
            let fast_path = SmallLoadAssignment::new(&self.config);
            if let Some(entries) = fast_path.try_assign(current_state, reference_command) {
                debug!("small-load fast path absorbed the command change");
                return Ok(AllocationSolution {
                    entries,
                    method: AllocationMethod::SmallLoad,
                    solve_time_ms: start.elapsed().as_millis(),
                });
            }
        }

        let mut dp = GriddedStGraph::new(&self.config);
        let coarse = dp.process(current_state, reference_command)?;

        if !self.config.refiner_enabled || dp.is_exact_policy() {
            let method = if dp.is_exact_policy() {
                AllocationMethod::ExactPolicy
            } else {
                AllocationMethod::CoarseDp
            };
            return Ok(AllocationSolution {
                entries: coarse,
                method,
                solve_time_ms: start.elapsed().as_millis(),
            });
        }

        let refiner = Refiner::new(&self.config);
        match refiner.process(current_state, &coarse, reference_command) {
            Ok(entries) => Ok(AllocationSolution {
                entries,
                method: AllocationMethod::Refined,
                solve_time_ms: start.elapsed().as_millis(),
            }),
            Err(err @ (RefinerError::Timeout | RefinerError::NumericFailure(_))) => {
                warn!("refinement failed ({err}); keeping the coarse solution");
                Ok(AllocationSolution {
                    entries: coarse,
                    method: AllocationMethod::CoarseDp,
                    solve_time_ms: start.elapsed().as_millis(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridalloc_core::config::{AllocationType, ItemConfig};
    use gridalloc_core::error::ConfigError;

    fn config() -> OptimizerConfig {
        OptimizerConfig {
            allocation_type: AllocationType::Proportional,
            allocation_resolution: 10.0,
            items: vec![
                ItemConfig {
                    index: 0,
                    enabled: true,
                    lower_bound: 0.0,
                    upper_bound: 100.0,
                    assigned_factor: 0.5,
                    resonances: Vec::new(),
                },
                ItemConfig {
                    index: 1,
                    enabled: true,
                    lower_bound: 0.0,
                    upper_bound: 100.0,
                    assigned_factor: 0.5,
                    resonances: Vec::new(),
                },
            ],
            ..OptimizerConfig::default()
        }
    }

    #[test]
    fn invalid_config_fails_before_any_solver_runs() {
        let mut cfg = config();
        cfg.allocation_resolution = 0.1;
        let allocator = GridTiedAllocation::new(cfg);
        assert!(matches!(
            allocator.process(&[0.0, 0.0], 50.0),
            Err(AllocError::Config(ConfigError::ResolutionTooLow(_)))
        ));
    }

    #[test]
    fn exact_policy_bypasses_refinement() {
        let mut cfg = config();
        cfg.refiner_enabled = true;
        let allocator = GridTiedAllocation::new(cfg);
        let solution = allocator.process(&[0.0, 0.0], 80.0).unwrap();
        assert_eq!(solution.method, AllocationMethod::ExactPolicy);
        assert_eq!(solution.entries[0].value, 40.0);
        assert_eq!(solution.entries[1].value, 40.0);
    }

    #[test]
    fn small_load_runs_before_the_dp() {
        let mut cfg = config();
        cfg.small_load_enabled = true;
        cfg.small_load_dead_size = 100.0;
        let allocator = GridTiedAllocation::new(cfg);
        let solution = allocator.process(&[30.0, 30.0], 65.0).unwrap();
        assert_eq!(solution.method, AllocationMethod::SmallLoad);
        assert!((solution.total() - 65.0).abs() < 1e-4);
    }
}
