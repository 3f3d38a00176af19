//! Nonlinear refinement of the coarse DP solution.
//!
//! The DP snaps every output to the allocation grid. The refiner moves
//! the outputs off-grid: it minimises the squared deviation from the
//! policy reference subject to the equality `Σx = U` and box bounds that
//! confine each variable to the single feasible sub-band selected by the
//! coarse solution. Because each variable is boxed into one gap between
//! forbidden zones, the non-convex resonance constraints never reach the
//! minimiser.

mod penalty_lbfgs;
mod qp;

pub use penalty_lbfgs::PenaltyLbfgs;
pub use qp::QpBackend;

use std::time::Duration;

use thiserror::Error;

use gridalloc_core::config::{ItemConfig, OptimizerConfig, RefinerBackendKind};
use gridalloc_core::units;

use crate::policy::build_policy_reference;
use crate::types::AllocationEntry;

/// A failed refinement.
///
/// `Timeout` and `NumericFailure` are recoverable: the orchestrator keeps
/// the coarse solution. `InvalidBounds` means the problem could not even
/// be assembled and fails the run.
#[derive(Error, Debug)]
pub enum RefinerError {
    /// The minimiser ran out of its wall-clock or evaluation budget.
    #[error("refinement exceeded its time or evaluation budget")]
    Timeout,

    /// The minimiser reported a numeric failure or an unusable status.
    #[error("refiner backend failed: {0}")]
    NumericFailure(String),

    /// Band selection produced an empty interval for a variable.
    #[error("band selection produced an empty interval for variable {0}")]
    InvalidBounds(usize),
}

/// Termination tolerances for one refinement call.
#[derive(Debug, Clone, Copy)]
pub struct RefineTolerances {
    /// Relative tolerance on the iterate.
    pub x_rel: f64,
    /// Absolute tolerance on the objective.
    pub f_abs: f64,
    /// Acceptable violation of the equality constraint.
    pub eq_abs: f64,
    /// Evaluation budget.
    pub max_evaluations: usize,
    /// Wall-clock budget.
    pub max_time: Duration,
}

impl Default for RefineTolerances {
    fn default() -> Self {
        Self {
            x_rel: 1e-3,
            f_abs: 1e-3,
            eq_abs: 1e-3,
            max_evaluations: 1000,
            max_time: Duration::from_millis(50),
        }
    }
}

/// A fully-assembled refinement problem.
///
/// Minimise `Σ (x[i] - reference[i])²` subject to `Σ x[i] = command` and
/// `lower ≤ x ≤ upper`.
#[derive(Debug, Clone)]
pub struct RefineProblem {
    pub reference: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    pub initial: Vec<f64>,
    pub command: f64,
    pub tolerances: RefineTolerances,
}

impl RefineProblem {
    pub fn dimension(&self) -> usize {
        self.reference.len()
    }

    /// Objective value `Σ (x[i] - r[i])²`.
    pub fn objective(&self, x: &[f64]) -> f64 {
        x.iter()
            .zip(&self.reference)
            .map(|(xi, ri)| (xi - ri) * (xi - ri))
            .sum()
    }

    /// Analytic objective gradient, `2 (x[i] - r[i])`.
    pub fn objective_gradient(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(&self.reference)
            .map(|(xi, ri)| 2.0 * (xi - ri))
            .collect()
    }

    /// Equality residual `Σ x[i] - command`; its gradient is all ones.
    pub fn equality(&self, x: &[f64]) -> f64 {
        x.iter().sum::<f64>() - self.command
    }
}

/// Bounded-variable equality-constrained minimiser.
///
/// The capability seam between the pipeline and the concrete solver: the
/// DP and the orchestrator never see more than this.
pub trait RefinerBackend {
    fn solve(&self, problem: &RefineProblem) -> Result<Vec<f64>, RefinerError>;
}

/// Refinement stage. Assembles the problem from the coarse solution and
/// dispatches to the configured backend.
pub struct Refiner<'a> {
    config: &'a OptimizerConfig,
    tolerances: RefineTolerances,
}

impl<'a> Refiner<'a> {
    pub fn new(config: &'a OptimizerConfig) -> Self {
        Self {
            config,
            tolerances: RefineTolerances::default(),
        }
    }

    /// Override the default termination tolerances.
    pub fn with_tolerances(mut self, tolerances: RefineTolerances) -> Self {
        self.tolerances = tolerances;
        self
    }

    /// Refine a coarse solution toward the exact equality `Σx = U`.
    ///
    /// # Panics
    ///
    /// Panics if `current_state` is too short to be indexed by an enabled
    /// item's `index`, or if `guess` does not cover the enabled set.
    pub fn process(
        &self,
        current_state: &[f32],
        guess: &[AllocationEntry],
        reference_command: f32,
    ) -> Result<Vec<AllocationEntry>, RefinerError> {
        let items: Vec<ItemConfig> = self.config.enabled_items().cloned().collect();
        assert_eq!(guess.len(), items.len(), "guess must cover the enabled set");

        let reference = build_policy_reference(
            &items,
            current_state,
            reference_command,
            self.config.allocation_type,
        );

        let initial: Vec<f64> = guess.iter().map(|entry| entry.value as f64).collect();
        let (lower, upper) = build_bounds(&items, &initial)?;

        let problem = RefineProblem {
            reference: reference.iter().map(|&(_, r)| r as f64).collect(),
            lower,
            upper,
            initial,
            command: reference_command as f64,
            tolerances: self.tolerances,
        };

        let solved = match self.config.refiner_backend {
            RefinerBackendKind::Qp => QpBackend.solve(&problem)?,
            RefinerBackendKind::PenaltyLbfgs => PenaltyLbfgs.solve(&problem)?,
        };

        // Clamp onto the band so solver bound tolerances cannot leak a
        // value back into a resonance.
        let entries = items
            .iter()
            .zip(&solved)
            .enumerate()
            .map(|(i, (item, &value))| AllocationEntry {
                index: item.index,
                value: value.clamp(problem.lower[i], problem.upper[i]) as f32,
            })
            .collect();
        Ok(entries)
    }
}

/// Confine each variable to the single admissible sub-interval holding
/// its coarse value.
///
/// A value at or below the lower capacity bound collapses the variable
/// there. Otherwise the resonances are scanned in order: the first zone
/// whose lower edge is at or above the value closes the band, with the
/// running lower edge being the previous zone's upper edge (or the
/// capacity bound). A value above every zone keeps the capacity upper
/// bound.
fn build_bounds(items: &[ItemConfig], x: &[f64]) -> Result<(Vec<f64>, Vec<f64>), RefinerError> {
    let mut lower = Vec::with_capacity(items.len());
    let mut upper = Vec::with_capacity(items.len());

    for (i, item) in items.iter().enumerate() {
        let capacity_lower = item.lower_bound as f64;
        let capacity_upper = item.upper_bound as f64;
        let xi = x[i];

        if units::is_negative(xi - capacity_lower) || units::is_zero(xi - capacity_lower) {
            lower.push(capacity_lower);
            upper.push(capacity_lower);
            continue;
        }

        let mut band_lower = capacity_lower;
        let mut band_upper = capacity_upper;
        for zone in &item.resonances {
            let edge = zone.lower as f64;
            if units::is_negative(xi - edge) || units::is_zero(xi - edge) {
                band_upper = edge;
                break;
            }
            band_lower = zone.upper as f64;
        }

        if band_lower > band_upper {
            return Err(RefinerError::InvalidBounds(i));
        }
        lower.push(band_lower);
        upper.push(band_upper);
    }

    Ok((lower, upper))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridalloc_core::config::Resonance;

    fn item_with_zones(zones: Vec<Resonance>) -> ItemConfig {
        ItemConfig {
            index: 0,
            enabled: true,
            lower_bound: 0.0,
            upper_bound: 100.0,
            assigned_factor: 1.0,
            resonances: zones,
        }
    }

    #[test]
    fn value_at_the_lower_bound_collapses_the_variable() {
        let items = vec![item_with_zones(Vec::new())];
        let (lower, upper) = build_bounds(&items, &[0.0]).unwrap();
        assert_eq!(lower, vec![0.0]);
        assert_eq!(upper, vec![0.0]);
    }

    #[test]
    fn value_below_the_first_zone_keeps_the_gap_below_it() {
        let items = vec![item_with_zones(vec![
            Resonance::new(20.0, 40.0),
            Resonance::new(60.0, 80.0),
        ])];
        let (lower, upper) = build_bounds(&items, &[10.0]).unwrap();
        assert_eq!(lower, vec![0.0]);
        assert_eq!(upper, vec![20.0]);
    }

    #[test]
    fn value_between_zones_is_boxed_between_them() {
        let items = vec![item_with_zones(vec![
            Resonance::new(20.0, 40.0),
            Resonance::new(60.0, 80.0),
        ])];
        let (lower, upper) = build_bounds(&items, &[50.0]).unwrap();
        assert_eq!(lower, vec![40.0]);
        assert_eq!(upper, vec![60.0]);
    }

    #[test]
    fn value_above_every_zone_keeps_the_capacity_upper_bound() {
        let items = vec![item_with_zones(vec![
            Resonance::new(20.0, 40.0),
            Resonance::new(60.0, 80.0),
        ])];
        let (lower, upper) = build_bounds(&items, &[90.0]).unwrap();
        assert_eq!(lower, vec![80.0]);
        assert_eq!(upper, vec![100.0]);
    }

    #[test]
    fn zone_edge_value_closes_the_band_at_the_edge() {
        let items = vec![item_with_zones(vec![Resonance::new(20.0, 40.0)])];
        let (lower, upper) = build_bounds(&items, &[20.0]).unwrap();
        assert_eq!(lower, vec![0.0]);
        assert_eq!(upper, vec![20.0]);
    }

    #[test]
    fn gradient_matches_the_objective() {
        let problem = RefineProblem {
            reference: vec![10.0, 20.0],
            lower: vec![0.0, 0.0],
            upper: vec![100.0, 100.0],
            initial: vec![0.0, 0.0],
            command: 30.0,
            tolerances: RefineTolerances::default(),
        };
        let x = vec![12.0, 15.0];
        assert_eq!(problem.objective(&x), 4.0 + 25.0);
        assert_eq!(problem.objective_gradient(&x), vec![4.0, -10.0]);
        assert_eq!(problem.equality(&x), -3.0);
    }
}
