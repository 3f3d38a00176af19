//! Exterior-penalty backend with L-BFGS.
//!
//! The equality and the box bounds are folded into the objective as
//! quadratic penalties and the resulting unconstrained problem is solved
//! with L-BFGS under a More-Thuente line search. The penalty parameter is
//! raised across a small number of outer iterations until the constraint
//! violation drops under the equality tolerance; the final iterate is
//! projected onto the bounds.

use std::time::Instant;

use argmin::core::{CostFunction, Executor, Gradient, State};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;

use super::{RefineProblem, RefinerBackend, RefinerError};

const INITIAL_PENALTY: f64 = 1_000.0;
const PENALTY_INCREASE: f64 = 10.0;
const MAX_PENALTY_ITERS: usize = 5;
const LBFGS_MEMORY: usize = 7;

/// One penalty stage: the refinement objective plus `μ`-weighted squared
/// violations of the equality and the bounds.
struct PenaltyStage<'a> {
    problem: &'a RefineProblem,
    penalty: f64,
}

impl CostFunction for PenaltyStage<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let mut cost = self.problem.objective(x);

        let residual = self.problem.equality(x);
        cost += self.penalty * residual * residual;

        for (i, &xi) in x.iter().enumerate() {
            if xi < self.problem.lower[i] {
                let violation = self.problem.lower[i] - xi;
                cost += self.penalty * violation * violation;
            }
            if xi > self.problem.upper[i] {
                let violation = xi - self.problem.upper[i];
                cost += self.penalty * violation * violation;
            }
        }

        Ok(cost)
    }
}

impl Gradient for PenaltyStage<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    /// Analytic gradient: `2(x[i] - r[i])` from the objective, a uniform
    /// `2μ·(Σx - U)` from the equality penalty, and one-sided terms for
    /// violated bounds.
    fn gradient(&self, x: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        let mut grad = self.problem.objective_gradient(x);

        let equality_term = 2.0 * self.penalty * self.problem.equality(x);
        for (i, g) in grad.iter_mut().enumerate() {
            *g += equality_term;
            let xi = x[i];
            if xi < self.problem.lower[i] {
                *g += 2.0 * self.penalty * (xi - self.problem.lower[i]);
            }
            if xi > self.problem.upper[i] {
                *g += 2.0 * self.penalty * (xi - self.problem.upper[i]);
            }
        }

        Ok(grad)
    }
}

fn max_bound_violation(x: &[f64], lower: &[f64], upper: &[f64]) -> f64 {
    let mut max_violation: f64 = 0.0;
    for i in 0..x.len() {
        if x[i] < lower[i] {
            max_violation = max_violation.max(lower[i] - x[i]);
        }
        if x[i] > upper[i] {
            max_violation = max_violation.max(x[i] - upper[i]);
        }
    }
    max_violation
}

fn project_onto_bounds(x: &mut [f64], lower: &[f64], upper: &[f64]) {
    for i in 0..x.len() {
        x[i] = x[i].clamp(lower[i], upper[i]);
    }
}

pub struct PenaltyLbfgs;

impl RefinerBackend for PenaltyLbfgs {
    fn solve(&self, problem: &RefineProblem) -> Result<Vec<f64>, RefinerError> {
        let start = Instant::now();
        let tolerances = problem.tolerances;

        let mut x = problem.initial.clone();
        let mut penalty = INITIAL_PENALTY;
        let inner_iters = (tolerances.max_evaluations / MAX_PENALTY_ITERS) as u64;
        let mut previous: Option<(Vec<f64>, f64)> = None;

        for _outer in 0..MAX_PENALTY_ITERS {
            let stage = PenaltyStage { problem, penalty };
            let linesearch = MoreThuenteLineSearch::new();
            let solver = LBFGS::new(linesearch, LBFGS_MEMORY);

            let executor = Executor::new(stage, solver).configure(|state| {
                state
                    .param(x.clone())
                    .max_iters(inner_iters)
                    .target_cost(0.0)
            });

            match executor.run() {
                Ok(result) => {
                    if let Some(best) = result.state().get_best_param() {
                        x = best.clone();
                    }
                }
                Err(_) => {
                    // A failed line search on one stage is not fatal;
                    // the raised penalty reshapes the next stage.
                }
            }

            if !x.iter().all(|v| v.is_finite()) {
                return Err(RefinerError::NumericFailure(
                    "non-finite iterate".to_string(),
                ));
            }

            let equality_violation = problem.equality(&x).abs();
            let bound_violation = max_bound_violation(&x, &problem.lower, &problem.upper);
            if equality_violation.max(bound_violation) < tolerances.eq_abs {
                break;
            }
            if start.elapsed() >= tolerances.max_time {
                // Budget spent: hand back the current best rather than
                // aborting; the caller accepts it.
                break;
            }

            // Stagnation across stages: neither the iterate nor the
            // objective moves any more, so a larger penalty will not
            // either.
            let objective = problem.objective(&x);
            if let Some((previous_x, previous_objective)) = &previous {
                let step = x
                    .iter()
                    .zip(previous_x)
                    .map(|(a, b)| (a - b).abs())
                    .fold(0.0f64, f64::max);
                let scale = x.iter().fold(1.0f64, |m, v| m.max(v.abs()));
                if step < tolerances.x_rel * scale
                    && (objective - previous_objective).abs() < tolerances.f_abs
                {
                    break;
                }
            }
            previous = Some((x.clone(), objective));

            penalty *= PENALTY_INCREASE;
        }

        project_onto_bounds(&mut x, &problem.lower, &problem.upper);
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refiner::RefineTolerances;

    fn problem(
        reference: Vec<f64>,
        lower: Vec<f64>,
        upper: Vec<f64>,
        initial: Vec<f64>,
        command: f64,
    ) -> RefineProblem {
        RefineProblem {
            reference,
            lower,
            upper,
            initial,
            command,
            tolerances: RefineTolerances::default(),
        }
    }

    #[test]
    fn penalty_gradient_matches_finite_differences() {
        let p = problem(
            vec![10.0, 20.0],
            vec![0.0, 0.0],
            vec![12.0, 100.0],
            vec![5.0, 5.0],
            40.0,
        );
        let stage = PenaltyStage {
            problem: &p,
            penalty: 100.0,
        };

        // Probe a point violating the upper bound of x0 so every gradient
        // term is active.
        let x = vec![14.0, 18.0];
        let grad = stage.gradient(&x).unwrap();

        let eps = 1e-6;
        for i in 0..x.len() {
            let mut shifted = x.clone();
            shifted[i] += eps;
            let numeric = (stage.cost(&shifted).unwrap() - stage.cost(&x).unwrap()) / eps;
            assert!(
                (grad[i] - numeric).abs() < 1e-2,
                "component {i}: analytic {} vs numeric {}",
                grad[i],
                numeric
            );
        }
    }

    #[test]
    fn solution_respects_the_bounds() {
        let p = problem(
            vec![50.0, 50.0],
            vec![0.0, 0.0],
            vec![60.0, 100.0],
            vec![60.0, 70.0],
            140.0,
        );
        let x = PenaltyLbfgs.solve(&p).unwrap();
        assert!(x[0] >= 0.0 && x[0] <= 60.0, "x0 = {}", x[0]);
        assert!(x[1] >= 0.0 && x[1] <= 100.0, "x1 = {}", x[1]);
    }

    #[test]
    fn solution_improves_on_the_initial_guess() {
        let p = problem(
            vec![10.0, 20.0],
            vec![0.0, 0.0],
            vec![100.0, 100.0],
            vec![20.0, 20.0],
            40.0,
        );
        let x = PenaltyLbfgs.solve(&p).unwrap();

        // The exact optimum is (15, 25); accept anything clearly closer
        // than the guess, with the equality nearly satisfied.
        assert!(p.objective(&x) <= p.objective(&p.initial) + 1e-9);
        assert!(p.equality(&x).abs() < 1.0, "residual = {}", p.equality(&x));
    }
}
