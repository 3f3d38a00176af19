//! Quadratic-program backend on the Clarabel conic solver.
//!
//! With the band bounds from `build_bounds` the refinement problem is a
//! strictly convex QP:
//!
//! ```text
//! minimize    (1/2) xᵀ(2I)x - 2rᵀx
//! subject to  Σx = U          (zero cone)
//!             x ≤ u, -x ≤ -l  (nonnegative cones)
//! ```

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus, SupportedConeT,
};

use super::{RefineProblem, RefinerBackend, RefinerError};

pub struct QpBackend;

impl RefinerBackend for QpBackend {
    fn solve(&self, problem: &RefineProblem) -> Result<Vec<f64>, RefinerError> {
        let n = problem.dimension();

        // Objective: P = 2I, q = -2r.
        let p_mat = CscMatrix::new(
            n,
            n,
            (0..=n).collect(),
            (0..n).collect(),
            vec![2.0; n],
        );
        let q: Vec<f64> = problem.reference.iter().map(|r| -2.0 * r).collect();

        // Constraint rows: row 0 is the equality Σx = U; rows 1..=n bound
        // x from above; rows n+1..=2n bound it from below. Three entries
        // per column, already in ascending row order.
        let mut col_ptr = Vec::with_capacity(n + 1);
        let mut row_idx = Vec::with_capacity(3 * n);
        let mut values = Vec::with_capacity(3 * n);
        for j in 0..n {
            col_ptr.push(3 * j);
            row_idx.push(0);
            values.push(1.0);
            row_idx.push(1 + j);
            values.push(1.0);
            row_idx.push(1 + n + j);
            values.push(-1.0);
        }
        col_ptr.push(3 * n);
        let a_mat = CscMatrix::new(1 + 2 * n, n, col_ptr, row_idx, values);

        let mut rhs = Vec::with_capacity(1 + 2 * n);
        rhs.push(problem.command);
        rhs.extend_from_slice(&problem.upper);
        rhs.extend(problem.lower.iter().map(|l| -l));

        let cones = [
            SupportedConeT::ZeroConeT(1),
            SupportedConeT::NonnegativeConeT(2 * n),
        ];

        let tolerances = problem.tolerances;
        let settings = DefaultSettingsBuilder::default()
            .verbose(false)
            .max_iter(tolerances.max_evaluations as u32)
            .time_limit(tolerances.max_time.as_secs_f64())
            .build()
            .map_err(|e| RefinerError::NumericFailure(format!("settings error: {e:?}")))?;

        let mut solver = DefaultSolver::new(&p_mat, &q, &a_mat, &rhs, &cones, settings)
            .map_err(|e| RefinerError::NumericFailure(format!("solver setup failed: {e:?}")))?;
        solver.solve();

        let solution = solver.solution;
        match solution.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => Ok(solution.x.clone()),
            SolverStatus::MaxIterations | SolverStatus::MaxTime => Err(RefinerError::Timeout),
            status => Err(RefinerError::NumericFailure(format!(
                "solver returned status {status:?}"
            ))),
        }
    }
}
