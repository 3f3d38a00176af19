//! Solution types emitted by the allocation pipeline.

use serde::Serialize;
use std::fmt;

/// One machine's share of the reference command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AllocationEntry {
    pub index: u32,
    pub value: f32,
}

/// Which stage of the pipeline produced a solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AllocationMethod {
    /// Closed-form small-load redistribution.
    SmallLoad,
    /// The policy reference was already feasible; no search ran.
    ExactPolicy,
    /// Coarse DP solution, snapped to the allocation grid.
    CoarseDp,
    /// DP solution refined by the constrained minimiser.
    Refined,
}

impl fmt::Display for AllocationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationMethod::SmallLoad => write!(f, "small-load"),
            AllocationMethod::ExactPolicy => write!(f, "exact-policy"),
            AllocationMethod::CoarseDp => write!(f, "coarse-dp"),
            AllocationMethod::Refined => write!(f, "refined"),
        }
    }
}

/// A successful allocation: one entry per enabled machine, in
/// configuration order.
#[derive(Debug, Clone, Serialize)]
pub struct AllocationSolution {
    pub entries: Vec<AllocationEntry>,
    pub method: AllocationMethod,
    pub solve_time_ms: u128,
}

impl AllocationSolution {
    /// Sum of the allocated values.
    pub fn total(&self) -> f32 {
        self.entries.iter().map(|entry| entry.value).sum()
    }
}
