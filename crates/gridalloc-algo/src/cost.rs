//! Per-cell cost of placing a machine at a discrete output level.

use gridalloc_core::config::Resonance;

/// Cost of running a machine at output `s` given its capacity interval
/// `[lower_bound, upper_bound]`, its forbidden bands, and its policy
/// reference.
///
/// Infeasible levels cost `f32::INFINITY`; the DP prunes on that marker.
/// A level is infeasible outside the capacity interval or strictly inside
/// a resonance; the resonance endpoints themselves are feasible. Feasible
/// levels cost the squared deviation from the reference.
pub fn cell_cost(
    s: f32,
    lower_bound: f32,
    upper_bound: f32,
    resonances: &[Resonance],
    reference: f32,
) -> f32 {
    if s < lower_bound || s > upper_bound {
        return f32::INFINITY;
    }

    for zone in resonances {
        if zone.contains_open(s) {
            return f32::INFINITY;
        }
    }

    (s - reference) * (s - reference)
}
