//! Policy reference: the preferred operating point per enabled machine.
//!
//! Both the coarse DP and the refiner pull their solutions toward the same
//! reference, so it is built in exactly one place.

use gridalloc_core::config::{AllocationType, ItemConfig};
use gridalloc_core::units;

/// Build the policy reference `r[i]` for the enabled items, in
/// configuration order. Each entry pairs the machine `index` with its
/// preferred operating point.
///
/// The reference is not clipped into the capacity interval here;
/// feasibility is enforced downstream by the cost kernel and the refiner
/// bands.
///
/// # Panics
///
/// Panics if `current_state` is too short to be indexed by an enabled
/// item's `index` (a precondition violation).
pub fn build_policy_reference(
    items: &[ItemConfig],
    current_state: &[f32],
    reference_command: f32,
    allocation_type: AllocationType,
) -> Vec<(u32, f32)> {
    match allocation_type {
        AllocationType::Proportional => items
            .iter()
            .map(|item| (item.index, item.assigned_factor * reference_command))
            .collect(),
        AllocationType::Margin => margin_reference(items, current_state, reference_command),
    }
}

/// Margin policy: a surplus is distributed in proportion to remaining
/// head-room, a deficit in proportion to current load. Degenerate
/// denominators leave the machine at its current operating point.
fn margin_reference(
    items: &[ItemConfig],
    current_state: &[f32],
    reference_command: f32,
) -> Vec<(u32, f32)> {
    let loads: Vec<(f32, f32)> = items
        .iter()
        .map(|item| (current_state[item.index as usize], item.capacity_span()))
        .collect();

    let sum_load: f32 = loads.iter().map(|(x, _)| x).sum();
    let sum_headroom: f32 = loads.iter().map(|(x, span)| span - x).sum();
    let delta = reference_command - sum_load;

    items
        .iter()
        .zip(&loads)
        .map(|(item, &(x, span))| {
            let share = if reference_command > sum_load {
                if units::is_zero(sum_headroom as f64) {
                    0.0
                } else {
                    delta * (span - x) / sum_headroom
                }
            } else if units::is_zero(sum_load as f64) {
                0.0
            } else {
                delta * x / sum_load
            };
            (item.index, x + share)
        })
        .collect()
}
