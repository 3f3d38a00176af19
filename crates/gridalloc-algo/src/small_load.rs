//! Closed-form fast path for small command changes.
//!
//! When the required change from the current state is inside the
//! configured dead-band, a single greedy redistribution usually absorbs
//! it without running the DP at all. The pass walks the machines in
//! head-room order and either commits the whole remaining delta to one
//! machine, or clamps that machine to the near edge of whatever band
//! blocks it and carries the rest forward.

use std::cmp::Ordering;
use std::collections::HashMap;

use gridalloc_core::config::{ItemConfig, OptimizerConfig, Resonance};

use crate::types::AllocationEntry;

pub struct SmallLoadAssignment<'a> {
    config: &'a OptimizerConfig,
}

impl<'a> SmallLoadAssignment<'a> {
    pub fn new(config: &'a OptimizerConfig) -> Self {
        Self { config }
    }

    /// Try to absorb `reference_command` with a greedy adjustment of the
    /// current state. Returns `None` when the fast path does not apply:
    /// the delta exceeds the dead-band, the enabled set is empty, or no
    /// machine could take the remaining delta unblocked.
    ///
    /// # Panics
    ///
    /// Panics if `current_state` is too short to be indexed by an enabled
    /// item's `index`.
    pub fn try_assign(
        &self,
        current_state: &[f32],
        reference_command: f32,
    ) -> Option<Vec<AllocationEntry>> {
        let items: Vec<&ItemConfig> = self.config.enabled_items().collect();
        if items.is_empty() {
            return None;
        }
        let by_index: HashMap<u32, &ItemConfig> =
            items.iter().map(|item| (item.index, *item)).collect();

        // Seed the solution with the current operating points.
        let mut solution: Vec<(u32, f32)> = items
            .iter()
            .map(|item| (item.index, current_state[item.index as usize]))
            .collect();

        let current_total: f32 = solution.iter().map(|(_, value)| value).sum();
        let mut delta = reference_command - current_total;
        if delta.abs() > self.config.small_load_dead_size {
            return None;
        }

        // Ascending: widest remaining head-room first. Descending: the
        // mirror order.
        let ascending = delta >= 0.0;
        let headroom = |entry: &(u32, f32)| -> f32 {
            by_index[&entry.0].capacity_span() - entry.1
        };
        solution.sort_by(|a, b| {
            let ordering = headroom(a)
                .partial_cmp(&headroom(b))
                .unwrap_or(Ordering::Equal);
            if ascending {
                ordering.reverse()
            } else {
                ordering
            }
        });

        let mut committed = false;
        for entry in solution.iter_mut() {
            let item = by_index[&entry.0];
            let candidate = entry.1 + delta;

            match blocking_band(candidate, item) {
                None => {
                    entry.1 = candidate;
                    committed = true;
                    break;
                }
                Some(band) => {
                    // Clamp to the near edge of the blocking band and
                    // carry the consumed amount out of the delta.
                    let edge = if ascending { band.lower } else { band.upper };
                    delta -= edge - entry.1;
                    entry.1 = edge;
                }
            }
        }

        if !committed {
            return None;
        }

        solution.sort_by_key(|entry| entry.0);
        Some(
            solution
                .into_iter()
                .map(|(index, value)| AllocationEntry { index, value })
                .collect(),
        )
    }
}

/// The band that blocks a candidate operating point, if any.
///
/// Below the capacity interval the gap `[candidate, lower_bound]` acts as
/// the blocking band; above it, `[upper_bound, candidate]`; inside it, the
/// first resonance containing the candidate (endpoints included, so a
/// candidate landing exactly on an edge is clamped there at zero cost).
fn blocking_band(candidate: f32, item: &ItemConfig) -> Option<Resonance> {
    if candidate < item.lower_bound {
        return Some(Resonance::new(candidate, item.lower_bound));
    }
    if candidate > item.upper_bound {
        return Some(Resonance::new(item.upper_bound, candidate));
    }
    item.resonances
        .iter()
        .find(|zone| zone.contains_closed(candidate))
        .copied()
}
