//! Coarse DP solver over the (machine, cumulative allocation) grid.
//!
//! Column `c` of the grid is machine `c` (in enabled order); row `r`
//! represents a cumulative allocation of `r * allocation_resolution`
//! across machines `0..=c`. A Bellman sweep fills the table column by
//! column; the per-machine shares are recovered as the first difference
//! of the cumulative trace along the cheapest back-path.

use gridalloc_core::config::{ItemConfig, OptimizerConfig};
use rayon::prelude::*;
use tracing::debug;

use crate::cost::cell_cost;
use crate::error::AllocError;
use crate::policy::build_policy_reference;
use crate::types::AllocationEntry;

/// One cell of the DP table.
#[derive(Debug, Clone, Copy)]
struct StGraphPoint {
    /// Cumulative allocation represented by this cell.
    s: f32,
    total_cost: f32,
    /// Row of the predecessor cell in the previous column. Cells are
    /// linked by index, never by reference; the back-trace walks rows.
    pre_row: Option<u32>,
}

impl StGraphPoint {
    fn unreached(s: f32) -> Self {
        Self {
            s,
            total_cost: f32::INFINITY,
            pre_row: None,
        }
    }
}

/// The gridded search itself. Build one per configuration and call
/// [`GriddedStGraph::process`] once per command.
pub struct GriddedStGraph<'a> {
    config: &'a OptimizerConfig,
    is_exact_policy: bool,
}

impl<'a> GriddedStGraph<'a> {
    pub fn new(config: &'a OptimizerConfig) -> Self {
        Self {
            config,
            is_exact_policy: false,
        }
    }

    /// True when the last `process` call returned the policy reference
    /// unchanged because it was already feasible everywhere.
    pub fn is_exact_policy(&self) -> bool {
        self.is_exact_policy
    }

    /// Solve the coarse allocation for one command.
    ///
    /// # Panics
    ///
    /// Panics if `current_state` is too short to be indexed by an enabled
    /// item's `index`.
    pub fn process(
        &mut self,
        current_state: &[f32],
        reference_command: f32,
    ) -> Result<Vec<AllocationEntry>, AllocError> {
        self.is_exact_policy = false;

        let items: Vec<ItemConfig> = self.config.enabled_items().cloned().collect();
        if items.is_empty() {
            return Err(AllocError::NoEnabledItems);
        }
        if reference_command < 0.0 {
            return Err(AllocError::NegativeCommand(reference_command));
        }

        let reference = build_policy_reference(
            &items,
            current_state,
            reference_command,
            self.config.allocation_type,
        );

        // Short circuit: a reference that is feasible everywhere is the
        // optimum of the quadratic cost, so no search is needed.
        if let Some(entries) = exact_policy_output(&items, &reference) {
            debug!("policy reference is feasible, skipping the grid search");
            self.is_exact_policy = true;
            return Ok(entries);
        }

        let step = self.config.allocation_resolution;
        let dim_s = (reference_command / step).ceil() as usize + 1;

        let mut table: Vec<Vec<StGraphPoint>> = Vec::with_capacity(items.len());

        // Column 0: machine 0 takes the whole cumulative value itself.
        let first = &items[0];
        let first_reference = reference[0].1;
        table.push(
            (0..dim_s)
                .map(|row| {
                    let s = row as f32 * step;
                    StGraphPoint {
                        s,
                        total_cost: cell_cost(
                            s,
                            first.lower_bound,
                            first.upper_bound,
                            &first.resonances,
                            first_reference,
                        ),
                        pre_row: None,
                    }
                })
                .collect(),
        );

        // Remaining columns read the previous one; rows within a column
        // are independent and each is owned by exactly one task, so the
        // multi-threaded sweep stays deterministic.
        for c in 1..items.len() {
            let item = &items[c];
            let item_reference = reference[c].1;
            let column = {
                let previous = &table[c - 1];
                let compute = |row: usize| -> StGraphPoint {
                    let mut best = StGraphPoint::unreached(row as f32 * step);
                    for i in 0..=row {
                        let reached = previous[i].total_cost;
                        if reached.is_infinite() {
                            continue;
                        }
                        let share = (row - i) as f32 * step;
                        let cost = reached
                            + cell_cost(
                                share,
                                item.lower_bound,
                                item.upper_bound,
                                &item.resonances,
                                item_reference,
                            );
                        // Strict improvement only: ties keep the earliest
                        // predecessor.
                        if cost < best.total_cost {
                            best.total_cost = cost;
                            best.pre_row = Some(i as u32);
                        }
                    }
                    best
                };

                if self.config.multi_threaded_dp {
                    (0..dim_s).into_par_iter().map(compute).collect()
                } else {
                    (0..dim_s).map(compute).collect()
                }
            };
            table.push(column);
        }

        backtrace(&table, &items)
    }
}

/// Return the policy reference as a solution when every machine's
/// reference point is already feasible.
fn exact_policy_output(
    items: &[ItemConfig],
    reference: &[(u32, f32)],
) -> Option<Vec<AllocationEntry>> {
    let mut entries = Vec::with_capacity(items.len());
    for (item, &(index, value)) in items.iter().zip(reference) {
        if !item.is_feasible(value) {
            return None;
        }
        entries.push(AllocationEntry { index, value });
    }
    Some(entries)
}

/// Walk back from the highest feasible cumulative allocation in the last
/// column and difference the trace into per-machine shares.
fn backtrace(
    table: &[Vec<StGraphPoint>],
    items: &[ItemConfig],
) -> Result<Vec<AllocationEntry>, AllocError> {
    let last_column = table.last().expect("table has at least one column");
    let mut row = match (0..last_column.len())
        .rev()
        .find(|&r| last_column[r].total_cost.is_finite())
    {
        Some(row) => row,
        None => {
            return Err(AllocError::Infeasible(
                "no feasible trajectory through the allocation grid".to_string(),
            ))
        }
    };

    let mut cumulative = vec![0.0f32; table.len()];
    for c in (0..table.len()).rev() {
        let cell = &table[c][row];
        cumulative[c] = cell.s;
        if c > 0 {
            row = cell
                .pre_row
                .expect("finite interior cell records a predecessor")
                as usize;
        }
    }

    let entries = items
        .iter()
        .enumerate()
        .map(|(c, item)| {
            let value = if c == 0 {
                cumulative[0]
            } else {
                cumulative[c] - cumulative[c - 1]
            };
            AllocationEntry {
                index: item.index,
                value,
            }
        })
        .collect();
    Ok(entries)
}
