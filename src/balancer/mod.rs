//! Allocation and rebalancing engine.
//!
//! A run takes an owned grid snapshot through base distribution,
//! excess/deficit classification and greedy transfer matching. It is a plain
//! synchronous computation; loading, locking and persisting belong to
//! [`crate::controller::GridBalancer`].

pub mod classify;
pub mod distribution;
pub mod matcher;
pub mod types;

pub use classify::*;
pub use distribution::*;
pub use matcher::*;
pub use types::*;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::GridNetwork;

/// Run the full engine over `grid`, mutating its allocations in place.
///
/// `now` stamps every emitted transfer. The grid's `last_balanced` is left for
/// the caller to set once the result has been persisted.
pub fn balance(grid: &mut GridNetwork, now: DateTime<Utc>) -> Result<BalancePlan, BalanceError> {
    grid.check_invariants()
        .map_err(|reason| BalanceError::computation(BalanceStage::Loaded, reason))?;

    let total_demand = grid.total_demand();
    let distribution = distribute_base(grid);
    debug!(grid_id = %grid.id, stage = %BalanceStage::BaseDistributed, ?distribution);

    let order = classify(&grid.child_nodes);
    debug!(
        grid_id = %grid.id,
        stage = %BalanceStage::Classified,
        excess = order.excess.len(),
        deficit = order.deficit.len()
    );

    let matched = match_transfers(grid, &order, now)?;
    debug!(
        grid_id = %grid.id,
        stage = %BalanceStage::Matched,
        transfers = matched.transfers.len()
    );

    if let Some(node) = grid.child_nodes.iter().find(|n| n.allocated_power < 0.0) {
        return Err(BalanceError::computation(
            BalanceStage::Matched,
            format!("node {} ended with negative allocation", node.id),
        ));
    }

    let unmet_demand_mw = grid.child_nodes.iter().map(|n| n.shortfall()).sum();
    let report = BalanceReport {
        total_demand,
        total_capacity: grid.total_capacity,
        distribution,
        overloaded: distribution == DistributionOutcome::Overloaded,
        excess_nodes: order.excess.len(),
        deficit_nodes: order.deficit.len(),
        transfer_count: matched.transfers.len(),
        delivered_mw: matched.delivered_mw,
        lost_mw: matched.lost_mw,
        unmet_demand_mw,
    };

    Ok(BalancePlan {
        transfers: matched.transfers,
        report,
    })
}
