use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use super::{BalanceError, NodeOrder};
use crate::domain::{distance_km, loss_rate, EnergyTransfer, GridNetwork};

/// Quantities at or below this many MW are treated as zero so float residue
/// never turns into a microscopic extra transfer.
pub const EPSILON_MW: f64 = 1e-9;

/// Transfers decided by one matching pass and their totals
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub transfers: Vec<EnergyTransfer>,
    pub delivered_mw: f64,
    pub lost_mw: f64,
}

/// Greedy single pass moving surplus from excess nodes to deficit nodes.
///
/// Deficit nodes are served in `order.deficit` order. For each one the excess
/// list is scanned in `order.excess` order; surplus consumed by an earlier
/// deficit node is gone for later ones. The amount sent is grossed up for the
/// distance loss so the destination receives what it lacks, capped by the
/// source's surplus. Allocations in `grid` are updated as transfers are made.
pub fn match_transfers(
    grid: &mut GridNetwork,
    order: &NodeOrder,
    now: DateTime<Utc>,
) -> Result<MatchOutcome, BalanceError> {
    let mut outcome = MatchOutcome::default();
    let nodes = &mut grid.child_nodes;

    for &dst in &order.deficit {
        let mut remaining = nodes[dst].shortfall();

        for &src in &order.excess {
            if remaining <= EPSILON_MW {
                break;
            }

            let surplus = nodes[src].balance();
            if surplus <= EPSILON_MW {
                continue;
            }

            let distance = distance_km(&nodes[src].location, &nodes[dst].location);
            let loss = loss_rate(distance)?;
            let amount = (remaining / (1.0 - loss)).min(surplus);
            if amount <= EPSILON_MW {
                continue;
            }
            let delivered = amount * (1.0 - loss);

            nodes[src].allocated_power -= amount;
            nodes[dst].allocated_power += delivered;
            remaining -= delivered;

            let transfer = EnergyTransfer {
                id: Uuid::new_v4(),
                grid_id: grid.id,
                from_node_id: nodes[src].id,
                to_node_id: nodes[dst].id,
                amount,
                transfer_time: now,
                loss_estimate: loss * 100.0,
            };
            debug!(
                from = %transfer.from_node_id,
                to = %transfer.to_node_id,
                amount,
                delivered,
                distance_km = distance,
                loss_percent = transfer.loss_estimate,
                "transfer"
            );

            outcome.delivered_mw += delivered;
            outcome.lost_mw += amount - delivered;
            outcome.transfers.push(transfer);
        }
    }

    Ok(outcome)
}
