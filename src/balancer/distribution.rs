use tracing::{debug, warn};

use super::DistributionOutcome;
use crate::domain::GridNetwork;

/// Assign every child node its initial allocation.
///
/// When the parent can cover total demand each node gets exactly its demand.
/// Otherwise allocations are left as loaded: no curtailment is applied and the
/// run carries on with whatever the snapshot held.
pub fn distribute_base(grid: &mut GridNetwork) -> DistributionOutcome {
    let total_demand = grid.total_demand();
    let total_capacity = grid.total_capacity;

    if total_demand > total_capacity {
        warn!(
            grid_id = %grid.id,
            total_demand,
            total_capacity,
            "demand exceeds capacity, keeping loaded allocations"
        );
        return DistributionOutcome::Overloaded;
    }

    for node in &mut grid.child_nodes {
        node.allocated_power = node.current_demand;
    }
    debug!(grid_id = %grid.id, total_demand, total_capacity, "allocated exact demand to all nodes");

    DistributionOutcome::FullService
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::test_support::{grid, node};
    use rstest::rstest;

    #[rstest]
    #[case(100.0, &[40.0, 60.0])]
    #[case(150.0, &[40.0, 60.0])]
    #[case(0.0, &[])]
    #[case(10.0, &[0.0, 0.0, 10.0])]
    fn test_full_service_allocates_exact_demand(#[case] capacity: f64, #[case] demands: &[f64]) {
        let nodes = demands.iter().map(|&d| node(d, 7.5, 1.0)).collect();
        let mut g = grid(capacity, nodes);

        assert_eq!(distribute_base(&mut g), DistributionOutcome::FullService);
        for n in &g.child_nodes {
            assert_eq!(n.allocated_power, n.current_demand);
        }
    }

    #[test]
    fn test_overload_keeps_loaded_allocations() {
        let mut g = grid(50.0, vec![node(40.0, 30.0, 1.0), node(60.0, 5.0, 2.0)]);

        assert_eq!(distribute_base(&mut g), DistributionOutcome::Overloaded);
        assert_eq!(g.child_nodes[0].allocated_power, 30.0);
        assert_eq!(g.child_nodes[1].allocated_power, 5.0);
    }
}
