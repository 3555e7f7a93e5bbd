//! End-to-end balancing runs against the in-memory store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grid_balancer::{
    balancer::BalanceError,
    controller::GridBalancer,
    domain::{ChildNode, Coordinate, EnergyTransfer, GridId, GridNetwork, GridSummary},
    repo::{GridStore, InMemoryGridStore, StoreError},
};
use rstest::rstest;
use std::sync::Arc;
use uuid::Uuid;

// About 10 km of latitude, which prices a transfer at 0.5% loss
const TEN_KM_NORTH: f64 = 10.0 / 111.194_926_6;

fn node(demand: f64, allocated: f64, distance: f64, lat: f64) -> ChildNode {
    ChildNode {
        id: Uuid::new_v4(),
        name: format!("node-{distance}"),
        location: Coordinate::new(lat, 0.0),
        capacity: 100.0,
        current_demand: demand,
        allocated_power: allocated,
        distance,
    }
}

fn grid(total_capacity: f64, child_nodes: Vec<ChildNode>) -> GridNetwork {
    GridNetwork {
        id: GridId::new(),
        parent_node_id: Uuid::new_v4(),
        child_nodes,
        total_capacity,
        current_load: 0.0,
        last_balanced: None,
    }
}

/// Two nodes 10 km apart, A over-supplied by 30, B short by 25. Demand exceeds
/// capacity so the base distribution keeps the loaded allocations.
fn single_transfer_grid() -> GridNetwork {
    grid(
        90.0,
        vec![node(50.0, 80.0, 10.0, 0.0), node(45.0, 20.0, 10.0, TEN_KM_NORTH)],
    )
}

fn setup(g: GridNetwork) -> (Arc<InMemoryGridStore>, GridBalancer, GridId) {
    let id = g.id;
    let store = Arc::new(InMemoryGridStore::with_grids([g]));
    let balancer = GridBalancer::new(store.clone());
    (store, balancer, id)
}

#[tokio::test]
async fn test_exact_balance_persists_demand_allocations() {
    let (store, balancer, id) = setup(grid(
        100.0,
        vec![node(40.0, 0.0, 1.0, 0.0), node(60.0, 0.0, 2.0, 0.0)],
    ));

    let outcome = balancer.balance_grid(&id.to_string()).await.unwrap();

    assert!(outcome.transfers.is_empty());
    let stored = store.load_grid(id).await.unwrap();
    assert_eq!(stored.child_nodes[0].allocated_power, 40.0);
    assert_eq!(stored.child_nodes[1].allocated_power, 60.0);
    assert!(stored.last_balanced.is_some());
    assert_eq!(store.transfer_count().await, 0);
}

#[tokio::test]
async fn test_single_transfer_is_logged() {
    let g = single_transfer_grid();
    let (a, b) = (g.child_nodes[0].id, g.child_nodes[1].id);
    let (store, balancer, id) = setup(g);

    let outcome = balancer.balance_grid(&id.to_string()).await.unwrap();

    assert_eq!(outcome.transfers.len(), 1);
    let t = &outcome.transfers[0];
    assert_eq!((t.from_node_id, t.to_node_id), (a, b));
    assert_eq!(t.grid_id, id);
    assert!((t.amount - 25.126).abs() < 1e-3);
    assert!((t.loss_estimate - 0.5).abs() < 1e-3);

    let stored = store.load_grid(id).await.unwrap();
    assert!((stored.child_nodes[0].allocated_power - 54.874).abs() < 1e-3);
    assert!((stored.child_nodes[1].allocated_power - 45.0).abs() < 1e-9);

    let log = store.list_transfers(id, 10).await.unwrap();
    assert_eq!(log, outcome.transfers);
}

#[tokio::test]
async fn test_insufficient_excess_never_goes_negative() {
    let (store, balancer, id) = setup(grid(
        50.0,
        vec![
            node(10.0, 18.0, 3.0, 0.0),
            node(30.0, 12.0, 1.0, 0.0),
            node(25.0, 20.0, 2.0, TEN_KM_NORTH),
        ],
    ));

    let outcome = balancer.balance_grid(&id.to_string()).await.unwrap();

    assert!(outcome.report.unmet_demand_mw > 0.0);
    for t in &outcome.transfers {
        assert!(t.amount > 0.0);
        assert!((0.0..=50.0).contains(&t.loss_estimate));
    }
    let stored = store.load_grid(id).await.unwrap();
    assert!(stored.child_nodes.iter().all(|n| n.allocated_power >= 0.0));
    assert!(stored.child_nodes.iter().any(|n| n.shortfall() > 0.0));
}

#[tokio::test]
async fn test_second_run_after_balancing_is_quiet() {
    let (store, balancer, id) = setup(single_transfer_grid());

    balancer.balance_grid(&id.to_string()).await.unwrap();
    let again = balancer.balance_grid(&id.to_string()).await.unwrap();

    assert!(again.transfers.is_empty());
    assert_eq!(store.transfer_count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_runs_on_one_grid_are_serialized() {
    let (store, balancer, id) = setup(single_transfer_grid());
    let balancer = Arc::new(balancer);

    let runs: Vec<_> = (0..8)
        .map(|_| {
            let balancer = balancer.clone();
            tokio::spawn(async move { balancer.balance_grid(&id.to_string()).await })
        })
        .collect();

    let mut emitted = 0;
    for run in runs {
        emitted += run.await.unwrap().unwrap().transfers.len();
    }

    // Only the first run sees the surplus; the others load its result
    assert_eq!(emitted, 1);
    assert_eq!(store.transfer_count().await, 1);
}

#[rstest]
#[case("not-a-uuid")]
#[case("")]
#[case("507f1f77bcf86cd799439011")]
#[case(" 6f1d2c3b-9a4e-4b7d-8c21-0e5f3a9d7b10 ")]
#[tokio::test]
async fn test_malformed_identifiers(#[case] raw: &str) {
    let (store, balancer, _) = setup(single_transfer_grid());

    let err = balancer.balance_grid(raw).await.unwrap_err();

    assert!(matches!(err, BalanceError::InvalidIdentifier(_)));
    assert_eq!(store.transfer_count().await, 0);
}

/// Saves allocations but refuses to append transfers, using the default
/// non-atomic commit.
struct FailingLogStore(InMemoryGridStore);

#[async_trait]
impl GridStore for FailingLogStore {
    fn backend(&self) -> &'static str {
        "failing-log"
    }
    async fn load_grid(&self, id: GridId) -> Result<GridNetwork, StoreError> {
        self.0.load_grid(id).await
    }
    async fn list_grids(&self) -> Result<Vec<GridSummary>, StoreError> {
        self.0.list_grids().await
    }
    async fn save_grid_allocations(
        &self,
        id: GridId,
        nodes: &[ChildNode],
        last_balanced: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.0.save_grid_allocations(id, nodes, last_balanced).await
    }
    async fn update_node_demand(
        &self,
        grid_id: GridId,
        node_id: Uuid,
        current_demand: f64,
    ) -> Result<(), StoreError> {
        self.0.update_node_demand(grid_id, node_id, current_demand).await
    }
    async fn append_transfers(&self, _transfers: &[EnergyTransfer]) -> Result<(), StoreError> {
        Err(StoreError::Backend("transfer log is full".into()))
    }
    async fn list_transfers(
        &self,
        id: GridId,
        limit: usize,
    ) -> Result<Vec<EnergyTransfer>, StoreError> {
        self.0.list_transfers(id, limit).await
    }
}

#[tokio::test]
async fn test_partial_commit_is_reported() {
    let g = single_transfer_grid();
    let id = g.id;
    let store = Arc::new(FailingLogStore(InMemoryGridStore::with_grids([g])));
    let balancer = GridBalancer::new(store.clone());

    let err = balancer.balance_grid(&id.to_string()).await.unwrap_err();

    match err {
        BalanceError::Persistence(StoreError::PartialCommit { grid_id, source, .. }) => {
            assert_eq!(grid_id, id);
            assert!(matches!(*source, StoreError::Backend(_)));
        }
        other => panic!("expected partial commit, got {other:?}"),
    }
    let stored = store.load_grid(id).await.unwrap();
    assert!(stored.last_balanced.is_some());
    assert_eq!(store.0.transfer_count().await, 0);
}
