use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::{collections::HashMap, path::Path};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{GridStore, StoreError};
use crate::domain::{ChildNode, EnergyTransfer, GridId, GridNetwork, GridSummary};

/// Seed file layout: a list of `[[grids]]` tables
#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    grids: Vec<GridNetwork>,
}

/// Grid store held in process memory.
///
/// Used when no database is configured and throughout the tests. A balance
/// commit is applied under both write locks, so readers never observe half of it.
#[derive(Debug, Default)]
pub struct InMemoryGridStore {
    grids: RwLock<HashMap<GridId, GridNetwork>>,
    transfers: RwLock<Vec<EnergyTransfer>>,
}

impl InMemoryGridStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grids(grids: impl IntoIterator<Item = GridNetwork>) -> Self {
        let grids = grids.into_iter().map(|g| (g.id, g)).collect();
        Self {
            grids: RwLock::new(grids),
            transfers: RwLock::new(Vec::new()),
        }
    }

    /// Parse grids from TOML seed data
    pub fn from_seed_str(seed: &str) -> Result<Self> {
        let file: SeedFile = toml::from_str(seed).context("invalid grid seed data")?;
        Ok(Self::with_grids(file.grids))
    }

    pub fn from_seed_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading grid seed file {}", path.display()))?;
        Self::from_seed_str(&raw)
    }

    pub async fn insert_grid(&self, grid: GridNetwork) {
        self.grids.write().await.insert(grid.id, grid);
    }

    pub async fn grid_count(&self) -> usize {
        self.grids.read().await.len()
    }

    pub async fn transfer_count(&self) -> usize {
        self.transfers.read().await.len()
    }
}

/// Copy `allocated_power` from the snapshot onto the stored nodes by id.
/// Snapshot nodes the stored grid no longer has are skipped.
fn apply_allocations(
    grid: &mut GridNetwork,
    nodes: &[ChildNode],
    last_balanced: DateTime<Utc>,
) {
    for node in nodes {
        if let Some(stored) = grid.child_nodes.iter_mut().find(|n| n.id == node.id) {
            stored.allocated_power = node.allocated_power;
        }
    }
    grid.last_balanced = Some(last_balanced);
}

#[async_trait]
impl GridStore for InMemoryGridStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn load_grid(&self, id: GridId) -> Result<GridNetwork, StoreError> {
        self.grids
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_grids(&self) -> Result<Vec<GridSummary>, StoreError> {
        let grids = self.grids.read().await;
        let mut summaries: Vec<GridSummary> = grids.values().map(GridSummary::from).collect();
        summaries.sort_by_key(|s| s.id);
        Ok(summaries)
    }

    async fn save_grid_allocations(
        &self,
        id: GridId,
        nodes: &[ChildNode],
        last_balanced: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut grids = self.grids.write().await;
        let grid = grids.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        apply_allocations(grid, nodes, last_balanced);
        Ok(())
    }

    async fn update_node_demand(
        &self,
        grid_id: GridId,
        node_id: Uuid,
        current_demand: f64,
    ) -> Result<(), StoreError> {
        let mut grids = self.grids.write().await;
        let grid = grids.get_mut(&grid_id).ok_or(StoreError::NotFound(grid_id))?;
        let node = grid
            .child_nodes
            .iter_mut()
            .find(|n| n.id == node_id)
            .ok_or(StoreError::NodeNotFound { grid_id, node_id })?;
        node.current_demand = current_demand;
        Ok(())
    }

    async fn append_transfers(&self, transfers: &[EnergyTransfer]) -> Result<(), StoreError> {
        if transfers.is_empty() {
            return Ok(());
        }
        self.transfers.write().await.extend_from_slice(transfers);
        Ok(())
    }

    async fn list_transfers(
        &self,
        id: GridId,
        limit: usize,
    ) -> Result<Vec<EnergyTransfer>, StoreError> {
        let transfers = self.transfers.read().await;
        Ok(transfers
            .iter()
            .rev()
            .filter(|t| t.grid_id == id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn commit_balance(
        &self,
        grid: &GridNetwork,
        transfers: &[EnergyTransfer],
    ) -> Result<(), StoreError> {
        let mut grids = self.grids.write().await;
        let mut log = self.transfers.write().await;

        let stored = grids.get_mut(&grid.id).ok_or(StoreError::NotFound(grid.id))?;
        let last_balanced = grid.last_balanced.unwrap_or_else(Utc::now);
        apply_allocations(stored, &grid.child_nodes, last_balanced);
        log.extend_from_slice(transfers);
        Ok(())
    }
}
