use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::config::{Config, StoreBackend};
use crate::domain::{ChildNode, EnergyTransfer, GridId, GridNetwork, GridSummary};

pub mod memory;
#[cfg(feature = "db")]
pub mod pg;

pub use memory::InMemoryGridStore;
#[cfg(feature = "db")]
pub use pg::PgGridStore;

/// Store adapter errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Grid network not found: {0}")]
    NotFound(GridId),

    #[error("Node {node_id} not found in grid {grid_id}")]
    NodeNotFound { grid_id: GridId, node_id: Uuid },

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Balance of grid {grid_id} only partially persisted ({committed} written): {source}")]
    PartialCommit {
        grid_id: GridId,
        committed: &'static str,
        source: Box<StoreError>,
    },
}

#[cfg(feature = "db")]
impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(error.to_string())
            }
            _ => StoreError::Backend(error.to_string()),
        }
    }
}

/// Load/save interface between the balancing engine and persistent storage.
///
/// Adapters translate whatever their backend holds into typed grid records;
/// nothing loosely typed crosses this boundary.
#[async_trait]
pub trait GridStore: Send + Sync {
    /// Short backend name for health reporting
    fn backend(&self) -> &'static str;

    async fn load_grid(&self, id: GridId) -> Result<GridNetwork, StoreError>;

    async fn list_grids(&self) -> Result<Vec<GridSummary>, StoreError>;

    /// Write `allocated_power` of each listed node (matched by id) and stamp
    /// `last_balanced`. Other node fields are left as stored.
    async fn save_grid_allocations(
        &self,
        id: GridId,
        nodes: &[ChildNode],
        last_balanced: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Record a new demand reading for one child node. Only `current_demand`
    /// changes.
    async fn update_node_demand(
        &self,
        grid_id: GridId,
        node_id: Uuid,
        current_demand: f64,
    ) -> Result<(), StoreError>;

    /// Append to the transfer log. An empty slice is a no-op.
    async fn append_transfers(&self, transfers: &[EnergyTransfer]) -> Result<(), StoreError>;

    /// Transfers recorded for a grid, newest first
    async fn list_transfers(
        &self,
        id: GridId,
        limit: usize,
    ) -> Result<Vec<EnergyTransfer>, StoreError>;

    /// Persist the outcome of a balancing run: allocations, `last_balanced`
    /// and the new transfers.
    ///
    /// This default is not atomic. If the transfer log cannot be written after
    /// the allocations were saved, a [`StoreError::PartialCommit`] is returned.
    /// Backends that can do better override it.
    async fn commit_balance(
        &self,
        grid: &GridNetwork,
        transfers: &[EnergyTransfer],
    ) -> Result<(), StoreError> {
        let last_balanced = grid.last_balanced.unwrap_or_else(Utc::now);
        self.save_grid_allocations(grid.id, &grid.child_nodes, last_balanced)
            .await?;
        self.append_transfers(transfers)
            .await
            .map_err(|e| StoreError::PartialCommit {
                grid_id: grid.id,
                committed: "grid allocations",
                source: Box::new(e),
            })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Build the store adapter selected in the configuration
pub async fn connect(cfg: &Config) -> Result<Arc<dyn GridStore>> {
    match cfg.store.backend {
        StoreBackend::Memory => {
            let store = match &cfg.store.seed_path {
                Some(path) => InMemoryGridStore::from_seed_file(path)?,
                None => InMemoryGridStore::new(),
            };
            info!(grids = store.grid_count().await, "using in-memory grid store");
            Ok(Arc::new(store))
        }
        #[cfg(feature = "db")]
        StoreBackend::Postgres => {
            let store = PgGridStore::connect(&cfg.db).await?;
            info!("using postgres grid store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "db"))]
        StoreBackend::Postgres => {
            anyhow::bail!("store.backend = \"postgres\" requires building with the `db` feature")
        }
    }
}
