pub mod locks;

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::balancer::{self, BalanceError, BalanceOutcome, BalanceStage};
use crate::config::Config;
use crate::domain::{EnergyTransfer, GridId, GridNetwork, GridSummary};
use crate::repo::{self, GridStore};

pub use locks::GridLocks;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Config,
    pub balancer: Arc<GridBalancer>,
}

impl AppState {
    pub async fn new(cfg: Config) -> Result<Self> {
        let store = repo::connect(&cfg).await?;
        Ok(Self::with_store(cfg, store))
    }

    pub fn with_store(cfg: Config, store: Arc<dyn GridStore>) -> Self {
        Self {
            cfg,
            balancer: Arc::new(GridBalancer::new(store)),
        }
    }
}

/// Runs balancing requests against a grid store.
///
/// Each request owns its grid snapshot from load to persist, and requests for
/// the same grid are serialized through [`GridLocks`].
pub struct GridBalancer {
    store: Arc<dyn GridStore>,
    locks: GridLocks,
}

impl GridBalancer {
    pub fn new(store: Arc<dyn GridStore>) -> Self {
        Self {
            store,
            locks: GridLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn GridStore> {
        &self.store
    }

    /// Validate, load, rebalance and persist one grid.
    ///
    /// Stops at the first failure. Nothing is written unless the engine
    /// completed.
    #[instrument(skip_all, fields(grid_id = %raw_id))]
    pub async fn balance_grid(&self, raw_id: &str) -> Result<BalanceOutcome, BalanceError> {
        let id = parse_grid_id(raw_id)?;

        let _guard = self.locks.acquire(id).await;

        let mut grid = self.store.load_grid(id).await?;
        debug!(stage = %BalanceStage::Loaded, nodes = grid.child_nodes.len());

        let now = Utc::now();
        let plan = balancer::balance(&mut grid, now)?;
        grid.last_balanced = Some(now);

        if let Err(e) = self.store.commit_balance(&grid, &plan.transfers).await {
            warn!(error = %e, "failed to persist balance");
            return Err(BalanceError::Persistence(e));
        }
        debug!(stage = %BalanceStage::Persisted);

        info!(
            transfers = plan.transfers.len(),
            delivered_mw = plan.report.delivered_mw,
            lost_mw = plan.report.lost_mw,
            unmet_mw = plan.report.unmet_demand_mw,
            overloaded = plan.report.overloaded,
            "grid balanced"
        );

        Ok(BalanceOutcome {
            grid,
            transfers: plan.transfers,
            report: plan.report,
        })
    }

    pub async fn get_grid(&self, raw_id: &str) -> Result<GridNetwork, BalanceError> {
        let id = parse_grid_id(raw_id)?;
        Ok(self.store.load_grid(id).await?)
    }

    pub async fn list_grids(&self) -> Result<Vec<GridSummary>, BalanceError> {
        Ok(self.store.list_grids().await?)
    }

    /// Transfer log of a grid, newest first. Fails with `NotFound` for unknown grids.
    pub async fn list_transfers(
        &self,
        raw_id: &str,
        limit: usize,
    ) -> Result<Vec<EnergyTransfer>, BalanceError> {
        let id = parse_grid_id(raw_id)?;
        self.store.load_grid(id).await?;
        Ok(self.store.list_transfers(id, limit).await?)
    }

    /// Record a demand reading for one node and return the updated grid.
    ///
    /// Holds the grid's lock so the reading never lands in the middle of a
    /// balancing run.
    #[instrument(skip_all, fields(grid_id = %raw_grid_id, node_id = %raw_node_id))]
    pub async fn update_node_demand(
        &self,
        raw_grid_id: &str,
        raw_node_id: &str,
        current_demand: f64,
    ) -> Result<GridNetwork, BalanceError> {
        let grid_id = parse_grid_id(raw_grid_id)?;
        let node_id: Uuid = raw_node_id
            .parse()
            .map_err(|_| BalanceError::InvalidIdentifier(raw_node_id.to_string()))?;
        if !current_demand.is_finite() || current_demand < 0.0 {
            return Err(BalanceError::InvalidDemand(current_demand));
        }

        let _guard = self.locks.acquire(grid_id).await;
        self.store
            .update_node_demand(grid_id, node_id, current_demand)
            .await?;
        info!(current_demand, "node demand updated");

        Ok(self.store.load_grid(grid_id).await?)
    }
}

fn parse_grid_id(raw: &str) -> Result<GridId, BalanceError> {
    raw.parse()
        .map_err(|_| BalanceError::InvalidIdentifier(raw.to_string()))
}
