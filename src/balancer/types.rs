use serde::{Deserialize, Serialize};
use thiserror::Error;

use uuid::Uuid;

use crate::domain::{EnergyTransfer, GridId, GridNetwork, LossModelError};
use crate::repo::StoreError;

/// Steps a balancing run moves through, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BalanceStage {
    Loaded,
    BaseDistributed,
    Classified,
    Matched,
    Persisted,
}

/// Errors a balancing request can end with
#[derive(Debug, Error)]
pub enum BalanceError {
    #[error("Invalid grid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Grid network not found: {0}")]
    NotFound(GridId),

    #[error("Node {node_id} not found in grid {grid_id}")]
    NodeNotFound { grid_id: GridId, node_id: Uuid },

    #[error("Demand must be finite and non-negative, got {0} MW")]
    InvalidDemand(f64),

    #[error("Balancing failed during {stage}: {reason}")]
    Computation { stage: BalanceStage, reason: String },

    #[error("Persistence failed: {0}")]
    Persistence(StoreError),
}

impl BalanceError {
    pub fn computation(stage: BalanceStage, reason: impl Into<String>) -> Self {
        Self::Computation {
            stage,
            reason: reason.into(),
        }
    }
}

impl From<StoreError> for BalanceError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => BalanceError::NotFound(id),
            StoreError::NodeNotFound { grid_id, node_id } => {
                BalanceError::NodeNotFound { grid_id, node_id }
            }
            other => BalanceError::Persistence(other),
        }
    }
}

impl From<LossModelError> for BalanceError {
    fn from(error: LossModelError) -> Self {
        BalanceError::computation(BalanceStage::Matched, error.to_string())
    }
}

/// Result of the base distribution step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionOutcome {
    /// Demand fits in capacity; every node was allocated exactly its demand
    FullService,
    /// Demand exceeds capacity; allocations were left as loaded
    Overloaded,
}

/// Summary numbers for one balancing run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceReport {
    pub total_demand: f64,
    pub total_capacity: f64,
    pub distribution: DistributionOutcome,
    pub overloaded: bool,
    pub excess_nodes: usize,
    pub deficit_nodes: usize,
    pub transfer_count: usize,
    /// MW that arrived at deficit nodes
    pub delivered_mw: f64,
    /// MW that left excess nodes but was lost in transit
    pub lost_mw: f64,
    /// Shortfall left across all nodes after matching, in MW
    pub unmet_demand_mw: f64,
}

/// In-memory outcome of the engine, before persistence
#[derive(Debug, Clone)]
pub struct BalancePlan {
    pub transfers: Vec<EnergyTransfer>,
    pub report: BalanceReport,
}

/// What a completed balancing request hands back to the caller
#[derive(Debug, Clone, Serialize)]
pub struct BalanceOutcome {
    pub grid: GridNetwork,
    pub transfers: Vec<EnergyTransfer>,
    pub report: BalanceReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_display() {
        assert_eq!(BalanceStage::BaseDistributed.to_string(), "base_distributed");
        assert_eq!(BalanceStage::Persisted.to_string(), "persisted");
    }

    #[test]
    fn test_store_not_found_maps_to_not_found() {
        let id = GridId::new();
        let err: BalanceError = StoreError::NotFound(id).into();
        assert!(matches!(err, BalanceError::NotFound(got) if got == id));

        let err: BalanceError = StoreError::Backend("connection reset".into()).into();
        assert!(matches!(err, BalanceError::Persistence(_)));
    }

    #[test]
    fn test_loss_model_error_is_computation_failure() {
        let err: BalanceError = LossModelError::InvalidDistance(-3.0).into();
        match err {
            BalanceError::Computation { stage, reason } => {
                assert_eq!(stage, BalanceStage::Matched);
                assert!(reason.contains("-3"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
