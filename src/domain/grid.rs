use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use super::geo::Coordinate;

/// Identifier of a grid network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GridId(pub Uuid);

impl GridId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GridId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GridId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GridId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for GridId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// A consumer node fed by the grid's parent node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildNode {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    pub location: Coordinate,
    /// Rated capacity in MW (informational)
    #[serde(default)]
    pub capacity: f64,
    /// Current demand in MW
    pub current_demand: f64,
    /// Power currently allocated to this node in MW
    #[serde(default)]
    pub allocated_power: f64,
    /// Line distance from the parent node in km
    pub distance: f64,
}

impl ChildNode {
    /// Allocation above demand (positive) or below it (negative), in MW
    pub fn balance(&self) -> f64 {
        self.allocated_power - self.current_demand
    }

    /// Power available to give away, zero when the node is not in excess
    pub fn surplus(&self) -> f64 {
        self.balance().max(0.0)
    }

    /// Power still missing, zero when the node is not in deficit
    pub fn shortfall(&self) -> f64 {
        (-self.balance()).max(0.0)
    }
}

/// Parent supply point together with its child nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridNetwork {
    pub id: GridId,
    pub parent_node_id: Uuid,
    #[serde(default)]
    pub child_nodes: Vec<ChildNode>,
    /// Capacity of the parent node in MW
    pub total_capacity: f64,
    /// Last reported load in MW (informational)
    #[serde(default)]
    pub current_load: f64,
    #[serde(default)]
    pub last_balanced: Option<DateTime<Utc>>,
}

impl GridNetwork {
    pub fn total_demand(&self) -> f64 {
        self.child_nodes.iter().map(|n| n.current_demand).sum()
    }

    pub fn total_allocated(&self) -> f64 {
        self.child_nodes.iter().map(|n| n.allocated_power).sum()
    }

    pub fn node(&self, id: Uuid) -> Option<&ChildNode> {
        self.child_nodes.iter().find(|n| n.id == id)
    }

    /// Check the numeric invariants the balancing engine relies on.
    ///
    /// Returns a description of the first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        if !self.total_capacity.is_finite() || self.total_capacity < 0.0 {
            return Err(format!(
                "grid {} has invalid total capacity {}",
                self.id, self.total_capacity
            ));
        }
        for node in &self.child_nodes {
            let fields = [
                ("current_demand", node.current_demand),
                ("allocated_power", node.allocated_power),
                ("distance", node.distance),
            ];
            for (field, value) in fields {
                if !value.is_finite() || value < 0.0 {
                    return Err(format!("node {} has invalid {field} {value}", node.id));
                }
            }
            let Coordinate {
                latitude,
                longitude,
            } = node.location;
            if !latitude.is_finite() || !longitude.is_finite() {
                return Err(format!(
                    "node {} has invalid location ({latitude}, {longitude})",
                    node.id
                ));
            }
        }
        Ok(())
    }
}

/// Lightweight listing entry for a grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSummary {
    pub id: GridId,
    pub parent_node_id: Uuid,
    pub node_count: usize,
    pub total_capacity: f64,
    pub total_demand: f64,
    pub last_balanced: Option<DateTime<Utc>>,
}

impl From<&GridNetwork> for GridSummary {
    fn from(grid: &GridNetwork) -> Self {
        Self {
            id: grid.id,
            parent_node_id: grid.parent_node_id,
            node_count: grid.child_nodes.len(),
            total_capacity: grid.total_capacity,
            total_demand: grid.total_demand(),
            last_balanced: grid.last_balanced,
        }
    }
}

/// Directed movement of power from an excess node to a deficit node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyTransfer {
    pub id: Uuid,
    pub grid_id: GridId,
    pub from_node_id: Uuid,
    pub to_node_id: Uuid,
    /// Power leaving the source in MW, including the lost portion
    pub amount: f64,
    pub transfer_time: DateTime<Utc>,
    /// Transmission loss in percent (0-100)
    pub loss_estimate: f64,
}

impl EnergyTransfer {
    /// Loss as a fraction of `amount`
    pub fn loss_rate(&self) -> f64 {
        self.loss_estimate / 100.0
    }

    /// Power arriving at the destination in MW
    pub fn delivered(&self) -> f64 {
        self.amount * (1.0 - self.loss_rate())
    }
}
