#![cfg(feature = "db")]

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgConnection, PgPool};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::{GridStore, StoreError};
use crate::config::DbConfig;
use crate::domain::{ChildNode, Coordinate, EnergyTransfer, GridId, GridNetwork, GridSummary};

const SCHEMA: &str = include_str!("../../migrations/0001_grid_networks.sql");

#[derive(Debug, Clone, sqlx::FromRow)]
struct GridRow {
    id: Uuid,
    parent_node_id: Uuid,
    total_capacity: f64,
    current_load: f64,
    last_balanced: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ChildNodeRow {
    id: Uuid,
    name: String,
    latitude: f64,
    longitude: f64,
    capacity: f64,
    current_demand: f64,
    allocated_power: f64,
    distance_km: f64,
}

impl From<ChildNodeRow> for ChildNode {
    fn from(row: ChildNodeRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            location: Coordinate::new(row.latitude, row.longitude),
            capacity: row.capacity,
            current_demand: row.current_demand,
            allocated_power: row.allocated_power,
            distance: row.distance_km,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct TransferRow {
    id: Uuid,
    grid_id: Uuid,
    from_node_id: Uuid,
    to_node_id: Uuid,
    amount: f64,
    transfer_time: DateTime<Utc>,
    loss_estimate: f64,
}

impl From<TransferRow> for EnergyTransfer {
    fn from(row: TransferRow) -> Self {
        Self {
            id: row.id,
            grid_id: GridId(row.grid_id),
            from_node_id: row.from_node_id,
            to_node_id: row.to_node_id,
            amount: row.amount,
            transfer_time: row.transfer_time,
            loss_estimate: row.loss_estimate,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct GridSummaryRow {
    id: Uuid,
    parent_node_id: Uuid,
    node_count: i64,
    total_capacity: f64,
    total_demand: f64,
    last_balanced: Option<DateTime<Utc>>,
}

impl From<GridSummaryRow> for GridSummary {
    fn from(row: GridSummaryRow) -> Self {
        Self {
            id: GridId(row.id),
            parent_node_id: row.parent_node_id,
            node_count: usize::try_from(row.node_count).unwrap_or_default(),
            total_capacity: row.total_capacity,
            total_demand: row.total_demand,
            last_balanced: row.last_balanced,
        }
    }
}

/// Postgres-backed grid store
pub struct PgGridStore {
    pool: PgPool,
}

impl PgGridStore {
    pub async fn connect(cfg: &DbConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(Duration::from_secs(cfg.acquire_timeout_secs))
            .connect(&cfg.url)
            .await
            .context("connecting to postgres")?;
        let store = Self { pool };
        if cfg.run_migrations {
            store.ensure_schema().await?;
        }
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the tables if they do not exist yet
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("applying grid schema")?;
        info!("grid schema ready");
        Ok(())
    }
}

async fn write_allocations(
    conn: &mut PgConnection,
    id: GridId,
    nodes: &[ChildNode],
    last_balanced: DateTime<Utc>,
) -> Result<(), StoreError> {
    let updated = sqlx::query("UPDATE grid_networks SET last_balanced = $1 WHERE id = $2")
        .bind(last_balanced)
        .bind(id.0)
        .execute(&mut *conn)
        .await?;
    if updated.rows_affected() == 0 {
        return Err(StoreError::NotFound(id));
    }

    for node in nodes {
        sqlx::query(
            r#"
            UPDATE child_nodes
            SET allocated_power = $1
            WHERE id = $2 AND grid_id = $3
            "#,
        )
        .bind(node.allocated_power)
        .bind(node.id)
        .bind(id.0)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn insert_transfers(
    conn: &mut PgConnection,
    transfers: &[EnergyTransfer],
) -> Result<(), StoreError> {
    for t in transfers {
        sqlx::query(
            r#"
            INSERT INTO energy_transfers
                (id, grid_id, from_node_id, to_node_id, amount, transfer_time, loss_estimate)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(t.id)
        .bind(t.grid_id.0)
        .bind(t.from_node_id)
        .bind(t.to_node_id)
        .bind(t.amount)
        .bind(t.transfer_time)
        .bind(t.loss_estimate)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl GridStore for PgGridStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn load_grid(&self, id: GridId) -> Result<GridNetwork, StoreError> {
        let row = sqlx::query_as::<_, GridRow>(
            r#"
            SELECT id, parent_node_id, total_capacity, current_load, last_balanced
            FROM grid_networks
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        let nodes = sqlx::query_as::<_, ChildNodeRow>(
            r#"
            SELECT id, name, latitude, longitude, capacity, current_demand, allocated_power, distance_km
            FROM child_nodes
            WHERE grid_id = $1
            ORDER BY position
            "#,
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(GridNetwork {
            id: GridId(row.id),
            parent_node_id: row.parent_node_id,
            child_nodes: nodes.into_iter().map(ChildNode::from).collect(),
            total_capacity: row.total_capacity,
            current_load: row.current_load,
            last_balanced: row.last_balanced,
        })
    }

    async fn list_grids(&self) -> Result<Vec<GridSummary>, StoreError> {
        let rows = sqlx::query_as::<_, GridSummaryRow>(
            r#"
            SELECT g.id, g.parent_node_id, g.total_capacity, g.last_balanced,
                   COUNT(n.id) AS node_count,
                   COALESCE(SUM(n.current_demand), 0)::float8 AS total_demand
            FROM grid_networks g
            LEFT JOIN child_nodes n ON n.grid_id = g.id
            GROUP BY g.id
            ORDER BY g.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(GridSummary::from).collect())
    }

    async fn save_grid_allocations(
        &self,
        id: GridId,
        nodes: &[ChildNode],
        last_balanced: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        write_allocations(&mut *tx, id, nodes, last_balanced).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_node_demand(
        &self,
        grid_id: GridId,
        node_id: Uuid,
        current_demand: f64,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE child_nodes SET current_demand = $1 WHERE id = $2 AND grid_id = $3",
        )
        .bind(current_demand)
        .bind(node_id)
        .bind(grid_id.0)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() > 0 {
            return Ok(());
        }

        let grid_exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM grid_networks WHERE id = $1)")
                .bind(grid_id.0)
                .fetch_one(&self.pool)
                .await?;
        if grid_exists {
            Err(StoreError::NodeNotFound { grid_id, node_id })
        } else {
            Err(StoreError::NotFound(grid_id))
        }
    }

    async fn append_transfers(&self, transfers: &[EnergyTransfer]) -> Result<(), StoreError> {
        if transfers.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        insert_transfers(&mut *tx, transfers).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_transfers(
        &self,
        id: GridId,
        limit: usize,
    ) -> Result<Vec<EnergyTransfer>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, TransferRow>(
            r#"
            SELECT id, grid_id, from_node_id, to_node_id, amount, transfer_time, loss_estimate
            FROM energy_transfers
            WHERE grid_id = $1
            ORDER BY seq DESC
            LIMIT $2
            "#,
        )
        .bind(id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EnergyTransfer::from).collect())
    }

    async fn commit_balance(
        &self,
        grid: &GridNetwork,
        transfers: &[EnergyTransfer],
    ) -> Result<(), StoreError> {
        let last_balanced = grid.last_balanced.unwrap_or_else(Utc::now);

        let mut tx = self.pool.begin().await?;
        write_allocations(&mut *tx, grid.id, &grid.child_nodes, last_balanced).await?;
        insert_transfers(&mut *tx, transfers).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_node_row_conversion() {
        let row = ChildNodeRow {
            id: Uuid::new_v4(),
            name: "east".into(),
            latitude: 12.9,
            longitude: 77.6,
            capacity: 30.0,
            current_demand: 20.0,
            allocated_power: 25.0,
            distance_km: 7.5,
        };
        let node = ChildNode::from(row.clone());
        assert_eq!(node.id, row.id);
        assert_eq!(node.location, Coordinate::new(12.9, 77.6));
        assert_eq!(node.distance, 7.5);
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn test_commit_balance_roundtrip() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL");
        let pool = PgPool::connect(&url).await.unwrap();
        let store = PgGridStore::from_pool(pool);
        store.ensure_schema().await.unwrap();
        assert!(store.list_grids().await.is_ok());
    }
}
