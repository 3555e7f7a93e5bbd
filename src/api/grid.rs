//! Grid network API endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::{
    balancer::BalanceReport,
    controller::AppState,
    domain::{EnergyTransfer, GridNetwork},
};

/// Body returned by a successful balancing run
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub message: &'static str,
    pub grid: GridNetwork,
    pub transfers: Vec<EnergyTransfer>,
    pub report: BalanceReport,
}

/// POST /grid/balance/:grid_id - Rebalance one grid network
pub async fn balance_grid(
    State(st): State<AppState>,
    Path(grid_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = st.balancer.balance_grid(&grid_id).await?;
    Ok((
        StatusCode::OK,
        Json(BalanceResponse {
            message: "Power balancing completed successfully",
            grid: outcome.grid,
            transfers: outcome.transfers,
            report: outcome.report,
        }),
    ))
}

/// GET /grids - Summaries of every stored grid
pub async fn list_grids(State(st): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let grids = st.balancer.list_grids().await?;
    Ok(Json(grids))
}

/// GET /grids/:grid_id - Full grid record
pub async fn get_grid(
    State(st): State<AppState>,
    Path(grid_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let grid = st.balancer.get_grid(&grid_id).await?;
    Ok(Json(grid))
}

#[derive(Debug, Deserialize)]
pub struct TransferQuery {
    pub limit: Option<usize>,
}

/// GET /grids/:grid_id/transfers - Transfer log, newest first
pub async fn list_transfers(
    State(st): State<AppState>,
    Path(grid_id): Path<String>,
    Query(q): Query<TransferQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = st.cfg.api.transfer_limit(q.limit);
    let transfers = st.balancer.list_transfers(&grid_id, limit).await?;
    Ok(Json(transfers))
}

#[derive(Debug, Deserialize)]
pub struct DemandUpdate {
    pub current_demand: f64,
}

/// PATCH /grids/:grid_id/nodes/:node_id - Record a new demand reading
pub async fn update_node_demand(
    State(st): State<AppState>,
    Path((grid_id, node_id)): Path<(String, String)>,
    Json(update): Json<DemandUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let grid = st
        .balancer
        .update_node_demand(&grid_id, &node_id, update.current_demand)
        .await?;
    Ok(Json(grid))
}
