use axum::{
    routing::{get, patch, post},
    Router,
};

use super::{grid, health};
use crate::controller::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/grid/balance/:grid_id", post(grid::balance_grid))
        .route("/grids", get(grid::list_grids))
        .route("/grids/:grid_id", get(grid::get_grid))
        .route("/grids/:grid_id/transfers", get(grid::list_transfers))
        .route("/grids/:grid_id/nodes/:node_id", patch(grid::update_node_demand))
        .route("/healthz", get(health::health_check))
        .with_state(state)
}
