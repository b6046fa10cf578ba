pub mod error;
pub mod handlers;
pub mod requests;
pub mod responses;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use syncline_common::types::ServiceInfo;

use crate::orchestrator::SyncStores;
use crate::queue::RunQueue;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ServiceInfo>,
    pub stores: SyncStores,
    pub queue: Arc<RunQueue>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/info", get(handlers::info))
        .route("/sync/trigger", post(handlers::trigger_sync))
        .route("/sync/queue", get(handlers::queue_status))
        .route("/sync/runs", get(handlers::list_runs))
        .route("/sync/checkpoints/{stream}", get(handlers::get_checkpoint))
        .route("/sales-dates", post(handlers::submit_sales_date))
        .route("/discrepancies", get(handlers::list_discrepancies))
        .with_state(state)
}
