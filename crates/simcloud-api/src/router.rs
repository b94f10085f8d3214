//! Routes for the lifecycle driver
//!
//! Every route is a JSON POST carrying the request type of the matching
//! [`Driver`] operation; errors come back as a `Status` body with the kind in
//! `reason`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use simcloud_driver::{
    CreateMachineRequest, CreateMachineResponse, DeleteMachineRequest, DeleteMachineResponse,
    Driver, GetMachineStatusRequest, GetMachineStatusResponse, GetVolumeIdsRequest,
    GetVolumeIdsResponse, InitializeMachineRequest, InitializeMachineResponse,
    ListMachinesRequest, ListMachinesResponse,
};

use crate::error::ApiError;

type SharedDriver = Arc<dyn Driver>;

/// Build the router over a driver
pub fn routes(driver: SharedDriver) -> Router {
    Router::new()
        .route("/v1/machines", post(create_machine))
        .route("/v1/machines/delete", post(delete_machine))
        .route("/v1/machines/status", post(get_machine_status))
        .route("/v1/machines/list", post(list_machines))
        .route("/v1/machines/initialize", post(initialize_machine))
        .route("/v1/volumes/ids", post(get_volume_ids))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(driver)
}

/// Serve the routes on `addr` until `cancel` fires
pub async fn serve(
    addr: SocketAddr,
    driver: SharedDriver,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Driver API listening");

    axum::serve(listener, routes(driver))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    info!("Driver API stopped");
    Ok(())
}

async fn create_machine(
    State(driver): State<SharedDriver>,
    Json(req): Json<CreateMachineRequest>,
) -> Result<Json<CreateMachineResponse>, ApiError> {
    Ok(Json(driver.create_machine(req).await?))
}

async fn delete_machine(
    State(driver): State<SharedDriver>,
    Json(req): Json<DeleteMachineRequest>,
) -> Result<Json<DeleteMachineResponse>, ApiError> {
    Ok(Json(driver.delete_machine(req).await?))
}

async fn get_machine_status(
    State(driver): State<SharedDriver>,
    Json(req): Json<GetMachineStatusRequest>,
) -> Result<Json<GetMachineStatusResponse>, ApiError> {
    Ok(Json(driver.get_machine_status(req).await?))
}

async fn list_machines(
    State(driver): State<SharedDriver>,
    Json(req): Json<ListMachinesRequest>,
) -> Result<Json<ListMachinesResponse>, ApiError> {
    Ok(Json(driver.list_machines(req).await?))
}

async fn initialize_machine(
    State(driver): State<SharedDriver>,
    Json(req): Json<InitializeMachineRequest>,
) -> Result<Json<InitializeMachineResponse>, ApiError> {
    Ok(Json(driver.initialize_machine(req).await?))
}

async fn get_volume_ids(
    State(driver): State<SharedDriver>,
    Json(req): Json<GetVolumeIdsRequest>,
) -> Result<Json<GetVolumeIdsResponse>, ApiError> {
    Ok(Json(driver.get_volume_ids(req).await?))
}
