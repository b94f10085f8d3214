//! simcloud-provider - simulated cloud provider for machine-lifecycle controllers

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use simcloud_common::kube_utils::create_client;
use simcloud_common::telemetry::init_telemetry;
use simcloud_driver::{ClusterStateClient, Driver, KubeClusterState, VirtualDriver};

mod config;

use config::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(cli.telemetry_config())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let client = create_client(cli.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;
    let store: Arc<dyn ClusterStateClient> = Arc::new(KubeClusterState::new(client));

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    let settings = cli.driver_settings();
    tracing::info!(
        namespace = %settings.namespace,
        policy_path = %settings.policy_path.display(),
        listen_addr = %cli.listen_addr,
        "Starting simcloud provider"
    );

    let driver: Arc<dyn Driver> = Arc::new(
        VirtualDriver::start(store, settings, cancel.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start driver: {}", e))?,
    );

    simcloud_api::serve(cli.listen_addr, driver, cancel.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Driver API server error: {}", e))?;

    // Server exited on its own; stop the background tasks too
    cancel.cancel();
    tracing::info!("simcloud provider stopped");
    Ok(())
}

/// Cancel the token on ctrl-c
async fn shutdown_on_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Received shutdown signal");
    cancel.cancel();
}
