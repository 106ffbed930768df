//! `VaultMesh` node entry point.
//!
//! Loads the node identity, opens storage, builds the vault registry and
//! starts the Axum HTTP server with graceful shutdown. On shutdown every
//! open vault is stopped before the process exits.

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use vaultmesh_node::config::NodeConfig;
use vaultmesh_node::keys;
use vaultmesh_node::routes::build_router;
use vaultmesh_node::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = NodeConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(storage = ?config.storage_backend, state_dir = %config.state_dir.display(), "VaultMesh node starting");

    let identity = keys::load_or_create(&config.state_dir).context("failed to load node identity")?;
    let state = AppState::build(&config, identity).await?;
    let app = build_router(std::sync::Arc::clone(&state));

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, node_id = %state.node_id, "VaultMesh node listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    state.vault_manager.stop().await;
    info!("VaultMesh node stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
}
