//! mc-server: job lifecycle, conversion executor, cleanup engine and HTTP API.
//!
//! This crate ties the store (`mc-db`) and the transcoder (`mc-av`) together
//! into a running node. It provides:
//!
//! - The job lifecycle operations ([`lifecycle`]) and the background
//!   conversion executor ([`executor`])
//! - The expiry and cleanup engine ([`cleanup`]) and its periodic
//!   [`scheduler`]
//! - The peer notification client ([`peer`]) for the two-node deployment
//! - A JSON HTTP API built on Axum, with graceful shutdown

pub mod cleanup;
pub mod context;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod peer;
pub mod router;
pub mod routes;
pub mod scheduler;

use std::net::SocketAddr;

use mc_core::config::Config;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;

/// Open the job store configured in `config.server.db_path`, creating its
/// parent directory if needed.
pub fn open_store(config: &Config) -> mc_core::Result<mc_db::pool::DbPool> {
    let db_path = &config.server.db_path;
    let existed = db_path.exists();
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created database directory {}", parent.display());
        }
    }

    let db_str = db_path.to_string_lossy();
    let db = mc_db::pool::init_pool(&db_str)?;
    if existed {
        tracing::info!("Database opened (existing) at {db_str}");
    } else {
        tracing::info!("Database created (new) at {db_str}");
    }
    Ok(db)
}

/// Start a mediaconv node.
///
/// Opens the store, fails any conversions interrupted by a previous run,
/// starts the cleanup scheduler and serves the HTTP API until a shutdown
/// signal arrives.
pub async fn start(config: Config) -> mc_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let db = open_store(&config)?;

    for info in mc_av::check_tools(&config.tools) {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}", info.name);
        }
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| mc_core::Error::Internal(format!("Invalid server address: {e}")))?;

    tracing::info!(
        node = config.node.display_name(),
        peer = %config.node.peer_url,
        artifacts = %config.node.artifact_location(),
        retention_hours = config.retention.hours,
        "Starting node"
    );

    let ctx = AppContext::new(db, config);
    executor::recover_interrupted(&ctx)?;

    let cancel = CancellationToken::new();
    let sweep_handles = scheduler::run_scheduler(ctx.clone(), cancel.clone()).await;

    let app = router::build_router(ctx);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| mc_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;

    tracing::info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .map_err(|e| mc_core::Error::Internal(format!("Server error: {e}")))?;

    // Signal the sweep tasks to stop and wait for any sweep in progress.
    cancel.cancel();
    for handle in sweep_handles {
        let _ = handle.await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM) or cancellation.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
