// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Hub mode: run the hub server until a termination signal arrives.

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use ensemble_core::domain::node_config::NodeConfig;
use ensemble_core::infrastructure::process::PidFileGuard;
use ensemble_core::presentation::hub_server::HubServer;

pub async fn run_hub(config: NodeConfig) -> Result<()> {
    let addr = config.address();

    // Bind before touching the PID file so a second hub that loses the port
    // race leaves the first one's PID file alone
    let server = HubServer::bind(&addr, config.agent_table())
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?
        .with_relay_timeout(config.request_timeout.mul_f64(0.8));

    let _guard = PidFileGuard::create(config.pid_path()).context("Failed to write PID file")?;
    info!("Ensemble hub starting (PID: {})", std::process::id());

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    server.serve(shutdown).await.context("Hub server failed")?;

    info!("Hub stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
