// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Hub lifecycle commands
//!
//! Commands: start, ensure, stop, status, supervise

use anyhow::{bail, Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use ensemble_core::application::startup::{StartupOrchestrator, StartupReport, StatusObserver};
use ensemble_core::domain::lock::LockDescriptor;
use ensemble_core::domain::node_config::NodeConfig;
use ensemble_core::domain::status::{Phase, PhaseOutcome, PhaseStatus, StatusRecord};
use ensemble_core::domain::supervisor::{HealthCheck, Supervisor};
use ensemble_core::infrastructure::health::HealthProber;
use ensemble_core::infrastructure::lock_file::LockManager;
use ensemble_core::infrastructure::process::ProcessLauncher;
use ensemble_core::infrastructure::status_store::StatusRecorder;
use ensemble_core::infrastructure::steps::ExternalStep;

use crate::daemon::{check_hub_running, shutdown_signal, HubStatus};

/// Wire the orchestrator for this node: real launcher, real prober, the
/// configured external steps.
pub fn build_orchestrator(config: &NodeConfig, config_path: Option<&Path>) -> Result<StartupOrchestrator> {
    let health: Arc<dyn HealthCheck> =
        Arc::new(HealthProber::new(config.address(), config.health_timeout));
    let launcher = Arc::new(
        ProcessLauncher::current_exe(config, config_path).context("Failed to locate the ensemble executable")?,
    );
    let status = StatusRecorder::new(config.status_path());

    let supervisor = Supervisor::new(launcher, health.clone(), config.supervisor.clone())
        .with_observer(Arc::new(StatusObserver::new(status.clone())));

    let mut orchestrator = StartupOrchestrator::new(
        LockManager::new(config.lock_path(), config.lock_stale_after),
        status,
        Arc::new(supervisor),
        health,
        config.startup.clone(),
    );

    if let Some(argv) = &config.steps.assessment {
        orchestrator = orchestrator.with_assessment(Arc::new(ExternalStep::new(
            Phase::Assessment.as_str(),
            argv.clone(),
            config.steps.timeout,
        )));
    }
    if let Some(argv) = &config.steps.introduction {
        orchestrator = orchestrator.with_introduction(Arc::new(ExternalStep::new(
            Phase::Introduction.as_str(),
            argv.clone(),
            config.steps.timeout,
        )));
    }

    Ok(orchestrator)
}

pub async fn start(config: &NodeConfig, config_path: Option<&Path>, source: &str) -> Result<()> {
    let orchestrator = build_orchestrator(config, config_path)?;
    let report = orchestrator.start(source).await.context("Startup failed")?;
    print_report(&report)
}

pub async fn ensure(config: &NodeConfig, config_path: Option<&Path>, source: &str) -> Result<()> {
    let orchestrator = build_orchestrator(config, config_path)?;
    let report = orchestrator.ensure_running(source).await.context("Startup failed")?;
    print_ensure_report(&report)
}

pub async fn stop(config: &NodeConfig, config_path: Option<&Path>) -> Result<()> {
    info!("Stopping hub...");
    let orchestrator = build_orchestrator(config, config_path)?;

    match orchestrator.supervisor().stop().await.context("Failed to stop hub")? {
        Some(pid) => {
            let status = orchestrator.status();
            if let Some(record) = status.read() {
                status
                    .for_run(record.run_id)
                    .update(Phase::Bridge, PhaseStatus::Stopped, None);
            }
            println!("{}", format!("✓ Hub stopped (PID: {})", pid).green());
        }
        None => println!("{}", "ℹ Hub not running".yellow()),
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusView {
    healthy: bool,
    address: String,
    hub: HubStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    startup_in_progress: Option<LockDescriptor>,
    last_status: Option<StatusRecord>,
}

/// Print status JSON; exit code 1 when the hub is not healthy.
pub async fn status(config: &NodeConfig) -> Result<()> {
    let hub = check_hub_running(config).await;
    let locks = LockManager::new(config.lock_path(), config.lock_stale_after);
    let startup_in_progress = if locks.is_locked() { locks.read() } else { None };

    let view = StatusView {
        healthy: hub.is_healthy(),
        address: config.address(),
        hub,
        startup_in_progress,
        last_status: StatusRecorder::new(config.status_path()).read(),
    };

    println!("{}", serde_json::to_string_pretty(&view)?);

    if !view.healthy {
        std::process::exit(1);
    }
    Ok(())
}

/// Start (or join) the hub, then run the monitor loop until interrupted.
pub async fn supervise(config: &NodeConfig, config_path: Option<&Path>, source: &str) -> Result<()> {
    let orchestrator = build_orchestrator(config, config_path)?;
    let report = orchestrator.ensure_running(source).await.context("Startup failed")?;
    print_ensure_report(&report)?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    println!(
        "Supervising hub on {} (every {:?}, up to {} restarts); Ctrl+C to stop",
        config.address(),
        config.supervisor.monitor_interval,
        config.supervisor.max_retries
    );
    orchestrator.supervisor().monitor(shutdown).await;
    Ok(())
}

fn print_ensure_report(report: &StartupReport) -> Result<()> {
    if !report.executed && report.ready {
        println!("{}", "✓ Ensemble already running".green());
        return Ok(());
    }
    print_report(report)
}

fn print_report(report: &StartupReport) -> Result<()> {
    if report.executed {
        println!("Startup requested by '{}':", report.source);
    } else {
        println!("Startup was already running elsewhere; its outcome:");
    }

    for (phase, outcome) in &report.phases {
        let line = match outcome {
            PhaseOutcome::Complete => format!("  ✓ {:<13} complete", phase.as_str()).green(),
            PhaseOutcome::Skipped => format!("  - {:<13} skipped", phase.as_str()).dimmed(),
            PhaseOutcome::Error(message) => format!("  ✗ {:<13} {}", phase.as_str(), message).yellow(),
        };
        println!("{}", line);
    }

    if !report.ready {
        let detail = report
            .record
            .as_ref()
            .map(|r| r.message.clone())
            .unwrap_or_else(|| "no status recorded".to_string());
        bail!("Ensemble is not ready: {}", detail);
    }

    println!("{}", "✓ Ensemble ready".green().bold());
    Ok(())
}
