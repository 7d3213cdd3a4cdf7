// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Hub mode and hub detection
//!
//! Handles:
//! - Running the hub server in the foreground (`ensemble --hub`)
//! - PID file management
//! - Health checks over the wire protocol
//! - Graceful shutdown

use serde::Serialize;

use ensemble_core::domain::node_config::NodeConfig;
use ensemble_core::infrastructure::health::HealthProber;
use ensemble_core::infrastructure::process::{process_exists, read_pid_file};

pub mod server;

pub use server::{run_hub, shutdown_signal};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HubStatus {
    Running { pid: Option<u32>, uptime_seconds: u64 },
    Stopped,
    /// A hub process exists but does not answer health probes
    Unhealthy { pid: u32 },
}

impl HubStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HubStatus::Running { .. })
    }
}

/// Check the hub via a health probe (primary) and the PID file (secondary).
pub async fn check_hub_running(config: &NodeConfig) -> HubStatus {
    let pid_file = config.pid_path();
    let local_pid = read_pid_file(&pid_file).filter(|pid| process_exists(*pid));

    let prober = HealthProber::new(config.address(), config.health_timeout);
    if let Some(uptime_seconds) = prober.uptime().await {
        return HubStatus::Running {
            pid: local_pid,
            uptime_seconds,
        };
    }

    match local_pid {
        Some(pid) => HubStatus::Unhealthy { pid },
        None => HubStatus::Stopped,
    }
}
