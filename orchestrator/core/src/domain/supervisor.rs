// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Hub Process Supervisor
//!
//! Keeps the hub process alive: launches it, waits for it to answer health
//! probes, and while the monitor loop runs, restarts it when probes fail.
//!
//! ## State Machine
//! ```text
//! stopped -> starting -> running -> recovering -> running
//!                                             \-> terminally_failed
//! ```
//!
//! ## Recovery Decision Table
//! | Probe | State | Action |
//! |-------|-------|--------|
//! | ok | any | `running`, retry counter reset |
//! | fail | terminally_failed | keep probing, no restart |
//! | fail | other, retries left | terminate, respawn, wait for healthy; backoff after a failed attempt |
//! | fail | other, retries used up | `terminally_failed`, observer notified |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::error::{HubError, HubResult};
use crate::domain::node_config::SupervisorSettings;

/// Answers "is the hub up right now". Implementations must not share
/// mutable state between calls.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Starts and stops the hub process.
#[async_trait]
pub trait HubLauncher: Send + Sync {
    /// Launch a detached hub process and return its pid
    async fn spawn(&self) -> HubResult<u32>;

    /// Graceful termination, escalating to a kill after `grace`
    async fn terminate(&self, pid: u32, grace: Duration) -> HubResult<()>;

    /// Pid recorded by a running hub, for callers that did not spawn it
    fn recorded_pid(&self) -> Option<u32>;
}

#[async_trait]
pub trait SupervisorObserver: Send + Sync {
    async fn on_restart_attempt(&self, attempt: u32, max_retries: u32);
    async fn on_recovered(&self, attempts: u32);
    async fn on_recovery_exhausted(&self, attempts: u32);
}

pub struct NoopObserver;

#[async_trait]
impl SupervisorObserver for NoopObserver {
    async fn on_restart_attempt(&self, _attempt: u32, _max_retries: u32) {}
    async fn on_recovered(&self, _attempts: u32) {}
    async fn on_recovery_exhausted(&self, _attempts: u32) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Stopped,
    Starting,
    Running,
    Recovering,
    TerminallyFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessHandle {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    /// Failed restart attempts in the current failure episode
    pub retry_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    AlreadyRunning,
    Started { pid: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    Healthy,
    Recovered { attempts: u32 },
    Exhausted { attempts: u32 },
    /// Probe failed while recovery is exhausted; waiting for outside help
    StillDown,
}

struct Inner {
    state: SupervisorState,
    handle: Option<ProcessHandle>,
    retry_count: u32,
}

pub struct Supervisor {
    launcher: Arc<dyn HubLauncher>,
    health: Arc<dyn HealthCheck>,
    observer: Arc<dyn SupervisorObserver>,
    settings: SupervisorSettings,
    inner: Mutex<Inner>,
}

impl Supervisor {
    pub fn new(
        launcher: Arc<dyn HubLauncher>,
        health: Arc<dyn HealthCheck>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            launcher,
            health,
            observer: Arc::new(NoopObserver),
            settings,
            inner: Mutex::new(Inner {
                state: SupervisorState::Stopped,
                handle: None,
                retry_count: 0,
            }),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SupervisorObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn state(&self) -> SupervisorState {
        self.inner.lock().state
    }

    pub fn handle(&self) -> Option<ProcessHandle> {
        self.inner.lock().handle.clone()
    }

    pub fn retry_count(&self) -> u32 {
        self.inner.lock().retry_count
    }

    fn set_state(&self, state: SupervisorState) {
        self.inner.lock().state = state;
    }

    /// Bring the hub up. No-op when a probe already succeeds.
    pub async fn start(&self) -> HubResult<StartOutcome> {
        if self.health.probe().await {
            info!("Hub already healthy, nothing to start");
            self.set_state(SupervisorState::Running);
            return Ok(StartOutcome::AlreadyRunning);
        }

        self.set_state(SupervisorState::Starting);
        match self.launch().await {
            Ok(pid) => {
                self.set_state(SupervisorState::Running);
                Ok(StartOutcome::Started { pid })
            }
            Err(e) => {
                // Do not leave a half-started hub behind
                self.terminate_tracked().await;
                self.set_state(SupervisorState::Stopped);
                Err(e)
            }
        }
    }

    async fn launch(&self) -> HubResult<u32> {
        let pid = self.launcher.spawn().await?;
        {
            let mut inner = self.inner.lock();
            inner.handle = Some(ProcessHandle {
                pid,
                started_at: Utc::now(),
                retry_count: inner.retry_count,
            });
        }
        info!(pid, "Hub process spawned, waiting for it to become healthy");
        self.wait_for_healthy().await?;
        info!(pid, "Hub is healthy");
        Ok(pid)
    }

    /// Poll the hub until it answers or the startup timeout elapses.
    pub async fn wait_for_healthy(&self) -> HubResult<()> {
        let timeout = self.settings.startup_timeout;
        let deadline = Instant::now() + timeout;

        loop {
            if self.health.probe().await {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(HubError::StartupTimeout(timeout));
            }
            sleep(self.settings.poll_interval.min(deadline - now)).await;
        }
    }

    /// One monitor step: probe, and on failure run one bounded recovery
    /// episode.
    pub async fn tick(&self) -> MonitorEvent {
        if self.health.probe().await {
            let mut inner = self.inner.lock();
            if matches!(
                inner.state,
                SupervisorState::TerminallyFailed | SupervisorState::Recovering
            ) {
                info!("Hub reachable again, supervision resumed");
            }
            inner.state = SupervisorState::Running;
            inner.retry_count = 0;
            if let Some(handle) = inner.handle.as_mut() {
                handle.retry_count = 0;
            }
            return MonitorEvent::Healthy;
        }

        if self.state() == SupervisorState::TerminallyFailed {
            debug!("Hub still unreachable; recovery exhausted, waiting for manual intervention");
            return MonitorEvent::StillDown;
        }

        warn!("Hub health probe failed, attempting recovery");
        self.set_state(SupervisorState::Recovering);
        let max_retries = self.settings.max_retries;

        loop {
            let attempt = {
                let inner = self.inner.lock();
                if inner.retry_count >= max_retries {
                    break;
                }
                inner.retry_count + 1
            };

            metrics::counter!("ensemble_hub_restarts_total").increment(1);
            info!(attempt, max_retries, "Restarting hub");
            self.observer.on_restart_attempt(attempt, max_retries).await;

            self.terminate_tracked().await;

            match self.launch().await {
                Ok(pid) => {
                    info!(pid, attempt, "Hub recovered");
                    self.set_state(SupervisorState::Running);
                    self.observer.on_recovered(attempt).await;
                    return MonitorEvent::Recovered { attempts: attempt };
                }
                Err(e) => {
                    {
                        let mut inner = self.inner.lock();
                        inner.retry_count += 1;
                        let count = inner.retry_count;
                        if let Some(handle) = inner.handle.as_mut() {
                            handle.retry_count = count;
                        }
                    }
                    warn!(attempt, error = %e, "Hub restart attempt failed");
                    sleep(self.settings.backoff).await;
                }
            }
        }

        let attempts = self.retry_count();
        error!(
            attempts,
            "{}; manual intervention required",
            HubError::RecoveryExhausted(attempts)
        );
        self.set_state(SupervisorState::TerminallyFailed);
        self.observer.on_recovery_exhausted(attempts).await;
        MonitorEvent::Exhausted { attempts }
    }

    /// Terminate the hub we track, or the one that recorded its pid when
    /// another process started it.
    async fn terminate_tracked(&self) {
        let tracked = self.inner.lock().handle.take().map(|h| h.pid);
        if let Some(pid) = tracked.or_else(|| self.launcher.recorded_pid()) {
            if let Err(e) = self.launcher.terminate(pid, self.settings.stop_grace).await {
                debug!(pid, error = %e, "Could not terminate previous hub process");
            }
        }
    }

    /// Probe on a fixed interval until `shutdown` is cancelled. A recovery
    /// episode in progress always runs to completion.
    pub async fn monitor(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.settings.monitor_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; start() has just probed.
        interval.tick().await;

        info!(
            interval = ?self.settings.monitor_interval,
            max_retries = self.settings.max_retries,
            "Hub monitor started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Hub monitor stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.tick().await {
                        MonitorEvent::Healthy => debug!("Hub healthy"),
                        MonitorEvent::Recovered { attempts } => info!(attempts, "Hub recovered by monitor"),
                        MonitorEvent::Exhausted { attempts } => error!(attempts, "Hub recovery exhausted"),
                        MonitorEvent::StillDown => {}
                    }
                }
            }
        }
    }

    /// Stop the hub. Returns the pid that was signalled, if any. The tracked
    /// handle is cleared whatever the outcome.
    pub async fn stop(&self) -> HubResult<Option<u32>> {
        let tracked = {
            let mut inner = self.inner.lock();
            inner.retry_count = 0;
            inner.handle.take().map(|h| h.pid)
        };
        let pid = tracked.or_else(|| self.launcher.recorded_pid());

        let Some(pid) = pid else {
            self.set_state(SupervisorState::Stopped);
            return Ok(None);
        };

        info!(pid, "Stopping hub");
        let result = self.launcher.terminate(pid, self.settings.stop_grace).await;
        self.set_state(SupervisorState::Stopped);
        result.map(|_| Some(pid))
    }
}
