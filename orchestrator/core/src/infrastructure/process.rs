// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Hub process management
//!
//! Handles:
//! - Spawning the hub as a detached child (own process group, stdio to a log file)
//! - PID file management
//! - Graceful termination with SIGKILL escalation

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::domain::error::{HubError, HubResult};
use crate::domain::node_config::NodeConfig;
use crate::domain::supervisor::HubLauncher;

const EXIT_POLL: Duration = Duration::from_millis(100);

/// Launches the hub by running a program (normally this same binary in hub
/// mode) as a detached process.
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    pid_file: PathBuf,
    output_path: PathBuf,
    children: Mutex<HashMap<u32, Child>>,
}

impl ProcessLauncher {
    pub fn new(
        program: impl Into<PathBuf>,
        args: Vec<String>,
        pid_file: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            pid_file: pid_file.into(),
            output_path: output_path.into(),
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Re-exec the current executable with `--hub`.
    pub fn current_exe(config: &NodeConfig, config_path: Option<&Path>) -> HubResult<Self> {
        let program = std::env::current_exe()?;
        let mut args = vec![
            "--hub".to_string(),
            "--port".to_string(),
            config.port.to_string(),
        ];
        if let Some(path) = config_path {
            args.push("--config".to_string());
            args.push(path.display().to_string());
        }
        Ok(Self::new(
            program,
            args,
            config.pid_path(),
            config.hub_output_path(),
        ))
    }

    /// True once `pid` is gone. Children we spawned are reaped here so they
    /// do not linger as zombies.
    fn has_exited(&self, pid: u32) -> bool {
        let mut children = self.children.lock();
        if let Some(child) = children.get_mut(&pid) {
            return match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(pid, %status, "Hub process exited");
                    children.remove(&pid);
                    true
                }
                Ok(None) => false,
                Err(_) => {
                    children.remove(&pid);
                    !process_exists(pid)
                }
            };
        }
        !process_exists(pid)
    }

    async fn wait_for_exit(&self, pid: u32, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        loop {
            if self.has_exited(pid) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(EXIT_POLL).await;
        }
    }
}

#[async_trait]
impl HubLauncher for ProcessLauncher {
    async fn spawn(&self) -> HubResult<u32> {
        if let Some(parent) = self.output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let output = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_path)?;
        let stderr = output.try_clone()?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(output)
            .stderr(stderr)
            .kill_on_drop(false);

        // Detach from the caller's process group so terminal signals
        // aimed at the CLI do not reach the hub
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| {
            HubError::ProcessSpawnFailure(format!("{}: {}", self.program.display(), e))
        })?;
        let pid = child.id().ok_or_else(|| {
            HubError::ProcessSpawnFailure("hub exited before its pid could be read".to_string())
        })?;

        info!(pid, program = %self.program.display(), "Spawned hub process");
        debug!("Hub output redirected to {:?}", self.output_path);
        self.children.lock().insert(pid, child);
        Ok(pid)
    }

    async fn terminate(&self, pid: u32, grace: Duration) -> HubResult<()> {
        if self.has_exited(pid) {
            debug!(pid, "Hub process already gone");
            clear_pid_file_for(&self.pid_file, pid);
            return Ok(());
        }

        info!("Sending SIGTERM to process {}", pid);
        send_signal(pid, Signal::Terminate)?;

        if !self.wait_for_exit(pid, grace).await {
            warn!("Graceful shutdown timeout, sending SIGKILL to {}", pid);
            send_signal(pid, Signal::Kill)?;
            if !self.wait_for_exit(pid, Duration::from_secs(2)).await {
                return Err(HubError::TerminationFailure {
                    pid,
                    reason: "process survived SIGKILL".to_string(),
                });
            }
        }

        info!(pid, "Hub process stopped");
        clear_pid_file_for(&self.pid_file, pid);
        Ok(())
    }

    fn recorded_pid(&self) -> Option<u32> {
        let pid = read_pid_file(&self.pid_file)?;
        if process_exists(pid) {
            Some(pid)
        } else {
            // Stale PID file
            let _ = std::fs::remove_file(&self.pid_file);
            None
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Terminate,
    Kill,
}

/// A pid that names exactly one process. Zero and values past `i32::MAX`
/// would make `kill` address a process group or every process.
pub fn is_valid_pid(pid: u32) -> bool {
    i32::try_from(pid).is_ok_and(|pid| pid > 0)
}

pub fn process_exists(pid: u32) -> bool {
    #[cfg(unix)]
    {
        let Some(target) = signal_target(pid) else {
            return false;
        };
        // Signal 0 only checks for existence and permission
        unsafe { libc::kill(target, 0) == 0 }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

#[cfg(unix)]
fn signal_target(pid: u32) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid).ok().filter(|pid| *pid > 0)
}

#[cfg(unix)]
pub fn send_signal(pid: u32, signal: Signal) -> HubResult<()> {
    let signo = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    let target = signal_target(pid).ok_or_else(|| HubError::TerminationFailure {
        pid,
        reason: "not a single-process pid".to_string(),
    })?;
    let rc = unsafe { libc::kill(target, signo) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // Already gone between the check and the signal
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(HubError::TerminationFailure {
            pid,
            reason: format!("signal {} failed: {}", signo, err),
        });
    }
    Ok(())
}

#[cfg(windows)]
pub fn send_signal(pid: u32, _signal: Signal) -> HubResult<()> {
    let output = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.contains("not found") {
            return Err(HubError::TerminationFailure {
                pid,
                reason: stderr.to_string(),
            });
        }
    }
    Ok(())
}

pub fn read_pid_file(path: &Path) -> Option<u32> {
    let pid = std::fs::read_to_string(path).ok()?.trim().parse::<u32>().ok()?;
    if !is_valid_pid(pid) {
        warn!("Ignoring invalid pid {} in {:?}", pid, path);
        return None;
    }
    Some(pid)
}

/// Write PID file
pub fn write_pid_file(path: &Path, pid: u32) -> HubResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, pid.to_string())?;
    info!("Wrote PID file: {:?}", path);
    Ok(())
}

/// Remove the PID file only while it still names `pid`.
fn clear_pid_file_for(path: &Path, pid: u32) {
    if read_pid_file(path) == Some(pid) {
        let _ = std::fs::remove_file(path);
    }
}

/// Removes the PID file when the hub exits.
pub struct PidFileGuard {
    path: PathBuf,
    pid: u32,
}

impl PidFileGuard {
    pub fn create(path: impl Into<PathBuf>) -> HubResult<Self> {
        let path = path.into();
        let pid = std::process::id();
        write_pid_file(&path, pid)?;
        Ok(Self { path, pid })
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        clear_pid_file_for(&self.path, self.pid);
    }
}
