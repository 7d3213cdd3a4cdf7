// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! External best-effort startup steps (project assessment, introduction).
//! Only the exit code matters; output is discarded.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::application::startup::PhaseStep;
use crate::domain::error::{HubError, HubResult};

#[derive(Debug, Clone)]
pub struct ExternalStep {
    name: String,
    argv: Vec<String>,
    timeout: Duration,
}

impl ExternalStep {
    pub fn new(name: impl Into<String>, argv: Vec<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            argv,
            timeout,
        }
    }

    fn failed(&self, reason: impl Into<String>) -> HubError {
        HubError::StepFailed {
            step: self.name.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl PhaseStep for ExternalStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, working_dir: &Path) -> HubResult<()> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| self.failed("no command configured"))?;

        debug!(step = %self.name, program, "Running startup step in {:?}", working_dir);

        let mut child = Command::new(program)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.failed(format!("could not start {}: {}", program, e)))?;

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status.map_err(|e| self.failed(e.to_string()))?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(self.failed(format!("timed out after {:?}", self.timeout)));
            }
        };

        if status.success() {
            Ok(())
        } else {
            Err(self.failed(format!("exited with {}", status)))
        }
    }
}
