// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::time::Duration;
use thiserror::Error;

use crate::domain::lock::LockDescriptor;

#[derive(Debug, Error)]
pub enum HubError {
    /// Another startup sequence holds the lock. Callers wait and observe.
    #[error("Startup already in progress ({0})")]
    LockContention(LockDescriptor),

    #[error("Timed out after {0:?} waiting for another startup to finish")]
    LockWaitTimeout(Duration),

    #[error("Hub did not become healthy within {0:?}")]
    StartupTimeout(Duration),

    #[error("Failed to spawn hub process: {0}")]
    ProcessSpawnFailure(String),

    #[error("Health probe failed: {0}")]
    HealthProbeFailure(String),

    #[error("Recovery exhausted after {0} restart attempts")]
    RecoveryExhausted(u32),

    #[error("Failed to terminate process {pid}: {reason}")]
    TerminationFailure { pid: u32, reason: String },

    #[error("Request to {target} timed out after {timeout:?}")]
    RoutingTimeout { target: String, timeout: Duration },

    #[error("Could not reach hub for {target}: {reason}")]
    RoutingConnection { target: String, reason: String },

    #[error("Malformed reply from hub: {0}")]
    Protocol(String),

    #[error("Step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type HubResult<T> = Result<T, HubError>;
