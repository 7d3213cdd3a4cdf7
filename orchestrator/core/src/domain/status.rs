// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Startup phases and the persisted status record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Bridge,
    Agents,
    Assessment,
    Introduction,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::Bridge,
        Phase::Agents,
        Phase::Assessment,
        Phase::Introduction,
    ];

    /// Mandatory phases abort startup on failure.
    pub fn is_mandatory(&self) -> bool {
        matches!(self, Phase::Bridge | Phase::Agents)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Bridge => "bridge",
            Phase::Agents => "agents",
            Phase::Assessment => "assessment",
            Phase::Introduction => "introduction",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Starting,
    Running,
    Complete,
    Error,
    Stopped,
    Skipped,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Starting => "starting",
            PhaseStatus::Running => "running",
            PhaseStatus::Complete => "complete",
            PhaseStatus::Error => "error",
            PhaseStatus::Stopped => "stopped",
            PhaseStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default human-readable message for a phase transition.
pub fn default_message(phase: Phase, status: PhaseStatus) -> &'static str {
    use Phase::*;
    use PhaseStatus::*;

    match (phase, status) {
        (Bridge, Starting) => "Starting communication hub...",
        (Bridge, Running) => "Communication hub is running",
        (Bridge, Complete) => "Communication hub ready",
        (Bridge, Error) => "Communication hub failed to start",
        (Bridge, Stopped) => "Communication hub stopped",
        (Bridge, Skipped) => "Communication hub start skipped",
        (Agents, Starting) => "Connecting agents...",
        (Agents, Running) => "Agents connecting",
        (Agents, Complete) => "Agents reachable through the hub",
        (Agents, Error) => "Agents are not reachable",
        (Agents, Stopped) => "Agents stopped",
        (Agents, Skipped) => "Agent check skipped",
        (Assessment, Starting) => "Assessing project...",
        (Assessment, Running) => "Project assessment running",
        (Assessment, Complete) => "Project assessment complete",
        (Assessment, Error) => "Project assessment failed",
        (Assessment, Stopped) => "Project assessment stopped",
        (Assessment, Skipped) => "Project assessment not configured",
        (Introduction, Starting) => "Introducing the team...",
        (Introduction, Running) => "Introduction running",
        (Introduction, Complete) => "Team ready",
        (Introduction, Error) => "Introduction failed",
        (Introduction, Stopped) => "Introduction stopped",
        (Introduction, Skipped) => "Introduction not configured",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseState {
    pub status: PhaseStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Last known startup state, as persisted in the status file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Monotonic per status file; readers ignore records older than one seen.
    pub seq: u64,
    /// Startup attempt that wrote this record
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
    pub status: PhaseStatus,
    pub message: String,
    #[serde(default)]
    pub full_state: BTreeMap<Phase, PhaseState>,
}

impl StatusRecord {
    pub fn phase_status(&self, phase: Phase) -> Option<PhaseStatus> {
        self.full_state.get(&phase).map(|s| s.status)
    }

    /// Hub started and agents confirmed in this record's run.
    pub fn is_ready(&self) -> bool {
        self.phase_status(Phase::Bridge) == Some(PhaseStatus::Complete)
            && self.phase_status(Phase::Agents) == Some(PhaseStatus::Complete)
    }

    pub fn has_fatal_error(&self) -> bool {
        Phase::ALL
            .iter()
            .filter(|p| p.is_mandatory())
            .any(|p| self.phase_status(*p) == Some(PhaseStatus::Error))
    }
}

/// Result of one startup phase. Best-effort phases never abort the sequence,
/// but the distinction between degraded and skipped stays visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "lowercase")]
pub enum PhaseOutcome {
    Complete,
    Error(String),
    Skipped,
}

impl PhaseOutcome {
    pub fn status(&self) -> PhaseStatus {
        match self {
            PhaseOutcome::Complete => PhaseStatus::Complete,
            PhaseOutcome::Error(_) => PhaseStatus::Error,
            PhaseOutcome::Skipped => PhaseStatus::Skipped,
        }
    }

    pub fn from_status(status: PhaseStatus, message: &str) -> Self {
        match status {
            PhaseStatus::Complete => PhaseOutcome::Complete,
            PhaseStatus::Skipped => PhaseOutcome::Skipped,
            _ => PhaseOutcome::Error(message.to_string()),
        }
    }
}
