// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Persisted startup status
//!
//! Best effort: a failed write is logged and otherwise ignored. Writes land
//! in a temporary sibling first and are renamed into place, so a reader sees
//! either the previous record or the new one. Concurrent writers are
//! last-writer-wins; `seq` lets readers drop records older than one they
//! already saw.

use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::status::{default_message, Phase, PhaseState, PhaseStatus, StatusRecord};

#[derive(Debug, Clone)]
pub struct StatusRecorder {
    path: PathBuf,
    run_id: Uuid,
}

impl StatusRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            run_id: Uuid::new_v4(),
        }
    }

    /// A recorder writing on behalf of one startup attempt.
    pub fn for_run(&self, run_id: Uuid) -> Self {
        Self {
            path: self.path.clone(),
            run_id,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last persisted record; `None` when absent or unreadable.
    pub fn read(&self) -> Option<StatusRecord> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("Ignoring unreadable status file {:?}: {}", self.path, e);
                None
            }
        }
    }

    pub fn update(&self, phase: Phase, status: PhaseStatus, message: Option<&str>) {
        let message = message
            .map(str::to_string)
            .unwrap_or_else(|| default_message(phase, status).to_string());

        debug!(phase = %phase, status = %status, "{}", message);

        if let Err(e) = self.write(phase, status, message) {
            warn!("Failed to persist status {}:{} to {:?}: {}", phase, status, self.path, e);
        }
    }

    fn write(&self, phase: Phase, status: PhaseStatus, message: String) -> anyhow::Result<()> {
        let previous = self.read();
        let now = Utc::now();

        let seq = previous.as_ref().map_or(1, |r| r.seq + 1);
        let mut full_state = match previous {
            Some(record) if record.run_id == self.run_id => record.full_state,
            _ => BTreeMap::new(),
        };
        full_state.insert(
            phase,
            PhaseState {
                status,
                message: message.clone(),
                timestamp: now,
            },
        );

        let record = StatusRecord {
            seq,
            run_id: self.run_id,
            timestamp: now,
            phase,
            status,
            message,
            full_state,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self
            .path
            .with_extension(format!("json.{}.tmp", std::process::id()));
        std::fs::write(&tmp, serde_json::to_vec_pretty(&record)?)?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_uses_default_message_and_accumulates_phases() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = StatusRecorder::new(dir.path().join("status.json"));

        assert!(recorder.read().is_none());

        recorder.update(Phase::Bridge, PhaseStatus::Starting, None);
        recorder.update(Phase::Bridge, PhaseStatus::Complete, Some("hub up on 7890"));
        recorder.update(Phase::Agents, PhaseStatus::Complete, None);

        let record = recorder.read().unwrap();
        assert_eq!(record.seq, 3);
        assert_eq!(record.phase, Phase::Agents);
        assert_eq!(record.message, default_message(Phase::Agents, PhaseStatus::Complete));
        assert_eq!(record.full_state[&Phase::Bridge].message, "hub up on 7890");
        assert!(record.is_ready());
    }

    #[test]
    fn test_new_run_starts_fresh_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let first = StatusRecorder::new(dir.path().join("status.json"));
        first.update(Phase::Introduction, PhaseStatus::Error, None);

        let second = first.for_run(Uuid::new_v4());
        second.update(Phase::Bridge, PhaseStatus::Starting, None);

        let record = second.read().unwrap();
        assert_eq!(record.seq, 2);
        assert_eq!(record.run_id, second.run_id());
        assert!(record.phase_status(Phase::Introduction).is_none());
    }

    #[test]
    fn test_write_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes the rename fail
        let path = dir.path().join("status.json");
        std::fs::create_dir_all(path.join("occupied")).unwrap();
        let recorder = StatusRecorder::new(&path);

        recorder.update(Phase::Bridge, PhaseStatus::Starting, None);
        assert!(recorder.read().is_none());
    }
}
