// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Contents of the startup lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockDescriptor {
    pub timestamp: DateTime<Utc>,
    /// Who asked for the startup (e.g., "cli", "editor")
    pub source: String,
    pub pid: u32,
}

impl LockDescriptor {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            source: source.into(),
            pid: std::process::id(),
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.age(now) > threshold
    }
}

impl fmt::Display for LockDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "source: {}, pid: {}, since {}",
            self.source,
            self.pid,
            self.timestamp.to_rfc3339()
        )
    }
}
