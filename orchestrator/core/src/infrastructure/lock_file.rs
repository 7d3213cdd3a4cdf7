// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! File-based startup lock
//!
//! The lock must be visible to independent process invocations, so every
//! operation goes to disk; nothing is cached. Creation is create-exclusive,
//! which closes the race between "is it locked" and "take it".
//!
//! Stale locks are reclaimed under a second create-exclusive marker file
//! (`<lock>.reclaim`). Staleness is re-checked while the marker is held, so a
//! lock created after a contender's first read is never removed by it.

use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::domain::error::{HubError, HubResult};
use crate::domain::lock::LockDescriptor;

/// A reclaim marker older than this was left by a crashed reclaimer.
const RECLAIM_MARKER_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct LockManager {
    path: PathBuf,
    stale_after: Duration,
}

impl LockManager {
    pub fn new(path: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            path: path.into(),
            stale_after,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current holder, if the lock file exists and parses.
    pub fn read(&self) -> Option<LockDescriptor> {
        read_descriptor(&self.path)
    }

    /// True when a non-stale lock exists. A stale lock is removed.
    pub fn is_locked(&self) -> bool {
        match self.holder() {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                warn!("Failed to inspect startup lock {:?}: {}", self.path, e);
                // An unreadable lock file is treated as held
                self.path.exists()
            }
        }
    }

    /// Take the lock for `source`. The returned guard releases it on drop.
    pub fn acquire(&self, source: &str) -> HubResult<LockGuard> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let descriptor = LockDescriptor::new(source);
        // Two passes: the second runs only after a stale lock was reclaimed
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&self.path) {
                Ok(mut file) => {
                    let body = serde_json::to_vec_pretty(&descriptor)?;
                    if let Err(e) = file.write_all(&body).and_then(|_| file.sync_all()) {
                        let _ = std::fs::remove_file(&self.path);
                        return Err(e.into());
                    }
                    info!(source, pid = descriptor.pid, "Acquired startup lock");
                    return Ok(LockGuard {
                        path: self.path.clone(),
                        descriptor,
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if let Some(holder) = self.holder()? {
                        debug!("Startup lock held ({})", holder);
                        return Err(HubError::LockContention(holder));
                    }
                    // The stale lock is gone; try again
                }
                Err(e) => return Err(e.into()),
            }
        }

        // Someone else recreated the lock between reclamation and our retry
        match self.read() {
            Some(holder) => Err(HubError::LockContention(holder)),
            None => Err(HubError::Io(std::io::Error::new(
                ErrorKind::AlreadyExists,
                "startup lock changed hands during acquisition",
            ))),
        }
    }

    /// Delete the lock file whoever holds it. Missing file is fine.
    pub fn release(&self) {
        release_path(&self.path);
    }

    /// Live holder of the lock, reclaiming a stale one.
    fn holder(&self) -> std::io::Result<Option<LockDescriptor>> {
        match self.inspect()? {
            Some(descriptor) if descriptor.is_stale(Utc::now(), self.stale_after) => {
                self.reclaim(descriptor)
            }
            other => Ok(other),
        }
    }

    /// Parse the lock file. Half-written or foreign content is aged by mtime.
    fn inspect(&self) -> std::io::Result<Option<LockDescriptor>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        if let Ok(descriptor) = serde_json::from_str::<LockDescriptor>(&content) {
            return Ok(Some(descriptor));
        }
        let modified: DateTime<Utc> = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.modified()?.into(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(LockDescriptor {
            timestamp: modified,
            source: "unknown".to_string(),
            pid: 0,
        }))
    }

    fn reclaim_marker(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".reclaim");
        self.path.with_file_name(name)
    }

    /// Remove a stale lock while holding the reclaim marker. Returns the
    /// holder that is still in place, if any.
    fn reclaim(&self, seen: LockDescriptor) -> std::io::Result<Option<LockDescriptor>> {
        let marker = self.reclaim_marker();
        match OpenOptions::new().write(true).create_new(true).open(&marker) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if is_abandoned(&marker) {
                    warn!("Removing abandoned reclaim marker {:?}", marker);
                    let _ = std::fs::remove_file(&marker);
                }
                debug!("Another caller is reclaiming the startup lock");
                return Ok(Some(seen));
            }
            Err(e) => return Err(e),
        }

        let result = self.remove_if_stale();
        if let Err(e) = std::fs::remove_file(&marker) {
            warn!("Failed to remove reclaim marker {:?}: {}", marker, e);
        }
        result
    }

    fn remove_if_stale(&self) -> std::io::Result<Option<LockDescriptor>> {
        let now = Utc::now();
        let current = match self.inspect()? {
            Some(current) if current.is_stale(now, self.stale_after) => current,
            other => return Ok(other),
        };

        warn!(
            age_secs = current.age(now).as_secs(),
            "Reclaiming stale startup lock ({})", current
        );
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn read_descriptor(path: &Path) -> Option<LockDescriptor> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn is_abandoned(marker: &Path) -> bool {
    std::fs::metadata(marker)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > RECLAIM_MARKER_TTL)
}

fn release_path(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!("Released startup lock"),
        Err(e) if e.kind() == ErrorKind::NotFound => debug!("Startup lock already released"),
        Err(e) => warn!("Failed to release startup lock {:?}: {}", path, e),
    }
}

/// Holds the startup lock until dropped. Only removes the lock file while it
/// still carries this guard's descriptor.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    descriptor: LockDescriptor,
    released: bool,
}

impl LockGuard {
    pub fn descriptor(&self) -> &LockDescriptor {
        &self.descriptor
    }

    pub fn release(mut self) {
        self.release_own();
        self.released = true;
    }

    fn release_own(&self) {
        match read_descriptor(&self.path) {
            Some(current) if current == self.descriptor => release_path(&self.path),
            Some(current) => warn!("Startup lock was taken over ({}); leaving it in place", current),
            None => debug!("Startup lock already released"),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            self.release_own();
        }
    }
}
