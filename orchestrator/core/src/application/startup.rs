// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Startup Orchestrator
//!
//! Brings the hub and its agents to a ready state exactly once, however many
//! callers ask at the same time.
//!
//! ## Sequence
//! | Step | Phase | On failure |
//! |------|-------|------------|
//! | 1 | acquire startup lock | contention: wait for the holder, report its outcome |
//! | 2 | `bridge`: supervisor start | fatal: record `error`, release lock, return error |
//! | 3 | `agents`: re-probe hub | fatal |
//! | 4 | `assessment` (external step) | recorded as `error`, sequence continues |
//! | 5 | `introduction` (external step) | recorded as `error`, sequence continues |
//! | 6 | release lock | always, including on error and panic |

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::error::{HubError, HubResult};
use crate::domain::node_config::StartupSettings;
use crate::domain::status::{Phase, PhaseOutcome, PhaseStatus, StatusRecord};
use crate::domain::supervisor::{HealthCheck, StartOutcome, Supervisor, SupervisorObserver};
use crate::infrastructure::lock_file::LockManager;
use crate::infrastructure::status_store::StatusRecorder;

/// An auxiliary startup step whose failure never aborts startup.
#[async_trait]
pub trait PhaseStep: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, working_dir: &Path) -> HubResult<()>;
}

#[derive(Debug, Clone, Serialize)]
pub struct StartupReport {
    pub source: String,
    /// False when this caller observed another caller's startup
    pub executed: bool,
    pub ready: bool,
    pub phases: BTreeMap<Phase, PhaseOutcome>,
    pub record: Option<StatusRecord>,
}

impl StartupReport {
    fn from_record(source: &str, record: Option<StatusRecord>) -> Self {
        let phases = record
            .as_ref()
            .map(|r| {
                r.full_state
                    .iter()
                    .map(|(phase, state)| (*phase, PhaseOutcome::from_status(state.status, &state.message)))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            source: source.to_string(),
            executed: false,
            ready: record.as_ref().is_some_and(|r| r.is_ready()),
            phases,
            record,
        }
    }
}

pub struct StartupOrchestrator {
    locks: LockManager,
    status: StatusRecorder,
    supervisor: Arc<Supervisor>,
    health: Arc<dyn HealthCheck>,
    assessment: Option<Arc<dyn PhaseStep>>,
    introduction: Option<Arc<dyn PhaseStep>>,
    settings: StartupSettings,
    working_dir: PathBuf,
}

impl StartupOrchestrator {
    pub fn new(
        locks: LockManager,
        status: StatusRecorder,
        supervisor: Arc<Supervisor>,
        health: Arc<dyn HealthCheck>,
        settings: StartupSettings,
    ) -> Self {
        Self {
            locks,
            status,
            supervisor,
            health,
            assessment: None,
            introduction: None,
            settings,
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn with_assessment(mut self, step: Arc<dyn PhaseStep>) -> Self {
        self.assessment = Some(step);
        self
    }

    pub fn with_introduction(mut self, step: Arc<dyn PhaseStep>) -> Self {
        self.introduction = Some(step);
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub fn status(&self) -> &StatusRecorder {
        &self.status
    }

    /// Cheap path first: a healthy hub means nothing to do.
    pub async fn ensure_running(&self, source: &str) -> HubResult<StartupReport> {
        if self.health.probe().await {
            info!(source, "Hub already healthy");
            let mut report = StartupReport::from_record(source, self.status.read());
            report.ready = true;
            return Ok(report);
        }
        self.start(source).await
    }

    /// Full startup sequence, single-flight across processes.
    pub async fn start(&self, source: &str) -> HubResult<StartupReport> {
        let guard = match self.locks.acquire(source) {
            Ok(guard) => guard,
            Err(HubError::LockContention(holder)) => {
                info!(source, "Startup already in progress ({}); waiting for it", holder);
                return self.wait_for_other(source).await;
            }
            Err(e) => return Err(e),
        };

        info!(source, "Starting Ensemble");
        let result = self.run_phases(source).await;
        guard.release();

        match &result {
            Ok(report) => info!(source, ready = report.ready, "Startup sequence finished"),
            Err(e) => error!(source, "Startup failed: {}", e),
        }
        result
    }

    async fn run_phases(&self, source: &str) -> HubResult<StartupReport> {
        let run = self.status.for_run(Uuid::new_v4());
        let mut phases = BTreeMap::new();

        run.update(Phase::Bridge, PhaseStatus::Starting, None);
        match self.supervisor.start().await {
            Ok(StartOutcome::AlreadyRunning) => {
                run.update(Phase::Bridge, PhaseStatus::Complete, Some("Communication hub already running"));
            }
            Ok(StartOutcome::Started { pid }) => {
                let message = format!("Communication hub started (pid {})", pid);
                run.update(Phase::Bridge, PhaseStatus::Complete, Some(&message));
            }
            Err(e) => {
                run.update(Phase::Bridge, PhaseStatus::Error, Some(&e.to_string()));
                return Err(e);
            }
        }
        phases.insert(Phase::Bridge, PhaseOutcome::Complete);

        run.update(Phase::Agents, PhaseStatus::Starting, None);
        if !self.health.probe().await {
            let e = HubError::HealthProbeFailure("hub stopped answering after start".to_string());
            run.update(Phase::Agents, PhaseStatus::Error, Some(&e.to_string()));
            return Err(e);
        }
        run.update(Phase::Agents, PhaseStatus::Complete, None);
        phases.insert(Phase::Agents, PhaseOutcome::Complete);

        let best_effort = [
            (Phase::Assessment, self.assessment.clone()),
            (Phase::Introduction, self.introduction.clone()),
        ];
        for (phase, step) in best_effort {
            let outcome = self.run_best_effort(&run, phase, step.as_deref()).await;
            phases.insert(phase, outcome);
        }

        Ok(StartupReport {
            source: source.to_string(),
            executed: true,
            ready: true,
            phases,
            record: run.read(),
        })
    }

    async fn run_best_effort(
        &self,
        run: &StatusRecorder,
        phase: Phase,
        step: Option<&dyn PhaseStep>,
    ) -> PhaseOutcome {
        let Some(step) = step else {
            run.update(phase, PhaseStatus::Skipped, None);
            return PhaseOutcome::Skipped;
        };

        run.update(phase, PhaseStatus::Starting, None);
        match step.run(&self.working_dir).await {
            Ok(()) => {
                run.update(phase, PhaseStatus::Complete, None);
                PhaseOutcome::Complete
            }
            Err(e) => {
                warn!(phase = %phase, step = step.name(), "Optional startup step failed: {}", e);
                let message = e.to_string();
                run.update(phase, PhaseStatus::Error, Some(&message));
                PhaseOutcome::Error(message)
            }
        }
    }

    /// Observe another caller's startup until its lock clears.
    async fn wait_for_other(&self, source: &str) -> HubResult<StartupReport> {
        let timeout = self.settings.wait_timeout;
        let deadline = Instant::now() + timeout;
        let mut latest: Option<StatusRecord> = None;

        loop {
            latest = newest(latest, self.status.read());
            if !self.locks.is_locked() {
                break;
            }
            if Instant::now() >= deadline {
                warn!(source, "Gave up waiting for the other startup after {:?}", timeout);
                return Err(HubError::LockWaitTimeout(timeout));
            }
            sleep(self.settings.wait_poll).await;
        }

        // The holder writes its last record before releasing
        latest = newest(latest, self.status.read());
        let report = StartupReport::from_record(source, latest);
        info!(source, ready = report.ready, "Observed startup finished by another caller");
        Ok(report)
    }
}

/// Keep the record with the highest sequence number.
fn newest(current: Option<StatusRecord>, candidate: Option<StatusRecord>) -> Option<StatusRecord> {
    match (current, candidate) {
        (Some(current), Some(candidate)) if candidate.seq < current.seq => Some(current),
        (current, None) => current,
        (_, candidate) => candidate,
    }
}

/// Mirrors supervisor recovery into the status file, continuing whichever
/// run wrote the last record so its other phases stay visible.
pub struct StatusObserver {
    status: StatusRecorder,
}

impl StatusObserver {
    pub fn new(status: StatusRecorder) -> Self {
        Self { status }
    }

    fn current_run(&self) -> StatusRecorder {
        match self.status.read() {
            Some(record) => self.status.for_run(record.run_id),
            None => self.status.clone(),
        }
    }
}

#[async_trait]
impl SupervisorObserver for StatusObserver {
    async fn on_restart_attempt(&self, attempt: u32, max_retries: u32) {
        let message = format!("Restarting communication hub (attempt {}/{})", attempt, max_retries);
        self.current_run()
            .update(Phase::Bridge, PhaseStatus::Starting, Some(&message));
    }

    async fn on_recovered(&self, attempts: u32) {
        let message = format!("Communication hub recovered after {} attempt(s)", attempts);
        self.current_run()
            .update(Phase::Bridge, PhaseStatus::Running, Some(&message));
    }

    async fn on_recovery_exhausted(&self, attempts: u32) {
        let message = format!(
            "{}; manual intervention required",
            HubError::RecoveryExhausted(attempts)
        );
        self.current_run()
            .update(Phase::Bridge, PhaseStatus::Error, Some(&message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::node_config::SupervisorSettings;
    use crate::domain::supervisor::HubLauncher;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    struct MockHealth {
        healthy: AtomicBool,
    }

    #[async_trait]
    impl HealthCheck for MockHealth {
        async fn probe(&self) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    struct MockLauncher {
        health: Arc<MockHealth>,
        spawns: AtomicU32,
        heals: bool,
    }

    #[async_trait]
    impl HubLauncher for MockLauncher {
        async fn spawn(&self) -> HubResult<u32> {
            self.spawns.fetch_add(1, Ordering::SeqCst);
            if self.heals {
                self.health.healthy.store(true, Ordering::SeqCst);
            }
            Ok(4242)
        }

        async fn terminate(&self, _pid: u32, _grace: Duration) -> HubResult<()> {
            Ok(())
        }

        fn recorded_pid(&self) -> Option<u32> {
            None
        }
    }

    struct MockStep {
        succeed: bool,
        runs: AtomicU32,
    }

    impl MockStep {
        fn new(succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                succeed,
                runs: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl PhaseStep for MockStep {
        fn name(&self) -> &str {
            "mock"
        }

        async fn run(&self, _working_dir: &Path) -> HubResult<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                Ok(())
            } else {
                Err(HubError::StepFailed {
                    step: "mock".to_string(),
                    reason: "exited with 1".to_string(),
                })
            }
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        health: Arc<MockHealth>,
        launcher: Arc<MockLauncher>,
        orchestrator: StartupOrchestrator,
    }

    fn fixture(initially_healthy: bool, heals: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let health = Arc::new(MockHealth {
            healthy: AtomicBool::new(initially_healthy),
        });
        let launcher = Arc::new(MockLauncher {
            health: health.clone(),
            spawns: AtomicU32::new(0),
            heals,
        });
        let supervisor = Arc::new(Supervisor::new(
            launcher.clone(),
            health.clone(),
            SupervisorSettings {
                startup_timeout: Duration::from_millis(50),
                poll_interval: Duration::from_millis(10),
                ..SupervisorSettings::default()
            },
        ));
        let orchestrator = StartupOrchestrator::new(
            LockManager::new(dir.path().join("startup.lock"), Duration::from_secs(300)),
            StatusRecorder::new(dir.path().join("status.json")),
            supervisor,
            health.clone(),
            StartupSettings {
                wait_timeout: Duration::from_secs(2),
                wait_poll: Duration::from_millis(10),
            },
        )
        .with_working_dir(dir.path());

        Fixture {
            _dir: dir,
            health,
            launcher,
            orchestrator,
        }
    }

    #[tokio::test]
    async fn test_full_sequence_with_failing_introduction() {
        let f = fixture(false, true);
        let assessment = MockStep::new(true);
        let introduction = MockStep::new(false);
        let orchestrator = f
            .orchestrator
            .with_assessment(assessment.clone())
            .with_introduction(introduction.clone());

        let report = orchestrator.start("cli").await.unwrap();

        assert!(report.executed);
        assert!(report.ready);
        assert_eq!(report.phases[&Phase::Assessment], PhaseOutcome::Complete);
        assert!(matches!(report.phases[&Phase::Introduction], PhaseOutcome::Error(_)));
        assert_eq!(f.launcher.spawns.load(Ordering::SeqCst), 1);

        let record = orchestrator.status().read().unwrap();
        assert_eq!(record.phase, Phase::Introduction);
        assert_eq!(record.status, PhaseStatus::Error);
        assert!(record.is_ready());
        assert!(!orchestrator.locks.is_locked());
    }

    #[tokio::test]
    async fn test_unconfigured_steps_are_skipped() {
        let f = fixture(false, true);
        let report = f.orchestrator.start("cli").await.unwrap();

        assert_eq!(report.phases[&Phase::Assessment], PhaseOutcome::Skipped);
        assert_eq!(report.phases[&Phase::Introduction], PhaseOutcome::Skipped);
        let record = report.record.unwrap();
        assert_eq!(record.phase_status(Phase::Introduction), Some(PhaseStatus::Skipped));
    }

    #[tokio::test]
    async fn test_bridge_failure_is_fatal_and_releases_lock() {
        let f = fixture(false, false);
        let introduction = MockStep::new(true);
        let orchestrator = f.orchestrator.with_introduction(introduction.clone());

        let result = orchestrator.start("cli").await;

        assert!(matches!(result, Err(HubError::StartupTimeout(_))));
        assert_eq!(introduction.runs.load(Ordering::SeqCst), 0);
        assert!(!orchestrator.locks.is_locked());
        let record = orchestrator.status().read().unwrap();
        assert_eq!(record.phase, Phase::Bridge);
        assert_eq!(record.status, PhaseStatus::Error);
    }

    #[tokio::test]
    async fn test_ensure_running_skips_startup_when_healthy() {
        let f = fixture(true, false);

        let report = f.orchestrator.ensure_running("editor").await.unwrap();

        assert!(report.ready);
        assert!(!report.executed);
        assert_eq!(f.launcher.spawns.load(Ordering::SeqCst), 0);
        assert!(!f.orchestrator.locks.path().exists());
    }

    #[tokio::test]
    async fn test_ensure_running_starts_when_down() {
        let f = fixture(false, true);

        let report = f.orchestrator.ensure_running("editor").await.unwrap();

        assert!(report.executed);
        assert_eq!(f.launcher.spawns.load(Ordering::SeqCst), 1);
        assert!(f.health.healthy.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_waiter_reports_holder_outcome() {
        let f = fixture(true, false);
        // Simulate another process mid-startup
        let holder = f.orchestrator.locks.acquire("other").unwrap();
        let run = f.orchestrator.status().for_run(Uuid::new_v4());
        run.update(Phase::Bridge, PhaseStatus::Complete, None);

        let finisher = tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            run.update(Phase::Agents, PhaseStatus::Complete, None);
            run.update(Phase::Introduction, PhaseStatus::Complete, None);
            holder.release();
        });

        let report = f.orchestrator.start("cli").await.unwrap();
        finisher.await.unwrap();

        assert!(!report.executed);
        assert!(report.ready);
        assert_eq!(report.record.unwrap().phase, Phase::Introduction);
        assert_eq!(f.launcher.spawns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_waiter_times_out() {
        let f = fixture(true, false);
        let _holder = f.orchestrator.locks.acquire("other").unwrap();

        let result = f.orchestrator.start("cli").await;
        assert!(matches!(result, Err(HubError::LockWaitTimeout(_))));
    }

    #[test]
    fn test_newest_prefers_higher_seq() {
        let f = fixture(true, false);
        let status = f.orchestrator.status();
        status.update(Phase::Bridge, PhaseStatus::Starting, None);
        let older = status.read();
        status.update(Phase::Bridge, PhaseStatus::Complete, None);
        let newer = status.read();

        assert_eq!(newest(newer.clone(), older.clone()).unwrap().seq, 2);
        assert_eq!(newest(older, newer).unwrap().seq, 2);
        assert_eq!(newest(None, None), None);
    }

    #[tokio::test]
    async fn test_status_observer_continues_last_run() {
        let f = fixture(false, true);
        f.orchestrator.start("cli").await.unwrap();
        let before = f.orchestrator.status().read().unwrap();

        let observer = StatusObserver::new(f.orchestrator.status().clone());
        observer.on_recovery_exhausted(3).await;

        let after = f.orchestrator.status().read().unwrap();
        assert_eq!(after.run_id, before.run_id);
        assert_eq!(after.phase_status(Phase::Bridge), Some(PhaseStatus::Error));
        assert_eq!(after.phase_status(Phase::Agents), Some(PhaseStatus::Complete));
        assert!(after.has_fatal_error());
        assert!(after.message.contains("manual intervention"));
    }
}
