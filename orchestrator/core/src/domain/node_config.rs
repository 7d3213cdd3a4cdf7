// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Node Configuration Types
//
// Defines the configuration schema for an Ensemble host, including:
// - Hub endpoint (host/port) and persisted-state directory
// - Probe, request and lock-staleness timeouts
// - Supervisor restart policy
// - Optional best-effort startup steps
// - Agent roster override

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::agent::{AgentDescriptor, AgentId, AgentTable};
use crate::domain::protocol::DEFAULT_PORT;

pub const LOCK_FILE: &str = "startup.lock";
pub const STATUS_FILE: &str = "status.json";
pub const LOG_FILE: &str = "ensemble.log";
pub const PID_FILE: &str = "hub.pid";
pub const HUB_OUTPUT_FILE: &str = "hub.out";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Hub listen address
    #[serde(default = "default_host")]
    pub host: String,

    /// Hub port (env: ENSEMBLE_PORT)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding the lock, status, pid and log files (env: ENSEMBLE_HOME)
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Health probe timeout
    #[serde(default = "default_health_timeout", with = "humantime_serde")]
    pub health_timeout: Duration,

    /// Routed request timeout
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Age after which a startup lock is reclaimed
    #[serde(default = "default_lock_stale_after", with = "humantime_serde")]
    pub lock_stale_after: Duration,

    #[serde(default)]
    pub supervisor: SupervisorSettings,

    #[serde(default)]
    pub startup: StartupSettings,

    #[serde(default)]
    pub steps: StepSettings,

    /// Replaces the built-in agent roster when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agents: Option<AgentRoster>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSettings {
    /// How long `start` waits for the hub to become healthy
    #[serde(default = "default_startup_timeout", with = "humantime_serde")]
    pub startup_timeout: Duration,

    /// Probe interval while waiting for the hub to come up
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Probe interval of the monitor loop
    #[serde(default = "default_monitor_interval", with = "humantime_serde")]
    pub monitor_interval: Duration,

    /// Restart attempts per failure episode
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay after each restart attempt
    #[serde(default = "default_backoff", with = "humantime_serde")]
    pub backoff: Duration,

    /// SIGTERM grace window before SIGKILL
    #[serde(default = "default_stop_grace", with = "humantime_serde")]
    pub stop_grace: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupSettings {
    /// Upper bound on waiting for another startup to finish
    #[serde(default = "default_wait_timeout", with = "humantime_serde")]
    pub wait_timeout: Duration,

    /// Status file poll interval while waiting
    #[serde(default = "default_wait_poll", with = "humantime_serde")]
    pub wait_poll: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSettings {
    /// argv of the project-assessment step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment: Option<Vec<String>>,

    /// argv of the introduction step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introduction: Option<Vec<String>>,

    #[serde(default = "default_step_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRoster {
    pub default_agent: AgentId,
    pub agents: Vec<AgentDescriptor>,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".ensemble"))
        .unwrap_or_else(|| std::env::temp_dir().join("ensemble"))
}

fn default_health_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_lock_stale_after() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_startup_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_monitor_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff() -> Duration {
    Duration::from_secs(2)
}

fn default_stop_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_wait_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_wait_poll() -> Duration {
    Duration::from_millis(500)
}

fn default_step_timeout() -> Duration {
    Duration::from_secs(120)
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            startup_timeout: default_startup_timeout(),
            poll_interval: default_poll_interval(),
            monitor_interval: default_monitor_interval(),
            max_retries: default_max_retries(),
            backoff: default_backoff(),
            stop_grace: default_stop_grace(),
        }
    }
}

impl Default for StartupSettings {
    fn default() -> Self {
        Self {
            wait_timeout: default_wait_timeout(),
            wait_poll: default_wait_poll(),
        }
    }
}

impl Default for StepSettings {
    fn default() -> Self {
        Self {
            assessment: None,
            introduction: None,
            timeout: default_step_timeout(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_dir: default_base_dir(),
            health_timeout: default_health_timeout(),
            request_timeout: default_request_timeout(),
            lock_stale_after: default_lock_stale_after(),
            supervisor: SupervisorSettings::default(),
            startup: StartupSettings::default(),
            steps: StepSettings::default(),
            agents: None,
        }
    }
}

impl NodeConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    /// 1. ENSEMBLE_CONFIG_PATH environment variable
    /// 2. ./ensemble.yaml (working directory)
    /// 3. ~/.ensemble/config.yaml (user home)
    /// 4. /etc/ensemble/config.yaml (system, Unix)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("ENSEMBLE_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./ensemble.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".ensemble").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        {
            let system_config = PathBuf::from("/etc/ensemble/config.yaml");
            if system_config.exists() {
                return Some(system_config);
            }
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // 1. Explicit CLI path (fail if missing/invalid)
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        // 2. Discovery (Env -> Cwd -> Home -> System)
        let mut config = match Self::discover_config() {
            Some(config_path) => {
                tracing::debug!("Loading configuration from discovered path: {:?}", config_path);
                Self::from_yaml_file(config_path)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ENSEMBLE_PORT") {
            match val.trim().parse::<u16>() {
                Ok(port) => {
                    tracing::debug!("Environment override: ENSEMBLE_PORT={}", port);
                    self.port = port;
                }
                Err(_) => {
                    tracing::warn!("Invalid value for ENSEMBLE_PORT: '{}'. Ignoring.", val);
                }
            }
        }

        if let Ok(val) = std::env::var("ENSEMBLE_HOME") {
            if !val.trim().is_empty() {
                tracing::debug!("Environment override: ENSEMBLE_HOME={}", val);
                self.base_dir = PathBuf::from(val);
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            anyhow::bail!("port cannot be 0");
        }

        if self.host.is_empty() {
            anyhow::bail!("host cannot be empty");
        }

        if self.health_timeout.is_zero() || self.request_timeout.is_zero() {
            anyhow::bail!("health_timeout and request_timeout must be greater than zero");
        }

        if self.supervisor.poll_interval > self.supervisor.startup_timeout {
            anyhow::bail!(
                "supervisor.poll_interval ({:?}) exceeds supervisor.startup_timeout ({:?})",
                self.supervisor.poll_interval,
                self.supervisor.startup_timeout
            );
        }

        let holder_bound = self.startup_upper_bound();
        if self.startup.wait_timeout < holder_bound {
            anyhow::bail!(
                "startup.wait_timeout ({:?}) is shorter than the longest startup sequence ({:?}); \
                 waiting callers would give up on a startup that still succeeds",
                self.startup.wait_timeout,
                holder_bound
            );
        }
        if self.lock_stale_after <= holder_bound {
            anyhow::bail!(
                "lock_stale_after ({:?}) must exceed the longest startup sequence ({:?})",
                self.lock_stale_after,
                holder_bound
            );
        }

        for (name, step) in [
            ("assessment", &self.steps.assessment),
            ("introduction", &self.steps.introduction),
        ] {
            if let Some(argv) = step {
                if argv.first().map_or(true, |program| program.is_empty()) {
                    anyhow::bail!("steps.{} must name a program", name);
                }
            }
        }

        self.agent_table()
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid agent roster: {}", e))?;

        Ok(())
    }

    /// Longest time a lock holder can spend in the startup sequence: the
    /// initial probe, the hub startup window plus one overrunning probe, the
    /// agents probe, and both best-effort steps.
    pub fn startup_upper_bound(&self) -> Duration {
        self.supervisor.startup_timeout + self.health_timeout * 3 + self.steps.timeout * 2
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn agent_table(&self) -> AgentTable {
        match &self.agents {
            Some(roster) => AgentTable::new(roster.agents.clone(), roster.default_agent.clone()),
            None => AgentTable::builtin(),
        }
    }

    pub fn lock_path(&self) -> PathBuf {
        self.base_dir.join(LOCK_FILE)
    }

    pub fn status_path(&self) -> PathBuf {
        self.base_dir.join(STATUS_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.base_dir.join(LOG_FILE)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.base_dir.join(PID_FILE)
    }

    pub fn hub_output_path(&self) -> PathBuf {
        self.base_dir.join(HUB_OUTPUT_FILE)
    }
}
