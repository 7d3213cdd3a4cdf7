// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod health;
pub mod hub_client;
pub mod lock_file;
pub mod process;
pub mod status_store;
pub mod steps;

pub use health::HealthProber;
pub use hub_client::{ExchangeError, HubClient};
pub use lock_file::{LockGuard, LockManager};
pub use process::{PidFileGuard, ProcessLauncher};
pub use status_store::StatusRecorder;
pub use steps::ExternalStep;
