// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Ensemble CLI

use anyhow::{Context, Result};
use std::path::PathBuf;

use ensemble_core::domain::node_config::NodeConfig;

pub mod agents;
pub mod config;
pub mod hub;
pub mod route;

pub use self::config::ConfigCommand;

/// Source tag used when the caller does not name itself
pub const DEFAULT_SOURCE: &str = "cli";

/// Discover, override and validate the node configuration.
pub fn load_config(config_path: Option<PathBuf>, port: Option<u16>) -> Result<NodeConfig> {
    let mut config =
        NodeConfig::load_or_default(config_path).context("Failed to load configuration")?;
    if let Some(port) = port {
        config.port = port;
    }
    config
        .validate()
        .context("Configuration validation failed")?;
    Ok(config)
}
