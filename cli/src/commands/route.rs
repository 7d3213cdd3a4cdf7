// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `ensemble route`: send free text to the agent it addresses.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

use ensemble_core::application::router::MessageRouter;
use ensemble_core::domain::node_config::NodeConfig;
use ensemble_core::infrastructure::hub_client::HubClient;

pub async fn handle(
    config: &NodeConfig,
    text: &str,
    dry_run: bool,
    project: Option<PathBuf>,
) -> Result<()> {
    let router = MessageRouter::new(
        Arc::new(config.agent_table()),
        HubClient::new(config.address(), config.request_timeout),
    );

    if dry_run {
        match router.classify(text) {
            Some(classification) => {
                println!("{}", serde_json::to_string_pretty(&classification)?)
            }
            None => println!("{}", "ℹ Not addressed to any agent".yellow()),
        }
        return Ok(());
    }

    let project = match project {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to read current directory")?,
    };

    match router.route(text, Some(&project)).await {
        Some(envelope) if envelope.is_ok() => println!("{}", envelope.render()),
        Some(envelope) => {
            eprintln!("{}", envelope.render().red());
            std::process::exit(1);
        }
        None => println!("{}", "ℹ Not addressed to any agent".yellow()),
    }
    Ok(())
}
