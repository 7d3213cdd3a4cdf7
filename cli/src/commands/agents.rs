// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `ensemble agents`: the agent table, with live worker connections when the
//! hub answers.

use anyhow::Result;
use colored::Colorize;
use tracing::debug;

use ensemble_core::domain::agent::AgentId;
use ensemble_core::domain::node_config::NodeConfig;
use ensemble_core::domain::protocol::{HubReply, HubRequest};
use ensemble_core::infrastructure::hub_client::HubClient;

pub async fn list(config: &NodeConfig) -> Result<()> {
    let table = config.agent_table();
    let connected = connected_agents(config).await;

    println!("{}", "Agents:".bold());
    for agent in table.agents() {
        let mut line = format!(
            "  {} {:<10} ({})  aliases: {}",
            agent.emoji,
            agent.display_name,
            agent.id,
            agent.aliases.join(", ")
        );
        if &agent.id == table.default_agent() {
            line.push_str("  [default]");
        }
        match &connected {
            Some(ids) if ids.contains(&agent.id) => println!("{}", line.green()),
            _ => println!("{}", line),
        }
    }

    if connected.is_none() {
        println!();
        println!("{}", "Hub not reachable; worker connections unknown.".dimmed());
    }
    Ok(())
}

async fn connected_agents(config: &NodeConfig) -> Option<Vec<AgentId>> {
    let client = HubClient::new(config.address(), config.health_timeout);
    match client.send(&HubRequest::StatusCheck).await {
        Ok(HubReply::StatusResponse { agents_connected, .. }) => Some(agents_connected),
        Ok(other) => {
            debug!("Unexpected status reply: {:?}", other);
            None
        }
        Err(e) => {
            debug!("Status request failed: {}", e);
            None
        }
    }
}
