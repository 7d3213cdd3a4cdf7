// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Ensemble CLI
//!
//! The `ensemble` binary starts, supervises and talks to the local agent hub.
//!
//! ## Modes
//!
//! - **Default mode**: one-shot commands (`start`, `ensure`, `stop`, `status`,
//!   `route`, ...) that exit when done
//! - **Hub mode**: `ensemble --hub` runs the hub server in the foreground; the
//!   supervisor re-executes this binary in hub mode as a detached process
//! - **Detection**: health probe over the wire protocol, PID file for the pid
//!
//! ## Commands
//!
//! - `ensemble start|ensure [source]` - Bring the hub and agents up (single-flight)
//! - `ensemble stop|status` - Stop the hub, report readiness as JSON
//! - `ensemble supervise [source]` - Start, then keep the hub alive until interrupted
//! - `ensemble route <text>` - Send free text to the matching agent
//! - `ensemble agents` - List the agent table
//! - `ensemble config show|validate` - Configuration management

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use ensemble::commands::{self, ConfigCommand, DEFAULT_SOURCE};
use ensemble::{daemon, logging};

/// Ensemble - local agent hub supervision and routing
#[derive(Parser)]
#[command(name = "ensemble")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Run the hub server in the foreground (used by the supervisor)
    #[arg(long, global = true, hide = true)]
    hub: bool,

    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "ENSEMBLE_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Hub port (default: 7890)
    #[arg(long, global = true, env = "ENSEMBLE_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "ENSEMBLE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full startup sequence
    Start {
        /// Who is asking (recorded in the startup lock)
        #[arg(default_value = DEFAULT_SOURCE)]
        source: String,
    },

    /// Start only if the hub is not already healthy
    Ensure {
        #[arg(default_value = DEFAULT_SOURCE)]
        source: String,
    },

    /// Stop the hub
    Stop,

    /// Print the last startup status and live health as JSON
    Status,

    /// Start the hub, then keep it alive until interrupted
    Supervise {
        #[arg(default_value = DEFAULT_SOURCE)]
        source: String,
    },

    /// Route free text to the agent it addresses
    Route {
        /// Text to route
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,

        /// Only show which agent would receive the text
        #[arg(long)]
        dry_run: bool,

        /// Project directory sent with the request (default: current directory)
        #[arg(long, value_name = "DIR")]
        project: Option<PathBuf>,
    },

    /// List the agent table
    Agents,

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = commands::load_config(cli.config.clone(), cli.port)?;
    logging::init_logging(&cli.log_level, Some(&config.log_path()))?;

    // Hub mode (spawned by the supervisor)
    if cli.hub {
        info!("Starting Ensemble hub on {}", config.address());
        return daemon::run_hub(config).await;
    }

    match cli.command {
        Some(Commands::Start { source }) => {
            commands::hub::start(&config, cli.config.as_deref(), &source).await
        }
        Some(Commands::Ensure { source }) => {
            commands::hub::ensure(&config, cli.config.as_deref(), &source).await
        }
        Some(Commands::Stop) => commands::hub::stop(&config, cli.config.as_deref()).await,
        Some(Commands::Status) => commands::hub::status(&config).await,
        Some(Commands::Supervise { source }) => {
            commands::hub::supervise(&config, cli.config.as_deref(), &source).await
        }
        Some(Commands::Route {
            text,
            dry_run,
            project,
        }) => commands::route::handle(&config, &text.join(" "), dry_run, project).await,
        Some(Commands::Agents) => commands::agents::list(&config).await,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config, &config).await
        }
        None => {
            // No command provided - show help
            eprintln!("No command specified. Use --help for usage.");
            std::process::exit(1);
        }
    }
}
