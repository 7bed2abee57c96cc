// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # depot
//!
//! The `depot` binary hosts the deployment engine on this machine.
//!
//! ## Commands
//!
//! - `depot run` - Deploy everything under the watched roots and keep watching
//! - `depot scan` - Run one reconciliation pass and print the result
//! - `depot config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use depot_core::domain::config::DeployerConfigManifest;
use std::path::PathBuf;

mod commands;

use commands::{ConfigCommand, RunArgs, ScanArgs};

/// depot - Artifact deployment and lifecycle orchestrator
#[derive(Parser)]
#[command(name = "depot")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "DEPOT_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true, env = "DEPOT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy the watched roots and keep them reconciled until interrupted
    #[command(name = "run")]
    Run(RunArgs),

    /// Run a single reconciliation pass
    #[command(name = "scan")]
    Scan(ScanArgs),

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

    // Logging settings from the config file apply unless overridden on the
    // command line. A broken file is reported by the command itself.
    let logging = DeployerConfigManifest::load_or_default(cli.config.clone())
        .map(|c| c.spec.logging)
        .unwrap_or_default();
    let level = cli.log_level.clone().unwrap_or(logging.level);
    init_logging(&level, cli.json_logs || logging.format == "json")?;

    match cli.command {
        Some(Commands::Run(args)) => commands::run::execute(args, cli.config).await,
        Some(Commands::Scan(args)) => commands::scan::execute(args, cli.config).await,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
