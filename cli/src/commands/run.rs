// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `depot run`
//!
//! Deploys every domain and application found under the watched roots, then
//! keeps reconciling them until Ctrl-C.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use super::{load_config, service_from};
use super::scan::print_report;

#[derive(Args)]
pub struct RunArgs {
    /// Deploy only these applications and do not watch the roots
    #[arg(long = "app", value_name = "NAME")]
    applications: Vec<String>,
}

pub async fn execute(args: RunArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if !args.applications.is_empty() {
        config.spec.scheduler.fixed_applications = Some(args.applications);
    }
    let service = service_from(&config)?;

    info!(
        applications = %config.spec.directories.applications.display(),
        domains = %config.spec.directories.domains.display(),
        "Starting depot"
    );
    let report = service.start().await.context("Initial deployment failed")?;
    print_report(&report);

    if service.is_watching() {
        println!(
            "{}",
            format!(
                "Watching for changes every {:?}. Press Ctrl-C to stop.",
                config.spec.scheduler.poll_interval
            )
            .dimmed()
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    println!();
    info!("Shutdown signal received");
    service.shutdown().await;
    println!("{}", "✓ All artifacts stopped".green());
    Ok(())
}
