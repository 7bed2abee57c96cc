// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `depot scan`
//!
//! Runs one reconciliation pass against the watched roots, prints what
//! happened and the resulting deployment status, then stops everything.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use depot_core::application::{ArtifactInfo, TickReport, ZombieMap};
use depot_core::domain::artifact::ArtifactStatus;
use serde::Serialize;
use std::path::PathBuf;

use super::{load_config, service_from};

#[derive(Args)]
pub struct ScanArgs {
    /// Print the resulting status as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct ScanOutput {
    domains: Vec<ArtifactInfo>,
    applications: Vec<ArtifactInfo>,
    zombie_domains: ZombieMap,
    zombie_applications: ZombieMap,
}

pub async fn execute(args: ScanArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut config = load_config(config_path)?;
    config.spec.scheduler.enabled = false;
    let service = service_from(&config)?;

    let report = service.start().await.context("Reconciliation failed")?;
    let output = ScanOutput {
        domains: service.list_domains(),
        applications: service.list_applications(),
        zombie_domains: service.get_zombie_domains(),
        zombie_applications: service.get_zombie_applications(),
    };
    service.shutdown().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    print_report(&report);
    println!();
    print_section("Domains", &output.domains);
    print_section("Applications", &output.applications);
    print_zombies("Failed domains", &output.zombie_domains);
    print_zombies("Failed applications", &output.zombie_applications);
    Ok(())
}

pub(crate) fn print_report(report: &TickReport) {
    if report.is_idle() {
        println!("{}", "Nothing to do".dimmed());
        return;
    }
    for key in &report.deployed {
        println!("  {} {}", "deployed".green(), key);
    }
    for key in &report.redeployed {
        println!("  {} {}", "redeployed".cyan(), key);
    }
    for key in &report.undeployed {
        println!("  {} {}", "undeployed".yellow(), key);
    }
    for (key, error) in &report.failed {
        println!("  {} {}: {}", "failed".red(), key, error);
    }
    if report.quarantined > 0 {
        println!("  {}", format!("{} quarantined, skipped", report.quarantined).dimmed());
    }
}

fn print_section(title: &str, artifacts: &[ArtifactInfo]) {
    println!("{}", format!("{}:", title).bold());
    if artifacts.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for info in artifacts {
        let status = match info.status {
            ArtifactStatus::Started => info.status.to_string().green(),
            ArtifactStatus::DeploymentFailed => info.status.to_string().red(),
            _ => info.status.to_string().yellow(),
        };
        match &info.domain {
            Some(domain) => println!("  {} [{}] in {}", info.key.name.bold(), status, domain),
            None => println!("  {} [{}]", info.key.name.bold(), status),
        }
    }
    println!();
}

fn print_zombies(title: &str, zombies: &ZombieMap) {
    if zombies.is_empty() {
        return;
    }
    println!("{}", format!("{}:", title).bold());
    for (name, attempts) in zombies {
        for (source, at) in attempts {
            println!("  {} {} ({})", name.red(), source, at.to_rfc3339());
        }
    }
    println!();
}
