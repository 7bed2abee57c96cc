// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use depot_core::domain::config::DeployerConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file with every default spelled out
    Generate {
        /// Output path (default: ./depot-config.yaml)
        #[arg(short, long, default_value = "./depot-config.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output } => generate(output),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = DeployerConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. DEPOT_CONFIG_PATH: {}",
            std::env::var("DEPOT_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./depot-config.yaml");
        println!("  4. ~/.depot/config.yaml");
        println!("  5. /etc/depot/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Directories:".bold());
    println!("  Applications: {}", spec.directories.applications.display());
    println!("  Domains: {}", spec.directories.domains.display());
    println!("  State: {}", spec.directories.state.display());
    println!();

    println!("{}", "Scheduler:".bold());
    println!("  Enabled: {}", spec.scheduler.enabled);
    println!("  Poll interval: {:?}", spec.scheduler.poll_interval);
    match &spec.scheduler.fixed_applications {
        Some(apps) => println!("  Fixed applications: {}", apps.join(", ")),
        None => println!("  Fixed applications: {}", "(none)".dimmed()),
    }
    println!();

    println!("{}", "Packaging:".bold());
    println!("  Archive extension: .{}", spec.packaging.archive_extension);
    println!("  Anchor suffix: {}", spec.packaging.anchor_suffix);
    println!();

    println!("{}", "Isolation:".bold());
    println!("  Platform packages: {}", spec.isolation.platform_packages.join(", "));
    println!("  Override denylist: {}", spec.isolation.override_denylist.len());
    println!("  Policies isolated from application: {}", spec.policies.isolate_from_application);
    println!();

    println!("Runtime version: {}", spec.runtime_version);
    println!(
        "Max concurrent lifecycle operations: {}",
        spec.lifecycle.max_concurrent_operations
    );

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = DeployerConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn generate(output: PathBuf) -> Result<()> {
    DeployerConfigManifest::default()
        .to_yaml_file(&output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
