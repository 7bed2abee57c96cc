// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for depot CLI

pub mod config;
pub mod run;
pub mod scan;

pub use self::config::ConfigCommand;
pub use self::run::RunArgs;
pub use self::scan::ScanArgs;

use anyhow::{Context, Result};
use depot_core::application::DeploymentService;
use depot_core::domain::config::DeployerConfigManifest;
use depot_core::infrastructure::{FileDeploymentStateRepository, LoggingRuntime, YamlDescriptorParser};
use std::path::PathBuf;
use std::sync::Arc;

/// Load and validate configuration.
pub(crate) fn load_config(config_path: Option<PathBuf>) -> Result<DeployerConfigManifest> {
    let config = DeployerConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;
    Ok(config)
}

/// Wire a service backed by the logging runtime and the on-disk state
/// repository.
pub(crate) fn service_from(config: &DeployerConfigManifest) -> Result<DeploymentService> {
    let repository = FileDeploymentStateRepository::new(&config.spec.directories.state)
        .context("Failed to open deployment state directory")?;
    DeploymentService::new(
        &config.spec,
        Arc::new(YamlDescriptorParser::new()),
        Arc::new(LoggingRuntime::new()),
        Arc::new(repository),
    )
}
