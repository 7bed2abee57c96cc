// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Deployer Configuration Types
//
// Defines the configuration schema for a depot deployer node, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Watched directories and the durable state location
// - Watcher poll interval and fixed application set
// - Isolation platform packages and shared-library override denylist
// - Policy isolation toggle and logging settings

use crate::domain::artifact::BundleIdentity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "depot/v1";
pub const KIND: &str = "DeployerConfig";

/// Top-level Kubernetes-style deployer configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployerConfigManifest {
    /// API version (must be "depot/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "DeployerConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: DeployerConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Deployer configuration specification (content under spec:)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployerConfigSpec {
    #[serde(default)]
    pub directories: DirectoriesConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub packaging: PackagingConfig,

    #[serde(default)]
    pub isolation: IsolationConfig,

    #[serde(default)]
    pub policies: PolicyConfig,

    /// Version checked against each artifact's minimum runtime constraint
    #[serde(default = "default_runtime_version")]
    pub runtime_version: String,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for DeployerConfigSpec {
    fn default() -> Self {
        Self {
            directories: DirectoriesConfig::default(),
            scheduler: SchedulerConfig::default(),
            lifecycle: LifecycleConfig::default(),
            packaging: PackagingConfig::default(),
            isolation: IsolationConfig::default(),
            policies: PolicyConfig::default(),
            runtime_version: default_runtime_version(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoriesConfig {
    #[serde(default = "default_applications_dir")]
    pub applications: PathBuf,

    #[serde(default = "default_domains_dir")]
    pub domains: PathBuf,

    /// Root of the persisted per-artifact deployment properties
    #[serde(default = "default_state_dir")]
    pub state: PathBuf,
}

impl Default for DirectoriesConfig {
    fn default() -> Self {
        Self {
            applications: default_applications_dir(),
            domains: default_domains_dir(),
            state: default_state_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Spawn the periodic watcher on start
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,

    /// When set, only these applications are deployed and nothing is watched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_applications: Option<Vec<String>>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: default_poll_interval(),
            fixed_applications: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Upper bound on concurrently running init/start/stop/dispose tasks
    #[serde(default = "default_max_concurrent_operations")]
    pub max_concurrent_operations: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_concurrent_operations: default_max_concurrent_operations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagingConfig {
    /// File extension of packed archives in the watched roots
    #[serde(default = "default_archive_extension")]
    pub archive_extension: String,

    #[serde(default = "default_anchor_suffix")]
    pub anchor_suffix: String,
}

impl Default for PackagingConfig {
    fn default() -> Self {
        Self {
            archive_extension: default_archive_extension(),
            anchor_suffix: default_anchor_suffix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationConfig {
    /// Package prefixes owned by the runtime itself, resolved parent-first
    #[serde(default = "default_platform_packages")]
    pub platform_packages: Vec<String>,

    /// `group:name` identities that never take a shared-library override
    #[serde(default)]
    pub override_denylist: Vec<String>,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            platform_packages: default_platform_packages(),
            override_denylist: Vec::new(),
        }
    }
}

impl IsolationConfig {
    pub fn denylist(&self) -> anyhow::Result<Vec<BundleIdentity>> {
        self.override_denylist
            .iter()
            .map(|s| {
                s.parse::<BundleIdentity>()
                    .map_err(|e| anyhow::anyhow!("Invalid override_denylist entry: {}", e))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Hide the hosting application's configuration from policies
    #[serde(default)]
    pub isolate_from_application: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "compact" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_applications_dir() -> PathBuf {
    PathBuf::from("./apps")
}

fn default_domains_dir() -> PathBuf {
    PathBuf::from("./domains")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("./.depot/state")
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_concurrent_operations() -> usize {
    4
}

fn default_archive_extension() -> String {
    "jar".to_string()
}

fn default_anchor_suffix() -> String {
    "-anchor.txt".to_string()
}

fn default_platform_packages() -> Vec<String> {
    vec!["java".to_string(), "javax".to_string(), "depot.api".to_string()]
}

fn default_runtime_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for DeployerConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "depot".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: DeployerConfigSpec::default(),
        }
    }
}

impl DeployerConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. DEPOT_CONFIG_PATH environment variable
    /// 2. ./depot-config.yaml (working directory)
    /// 3. ~/.depot/config.yaml (user home)
    /// 4. /etc/depot/config.yaml (system, Unix) or C:\ProgramData\Depot\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("DEPOT_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./depot-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".depot").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/depot/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Depot\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("DEPOT_SCHEDULER_ENABLED") {
            match parse_bool(&val) {
                Some(enabled) => {
                    tracing::info!("Environment override: DEPOT_SCHEDULER_ENABLED={}", enabled);
                    self.spec.scheduler.enabled = enabled;
                }
                None => tracing::warn!(
                    "Invalid value for DEPOT_SCHEDULER_ENABLED: '{}'. Expected true/false. Ignoring.",
                    val
                ),
            }
        }

        if let Ok(val) = std::env::var("DEPOT_POLL_INTERVAL") {
            match humantime_serde::re::humantime::parse_duration(&val) {
                Ok(interval) => {
                    tracing::info!("Environment override: DEPOT_POLL_INTERVAL={:?}", interval);
                    self.spec.scheduler.poll_interval = interval;
                }
                Err(e) => tracing::warn!(
                    "Invalid value for DEPOT_POLL_INTERVAL: '{}' ({}). Ignoring.",
                    val,
                    e
                ),
            }
        }

        if let Ok(val) = std::env::var("DEPOT_MAX_CONCURRENT_OPERATIONS") {
            match val.parse::<usize>() {
                Ok(n) => {
                    tracing::info!("Environment override: DEPOT_MAX_CONCURRENT_OPERATIONS={}", n);
                    self.spec.lifecycle.max_concurrent_operations = n;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for DEPOT_MAX_CONCURRENT_OPERATIONS: '{}'. Ignoring.",
                    val
                ),
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.scheduler.poll_interval.is_zero() {
            anyhow::bail!("spec.scheduler.poll_interval must be greater than zero");
        }

        if self.spec.lifecycle.max_concurrent_operations == 0 {
            anyhow::bail!("spec.lifecycle.max_concurrent_operations must be at least 1");
        }

        if self.spec.packaging.archive_extension.is_empty()
            || self.spec.packaging.archive_extension.contains(['.', '/'])
        {
            anyhow::bail!(
                "Invalid spec.packaging.archive_extension: '{}'",
                self.spec.packaging.archive_extension
            );
        }

        if self.spec.packaging.anchor_suffix.is_empty() {
            anyhow::bail!("spec.packaging.anchor_suffix cannot be empty");
        }

        semver::Version::parse(&self.spec.runtime_version).map_err(|e| {
            anyhow::anyhow!(
                "Invalid spec.runtime_version '{}': {}",
                self.spec.runtime_version,
                e
            )
        })?;

        self.spec.isolation.denylist()?;

        if self.spec.directories.applications == self.spec.directories.domains {
            anyhow::bail!("Applications and domains must be watched from different directories");
        }

        Ok(())
    }
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = DeployerConfigManifest::default();
        assert_eq!(manifest.api_version, "depot/v1");
        assert_eq!(manifest.kind, "DeployerConfig");
        assert_eq!(manifest.spec.scheduler.poll_interval, Duration::from_secs(5));
        assert_eq!(manifest.spec.packaging.anchor_suffix, "-anchor.txt");
        assert!(!manifest.spec.policies.isolate_from_application);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let yaml = r#"
apiVersion: depot/v1
kind: DeployerConfig
metadata:
  name: edge-1
spec:
  scheduler:
    poll_interval: 250ms
  isolation:
    override_denylist:
      - "org.acme.connectors:http"
"#;
        let manifest = DeployerConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.spec.scheduler.poll_interval, Duration::from_millis(250));
        assert!(manifest.spec.scheduler.enabled);
        assert_eq!(manifest.spec.lifecycle.max_concurrent_operations, 4);
        assert_eq!(
            manifest.spec.isolation.denylist().unwrap(),
            vec![BundleIdentity::new("org.acme.connectors", "http")]
        );
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut manifest = DeployerConfigManifest::default();
        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());

        let mut manifest = DeployerConfigManifest::default();
        manifest.spec.lifecycle.max_concurrent_operations = 0;
        assert!(manifest.validate().is_err());

        let mut manifest = DeployerConfigManifest::default();
        manifest.spec.isolation.override_denylist = vec!["no-colon".to_string()];
        assert!(manifest.validate().is_err());

        let mut manifest = DeployerConfigManifest::default();
        manifest.spec.runtime_version = "latest".to_string();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depot-config.yaml");
        let mut manifest = DeployerConfigManifest::default();
        manifest.spec.scheduler.fixed_applications = Some(vec!["orders".to_string()]);
        manifest.to_yaml_file(&path).unwrap();

        let loaded = DeployerConfigManifest::from_yaml_file(&path).unwrap();
        assert_eq!(
            loaded.spec.scheduler.fixed_applications,
            Some(vec!["orders".to_string()])
        );
        assert_eq!(loaded.spec.scheduler.poll_interval, Duration::from_secs(5));
    }
}
