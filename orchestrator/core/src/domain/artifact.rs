// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Artifact Domain Model
//!
//! Typed view of a deployable unit (domain, application, policy or plugin) as
//! produced by a [`DescriptorParser`](crate::domain::descriptor::DescriptorParser).
//! Descriptors are immutable once parsed and are owned by the graph node that
//! accepted them.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Identity, coordinates, dependency declarations and lifecycle status

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Kind of deployable unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Domain,
    Application,
    Policy,
    Plugin,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Domain => "domain",
            ArtifactKind::Application => "application",
            ArtifactKind::Policy => "policy",
            ArtifactKind::Plugin => "plugin",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `group:name` pair identifying a bundle regardless of its version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BundleIdentity {
    pub group: String,
    pub name: String,
}

impl BundleIdentity {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for BundleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.name)
    }
}

impl FromStr for BundleIdentity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((group, name)) if !group.is_empty() && !name.is_empty() && !name.contains(':') => {
                Ok(Self::new(group, name))
            }
            _ => Err(format!("expected 'group:name', got '{}'", s)),
        }
    }
}

/// Full coordinates of a versioned bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BundleCoordinates {
    pub group: String,
    pub name: String,
    pub version: Version,
}

impl BundleCoordinates {
    pub fn new(group: impl Into<String>, name: impl Into<String>, version: Version) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            version,
        }
    }

    pub fn identity(&self) -> BundleIdentity {
        BundleIdentity::new(self.group.clone(), self.name.clone())
    }

    /// Same identity and same `major.minor`, i.e. `other` is a patch of `self`.
    pub fn same_base_version(&self, other: &BundleCoordinates) -> bool {
        self.group == other.group
            && self.name == other.name
            && self.version.major == other.version.major
            && self.version.minor == other.version.minor
    }

    /// Two versions of the same bundle can stand in for each other when the
    /// major version matches.
    pub fn is_compatible_with(&self, other: &BundleCoordinates) -> bool {
        self.group == other.group
            && self.name == other.name
            && self.version.major == other.version.major
    }
}

impl fmt::Display for BundleCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.name, self.version)
    }
}

/// Logical key of a deployed artifact inside the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub kind: ArtifactKind,
    pub name: String,
}

impl ArtifactKey {
    pub fn new(kind: ArtifactKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn application(name: impl Into<String>) -> Self {
        Self::new(ArtifactKind::Application, name)
    }

    pub fn domain(name: impl Into<String>) -> Self {
        Self::new(ArtifactKind::Domain, name)
    }

    pub fn policy(name: impl Into<String>) -> Self {
        Self::new(ArtifactKind::Policy, name)
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Lifecycle status of a graph node.
///
/// ```text
/// CREATED -> STARTED <-> STOPPED
///    any  -> DEPLOYMENT_FAILED (terminal for the attempt)
///    any  -> DESTROYED         (terminal, node released)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactStatus {
    Created,
    Started,
    Stopped,
    DeploymentFailed,
    Destroyed,
}

impl ArtifactStatus {
    pub fn can_transition_to(&self, next: ArtifactStatus) -> bool {
        use ArtifactStatus::*;
        match (self, next) {
            (Destroyed, _) => false,
            (_, DeploymentFailed) | (_, Destroyed) => true,
            (Created, Started) | (Started, Stopped) | (Stopped, Started) => true,
            _ => false,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ArtifactStatus::DeploymentFailed)
    }
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArtifactStatus::Created => "CREATED",
            ArtifactStatus::Started => "STARTED",
            ArtifactStatus::Stopped => "STOPPED",
            ArtifactStatus::DeploymentFailed => "DEPLOYMENT_FAILED",
            ArtifactStatus::Destroyed => "DESTROYED",
        };
        f.write_str(s)
    }
}

/// A plugin dependency declared by an artifact (or bundled inside it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub coordinates: BundleCoordinates,
    #[serde(default)]
    pub exported_packages: Vec<String>,
    #[serde(default)]
    pub exported_resources: Vec<String>,
    /// Internal packages, never visible to the declaring artifact.
    #[serde(default)]
    pub local_packages: Vec<String>,
    /// Packages taken from a direct plugin dependency and exposed again.
    #[serde(default)]
    pub re_exported_packages: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<BundleIdentity>,
}

impl PluginDescriptor {
    pub fn identity(&self) -> BundleIdentity {
        self.coordinates.identity()
    }
}

/// A library shared at the artifact's own packaging level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedLibrary {
    pub coordinates: BundleCoordinates,
    #[serde(default)]
    pub exported_packages: Vec<String>,
    #[serde(default)]
    pub exported_resources: Vec<String>,
}

/// Parsed manifest of a deployable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub name: String,
    pub kind: ArtifactKind,
    pub coordinates: BundleCoordinates,
    /// Parent domain reference (applications and policies only).
    pub domain: Option<String>,
    /// Directly declared plugins, in declaration order.
    pub plugins: Vec<PluginDescriptor>,
    /// Plugins packaged with the artifact that are only reachable transitively.
    pub bundled_plugins: Vec<PluginDescriptor>,
    pub shared_libraries: Vec<SharedLibrary>,
    pub local_packages: Vec<String>,
    pub exported_packages: Vec<String>,
    pub exported_resources: Vec<String>,
    /// Configuration resources relative to the artifact root, watched for redeploy.
    pub config_resources: Vec<PathBuf>,
    /// Named sub-components with their own start-on-deploy flag.
    pub components: Vec<String>,
    pub min_runtime_version: Option<VersionReq>,
    pub redeployment_enabled: bool,
}

impl ArtifactDescriptor {
    pub fn new(kind: ArtifactKind, name: impl Into<String>, coordinates: BundleCoordinates) -> Self {
        Self {
            name: name.into(),
            kind,
            coordinates,
            domain: None,
            plugins: Vec::new(),
            bundled_plugins: Vec::new(),
            shared_libraries: Vec::new(),
            local_packages: Vec::new(),
            exported_packages: Vec::new(),
            exported_resources: Vec::new(),
            config_resources: Vec::new(),
            components: Vec::new(),
            min_runtime_version: None,
            redeployment_enabled: true,
        }
    }

    pub fn key(&self) -> ArtifactKey {
        ArtifactKey::new(self.kind, self.name.clone())
    }

    /// Structural checks that do not depend on any other artifact.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("artifact name cannot be empty".to_string());
        }
        if self.coordinates.group.is_empty() || self.coordinates.name.is_empty() {
            return Err(format!("artifact '{}' has incomplete coordinates", self.name));
        }
        if self.kind == ArtifactKind::Domain && self.domain.is_some() {
            return Err(format!("domain '{}' cannot declare a parent domain", self.name));
        }
        if self.kind == ArtifactKind::Plugin {
            return Err(format!("plugin '{}' is not independently deployable", self.name));
        }
        let mut seen = std::collections::BTreeSet::new();
        for plugin in self.plugins.iter().chain(self.bundled_plugins.iter()) {
            if !seen.insert(plugin.identity()) {
                return Err(format!(
                    "plugin '{}' declared more than once in '{}'",
                    plugin.identity(),
                    self.name
                ));
            }
        }
        let mut components = std::collections::BTreeSet::new();
        for component in &self.components {
            if component.is_empty() || !components.insert(component.as_str()) {
                return Err(format!("invalid or duplicate component '{}'", component));
            }
        }
        Ok(())
    }
}
