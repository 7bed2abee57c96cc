// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Artifact Descriptor YAML Parser
//!
//! Parses the `artifact.yaml` found at the root of an exploded artifact into
//! an [`ArtifactDescriptor`].
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Parse external YAML → Domain objects
//! - **Anti-Corruption:** Translates YAML schema to domain model
//!
//! # Descriptor Format
//!
//! ```yaml
//! apiVersion: depot/v1
//! kind: Application
//! metadata:
//!   group: com.acme
//!   name: orders
//!   version: "1.0.0"
//! spec:
//!   domain: shared
//!   minRuntimeVersion: ">=0.1"
//!   configResources: [conf/app.yaml]
//!   components: [ingest]
//!   packages:
//!     local: [com.acme.orders.internal]
//!     exported: [com.acme.orders.api]
//!   plugins:
//!     - group: org.acme.connectors
//!       name: http
//!       version: "1.4.0"
//!       exportedPackages: [org.acme.http]
//!   sharedLibraries:
//!     - group: org.libs
//!       name: json
//!       version: "2.1.0"
//!       exportedPackages: [org.libs.json]
//! ```
//!
//! The artifact's name is its directory name; `metadata` carries the bundle
//! coordinates used for patch detection and plugin compatibility.

use crate::domain::artifact::{
    ArtifactDescriptor, ArtifactKind, BundleCoordinates, BundleIdentity, PluginDescriptor,
    SharedLibrary,
};
use crate::domain::descriptor::DescriptorParser;
use crate::domain::error::DescriptorError;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DESCRIPTOR_FILE: &str = "artifact.yaml";
pub const DESCRIPTOR_API_VERSION: &str = "depot/v1";

// ============================================================================
// YAML Schema
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactManifest {
    pub api_version: String,
    pub kind: ManifestKind,
    pub metadata: ArtifactMetadata,
    #[serde(default)]
    pub spec: ArtifactSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManifestKind {
    Domain,
    Application,
    Policy,
}

impl From<ManifestKind> for ArtifactKind {
    fn from(kind: ManifestKind) -> Self {
        match kind {
            ManifestKind::Domain => ArtifactKind::Domain,
            ManifestKind::Application => ArtifactKind::Application,
            ManifestKind::Policy => ArtifactKind::Policy,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub group: String,
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_runtime_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redeployment_enabled: Option<bool>,
    #[serde(default)]
    pub config_resources: Vec<PathBuf>,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub packages: PackagesSpec,
    #[serde(default)]
    pub resources: ResourcesSpec,
    #[serde(default)]
    pub plugins: Vec<PluginSpec>,
    #[serde(default)]
    pub bundled_plugins: Vec<PluginSpec>,
    #[serde(default)]
    pub shared_libraries: Vec<LibrarySpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackagesSpec {
    #[serde(default)]
    pub local: Vec<String>,
    #[serde(default)]
    pub exported: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcesSpec {
    #[serde(default)]
    pub exported: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSpec {
    pub group: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub exported_packages: Vec<String>,
    #[serde(default)]
    pub exported_resources: Vec<String>,
    #[serde(default)]
    pub local_packages: Vec<String>,
    #[serde(default)]
    pub re_exported_packages: Vec<String>,
    /// `group:name` of other plugins
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibrarySpec {
    pub group: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub exported_packages: Vec<String>,
    #[serde(default)]
    pub exported_resources: Vec<String>,
}

// ============================================================================
// Parser API
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct YamlDescriptorParser;

impl YamlDescriptorParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a descriptor from YAML text for the artifact named `name`.
    pub fn parse_yaml(&self, name: &str, yaml: &str, source: &Path) -> Result<ArtifactDescriptor, DescriptorError> {
        let malformed = |message: String| DescriptorError::Malformed {
            path: source.to_path_buf(),
            message,
        };

        let manifest: ArtifactManifest =
            serde_yaml::from_str(yaml).map_err(|e| malformed(e.to_string()))?;
        if manifest.api_version != DESCRIPTOR_API_VERSION {
            return Err(malformed(format!(
                "unsupported apiVersion '{}', expected '{}'",
                manifest.api_version, DESCRIPTOR_API_VERSION
            )));
        }

        let metadata = &manifest.metadata;
        let artifact_coordinates =
            coordinates(&metadata.group, &metadata.name, &metadata.version).map_err(malformed)?;
        let spec = manifest.spec;

        let mut descriptor = ArtifactDescriptor::new(manifest.kind.into(), name, artifact_coordinates);
        descriptor.domain = spec.domain;
        descriptor.min_runtime_version = spec
            .min_runtime_version
            .map(|req| {
                VersionReq::parse(&req).map_err(|e| malformed(format!("minRuntimeVersion '{}': {}", req, e)))
            })
            .transpose()?;
        descriptor.redeployment_enabled = spec.redeployment_enabled.unwrap_or(true);
        descriptor.config_resources = spec.config_resources;
        descriptor.components = spec.components;
        descriptor.local_packages = spec.packages.local;
        descriptor.exported_packages = spec.packages.exported;
        descriptor.exported_resources = spec.resources.exported;
        descriptor.plugins = spec.plugins.into_iter().map(plugin).collect::<Result<_, _>>().map_err(malformed)?;
        descriptor.bundled_plugins = spec
            .bundled_plugins
            .into_iter()
            .map(plugin)
            .collect::<Result<_, _>>()
            .map_err(malformed)?;
        descriptor.shared_libraries = spec
            .shared_libraries
            .into_iter()
            .map(|lib| {
                Ok(SharedLibrary {
                    coordinates: coordinates(&lib.group, &lib.name, &lib.version)?,
                    exported_packages: lib.exported_packages,
                    exported_resources: lib.exported_resources,
                })
            })
            .collect::<Result<_, String>>()
            .map_err(malformed)?;

        descriptor.validate().map_err(|message| DescriptorError::Invalid {
            name: name.to_string(),
            message,
        })?;
        Ok(descriptor)
    }
}

impl DescriptorParser for YamlDescriptorParser {
    fn parse(&self, artifact_root: &Path) -> Result<ArtifactDescriptor, DescriptorError> {
        let path = self.descriptor_file(artifact_root);
        let yaml = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DescriptorError::NotFound(path.clone())
            } else {
                DescriptorError::Read {
                    path: path.clone(),
                    message: e.to_string(),
                }
            }
        })?;
        let name = artifact_root
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DescriptorError::Invalid {
                name: artifact_root.display().to_string(),
                message: "artifact directory has no usable name".to_string(),
            })?;
        self.parse_yaml(name, &yaml, &path)
    }

    fn descriptor_file(&self, artifact_root: &Path) -> PathBuf {
        artifact_root.join(DESCRIPTOR_FILE)
    }
}

fn coordinates(group: &str, name: &str, version: &str) -> Result<BundleCoordinates, String> {
    let version = Version::parse(version).map_err(|e| format!("version '{}' of {}:{}: {}", version, group, name, e))?;
    Ok(BundleCoordinates::new(group, name, version))
}

fn plugin(spec: PluginSpec) -> Result<PluginDescriptor, String> {
    Ok(PluginDescriptor {
        coordinates: coordinates(&spec.group, &spec.name, &spec.version)?,
        exported_packages: spec.exported_packages,
        exported_resources: spec.exported_resources,
        local_packages: spec.local_packages,
        re_exported_packages: spec.re_exported_packages,
        dependencies: spec
            .dependencies
            .iter()
            .map(|d| d.parse::<BundleIdentity>())
            .collect::<Result<_, _>>()?,
    })
}

// ============================================================================
// Tests
// ============================================================================
