// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Deployment error taxonomy.
//!
//! Per-artifact failures are modelled as one enum per category so callers can
//! tell an install problem from a resolution problem. [`DeploymentError`] is
//! what synchronous client operations return.

use crate::domain::artifact::{ArtifactKey, BundleIdentity};
use crate::domain::repository::RepositoryError;
use std::path::PathBuf;
use thiserror::Error;

/// Copy, extract or atomic-rename failure. The target root is left as it was.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Invalid artifact name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Source not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Unsupported source: {0}")]
    UnsupportedSource(String),

    #[error("Failed to copy {path}: {message}")]
    Copy { path: PathBuf, message: String },

    #[error("Failed to extract archive {path}: {message}")]
    Extract { path: PathBuf, message: String },

    #[error("Failed to move {from} into place at {to}: {message}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        message: String,
    },

    #[error("I/O error on {path}: {message}")]
    Io { path: PathBuf, message: String },
}

/// Malformed or inconsistent artifact manifest.
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("Descriptor not found at {0}")]
    NotFound(PathBuf),

    #[error("Failed to read descriptor {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Malformed descriptor {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("Invalid descriptor for '{name}': {message}")]
    Invalid { name: String, message: String },

    #[error("Artifact '{name}' is a {found}, expected a {expected}")]
    KindMismatch {
        name: String,
        expected: String,
        found: String,
    },
}

/// Missing domain or plugin, version mismatch or unresolvable plugin graph.
#[derive(Debug, Error)]
pub enum DependencyResolutionError {
    #[error("Artifact '{artifact}' depends on domain '{domain}' which is not deployed")]
    MissingDomain { artifact: String, domain: String },

    #[error("Artifact '{artifact}' depends on domain '{domain}' which failed to deploy")]
    DomainFailed { artifact: String, domain: String },

    #[error("Plugin '{plugin}' requires '{dependency}' which is not available to '{artifact}'")]
    MissingPlugin {
        artifact: String,
        plugin: BundleIdentity,
        dependency: BundleIdentity,
    },

    #[error("Plugins of '{artifact}' form a dependency cycle: {plugins:?}")]
    Unresolvable {
        artifact: String,
        plugins: Vec<BundleIdentity>,
    },

    #[error("Plugin '{plugin}' version {requested} is incompatible with version {provided} provided by domain '{domain}'")]
    IncompatiblePlugin {
        plugin: BundleIdentity,
        requested: String,
        provided: String,
        domain: String,
    },

    #[error("Artifact '{artifact}' requires runtime {required}, running {running}")]
    RuntimeVersion {
        artifact: String,
        required: String,
        running: String,
    },
}

impl DependencyResolutionError {
    /// Name of the domain this failure waits on, if any.
    pub fn awaited_domain(&self) -> Option<&str> {
        match self {
            DependencyResolutionError::MissingDomain { domain, .. }
            | DependencyResolutionError::DomainFailed { domain, .. } => Some(domain),
            _ => None,
        }
    }
}

/// Failure reported by the lifecycle collaborator.
#[derive(Debug, Clone, Error)]
pub enum LifecycleError {
    #[error("Initialisation failed: {0}")]
    Init(String),

    #[error("Start failed: {0}")]
    Start(String),

    #[error("Stop failed: {0}")]
    Stop(String),

    #[error("Dispose failed: {0}")]
    Dispose(String),

    #[error("Component '{component}' failed: {message}")]
    Component { component: String, message: String },

    #[error("Unknown component '{0}'")]
    UnknownComponent(String),

    #[error("Lifecycle task aborted: {0}")]
    Aborted(String),
}

/// `add_policy`/`remove_policy` failures. The hosting application is unaffected.
#[derive(Debug, Error)]
pub enum PolicyRegistrationError {
    #[error("Application '{0}' is not deployed")]
    ApplicationNotFound(String),

    #[error("Policy '{policy}' is already registered for application '{application}'")]
    Duplicate { application: String, policy: String },

    #[error("Unknown policy template '{0}'")]
    UnknownTemplate(String),

    #[error("Invalid policy template at {path}: {message}")]
    InvalidTemplate { path: PathBuf, message: String },

    #[error("Policy '{policy}' is not registered for application '{application}'")]
    UnknownPolicy { application: String, policy: String },

    #[error("Policy '{policy}' could not be resolved: {source}")]
    Resolution {
        policy: String,
        #[source]
        source: DependencyResolutionError,
    },

    #[error("Policy '{policy}' failed to start: {source}")]
    Lifecycle {
        policy: String,
        #[source]
        source: LifecycleError,
    },
}

/// Error surfaced to callers of client-initiated operations.
#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Resolution(#[from] DependencyResolutionError),

    #[error("Lifecycle of {artifact} failed: {source}")]
    Lifecycle {
        artifact: ArtifactKey,
        #[source]
        source: LifecycleError,
    },

    #[error("Artifact {0} not found")]
    NotFound(ArtifactKey),

    #[error("Cleanup of {artifact} incomplete: {}", errors.join("; "))]
    Cleanup {
        artifact: ArtifactKey,
        errors: Vec<String>,
    },

    #[error("Cannot move {artifact} from {from} to {to}")]
    InvalidTransition {
        artifact: ArtifactKey,
        from: String,
        to: String,
    },

    #[error("Deployment state error: {0}")]
    State(#[from] RepositoryError),

    #[error("Deployment service is shut down")]
    ShutDown,
}

impl DeploymentError {
    pub fn lifecycle(artifact: &ArtifactKey, source: LifecycleError) -> Self {
        DeploymentError::Lifecycle {
            artifact: artifact.clone(),
            source,
        }
    }
}
