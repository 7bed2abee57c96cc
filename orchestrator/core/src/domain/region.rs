// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Isolation Region Domain Model
//!
//! An isolation region is the name-visibility chain of one deployed artifact
//! instance. It is an ordered list of [`VisibilityScope`]s plus explicit
//! name→owner maps that encode the conflict tie-breaks computed by the
//! [`IsolationResolver`](crate::application::isolation::IsolationResolver).
//!
//! Lookup of a name proceeds as:
//!
//! 1. Platform packages: always parent-first, never overridable.
//! 2. The region's own owner map (own classes, own exports, plugins, shared libraries).
//!    A parent-first scope answers only names the parent chain cannot resolve.
//! 3. The parent domain's region in its entirety.
//!
//! Regions are built once and never mutated. A redeploy builds a new region
//! with a fresh `instance` id, so resolutions captured from a previous
//! instance can be told apart from the current one.

use crate::domain::artifact::{ArtifactKey, BundleIdentity, PluginDescriptor};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Direction in which a scope delegates lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStrategy {
    SelfFirst,
    ParentFirst,
}

/// Who contributes the names of a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ScopeOwner {
    Artifact(ArtifactKey),
    Plugin(BundleIdentity),
    SharedLibrary(BundleIdentity),
    Platform,
}

impl fmt::Display for ScopeOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeOwner::Artifact(key) => write!(f, "artifact {}", key),
            ScopeOwner::Plugin(id) => write!(f, "plugin {}", id),
            ScopeOwner::SharedLibrary(id) => write!(f, "library {}", id),
            ScopeOwner::Platform => f.write_str("platform"),
        }
    }
}

/// Precedence tier, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeTier {
    Own,
    OwnExported,
    Plugin,
    SharedLibrary,
    ParentDomain,
    Platform,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisibilityScope {
    pub owner: ScopeOwner,
    pub tier: ScopeTier,
    pub strategy: LookupStrategy,
    pub packages: BTreeSet<String>,
    pub resources: BTreeSet<String>,
}

/// Outcome of resolving one name through a region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub owner: ScopeOwner,
    pub tier: ScopeTier,
    pub strategy: LookupStrategy,
    /// Instance id of the region whose map produced the answer.
    pub region: Uuid,
}

#[derive(Debug)]
pub struct IsolationRegion {
    instance: Uuid,
    artifact: ArtifactKey,
    scopes: Vec<VisibilityScope>,
    package_owners: BTreeMap<String, usize>,
    resource_owners: BTreeMap<String, usize>,
    parent: Option<Arc<IsolationRegion>>,
    platform_packages: Arc<BTreeSet<String>>,
    provided_plugins: Vec<PluginDescriptor>,
}

impl IsolationRegion {
    /// Assemble a region. `package_owners`/`resource_owners` map a name to an
    /// index into `scopes`.
    pub fn new(
        artifact: ArtifactKey,
        scopes: Vec<VisibilityScope>,
        package_owners: BTreeMap<String, usize>,
        resource_owners: BTreeMap<String, usize>,
        parent: Option<Arc<IsolationRegion>>,
        platform_packages: Arc<BTreeSet<String>>,
        provided_plugins: Vec<PluginDescriptor>,
    ) -> Self {
        Self {
            instance: Uuid::new_v4(),
            artifact,
            scopes,
            package_owners,
            resource_owners,
            parent,
            platform_packages,
            provided_plugins,
        }
    }

    pub fn instance(&self) -> Uuid {
        self.instance
    }

    pub fn artifact(&self) -> &ArtifactKey {
        &self.artifact
    }

    pub fn scopes(&self) -> &[VisibilityScope] {
        &self.scopes
    }

    pub fn parent(&self) -> Option<&Arc<IsolationRegion>> {
        self.parent.as_ref()
    }

    /// Plugins resolved in this region, available to child regions.
    pub fn provided_plugins(&self) -> &[PluginDescriptor] {
        &self.provided_plugins
    }

    /// Resolve a fully-qualified class name via its package.
    pub fn resolve_class(&self, class_name: &str) -> Option<Resolution> {
        let package = class_name.rsplit_once('.').map(|(p, _)| p).unwrap_or("");
        self.resolve_package(package)
    }

    pub fn resolve_package(&self, package: &str) -> Option<Resolution> {
        if self.is_platform_package(package) {
            return Some(Resolution {
                owner: ScopeOwner::Platform,
                tier: ScopeTier::Platform,
                strategy: LookupStrategy::ParentFirst,
                region: self.instance,
            });
        }
        self.resolve_in(&self.package_owners, package, |parent| parent.resolve_package(package))
    }

    pub fn resolve_resource(&self, resource: &str) -> Option<Resolution> {
        self.resolve_in(&self.resource_owners, resource, |parent| parent.resolve_resource(resource))
    }

    /// A parent-first scope only answers what the parent chain cannot.
    fn resolve_in(
        &self,
        owners: &BTreeMap<String, usize>,
        name: &str,
        in_parent: impl Fn(&IsolationRegion) -> Option<Resolution>,
    ) -> Option<Resolution> {
        match self.lookup(owners, name) {
            Some(local) if local.strategy == LookupStrategy::ParentFirst => {
                Some(self.delegate(&in_parent).unwrap_or(local))
            }
            Some(local) => Some(local),
            None => self.delegate(&in_parent),
        }
    }

    fn lookup(&self, owners: &BTreeMap<String, usize>, name: &str) -> Option<Resolution> {
        let scope = self.scopes.get(*owners.get(name)?)?;
        Some(Resolution {
            owner: scope.owner.clone(),
            tier: scope.tier,
            strategy: scope.strategy,
            region: self.instance,
        })
    }

    fn delegate(&self, f: impl Fn(&IsolationRegion) -> Option<Resolution>) -> Option<Resolution> {
        let parent = self.parent.as_ref()?;
        f(parent).map(|mut resolution| {
            if resolution.tier != ScopeTier::Platform {
                resolution.tier = ScopeTier::ParentDomain;
            }
            resolution
        })
    }

    fn is_platform_package(&self, package: &str) -> bool {
        self.platform_packages.iter().any(|prefix| {
            package == prefix
                || (package.starts_with(prefix.as_str())
                    && package.as_bytes().get(prefix.len()) == Some(&b'.'))
        })
    }
}
