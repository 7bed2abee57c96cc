// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Isolation Resolver
//!
//! Computes the [`IsolationRegion`] of an artifact from its descriptor and
//! the region of its parent domain.
//!
//! # Precedence
//!
//! Highest first: own packages, own exported packages, each direct plugin in
//! declaration order (only what it exports), shared libraries declared on the
//! artifact, the parent domain's region, the platform.
//!
//! # Tie-breaks
//!
//! - Within a tier the earlier declaration wins.
//! - A shared library beats a plugin exporting the same name, even a plugin
//!   declared first, unless either identity is on the override denylist.
//!
//! # Plugin graph
//!
//! Plugins may depend on other plugins. They are resolved iteratively; a
//! plugin resolves once all of its dependencies did. A plugin sees the exports
//! of its direct dependencies and may re-export them one level up. A plugin
//! already provided by the parent domain is taken from the domain when the
//! versions are compatible.

use crate::domain::artifact::{ArtifactDescriptor, BundleIdentity, PluginDescriptor};
use crate::domain::error::DependencyResolutionError;
use crate::domain::region::{
    IsolationRegion, LookupStrategy, ScopeOwner, ScopeTier, VisibilityScope,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

pub struct IsolationResolver {
    platform_packages: Arc<BTreeSet<String>>,
    override_denylist: BTreeSet<BundleIdentity>,
}

impl IsolationResolver {
    pub fn new(
        platform_packages: impl IntoIterator<Item = String>,
        override_denylist: impl IntoIterator<Item = BundleIdentity>,
    ) -> Self {
        Self {
            platform_packages: Arc::new(platform_packages.into_iter().collect()),
            override_denylist: override_denylist.into_iter().collect(),
        }
    }

    pub fn is_denylisted(&self, identity: &BundleIdentity) -> bool {
        self.override_denylist.contains(identity)
    }

    /// Build a fresh region for `descriptor`. `parent` is the region of the
    /// domain the artifact belongs to, if any.
    pub fn resolve(
        &self,
        descriptor: &ArtifactDescriptor,
        parent: Option<Arc<IsolationRegion>>,
    ) -> Result<IsolationRegion, DependencyResolutionError> {
        let provided: BTreeMap<BundleIdentity, PluginDescriptor> = parent
            .as_ref()
            .map(|p| {
                p.provided_plugins()
                    .iter()
                    .map(|plugin| (plugin.identity(), plugin.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let domain_name = parent
            .as_ref()
            .map(|p| p.artifact().name.clone())
            .unwrap_or_default();

        let direct = self.drop_provided(&descriptor.plugins, &provided, &domain_name)?;
        let bundled = self.drop_provided(&descriptor.bundled_plugins, &provided, &domain_name)?;

        let ordered = resolve_plugin_order(&descriptor.name, &direct, &bundled, &provided)?;
        let effective = effective_exports(&ordered, &provided);

        let key = descriptor.key();
        let mut scopes = vec![
            VisibilityScope {
                owner: ScopeOwner::Artifact(key.clone()),
                tier: ScopeTier::Own,
                strategy: LookupStrategy::SelfFirst,
                packages: descriptor.local_packages.iter().cloned().collect(),
                resources: BTreeSet::new(),
            },
            VisibilityScope {
                owner: ScopeOwner::Artifact(key.clone()),
                tier: ScopeTier::OwnExported,
                strategy: LookupStrategy::SelfFirst,
                packages: descriptor.exported_packages.iter().cloned().collect(),
                resources: descriptor.exported_resources.iter().cloned().collect(),
            },
        ];

        let plugin_start = scopes.len();
        for plugin in &direct {
            let exports = &effective[&plugin.identity()];
            scopes.push(VisibilityScope {
                owner: ScopeOwner::Plugin(plugin.identity()),
                tier: ScopeTier::Plugin,
                strategy: LookupStrategy::SelfFirst,
                packages: exports.packages.clone(),
                resources: exports.resources.clone(),
            });
        }
        let library_start = scopes.len();
        for library in &descriptor.shared_libraries {
            scopes.push(VisibilityScope {
                owner: ScopeOwner::SharedLibrary(library.coordinates.identity()),
                tier: ScopeTier::SharedLibrary,
                strategy: LookupStrategy::SelfFirst,
                packages: library.exported_packages.iter().cloned().collect(),
                resources: library.exported_resources.iter().cloned().collect(),
            });
        }

        let package_owners = self.owner_map(&scopes, plugin_start, library_start, |s| &s.packages);
        let resource_owners = self.owner_map(&scopes, plugin_start, library_start, |s| &s.resources);

        let provided_plugins = ordered
            .iter()
            .map(|plugin| {
                let mut plugin = (*plugin).clone();
                let exports = &effective[&plugin.identity()];
                plugin.exported_packages = exports.packages.iter().cloned().collect();
                plugin.exported_resources = exports.resources.iter().cloned().collect();
                plugin
            })
            .chain(provided.values().cloned())
            .collect();

        debug!(
            artifact = %key,
            scopes = scopes.len(),
            packages = package_owners.len(),
            "Resolved isolation region"
        );

        Ok(IsolationRegion::new(
            key,
            scopes,
            package_owners,
            resource_owners,
            parent,
            self.platform_packages.clone(),
            provided_plugins,
        ))
    }

    /// Remove plugins the parent domain already provides, checking versions.
    fn drop_provided<'a>(
        &self,
        plugins: &'a [PluginDescriptor],
        provided: &BTreeMap<BundleIdentity, PluginDescriptor>,
        domain: &str,
    ) -> Result<Vec<&'a PluginDescriptor>, DependencyResolutionError> {
        let mut kept = Vec::new();
        for plugin in plugins {
            match provided.get(&plugin.identity()) {
                Some(existing) if existing.coordinates.is_compatible_with(&plugin.coordinates) => {
                    debug!(plugin = %plugin.identity(), domain = %domain, "Using plugin provided by domain");
                }
                Some(existing) => {
                    return Err(DependencyResolutionError::IncompatiblePlugin {
                        plugin: plugin.identity(),
                        requested: plugin.coordinates.version.to_string(),
                        provided: existing.coordinates.version.to_string(),
                        domain: domain.to_string(),
                    });
                }
                None => kept.push(plugin),
            }
        }
        Ok(kept)
    }

    /// Map each name to the scope that owns it.
    fn owner_map(
        &self,
        scopes: &[VisibilityScope],
        plugin_start: usize,
        library_start: usize,
        names: impl Fn(&VisibilityScope) -> &BTreeSet<String>,
    ) -> BTreeMap<String, usize> {
        let mut owners = BTreeMap::new();
        for (idx, scope) in scopes[..plugin_start].iter().enumerate() {
            for name in names(scope) {
                owners.entry(name.clone()).or_insert(idx);
            }
        }

        let first_declaring = |range: std::ops::Range<usize>, name: &str| {
            range.into_iter().find(|&idx| names(&scopes[idx]).contains(name))
        };
        let candidates: BTreeSet<&String> = scopes[plugin_start..].iter().flat_map(|s| names(s)).collect();

        for name in candidates {
            if owners.contains_key(name.as_str()) {
                continue;
            }
            let plugin = first_declaring(plugin_start..library_start, name);
            let library = first_declaring(library_start..scopes.len(), name);
            let owner = match (plugin, library) {
                (Some(plugin), Some(library)) => {
                    if self.blocks_override(&scopes[plugin].owner) || self.blocks_override(&scopes[library].owner) {
                        plugin
                    } else {
                        library
                    }
                }
                (Some(only), None) | (None, Some(only)) => only,
                (None, None) => continue,
            };
            owners.insert(name.clone(), owner);
        }
        owners
    }

    fn blocks_override(&self, owner: &ScopeOwner) -> bool {
        match owner {
            ScopeOwner::Plugin(id) | ScopeOwner::SharedLibrary(id) => self.is_denylisted(id),
            _ => false,
        }
    }
}

/// Resolve local plugins in dependency order.
fn resolve_plugin_order<'a>(
    artifact: &str,
    direct: &[&'a PluginDescriptor],
    bundled: &[&'a PluginDescriptor],
    provided: &BTreeMap<BundleIdentity, PluginDescriptor>,
) -> Result<Vec<&'a PluginDescriptor>, DependencyResolutionError> {
    let local: BTreeSet<BundleIdentity> = direct
        .iter()
        .chain(bundled.iter())
        .map(|p| p.identity())
        .collect();

    for plugin in direct.iter().chain(bundled.iter()) {
        if let Some(missing) = plugin
            .dependencies
            .iter()
            .find(|dep| !local.contains(*dep) && !provided.contains_key(*dep))
        {
            return Err(DependencyResolutionError::MissingPlugin {
                artifact: artifact.to_string(),
                plugin: plugin.identity(),
                dependency: missing.clone(),
            });
        }
    }

    let mut pending: Vec<&'a PluginDescriptor> = direct.iter().chain(bundled.iter()).copied().collect();
    let mut resolved: Vec<&'a PluginDescriptor> = Vec::with_capacity(pending.len());
    let mut done: BTreeSet<BundleIdentity> = provided.keys().cloned().collect();

    while !pending.is_empty() {
        let (ready, blocked): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|p| p.dependencies.iter().all(|dep| done.contains(dep)));
        if ready.is_empty() {
            return Err(DependencyResolutionError::Unresolvable {
                artifact: artifact.to_string(),
                plugins: blocked.iter().map(|p| p.identity()).collect(),
            });
        }
        for plugin in ready {
            done.insert(plugin.identity());
            resolved.push(plugin);
        }
        pending = blocked;
    }
    Ok(resolved)
}

#[derive(Debug, Default, Clone)]
struct Exports {
    packages: BTreeSet<String>,
    resources: BTreeSet<String>,
}

/// What each plugin actually exposes to whoever declares it.
///
/// A package exported by a direct dependency belongs to the dependency; the
/// plugin only exposes it when it lists it as re-exported.
fn effective_exports(
    ordered: &[&PluginDescriptor],
    provided: &BTreeMap<BundleIdentity, PluginDescriptor>,
) -> BTreeMap<BundleIdentity, Exports> {
    let mut effective: BTreeMap<BundleIdentity, Exports> = provided
        .iter()
        .map(|(id, plugin)| {
            (
                id.clone(),
                Exports {
                    packages: plugin.exported_packages.iter().cloned().collect(),
                    resources: plugin.exported_resources.iter().cloned().collect(),
                },
            )
        })
        .collect();

    for plugin in ordered {
        let visible_from_deps: BTreeSet<&String> = plugin
            .dependencies
            .iter()
            .filter_map(|dep| effective.get(dep))
            .flat_map(|exports| exports.packages.iter())
            .collect();

        let mut exports = Exports {
            packages: plugin
                .exported_packages
                .iter()
                .filter(|p| !visible_from_deps.contains(p))
                .cloned()
                .collect(),
            resources: plugin.exported_resources.iter().cloned().collect(),
        };
        exports.packages.extend(
            plugin
                .re_exported_packages
                .iter()
                .filter(|p| visible_from_deps.contains(p))
                .cloned(),
        );
        effective.insert(plugin.identity(), exports);
    }
    effective
}
