// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Artifact Graph
//!
//! In-memory view of every domain and application known to the deployer:
//! descriptor, lifecycle handle, status, region and the dependents
//! back-references used for cascades. Domains own no reference to the
//! applications that depend on them beyond their keys, so a dependent never
//! keeps its domain alive.
//!
//! The graph is shared behind a `parking_lot::RwLock`. Only the deployer
//! (holding the deployment lock) writes to it; status queries read snapshots.

use crate::domain::artifact::{ArtifactDescriptor, ArtifactKey, ArtifactKind, ArtifactStatus};
use crate::domain::lifecycle::ArtifactLifecycle;
use crate::domain::properties::DeploymentProperties;
use crate::domain::region::IsolationRegion;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Where an artifact's files live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactSource {
    pub exploded: PathBuf,
    pub archive: Option<PathBuf>,
    /// Archive modification time when it was last exploded.
    #[serde(skip)]
    pub archive_timestamp: Option<SystemTime>,
}

impl ArtifactSource {
    pub fn exploded(path: impl Into<PathBuf>) -> Self {
        Self {
            exploded: path.into(),
            archive: None,
            archive_timestamp: None,
        }
    }

    pub fn packaged(exploded: impl Into<PathBuf>, archive: impl Into<PathBuf>, timestamp: Option<SystemTime>) -> Self {
        Self {
            exploded: exploded.into(),
            archive: Some(archive.into()),
            archive_timestamp: timestamp,
        }
    }

    /// Path used as the quarantine identity.
    pub fn identity(&self) -> &Path {
        self.archive.as_deref().unwrap_or(&self.exploded)
    }

    /// True while either backing entry is still on disk.
    pub fn exists(&self) -> bool {
        self.exploded.exists() || self.archive.as_ref().map(|a| a.exists()).unwrap_or(false)
    }
}

pub struct ArtifactNode {
    pub key: ArtifactKey,
    pub descriptor: Option<Arc<ArtifactDescriptor>>,
    pub source: ArtifactSource,
    pub status: ArtifactStatus,
    pub region: Option<Arc<IsolationRegion>>,
    pub lifecycle: Option<Arc<dyn ArtifactLifecycle>>,
    pub deployment_properties: DeploymentProperties,
    /// Applications depending on this domain.
    pub dependents: BTreeSet<ArtifactKey>,
    /// Tracked configuration resources and their last seen modification time.
    pub resource_timestamps: BTreeMap<PathBuf, SystemTime>,
    pub anchored: bool,
    pub failure: Option<String>,
    pub deployed_at: DateTime<Utc>,
    /// Monotonic insertion order, used for reverse-order shutdown.
    pub sequence: u64,
}

impl ArtifactNode {
    pub fn new(key: ArtifactKey, source: ArtifactSource) -> Self {
        Self {
            key,
            descriptor: None,
            source,
            status: ArtifactStatus::Created,
            region: None,
            lifecycle: None,
            deployment_properties: DeploymentProperties::new(),
            dependents: BTreeSet::new(),
            resource_timestamps: BTreeMap::new(),
            anchored: false,
            failure: None,
            deployed_at: Utc::now(),
            sequence: 0,
        }
    }

    /// Failed node that only records where the attempt came from.
    pub fn failed(key: ArtifactKey, source: ArtifactSource, error: impl Into<String>) -> Self {
        let mut node = Self::new(key, source);
        node.status = ArtifactStatus::DeploymentFailed;
        node.failure = Some(error.into());
        node
    }

    pub fn domain_name(&self) -> Option<&str> {
        self.descriptor.as_ref().and_then(|d| d.domain.as_deref())
    }

    pub fn info(&self) -> ArtifactInfo {
        ArtifactInfo {
            key: self.key.clone(),
            status: self.status,
            version: self.descriptor.as_ref().map(|d| d.coordinates.version.to_string()),
            domain: self.domain_name().map(str::to_string),
            location: self.source.exploded.clone(),
            archive: self.source.archive.clone(),
            region: self.region.as_ref().map(|r| r.instance().to_string()),
            deployment_properties: self.deployment_properties.clone(),
            dependents: self.dependents.iter().map(|k| k.name.clone()).collect(),
            anchored: self.anchored,
            failure: self.failure.clone(),
            deployed_at: self.deployed_at,
        }
    }
}

/// Read-only snapshot of a node, safe to hand out to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactInfo {
    pub key: ArtifactKey,
    pub status: ArtifactStatus,
    pub version: Option<String>,
    pub domain: Option<String>,
    pub location: PathBuf,
    pub archive: Option<PathBuf>,
    pub region: Option<String>,
    pub deployment_properties: DeploymentProperties,
    pub dependents: Vec<String>,
    pub anchored: bool,
    pub failure: Option<String>,
    pub deployed_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct ArtifactGraph {
    nodes: BTreeMap<ArtifactKey, ArtifactNode>,
    next_sequence: u64,
}

impl ArtifactGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ArtifactKey) -> Option<&ArtifactNode> {
        self.nodes.get(key)
    }

    pub fn get_mut(&mut self, key: &ArtifactKey) -> Option<&mut ArtifactNode> {
        self.nodes.get_mut(key)
    }

    pub fn contains(&self, key: &ArtifactKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// Insert or replace a node, linking it to its domain.
    pub fn insert(&mut self, mut node: ArtifactNode) {
        self.next_sequence += 1;
        node.sequence = self.next_sequence;
        if let Some(previous) = self.nodes.remove(&node.key) {
            self.unlink(&previous);
            node.dependents.extend(previous.dependents);
        }
        if let Some(domain) = node.domain_name() {
            if let Some(parent) = self.nodes.get_mut(&ArtifactKey::domain(domain)) {
                parent.dependents.insert(node.key.clone());
            }
        }
        if node.key.kind == ArtifactKind::Domain {
            let dependents: BTreeSet<ArtifactKey> = self
                .nodes
                .values()
                .filter(|n| n.domain_name() == Some(node.key.name.as_str()))
                .map(|n| n.key.clone())
                .collect();
            node.dependents.extend(dependents);
        }
        self.nodes.insert(node.key.clone(), node);
    }

    pub fn remove(&mut self, key: &ArtifactKey) -> Option<ArtifactNode> {
        let node = self.nodes.remove(key)?;
        self.unlink(&node);
        Some(node)
    }

    fn unlink(&mut self, node: &ArtifactNode) {
        if let Some(domain) = node.domain_name() {
            if let Some(parent) = self.nodes.get_mut(&ArtifactKey::domain(domain)) {
                parent.dependents.remove(&node.key);
            }
        }
    }

    pub fn keys_of(&self, kind: ArtifactKind) -> Vec<ArtifactKey> {
        self.nodes.keys().filter(|k| k.kind == kind).cloned().collect()
    }

    pub fn nodes_of(&self, kind: ArtifactKind) -> impl Iterator<Item = &ArtifactNode> {
        self.nodes.values().filter(move |n| n.key.kind == kind)
    }

    pub fn list(&self, kind: ArtifactKind) -> Vec<ArtifactInfo> {
        self.nodes_of(kind).map(ArtifactNode::info).collect()
    }

    /// Dependents of a domain that are present in the graph, most recently
    /// deployed first.
    pub fn dependents_of(&self, domain: &ArtifactKey) -> Vec<ArtifactKey> {
        let Some(node) = self.nodes.get(domain) else {
            return Vec::new();
        };
        let mut dependents: Vec<&ArtifactNode> = node
            .dependents
            .iter()
            .filter_map(|k| self.nodes.get(k))
            .collect();
        dependents.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        dependents.into_iter().map(|n| n.key.clone()).collect()
    }

    /// Applications in reverse deployment order, then domains in reverse order.
    pub fn shutdown_order(&self) -> Vec<ArtifactKey> {
        let mut order = Vec::with_capacity(self.nodes.len());
        for kind in [ArtifactKind::Application, ArtifactKind::Domain] {
            let mut nodes: Vec<&ArtifactNode> = self.nodes_of(kind).collect();
            nodes.sort_by(|a, b| b.sequence.cmp(&a.sequence));
            order.extend(nodes.into_iter().map(|n| n.key.clone()));
        }
        order
    }

    /// A deployed artifact of the same kind that `descriptor` is a patch of.
    pub fn find_patch_of(&self, descriptor: &ArtifactDescriptor) -> Option<ArtifactKey> {
        self.nodes_of(descriptor.kind)
            .filter(|n| n.key.name != descriptor.name)
            .find(|n| {
                n.descriptor
                    .as_ref()
                    .map(|d| d.coordinates.same_base_version(&descriptor.coordinates))
                    .unwrap_or(false)
            })
            .map(|n| n.key.clone())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::artifact::BundleCoordinates;
    use semver::Version;

    fn node(kind: ArtifactKind, name: &str, domain: Option<&str>, version: &str) -> ArtifactNode {
        let coords = BundleCoordinates::new("org.test", name.trim_end_matches("-v2"), Version::parse(version).unwrap());
        let mut descriptor = ArtifactDescriptor::new(kind, name, coords);
        descriptor.domain = domain.map(str::to_string);
        let mut node = ArtifactNode::new(ArtifactKey::new(kind, name), ArtifactSource::exploded(name));
        node.descriptor = Some(Arc::new(descriptor));
        node
    }

    #[test]
    fn test_dependents_are_linked_in_both_orders() {
        let mut graph = ArtifactGraph::new();
        // application first, domain later
        graph.insert(node(ArtifactKind::Application, "early", Some("shared"), "1.0.0"));
        graph.insert(node(ArtifactKind::Domain, "shared", None, "1.0.0"));
        graph.insert(node(ArtifactKind::Application, "late", Some("shared"), "1.0.0"));

        let dependents = graph.dependents_of(&ArtifactKey::domain("shared"));
        assert_eq!(
            dependents,
            vec![ArtifactKey::application("late"), ArtifactKey::application("early")]
        );

        graph.remove(&ArtifactKey::application("late"));
        assert_eq!(
            graph.dependents_of(&ArtifactKey::domain("shared")),
            vec![ArtifactKey::application("early")]
        );
    }

    #[test]
    fn test_removing_domain_keeps_dependents() {
        let mut graph = ArtifactGraph::new();
        graph.insert(node(ArtifactKind::Domain, "shared", None, "1.0.0"));
        graph.insert(node(ArtifactKind::Application, "app", Some("shared"), "1.0.0"));

        assert!(graph.remove(&ArtifactKey::domain("shared")).is_some());
        assert!(graph.contains(&ArtifactKey::application("app")));
        assert!(graph.dependents_of(&ArtifactKey::domain("shared")).is_empty());
    }

    #[test]
    fn test_replacing_node_keeps_links() {
        let mut graph = ArtifactGraph::new();
        graph.insert(node(ArtifactKind::Domain, "shared", None, "1.0.0"));
        graph.insert(node(ArtifactKind::Application, "app", Some("shared"), "1.0.0"));

        graph.insert(node(ArtifactKind::Domain, "shared", None, "1.1.0"));
        assert_eq!(
            graph.dependents_of(&ArtifactKey::domain("shared")),
            vec![ArtifactKey::application("app")]
        );

        graph.insert(node(ArtifactKind::Application, "app", Some("shared"), "1.1.0"));
        assert_eq!(
            graph.dependents_of(&ArtifactKey::domain("shared")),
            vec![ArtifactKey::application("app")]
        );
    }

    #[test]
    fn test_shutdown_order() {
        let mut graph = ArtifactGraph::new();
        graph.insert(node(ArtifactKind::Domain, "d1", None, "1.0.0"));
        graph.insert(node(ArtifactKind::Application, "a1", Some("d1"), "1.0.0"));
        graph.insert(node(ArtifactKind::Domain, "d2", None, "1.0.0"));
        graph.insert(node(ArtifactKind::Application, "a2", None, "1.0.0"));

        assert_eq!(
            graph.shutdown_order(),
            vec![
                ArtifactKey::application("a2"),
                ArtifactKey::application("a1"),
                ArtifactKey::domain("d2"),
                ArtifactKey::domain("d1"),
            ]
        );
    }

    #[test]
    fn test_find_patch_of() {
        let mut graph = ArtifactGraph::new();
        graph.insert(node(ArtifactKind::Application, "orders", None, "1.2.0"));

        let patch = node(ArtifactKind::Application, "orders-v2", None, "1.2.5");
        assert_eq!(
            graph.find_patch_of(patch.descriptor.as_ref().unwrap()),
            Some(ArtifactKey::application("orders"))
        );

        let minor = node(ArtifactKind::Application, "orders-v2", None, "1.3.0");
        assert_eq!(graph.find_patch_of(minor.descriptor.as_ref().unwrap()), None);
    }
}
