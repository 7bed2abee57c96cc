// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Artifact Deployer
//!
//! Drives artifacts through their lifecycle and keeps the [`ArtifactGraph`],
//! the watched roots, the quarantine table and the persisted deployment state
//! consistent with each other.
//!
//! # Locking
//!
//! The deployer itself is not synchronised. The deployment service wraps it
//! in the process-wide deployment lock, so every method here runs with
//! exclusive access to the watched roots and the graph. The graph is still
//! behind its own `RwLock` so status queries can read it without waiting for
//! the deployment lock; guards are never held across an `.await`.
//!
//! # Flows
//!
//! ```text
//! deploy:   parse → runtime check → patch check → domain check → resolve region
//!           → load properties/flags → create → init → start? → anchor
//! teardown: detach policies → stop? → dispose → remove anchor → mode cleanup
//! redeploy: detach dependents → teardown(Detach) → deploy → redeploy dependents
//! ```

use crate::application::executor::LifecycleExecutor;
use crate::application::graph::{ArtifactGraph, ArtifactNode, ArtifactSource};
use crate::application::installer::ArtifactInstaller;
use crate::application::isolation::IsolationResolver;
use crate::application::listeners::ListenerRegistry;
use crate::application::policy_pipeline::PolicyPipeline;
use crate::application::quarantine::QuarantineTracker;
use crate::application::state_store::DeploymentStateStore;
use crate::domain::artifact::{ArtifactDescriptor, ArtifactKey, ArtifactKind, ArtifactStatus};
use crate::domain::descriptor::DescriptorParser;
use crate::domain::error::{
    DependencyResolutionError, DeploymentError, DescriptorError, InstallError, LifecycleError,
};
use crate::domain::events::DeploymentListener;
use crate::domain::lifecycle::{ArtifactLifecycle, ArtifactRuntime, LifecycleContext, LifecyclePhase};
use crate::domain::properties::DeploymentProperties;
use crate::domain::region::IsolationRegion;
use parking_lot::RwLock;
use semver::Version;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

/// What a teardown leaves behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownMode {
    /// Release the running instance only; files and persisted state stay.
    Detach,
    /// Also remove the artifact's files from its watched root.
    KeepData,
    /// Remove files, persisted state and quarantine entries.
    Uninstall,
}

pub struct ArtifactDeployer {
    graph: Arc<RwLock<ArtifactGraph>>,
    applications: ArtifactInstaller,
    domains: ArtifactInstaller,
    quarantine: Arc<QuarantineTracker>,
    resolver: Arc<IsolationResolver>,
    state: DeploymentStateStore,
    parser: Arc<dyn DescriptorParser>,
    runtime: Arc<dyn ArtifactRuntime>,
    executor: LifecycleExecutor,
    policies: Arc<PolicyPipeline>,
    listeners: Arc<ListenerRegistry>,
    runtime_version: Version,
}

impl ArtifactDeployer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: Arc<RwLock<ArtifactGraph>>,
        applications: ArtifactInstaller,
        domains: ArtifactInstaller,
        quarantine: Arc<QuarantineTracker>,
        resolver: Arc<IsolationResolver>,
        state: DeploymentStateStore,
        parser: Arc<dyn DescriptorParser>,
        runtime: Arc<dyn ArtifactRuntime>,
        executor: LifecycleExecutor,
        policies: Arc<PolicyPipeline>,
        listeners: Arc<ListenerRegistry>,
        runtime_version: Version,
    ) -> Self {
        Self {
            graph,
            applications,
            domains,
            quarantine,
            resolver,
            state,
            parser,
            runtime,
            executor,
            policies,
            listeners,
            runtime_version,
        }
    }

    /// Watched root holding artifacts of `kind`.
    pub fn installer(&self, kind: ArtifactKind) -> &ArtifactInstaller {
        match kind {
            ArtifactKind::Domain => &self.domains,
            _ => &self.applications,
        }
    }

    pub fn graph(&self) -> &Arc<RwLock<ArtifactGraph>> {
        &self.graph
    }

    pub fn quarantine(&self) -> &Arc<QuarantineTracker> {
        &self.quarantine
    }

    pub fn parser(&self) -> &Arc<dyn DescriptorParser> {
        &self.parser
    }

    // ========================================================================
    // Deploy
    // ========================================================================

    /// Deploy the exploded directory `<root>/<name>`. If a packed archive of
    /// the same name sits next to it, the artifact is tracked as packaged.
    pub async fn deploy_exploded(
        &self,
        kind: ArtifactKind,
        name: &str,
        properties: Option<DeploymentProperties>,
    ) -> Result<ArtifactKey, DeploymentError> {
        let key = ArtifactKey::new(kind, name);
        self.clear_existing(&key).await;

        let installer = self.installer(kind);
        let exploded = installer.artifact_dir(name);
        let archive = installer.archive_path(name);
        let source = if archive.is_file() {
            let timestamp = QuarantineTracker::observed_timestamp(&archive);
            ArtifactSource::packaged(exploded, archive, timestamp)
        } else {
            ArtifactSource::exploded(exploded)
        };
        self.run_deployment(&key, source, false, properties).await?;
        Ok(key)
    }

    /// Explode `archive` into its root and deploy the result.
    pub async fn deploy_packaged(
        &self,
        kind: ArtifactKind,
        archive: &Path,
        properties: Option<DeploymentProperties>,
    ) -> Result<ArtifactKey, DeploymentError> {
        let installer = self.installer(kind);
        let name = installer
            .name_for_source(archive)
            .ok_or_else(|| InstallError::UnsupportedSource(archive.display().to_string()))?;
        let key = ArtifactKey::new(kind, &name);
        self.clear_existing(&key).await;

        let source = ArtifactSource::packaged(installer.artifact_dir(&name), archive, None);
        self.run_deployment(&key, source, true, properties).await?;
        Ok(key)
    }

    /// Track a packed archive dropped next to an exploded deployment, so the
    /// next redeploy explodes it over the current directory.
    pub fn adopt_archive(&self, key: &ArtifactKey, archive: &Path) {
        if let Some(node) = self.graph.write().get_mut(key) {
            if node.source.archive.as_deref() != Some(archive) {
                node.source.archive = Some(archive.to_path_buf());
                node.source.archive_timestamp = None;
            }
        }
    }

    /// Drop whatever the graph holds for `key` before a fresh attempt.
    async fn clear_existing(&self, key: &ArtifactKey) {
        let live = match self.graph.read().get(key) {
            None => return,
            Some(node) => node.lifecycle.is_some(),
        };
        if live {
            if let Err(e) = self.teardown(key, TeardownMode::Detach).await {
                warn!(artifact = %key, error = %e, "Failed to release previous instance");
            }
        } else {
            self.graph.write().remove(key);
        }
    }

    async fn run_deployment(
        &self,
        key: &ArtifactKey,
        mut source: ArtifactSource,
        explode: bool,
        properties: Option<DeploymentProperties>,
    ) -> Result<(), DeploymentError> {
        info!(artifact = %key, location = %source.identity().display(), "Deploying artifact");
        self.listeners.on_deployment_start(key);

        if explode {
            if let Some(archive) = source.archive.clone() {
                let timestamp = QuarantineTracker::observed_timestamp(&archive);
                match self.installer(key.kind).explode(&archive, &key.name) {
                    Ok(exploded) => source = ArtifactSource::packaged(exploded, archive, timestamp),
                    Err(e) => return Err(self.fail(key, source, e.into())),
                }
            }
        }

        match self.try_deploy(key, &source, properties).await {
            Ok(()) => {
                info!(artifact = %key, "Artifact deployed");
                metrics::counter!(
                    "depot_deployments_total",
                    "kind" => key.kind.as_str(),
                    "outcome" => "success"
                )
                .increment(1);
                self.listeners.on_deployment_success(key);
                Ok(())
            }
            Err(e) => Err(self.fail(key, source, e)),
        }
    }

    async fn try_deploy(
        &self,
        key: &ArtifactKey,
        source: &ArtifactSource,
        properties: Option<DeploymentProperties>,
    ) -> Result<(), DeploymentError> {
        let descriptor = Arc::new(self.parse(key, &source.exploded)?);

        if let Some(required) = &descriptor.min_runtime_version {
            if !required.matches(&self.runtime_version) {
                return Err(DependencyResolutionError::RuntimeVersion {
                    artifact: key.name.clone(),
                    required: required.to_string(),
                    running: self.runtime_version.to_string(),
                }
                .into());
            }
        }

        let patched = self.graph.read().find_patch_of(&descriptor);
        if let Some(previous) = patched {
            info!(artifact = %key, replaces = %previous, "Replacing patched artifact");
            if let Err(e) = self.teardown(&previous, TeardownMode::KeepData).await {
                warn!(artifact = %previous, error = %e, "Patched artifact was not fully removed");
            }
        }

        let (parent, domain_started) = self.parent_domain(&descriptor)?;
        let region = Arc::new(self.resolver.resolve(&descriptor, parent)?);
        let properties = self.state.resolve_deployment_properties(key, properties).await?;
        let flags = self.state.start_flags(key).await?;

        let context = LifecycleContext {
            descriptor: descriptor.clone(),
            location: source.exploded.clone(),
            region: region.clone(),
            deployment_properties: properties.clone(),
            start_flags: flags.clone(),
            host: None,
        };
        let lifecycle = self
            .runtime
            .create(context)
            .map_err(|e| DeploymentError::lifecycle(key, e))?;

        let mut node = ArtifactNode::new(key.clone(), source.clone());
        node.descriptor = Some(descriptor.clone());
        node.region = Some(region.clone());
        node.lifecycle = Some(lifecycle.clone());
        node.deployment_properties = properties.clone();
        node.resource_timestamps = self.tracked_resources(&descriptor, &source.exploded);
        self.graph.write().insert(node);

        if let Err(e) = self.executor.dispatch(key, LifecyclePhase::Init, lifecycle.clone()).await {
            self.dispose_quietly(key, lifecycle).await;
            return Err(DeploymentError::lifecycle(key, e));
        }

        let start = flags.artifact && domain_started;
        if start {
            if let Err(e) = self.executor.dispatch(key, LifecyclePhase::Start, lifecycle.clone()).await {
                self.dispose_quietly(key, lifecycle).await;
                return Err(DeploymentError::lifecycle(key, e));
            }
            self.set_status(key, ArtifactStatus::Started);
        } else {
            debug!(
                artifact = %key,
                start_on_deployment = flags.artifact,
                domain_started,
                "Artifact initialised but not started"
            );
        }

        match self.installer(key.kind).create_anchor(&key.name) {
            Ok(()) => {
                if let Some(node) = self.graph.write().get_mut(key) {
                    node.anchored = true;
                }
            }
            Err(e) => warn!(artifact = %key, error = %e, "Failed to write anchor"),
        }

        self.quarantine.mark_succeeded(key, source.identity());
        if key.kind == ArtifactKind::Domain {
            let released = self.quarantine.release_awaiting(&key.name);
            if released > 0 {
                debug!(domain = %key.name, released, "Released artifacts waiting for domain");
            }
        }
        self.state.record_deployed(key).await?;
        if key.kind == ArtifactKind::Application {
            self.policies
                .attach_application(&key.name, region, properties)
                .await;
        }
        Ok(())
    }

    fn parse(&self, key: &ArtifactKey, location: &Path) -> Result<ArtifactDescriptor, DescriptorError> {
        let mut descriptor = self.parser.parse(location)?;
        if descriptor.kind != key.kind {
            return Err(DescriptorError::KindMismatch {
                name: key.name.clone(),
                expected: key.kind.to_string(),
                found: descriptor.kind.to_string(),
            });
        }
        descriptor.name = key.name.clone();
        Ok(descriptor)
    }

    /// Region of the declared domain and whether it is running.
    fn parent_domain(
        &self,
        descriptor: &ArtifactDescriptor,
    ) -> Result<(Option<Arc<IsolationRegion>>, bool), DependencyResolutionError> {
        let Some(domain) = descriptor.domain.as_deref() else {
            return Ok((None, true));
        };
        let graph = self.graph.read();
        match graph.get(&ArtifactKey::domain(domain)) {
            None => Err(DependencyResolutionError::MissingDomain {
                artifact: descriptor.name.clone(),
                domain: domain.to_string(),
            }),
            Some(node) => match (&node.region, node.status) {
                (Some(region), status) if !status.is_failed() => {
                    Ok((Some(region.clone()), status == ArtifactStatus::Started))
                }
                _ => Err(DependencyResolutionError::DomainFailed {
                    artifact: descriptor.name.clone(),
                    domain: domain.to_string(),
                }),
            },
        }
    }

    /// Record a failed attempt: failed node, quarantine entry, no anchor.
    fn fail(&self, key: &ArtifactKey, source: ArtifactSource, error: DeploymentError) -> DeploymentError {
        let message = error.to_string();
        error!(artifact = %key, error = %message, "Deployment failed");

        let awaiting = match &error {
            DeploymentError::Resolution(e) => e.awaited_domain().map(str::to_string),
            _ => None,
        };
        self.quarantine
            .mark_failed(key, source.identity(), message.clone(), awaiting);
        self.graph
            .write()
            .insert(ArtifactNode::failed(key.clone(), source, message.clone()));
        if let Err(e) = self.installer(key.kind).remove_anchor(&key.name) {
            warn!(artifact = %key, error = %e, "Failed to remove anchor of failed artifact");
        }

        metrics::counter!(
            "depot_deployments_total",
            "kind" => key.kind.as_str(),
            "outcome" => "failure"
        )
        .increment(1);
        self.listeners.on_deployment_failure(key, &message);
        error
    }

    async fn dispose_quietly(&self, key: &ArtifactKey, lifecycle: Arc<dyn ArtifactLifecycle>) {
        if let Err(e) = self.executor.dispatch(key, LifecyclePhase::Dispose, lifecycle).await {
            warn!(artifact = %key, error = %e, "Dispose after failed deployment failed");
        }
    }

    /// Descriptor file plus declared configuration resources, with their
    /// current modification times.
    fn tracked_resources(&self, descriptor: &ArtifactDescriptor, location: &Path) -> BTreeMap<PathBuf, SystemTime> {
        std::iter::once(self.parser.descriptor_file(location))
            .chain(descriptor.config_resources.iter().map(|r| location.join(r)))
            .filter_map(|path| {
                let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok()?;
                Some((path, modified))
            })
            .collect()
    }

    /// Whether any tracked resource of a deployed node changed on disk.
    pub fn resources_changed(&self, key: &ArtifactKey) -> bool {
        let graph = self.graph.read();
        let Some(node) = graph.get(key) else {
            return false;
        };
        let Some(descriptor) = &node.descriptor else {
            return false;
        };
        if !descriptor.redeployment_enabled {
            return false;
        }
        self.tracked_resources(descriptor, &node.source.exploded) != node.resource_timestamps
    }

    fn set_status(&self, key: &ArtifactKey, status: ArtifactStatus) {
        if let Some(node) = self.graph.write().get_mut(key) {
            node.status = status;
        }
    }

    // ========================================================================
    // Undeploy
    // ========================================================================

    /// Release one node. Stop and dispose failures are logged; file and state
    /// removal always runs and its failures are reported as
    /// [`DeploymentError::Cleanup`].
    pub async fn teardown(&self, key: &ArtifactKey, mode: TeardownMode) -> Result<(), DeploymentError> {
        let node = self
            .graph
            .write()
            .remove(key)
            .ok_or_else(|| DeploymentError::NotFound(key.clone()))?;
        info!(artifact = %key, mode = ?mode, "Undeploying artifact");
        self.listeners.on_undeployment_start(key);

        if key.kind == ArtifactKind::Application {
            match mode {
                TeardownMode::Uninstall => self.policies.forget_application(&key.name).await,
                _ => self.policies.detach_application(&key.name).await,
            }
        }

        if let Some(lifecycle) = node.lifecycle {
            if node.status == ArtifactStatus::Started {
                if let Err(e) = self.executor.dispatch(key, LifecyclePhase::Stop, lifecycle.clone()).await {
                    warn!(artifact = %key, error = %e, "Stop failed during undeploy, continuing");
                }
            }
            if let Err(e) = self.executor.dispatch(key, LifecyclePhase::Dispose, lifecycle).await {
                warn!(artifact = %key, error = %e, "Dispose failed during undeploy, continuing");
            }
        }

        let installer = self.installer(key.kind);
        let mut errors = Vec::new();
        if let Err(e) = installer.remove_anchor(&key.name) {
            errors.push(e.to_string());
        }
        match mode {
            TeardownMode::Detach => {}
            TeardownMode::KeepData => {
                if let Err(e) = installer.uninstall(&key.name) {
                    errors.push(e.to_string());
                }
            }
            TeardownMode::Uninstall => {
                if let Err(e) = installer.uninstall(&key.name) {
                    errors.push(e.to_string());
                }
                if let Err(e) = self.state.forget(key).await {
                    errors.push(e.to_string());
                }
                self.quarantine.forget_artifact(key);
            }
        }

        metrics::counter!("depot_undeployments_total", "kind" => key.kind.as_str()).increment(1);
        if errors.is_empty() {
            info!(artifact = %key, "Artifact undeployed");
            self.listeners.on_undeployment_success(key);
            Ok(())
        } else {
            let error = DeploymentError::Cleanup {
                artifact: key.clone(),
                errors,
            };
            error!(artifact = %key, error = %error, "Undeploy cleanup incomplete");
            self.listeners.on_undeployment_failure(key, &error.to_string());
            Err(error)
        }
    }

    /// Fully undeploy an artifact. Undeploying a domain first undeploys every
    /// dependent, newest first, removing their files and persisted state
    /// before the domain itself goes.
    pub async fn undeploy(&self, key: &ArtifactKey) -> Result<(), DeploymentError> {
        if !self.graph.read().contains(key) {
            return Err(DeploymentError::NotFound(key.clone()));
        }
        if key.kind == ArtifactKind::Domain {
            let dependents = self.graph.read().dependents_of(key);
            for dependent in dependents {
                if let Err(e) = self.teardown(&dependent, TeardownMode::Uninstall).await {
                    warn!(artifact = %dependent, domain = %key.name, error = %e, "Dependent undeploy incomplete");
                }
            }
        }
        self.teardown(key, TeardownMode::Uninstall).await
    }

    /// Detach the dependents of a domain, returning them oldest first.
    async fn detach_dependents(&self, key: &ArtifactKey) -> Vec<(ArtifactKey, ArtifactSource)> {
        if key.kind != ArtifactKind::Domain {
            return Vec::new();
        }
        let dependents: Vec<(ArtifactKey, ArtifactSource)> = {
            let graph = self.graph.read();
            graph
                .dependents_of(key)
                .into_iter()
                .filter_map(|k| graph.get(&k).map(|n| (k, n.source.clone())))
                .collect()
        };
        for (dependent, _) in &dependents {
            if let Err(e) = self.teardown(dependent, TeardownMode::Detach).await {
                warn!(artifact = %dependent, domain = %key.name, error = %e, "Failed to detach dependent");
            }
        }
        dependents.into_iter().rev().collect()
    }

    // ========================================================================
    // Redeploy
    // ========================================================================

    /// Tear the artifact down and deploy it again from its current files.
    ///
    /// `None` properties reuse the persisted set, `Some` replaces it. A packed
    /// archive that changed since it was exploded is exploded again. For a
    /// domain, its dependents are redeployed after it succeeds and
    /// quarantined until the domain recovers if it fails.
    pub async fn redeploy(
        &self,
        key: &ArtifactKey,
        properties: Option<DeploymentProperties>,
    ) -> Result<(), DeploymentError> {
        let source = self
            .graph
            .read()
            .get(key)
            .map(|n| n.source.clone())
            .ok_or_else(|| DeploymentError::NotFound(key.clone()))?;
        info!(artifact = %key, "Redeploying artifact");
        self.listeners.on_redeployment_start(key);

        let dependents = self.detach_dependents(key).await;
        if let Err(e) = self.teardown(key, TeardownMode::Detach).await {
            warn!(artifact = %key, error = %e, "Previous instance was not fully released");
        }

        let explode = match (&source.archive, source.archive_timestamp) {
            (Some(archive), recorded) => {
                archive.is_file() && QuarantineTracker::observed_timestamp(archive) != recorded
            }
            (None, _) => false,
        };

        match self.run_deployment(key, source, explode, properties).await {
            Ok(()) => {
                for (dependent, source) in dependents {
                    self.listeners.on_redeployment_start(&dependent);
                    match self.run_deployment(&dependent, source, false, None).await {
                        Ok(()) => self.listeners.on_redeployment_success(&dependent),
                        Err(e) => self.listeners.on_redeployment_failure(&dependent, &e.to_string()),
                    }
                }
                self.listeners.on_redeployment_success(key);
                Ok(())
            }
            Err(e) => {
                for (dependent, source) in dependents {
                    self.quarantine.mark_failed(
                        &dependent,
                        source.identity(),
                        format!("domain '{}' failed to redeploy", key.name),
                        Some(key.name.clone()),
                    );
                }
                self.listeners.on_redeployment_failure(key, &e.to_string());
                Err(e)
            }
        }
    }

    // ========================================================================
    // Operator start/stop
    // ========================================================================

    /// Start a deployed artifact and persist the intent. Starting a domain
    /// also starts dependents whose persisted flag allows it.
    pub async fn start(&self, key: &ArtifactKey) -> Result<(), DeploymentError> {
        let (lifecycle, status, domain) = self.lifecycle_of(key)?;
        if let Some(domain) = domain {
            let domain_status = self.graph.read().get(&ArtifactKey::domain(&domain)).map(|n| n.status);
            if domain_status != Some(ArtifactStatus::Started) {
                return Err(DeploymentError::InvalidTransition {
                    artifact: key.clone(),
                    from: format!("{} (domain '{}' not started)", status, domain),
                    to: ArtifactStatus::Started.to_string(),
                });
            }
        }

        if status != ArtifactStatus::Started {
            if !status.can_transition_to(ArtifactStatus::Started) {
                return Err(DeploymentError::InvalidTransition {
                    artifact: key.clone(),
                    from: status.to_string(),
                    to: ArtifactStatus::Started.to_string(),
                });
            }
            self.executor
                .dispatch(key, LifecyclePhase::Start, lifecycle)
                .await
                .map_err(|e| DeploymentError::lifecycle(key, e))?;
            self.set_status(key, ArtifactStatus::Started);
            info!(artifact = %key, "Artifact started");
        }
        self.state.persist_artifact_start(key, true).await?;

        if key.kind == ArtifactKind::Domain {
            let dependents = self.graph.read().dependents_of(key);
            for dependent in dependents.into_iter().rev() {
                if let Err(e) = self.start_dependent(&dependent).await {
                    warn!(artifact = %dependent, error = %e, "Failed to start dependent");
                }
            }
        }
        Ok(())
    }

    async fn start_dependent(&self, key: &ArtifactKey) -> Result<(), DeploymentError> {
        let (lifecycle, status, _) = self.lifecycle_of(key)?;
        if status == ArtifactStatus::Started || !self.state.start_flags(key).await?.artifact {
            return Ok(());
        }
        self.executor
            .dispatch(key, LifecyclePhase::Start, lifecycle)
            .await
            .map_err(|e| DeploymentError::lifecycle(key, e))?;
        self.set_status(key, ArtifactStatus::Started);
        Ok(())
    }

    /// Stop a deployed artifact and persist `startArtifactOnDeployment=false`.
    /// Stopping a domain first stops its running dependents without touching
    /// their persisted flags.
    pub async fn stop(&self, key: &ArtifactKey) -> Result<(), DeploymentError> {
        let (lifecycle, status, _) = self.lifecycle_of(key)?;

        if key.kind == ArtifactKind::Domain {
            let running: Vec<(ArtifactKey, Arc<dyn ArtifactLifecycle>)> = {
                let graph = self.graph.read();
                graph
                    .dependents_of(key)
                    .into_iter()
                    .filter_map(|k| {
                        let node = graph.get(&k)?;
                        let lifecycle = node.lifecycle.clone()?;
                        (node.status == ArtifactStatus::Started).then_some((k, lifecycle))
                    })
                    .collect()
            };
            for (dependent, result) in self.executor.dispatch_all(LifecyclePhase::Stop, running).await {
                match result {
                    Ok(()) => self.set_status(&dependent, ArtifactStatus::Stopped),
                    Err(e) => warn!(artifact = %dependent, error = %e, "Failed to stop dependent"),
                }
            }
        }

        if status == ArtifactStatus::Started {
            self.executor
                .dispatch(key, LifecyclePhase::Stop, lifecycle)
                .await
                .map_err(|e| DeploymentError::lifecycle(key, e))?;
            self.set_status(key, ArtifactStatus::Stopped);
            info!(artifact = %key, "Artifact stopped");
        }
        self.state.persist_artifact_start(key, false).await?;
        Ok(())
    }

    pub async fn start_component(&self, key: &ArtifactKey, component: &str) -> Result<(), DeploymentError> {
        let (lifecycle, status) = self.component_lifecycle(key, component)?;
        if status == ArtifactStatus::Started {
            lifecycle
                .start_component(component)
                .await
                .map_err(|e| DeploymentError::lifecycle(key, e))?;
        }
        self.state.persist_component_start(key, component, true).await?;
        Ok(())
    }

    pub async fn stop_component(&self, key: &ArtifactKey, component: &str) -> Result<(), DeploymentError> {
        let (lifecycle, status) = self.component_lifecycle(key, component)?;
        if status == ArtifactStatus::Started {
            lifecycle
                .stop_component(component)
                .await
                .map_err(|e| DeploymentError::lifecycle(key, e))?;
        }
        self.state.persist_component_start(key, component, false).await?;
        Ok(())
    }

    fn component_lifecycle(
        &self,
        key: &ArtifactKey,
        component: &str,
    ) -> Result<(Arc<dyn ArtifactLifecycle>, ArtifactStatus), DeploymentError> {
        let declared = self
            .graph
            .read()
            .get(key)
            .and_then(|n| n.descriptor.as_ref().map(|d| d.components.iter().any(|c| c == component)))
            .unwrap_or(false);
        let (lifecycle, status, _) = self.lifecycle_of(key)?;
        if !declared {
            return Err(DeploymentError::lifecycle(
                key,
                LifecycleError::UnknownComponent(component.to_string()),
            ));
        }
        Ok((lifecycle, status))
    }

    /// Lifecycle handle, status and declared domain of a live node.
    fn lifecycle_of(
        &self,
        key: &ArtifactKey,
    ) -> Result<(Arc<dyn ArtifactLifecycle>, ArtifactStatus, Option<String>), DeploymentError> {
        let graph = self.graph.read();
        let node = graph.get(key).ok_or_else(|| DeploymentError::NotFound(key.clone()))?;
        match &node.lifecycle {
            Some(lifecycle) if !node.status.is_failed() => Ok((
                lifecycle.clone(),
                node.status,
                node.domain_name().map(str::to_string),
            )),
            _ => Err(DeploymentError::InvalidTransition {
                artifact: key.clone(),
                from: node.status.to_string(),
                to: ArtifactStatus::Started.to_string(),
            }),
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stop and dispose everything in reverse deployment order, applications
    /// before domains. Files and persisted state are left untouched.
    pub async fn shutdown(&self) {
        let order = self.graph.read().shutdown_order();
        info!(artifacts = order.len(), "Shutting down deployed artifacts");
        for key in order {
            let Some(node) = self.graph.write().remove(&key) else {
                continue;
            };
            if key.kind == ArtifactKind::Application {
                self.policies.detach_application(&key.name).await;
            }
            if let Some(lifecycle) = node.lifecycle {
                if node.status == ArtifactStatus::Started {
                    if let Err(e) = self.executor.dispatch(&key, LifecyclePhase::Stop, lifecycle.clone()).await {
                        warn!(artifact = %key, error = %e, "Stop failed during shutdown");
                    }
                }
                if let Err(e) = self.executor.dispatch(&key, LifecyclePhase::Dispose, lifecycle).await {
                    warn!(artifact = %key, error = %e, "Dispose failed during shutdown");
                }
            }
            if let Err(e) = self.installer(key.kind).remove_anchor(&key.name) {
                warn!(artifact = %key, error = %e, "Failed to remove anchor during shutdown");
            }
        }
        self.executor.drain().await;
    }
}
