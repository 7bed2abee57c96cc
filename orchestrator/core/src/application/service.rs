// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Deployment Service
//!
//! Operator- and test-facing facade over the deployment engine. It owns the
//! process-wide deployment lock (a `tokio::sync::Mutex` around the
//! [`ArtifactDeployer`]) that serialises every structural change, whether it
//! comes from the directory watcher or from a client call.
//!
//! Status queries (`list_*`, `find_*`, zombie maps, policy lookups) read the
//! shared graph and quarantine table directly and never wait for the lock.

use crate::application::deployer::ArtifactDeployer;
use crate::application::executor::LifecycleExecutor;
use crate::application::graph::{ArtifactGraph, ArtifactInfo};
use crate::application::installer::ArtifactInstaller;
use crate::application::isolation::IsolationResolver;
use crate::application::listeners::ListenerRegistry;
use crate::application::policy_pipeline::{ParameterizedPolicy, PolicyPipeline};
use crate::application::quarantine::QuarantineTracker;
use crate::application::scheduler::{DirectoryWatcher, TickReport};
use crate::application::state_store::DeploymentStateStore;
use crate::domain::artifact::{ArtifactKey, ArtifactKind};
use crate::domain::config::DeployerConfigSpec;
use crate::domain::descriptor::DescriptorParser;
use crate::domain::error::{DeploymentError, InstallError, PolicyRegistrationError};
use crate::domain::events::DeploymentListener;
use crate::domain::lifecycle::ArtifactRuntime;
use crate::domain::policy::{PointcutParameters, PolicyParametrization};
use crate::domain::properties::DeploymentProperties;
use crate::domain::repository::DeploymentStateRepository;
use crate::infrastructure::event_bus::{ArtifactEventReceiver, EventBus, EventReceiver};
use anyhow::Context;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use semver::Version;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use url::Url;

/// Failed artifacts by name: source URI → time of the failed attempt.
pub type ZombieMap = BTreeMap<String, BTreeMap<Url, DateTime<Utc>>>;

pub struct DeploymentService {
    deployer: Arc<Mutex<ArtifactDeployer>>,
    graph: Arc<RwLock<ArtifactGraph>>,
    quarantine: Arc<QuarantineTracker>,
    listeners: Arc<ListenerRegistry>,
    events: EventBus,
    policies: Arc<PolicyPipeline>,
    watcher: DirectoryWatcher,
    scheduler_enabled: bool,
    fixed_applications: Option<Vec<String>>,
    shut_down: AtomicBool,
}

impl DeploymentService {
    /// Wire the engine from configuration and the external collaborators.
    pub fn new(
        config: &DeployerConfigSpec,
        parser: Arc<dyn DescriptorParser>,
        runtime: Arc<dyn ArtifactRuntime>,
        repository: Arc<dyn DeploymentStateRepository>,
    ) -> anyhow::Result<Self> {
        let runtime_version = Version::parse(&config.runtime_version)
            .with_context(|| format!("Invalid runtime_version '{}'", config.runtime_version))?;
        let denylist = config.isolation.denylist()?;

        let applications = ArtifactInstaller::new(
            &config.directories.applications,
            &config.packaging.archive_extension,
            &config.packaging.anchor_suffix,
        )
        .context("Failed to prepare applications directory")?;
        let domains = ArtifactInstaller::new(
            &config.directories.domains,
            &config.packaging.archive_extension,
            &config.packaging.anchor_suffix,
        )
        .context("Failed to prepare domains directory")?;

        let graph = Arc::new(RwLock::new(ArtifactGraph::new()));
        let quarantine = Arc::new(QuarantineTracker::new());
        let resolver = Arc::new(IsolationResolver::new(
            config.isolation.platform_packages.iter().cloned(),
            denylist,
        ));
        let executor = LifecycleExecutor::new(config.lifecycle.max_concurrent_operations);
        let policies = Arc::new(PolicyPipeline::new(
            parser.clone(),
            runtime.clone(),
            resolver.clone(),
            executor.clone(),
            config.policies.isolate_from_application,
        ));

        let events = EventBus::with_default_capacity();
        let listeners = Arc::new(ListenerRegistry::new());
        listeners.add(Arc::new(events.clone()));

        let deployer = Arc::new(Mutex::new(ArtifactDeployer::new(
            graph.clone(),
            applications,
            domains,
            quarantine.clone(),
            resolver,
            DeploymentStateStore::new(repository),
            parser,
            runtime,
            executor,
            policies.clone(),
            listeners.clone(),
            runtime_version,
        )));
        let watcher = DirectoryWatcher::new(deployer.clone(), config.scheduler.poll_interval);

        Ok(Self {
            deployer,
            graph,
            quarantine,
            listeners,
            events,
            policies,
            watcher,
            scheduler_enabled: config.scheduler.enabled,
            fixed_applications: config.scheduler.fixed_applications.clone(),
            shut_down: AtomicBool::new(false),
        })
    }

    fn ensure_running(&self) -> Result<(), DeploymentError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(DeploymentError::ShutDown);
        }
        Ok(())
    }

    // ========================================================================
    // Startup / shutdown
    // ========================================================================

    /// Clear stale anchors, run the initial deployment and spawn the watcher.
    ///
    /// With a fixed application set, every domain and only the named
    /// applications are deployed, and nothing is watched afterwards.
    pub async fn start(&self) -> Result<TickReport, DeploymentError> {
        self.ensure_running()?;
        {
            let deployer = self.deployer.lock().await;
            for kind in [ArtifactKind::Domain, ArtifactKind::Application] {
                let removed = deployer.installer(kind).delete_all_anchors()?;
                if removed > 0 {
                    info!(kind = %kind, removed, "Deleted anchors left by a previous run");
                }
            }
        }

        if let Some(names) = &self.fixed_applications {
            info!(applications = ?names, "Deploying fixed application set");
            return Ok(self.deploy_fixed(names).await);
        }

        let report = self.watcher.trigger_now().await;
        if self.scheduler_enabled {
            self.watcher.start();
        }
        Ok(report)
    }

    async fn deploy_fixed(&self, names: &[String]) -> TickReport {
        let deployer = self.deployer.lock().await;
        let mut report = TickReport::default();

        let mut targets: Vec<(ArtifactKind, String)> = Vec::new();
        match deployer.installer(ArtifactKind::Domain).scan() {
            Ok(listing) => {
                let domains: std::collections::BTreeSet<String> =
                    listing.archives.into_keys().chain(listing.exploded.into_keys()).collect();
                targets.extend(domains.into_iter().map(|d| (ArtifactKind::Domain, d)));
            }
            Err(e) => warn!(error = %e, "Failed to scan domains directory"),
        }
        targets.extend(names.iter().map(|n| (ArtifactKind::Application, n.clone())));

        for (kind, name) in targets {
            let installer = deployer.installer(kind);
            let archive = installer.archive_path(&name);
            let result = if archive.is_file() {
                deployer.deploy_packaged(kind, &archive, None).await
            } else if installer.artifact_dir(&name).is_dir() {
                deployer.deploy_exploded(kind, &name, None).await
            } else {
                Err(InstallError::SourceNotFound(installer.artifact_dir(&name)).into())
            };
            match result {
                Ok(key) => report.deployed.push(key),
                Err(e) => {
                    warn!(kind = %kind, artifact = %name, error = %e, "Fixed artifact failed to deploy");
                    report.failed.push((ArtifactKey::new(kind, name), e.to_string()));
                }
            }
        }
        report
    }

    /// Stop the watcher, then stop and dispose every artifact. Persisted
    /// state and files are left as they are.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down deployment service");
        self.watcher.stop().await;
        self.deployer.lock().await.shutdown().await;
    }

    /// Run one watcher tick synchronously.
    pub async fn trigger_now(&self) -> Result<TickReport, DeploymentError> {
        self.ensure_running()?;
        Ok(self.watcher.trigger_now().await)
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.is_running()
    }

    // ========================================================================
    // Client deploy / undeploy / redeploy
    // ========================================================================

    /// Install the application at `source` into the applications root and
    /// deploy it. An already deployed application of the same name is
    /// redeployed from the new files.
    pub async fn deploy(
        &self,
        source: &Url,
        properties: Option<DeploymentProperties>,
    ) -> Result<ArtifactKey, DeploymentError> {
        self.deploy_kind(ArtifactKind::Application, source, properties).await
    }

    pub async fn deploy_domain(
        &self,
        source: &Url,
        properties: Option<DeploymentProperties>,
    ) -> Result<ArtifactKey, DeploymentError> {
        self.deploy_kind(ArtifactKind::Domain, source, properties).await
    }

    async fn deploy_kind(
        &self,
        kind: ArtifactKind,
        source: &Url,
        properties: Option<DeploymentProperties>,
    ) -> Result<ArtifactKey, DeploymentError> {
        self.ensure_running()?;
        let path = source
            .to_file_path()
            .map_err(|_| InstallError::UnsupportedSource(source.to_string()))?;

        let deployer = self.deployer.lock().await;
        let installer = deployer.installer(kind);
        let installed = installer.install(&path, None)?;
        let name = installer
            .name_for_source(&installed)
            .ok_or_else(|| InstallError::UnsupportedSource(installed.display().to_string()))?;
        let key = ArtifactKey::new(kind, &name);
        let packaged = installer.is_archive(&installed);

        let live = self
            .graph
            .read()
            .get(&key)
            .map(|n| !n.status.is_failed())
            .unwrap_or(false);
        if live {
            if packaged {
                deployer.adopt_archive(&key, &installed);
            }
            deployer.redeploy(&key, properties).await?;
        } else if packaged {
            deployer.deploy_packaged(kind, &installed, properties).await?;
        } else {
            deployer.deploy_exploded(kind, &name, properties).await?;
        }
        Ok(key)
    }

    /// Fully undeploy an application: files, anchor and persisted state.
    pub async fn undeploy(&self, name: &str) -> Result<(), DeploymentError> {
        self.ensure_running()?;
        self.deployer.lock().await.undeploy(&ArtifactKey::application(name)).await
    }

    /// Undeploy a domain; its applications are undeployed first.
    pub async fn undeploy_domain(&self, name: &str) -> Result<(), DeploymentError> {
        self.ensure_running()?;
        self.deployer.lock().await.undeploy(&ArtifactKey::domain(name)).await
    }

    pub async fn redeploy(&self, name: &str, properties: Option<DeploymentProperties>) -> Result<(), DeploymentError> {
        self.ensure_running()?;
        self.deployer
            .lock()
            .await
            .redeploy(&ArtifactKey::application(name), properties)
            .await
    }

    pub async fn redeploy_domain(
        &self,
        name: &str,
        properties: Option<DeploymentProperties>,
    ) -> Result<(), DeploymentError> {
        self.ensure_running()?;
        self.deployer
            .lock()
            .await
            .redeploy(&ArtifactKey::domain(name), properties)
            .await
    }

    // ========================================================================
    // Operator start / stop
    // ========================================================================

    pub async fn start_application(&self, name: &str) -> Result<(), DeploymentError> {
        self.ensure_running()?;
        self.deployer.lock().await.start(&ArtifactKey::application(name)).await
    }

    pub async fn stop_application(&self, name: &str) -> Result<(), DeploymentError> {
        self.ensure_running()?;
        self.deployer.lock().await.stop(&ArtifactKey::application(name)).await
    }

    pub async fn start_domain(&self, name: &str) -> Result<(), DeploymentError> {
        self.ensure_running()?;
        self.deployer.lock().await.start(&ArtifactKey::domain(name)).await
    }

    pub async fn stop_domain(&self, name: &str) -> Result<(), DeploymentError> {
        self.ensure_running()?;
        self.deployer.lock().await.stop(&ArtifactKey::domain(name)).await
    }

    pub async fn start_component(&self, application: &str, component: &str) -> Result<(), DeploymentError> {
        self.ensure_running()?;
        self.deployer
            .lock()
            .await
            .start_component(&ArtifactKey::application(application), component)
            .await
    }

    pub async fn stop_component(&self, application: &str, component: &str) -> Result<(), DeploymentError> {
        self.ensure_running()?;
        self.deployer
            .lock()
            .await
            .stop_component(&ArtifactKey::application(application), component)
            .await
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn list_applications(&self) -> Vec<ArtifactInfo> {
        self.graph.read().list(ArtifactKind::Application)
    }

    pub fn list_domains(&self) -> Vec<ArtifactInfo> {
        self.graph.read().list(ArtifactKind::Domain)
    }

    pub fn find_application(&self, name: &str) -> Option<ArtifactInfo> {
        self.graph.read().get(&ArtifactKey::application(name)).map(|n| n.info())
    }

    pub fn find_domain(&self, name: &str) -> Option<ArtifactInfo> {
        self.graph.read().get(&ArtifactKey::domain(name)).map(|n| n.info())
    }

    pub fn get_zombie_applications(&self) -> ZombieMap {
        self.quarantine.zombie_map(ArtifactKind::Application)
    }

    pub fn get_zombie_domains(&self) -> ZombieMap {
        self.quarantine.zombie_map(ArtifactKind::Domain)
    }

    pub fn is_quarantined(&self, path: &Path) -> bool {
        self.quarantine.is_quarantined(path)
    }

    // ========================================================================
    // Listeners and events
    // ========================================================================

    pub fn add_listener(&self, listener: Arc<dyn DeploymentListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn DeploymentListener>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn subscribe_artifact(&self, key: ArtifactKey) -> ArtifactEventReceiver {
        self.events.subscribe_artifact(key)
    }

    // ========================================================================
    // Policies
    // ========================================================================

    pub fn register_policy_template(&self, location: &Path) -> Result<String, PolicyRegistrationError> {
        self.policies.register_template(location)
    }

    /// Apply a policy to a deployed application. Held under the deployment
    /// lock so the application cannot be mid-redeploy.
    pub async fn add_policy(
        &self,
        application: &str,
        template: &str,
        parametrization: PolicyParametrization,
    ) -> Result<(), PolicyRegistrationError> {
        let _deployer = self.deployer.lock().await;
        self.policies
            .add_policy(application, template, parametrization)
            .await
    }

    pub async fn remove_policy(&self, application: &str, policy_id: &str) -> Result<(), PolicyRegistrationError> {
        let _deployer = self.deployer.lock().await;
        self.policies.remove_policy(application, policy_id).await
    }

    pub fn find_policies(&self, application: &str, parameters: &PointcutParameters) -> Vec<ParameterizedPolicy> {
        self.policies.find_policies(application, parameters)
    }
}
