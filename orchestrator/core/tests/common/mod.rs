// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared harness for the deployment integration tests: a runtime that
//! records every lifecycle call, a recording listener, fixture writers and a
//! service builder rooted in a temp directory.

#![allow(dead_code)]

use async_trait::async_trait;
use depot_core::application::DeploymentService;
use depot_core::domain::artifact::{ArtifactKey, ArtifactStatus};
use depot_core::domain::config::DeployerConfigSpec;
use depot_core::domain::error::LifecycleError;
use depot_core::domain::events::DeploymentListener;
use depot_core::domain::lifecycle::{ArtifactLifecycle, ArtifactRuntime, LifecycleContext};
use depot_core::domain::properties::DeploymentProperties;
use depot_core::domain::region::IsolationRegion;
use depot_core::infrastructure::{FileDeploymentStateRepository, YamlDescriptorParser};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

// ============================================================================
// Recording runtime
// ============================================================================

#[derive(Default)]
pub struct RuntimeJournal {
    /// `"<kind>/<name>:<phase>"` in call order.
    pub calls: Mutex<Vec<String>>,
    pub properties: Mutex<BTreeMap<String, DeploymentProperties>>,
    pub regions: Mutex<BTreeMap<String, Arc<IsolationRegion>>>,
    pub fail_init: Mutex<BTreeSet<String>>,
    pub fail_start: Mutex<BTreeSet<String>>,
}

impl RuntimeJournal {
    fn record(&self, key: &ArtifactKey, phase: &str) {
        self.calls.lock().push(format!("{}:{}", key, phase));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    pub fn position(&self, key: &ArtifactKey, phase: &str) -> Option<usize> {
        let entry = format!("{}:{}", key, phase);
        self.calls.lock().iter().position(|c| *c == entry)
    }

    pub fn count(&self, key: &ArtifactKey, phase: &str) -> usize {
        let entry = format!("{}:{}", key, phase);
        self.calls.lock().iter().filter(|c| **c == entry).count()
    }

    pub fn properties_of(&self, key: &ArtifactKey) -> DeploymentProperties {
        self.properties.lock().get(&key.to_string()).cloned().unwrap_or_default()
    }

    pub fn region_of(&self, key: &ArtifactKey) -> Option<Arc<IsolationRegion>> {
        self.regions.lock().get(&key.to_string()).cloned()
    }
}

pub struct RecordingRuntime {
    pub journal: Arc<RuntimeJournal>,
}

impl ArtifactRuntime for RecordingRuntime {
    fn create(&self, context: LifecycleContext) -> Result<Arc<dyn ArtifactLifecycle>, LifecycleError> {
        let key = context.descriptor.key();
        self.journal.record(&key, "create");
        self.journal
            .properties
            .lock()
            .insert(key.to_string(), context.deployment_properties.clone());
        self.journal.regions.lock().insert(key.to_string(), context.region.clone());
        Ok(Arc::new(RecordingLifecycle {
            key,
            journal: self.journal.clone(),
            status: Mutex::new(ArtifactStatus::Created),
        }))
    }
}

struct RecordingLifecycle {
    key: ArtifactKey,
    journal: Arc<RuntimeJournal>,
    status: Mutex<ArtifactStatus>,
}

#[async_trait]
impl ArtifactLifecycle for RecordingLifecycle {
    async fn init(&self) -> Result<(), LifecycleError> {
        self.journal.record(&self.key, "init");
        if self.journal.fail_init.lock().contains(&self.key.name) {
            return Err(LifecycleError::Init("injected init failure".to_string()));
        }
        Ok(())
    }

    async fn start(&self) -> Result<(), LifecycleError> {
        self.journal.record(&self.key, "start");
        if self.journal.fail_start.lock().contains(&self.key.name) {
            return Err(LifecycleError::Start("injected start failure".to_string()));
        }
        *self.status.lock() = ArtifactStatus::Started;
        Ok(())
    }

    async fn stop(&self) -> Result<(), LifecycleError> {
        self.journal.record(&self.key, "stop");
        *self.status.lock() = ArtifactStatus::Stopped;
        Ok(())
    }

    async fn dispose(&self) -> Result<(), LifecycleError> {
        self.journal.record(&self.key, "dispose");
        *self.status.lock() = ArtifactStatus::Destroyed;
        Ok(())
    }

    fn status(&self) -> ArtifactStatus {
        *self.status.lock()
    }

    async fn start_component(&self, component: &str) -> Result<(), LifecycleError> {
        self.journal.record(&self.key, &format!("start_component({})", component));
        Ok(())
    }

    async fn stop_component(&self, component: &str) -> Result<(), LifecycleError> {
        self.journal.record(&self.key, &format!("stop_component({})", component));
        Ok(())
    }
}

// ============================================================================
// Recording listener
// ============================================================================

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<String>>,
}

impl RecordingListener {
    fn push(&self, event: &str, artifact: &ArtifactKey) {
        self.events.lock().push(format!("{}:{}", event, artifact));
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &str, artifact: &ArtifactKey) -> usize {
        let entry = format!("{}:{}", event, artifact);
        self.events.lock().iter().filter(|e| **e == entry).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl DeploymentListener for RecordingListener {
    fn on_deployment_start(&self, artifact: &ArtifactKey) {
        self.push("deployment_start", artifact);
    }

    fn on_deployment_success(&self, artifact: &ArtifactKey) {
        self.push("deployment_success", artifact);
    }

    fn on_deployment_failure(&self, artifact: &ArtifactKey, _error: &str) {
        self.push("deployment_failure", artifact);
    }

    fn on_undeployment_start(&self, artifact: &ArtifactKey) {
        self.push("undeployment_start", artifact);
    }

    fn on_undeployment_success(&self, artifact: &ArtifactKey) {
        self.push("undeployment_success", artifact);
    }

    fn on_undeployment_failure(&self, artifact: &ArtifactKey, _error: &str) {
        self.push("undeployment_failure", artifact);
    }

    fn on_redeployment_start(&self, artifact: &ArtifactKey) {
        self.push("redeployment_start", artifact);
    }

    fn on_redeployment_success(&self, artifact: &ArtifactKey) {
        self.push("redeployment_success", artifact);
    }

    fn on_redeployment_failure(&self, artifact: &ArtifactKey, _error: &str) {
        self.push("redeployment_failure", artifact);
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// `artifact.yaml` for `kind` with optional extra `spec` lines (already
/// indented by two spaces).
pub fn descriptor_yaml(kind: &str, name: &str, spec: &str) -> String {
    let spec = if spec.trim().is_empty() { "  {}\n".to_string() } else { spec.to_string() };
    format!(
        "apiVersion: depot/v1\nkind: {kind}\nmetadata:\n  group: com.acme\n  name: {name}\n  version: \"1.0.0\"\nspec:\n{spec}"
    )
}

/// Write an exploded artifact directory at `<root>/<name>`.
pub fn write_exploded(root: &Path, name: &str, yaml: &str) -> PathBuf {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("artifact.yaml"), yaml).unwrap();
    dir
}

/// Write a packed archive `<root>/<name>.jar` holding `artifact.yaml` plus
/// any extra files.
pub fn write_archive(root: &Path, name: &str, yaml: &str, extra: &[(&str, &str)]) -> PathBuf {
    let path = root.join(format!("{}.jar", name));
    let file = fs::File::create(&path).unwrap();
    let mut builder = tar::Builder::new(file);
    let mut files = vec![("artifact.yaml", yaml)];
    files.extend_from_slice(extra);
    for (entry, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, entry, content.as_bytes()).unwrap();
    }
    builder.finish().unwrap();
    path
}

/// Push a file's modification time forward so timestamp comparisons see a
/// change even on coarse-grained filesystems.
pub fn bump_mtime(path: &Path, seconds: u64) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(seconds)).unwrap();
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub dir: TempDir,
    pub config: DeployerConfigSpec,
    pub journal: Arc<RuntimeJournal>,
    pub listener: Arc<RecordingListener>,
    pub service: Arc<DeploymentService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(configure: impl FnOnce(&mut DeployerConfigSpec)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = DeployerConfigSpec::default();
        config.directories.applications = dir.path().join("apps");
        config.directories.domains = dir.path().join("domains");
        config.directories.state = dir.path().join("state");
        config.scheduler.enabled = false;
        config.scheduler.poll_interval = Duration::from_millis(50);
        configure(&mut config);

        let journal = Arc::new(RuntimeJournal::default());
        let listener = Arc::new(RecordingListener::default());
        let service = build_service(&config, journal.clone(), listener.clone());
        Self {
            dir,
            config,
            journal,
            listener,
            service,
        }
    }

    /// Shut the current service down and build a fresh one over the same
    /// directories, as a process restart would.
    pub async fn restart(&mut self) {
        self.service.shutdown().await;
        self.journal.clear();
        self.listener.clear();
        self.service = build_service(&self.config, self.journal.clone(), self.listener.clone());
    }

    pub fn apps(&self) -> PathBuf {
        self.config.directories.applications.clone()
    }

    pub fn domains(&self) -> PathBuf {
        self.config.directories.domains.clone()
    }

    pub fn state(&self) -> PathBuf {
        self.config.directories.state.clone()
    }

    pub fn app_status(&self, name: &str) -> Option<ArtifactStatus> {
        self.service.find_application(name).map(|i| i.status)
    }

    pub fn domain_status(&self, name: &str) -> Option<ArtifactStatus> {
        self.service.find_domain(name).map(|i| i.status)
    }

    pub fn app_anchor(&self, name: &str) -> PathBuf {
        self.apps().join(format!("{}{}", name, self.config.packaging.anchor_suffix))
    }
}

fn build_service(
    config: &DeployerConfigSpec,
    journal: Arc<RuntimeJournal>,
    listener: Arc<RecordingListener>,
) -> Arc<DeploymentService> {
    let repository = FileDeploymentStateRepository::new(&config.directories.state).unwrap();
    let service = DeploymentService::new(
        config,
        Arc::new(YamlDescriptorParser::new()),
        Arc::new(RecordingRuntime { journal }),
        Arc::new(repository),
    )
    .unwrap();
    service.add_listener(listener);
    Arc::new(service)
}
