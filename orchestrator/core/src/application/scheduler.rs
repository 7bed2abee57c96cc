// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Directory Watcher
//!
//! Reconciles the watched roots with the artifact graph. A tick runs with the
//! deployment lock held for its whole duration, so it never interleaves with
//! a client deploy, undeploy or redeploy.
//!
//! # Tick
//!
//! 1. Forget quarantine entries whose backing path disappeared.
//! 2. Undeploy artifacts whose files vanished or whose anchor was deleted,
//!    applications before domains.
//! 3. For domains, then applications:
//!    - explode and deploy new or changed packed archives,
//!    - deploy new exploded directories,
//!    - redeploy artifacts whose tracked resources changed,
//!    - retry failed artifacts once their quarantine no longer applies.
//!
//! Each artifact's outcome is independent: a failure is logged, reported in
//! the [`TickReport`] and never stops the rest of the tick.

use crate::application::deployer::ArtifactDeployer;
use crate::application::quarantine::QuarantineTracker;
use crate::domain::artifact::{ArtifactKey, ArtifactKind};
use crate::domain::error::DeploymentError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What one tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub deployed: Vec<ArtifactKey>,
    pub redeployed: Vec<ArtifactKey>,
    pub undeployed: Vec<ArtifactKey>,
    pub failed: Vec<(ArtifactKey, String)>,
    /// Entries skipped because they are quarantined.
    pub quarantined: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.deployed.is_empty()
            && self.redeployed.is_empty()
            && self.undeployed.is_empty()
            && self.failed.is_empty()
    }

    fn record(&mut self, key: ArtifactKey, result: Result<(), DeploymentError>, bucket: Bucket) {
        match result {
            Ok(()) => match bucket {
                Bucket::Deployed => self.deployed.push(key),
                Bucket::Redeployed => self.redeployed.push(key),
                Bucket::Undeployed => self.undeployed.push(key),
            },
            Err(e) => {
                warn!(artifact = %key, error = %e, "Artifact failed during tick");
                self.failed.push((key, e.to_string()));
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Bucket {
    Deployed,
    Redeployed,
    Undeployed,
}

/// Run one reconciliation pass. The caller must hold the deployment lock.
pub async fn reconcile(deployer: &ArtifactDeployer) -> TickReport {
    let mut report = TickReport::default();
    let forgotten = deployer.quarantine().forget_missing();
    if forgotten > 0 {
        debug!(forgotten, "Dropped quarantine entries for deleted artifacts");
    }

    for kind in [ArtifactKind::Application, ArtifactKind::Domain] {
        reconcile_removals(deployer, kind, &mut report).await;
    }
    for kind in [ArtifactKind::Domain, ArtifactKind::Application] {
        reconcile_archives(deployer, kind, &mut report).await;
        reconcile_exploded(deployer, kind, &mut report).await;
    }

    metrics::counter!("depot_scheduler_ticks_total").increment(1);
    if !report.is_idle() {
        info!(
            deployed = report.deployed.len(),
            redeployed = report.redeployed.len(),
            undeployed = report.undeployed.len(),
            failed = report.failed.len(),
            "Tick completed"
        );
    }
    report
}

struct NodeState {
    key: ArtifactKey,
    exploded: PathBuf,
    archive: Option<PathBuf>,
    archive_timestamp: Option<SystemTime>,
    anchored: bool,
    failed: bool,
}

fn node_state(deployer: &ArtifactDeployer, key: &ArtifactKey) -> Option<NodeState> {
    let graph = deployer.graph().read();
    graph.get(key).map(|node| NodeState {
        key: node.key.clone(),
        exploded: node.source.exploded.clone(),
        archive: node.source.archive.clone(),
        archive_timestamp: node.source.archive_timestamp,
        anchored: node.anchored,
        failed: node.status.is_failed(),
    })
}

async fn reconcile_removals(deployer: &ArtifactDeployer, kind: ArtifactKind, report: &mut TickReport) {
    let keys = deployer.graph().read().keys_of(kind);
    for key in keys {
        let Some(state) = node_state(deployer, &key) else {
            continue;
        };
        let archive_present = state.archive.as_ref().map(|a| a.exists());
        let exploded_present = state.exploded.exists();

        if state.failed {
            if !exploded_present && archive_present != Some(true) {
                debug!(artifact = %key, "Failed artifact removed from disk");
                deployer.graph().write().remove(&key);
                deployer.quarantine().forget_artifact(&key);
            }
            continue;
        }

        let vanished = !exploded_present || archive_present == Some(false);
        let anchor_deleted = state.anchored && !deployer.installer(kind).anchor_exists(&key.name);
        if vanished || anchor_deleted {
            info!(artifact = %key, vanished, anchor_deleted, "Undeploy requested from watched root");
            let result = deployer.undeploy(&state.key).await;
            report.record(key, result, Bucket::Undeployed);
        }
    }
}

async fn reconcile_archives(deployer: &ArtifactDeployer, kind: ArtifactKind, report: &mut TickReport) {
    let listing = match deployer.installer(kind).scan() {
        Ok(listing) => listing,
        Err(e) => {
            warn!(kind = %kind, error = %e, "Failed to scan watched root");
            return;
        }
    };

    for (name, archive) in listing.archives {
        let key = ArtifactKey::new(kind, &name);
        let current = QuarantineTracker::observed_timestamp(&archive);

        match node_state(deployer, &key) {
            Some(state) if !state.failed => {
                if state.archive.is_some() && state.archive_timestamp == current {
                    continue;
                }
                if state.archive.is_none() {
                    deployer.adopt_archive(&key, &archive);
                }
                let result = deployer.redeploy(&key, None).await;
                report.record(key, result, Bucket::Redeployed);
            }
            _ => {
                if deployer.quarantine().is_quarantined(&archive) {
                    report.quarantined += 1;
                    continue;
                }
                let result = deployer.deploy_packaged(kind, &archive, None).await.map(|_| ());
                report.record(key, result, Bucket::Deployed);
            }
        }
    }
}

async fn reconcile_exploded(deployer: &ArtifactDeployer, kind: ArtifactKind, report: &mut TickReport) {
    let installer = deployer.installer(kind);
    let listing = match installer.scan() {
        Ok(listing) => listing,
        Err(e) => {
            warn!(kind = %kind, error = %e, "Failed to scan watched root");
            return;
        }
    };

    for (name, dir) in listing.exploded {
        let key = ArtifactKey::new(kind, &name);
        let packaged = listing.archives.contains_key(&name);

        match node_state(deployer, &key) {
            Some(state) if !state.failed => {
                if deployer.resources_changed(&key) {
                    let result = deployer.redeploy(&key, None).await;
                    report.record(key, result, Bucket::Redeployed);
                }
            }
            Some(state) => {
                // Packed failures are retried from the archive.
                if state.archive.is_some() || packaged {
                    continue;
                }
                if deployer.quarantine().is_quarantined(&dir) {
                    report.quarantined += 1;
                    continue;
                }
                let result = deployer.deploy_exploded(kind, &name, None).await.map(|_| ());
                report.record(key, result, Bucket::Deployed);
            }
            None => {
                if packaged {
                    continue;
                }
                if deployer.quarantine().is_quarantined(&dir) {
                    report.quarantined += 1;
                    continue;
                }
                let result = deployer.deploy_exploded(kind, &name, None).await.map(|_| ());
                report.record(key, result, Bucket::Deployed);
            }
        }
    }
}

/// Periodic driver for [`reconcile`].
pub struct DirectoryWatcher {
    deployer: Arc<Mutex<ArtifactDeployer>>,
    interval: Duration,
    cancel: CancellationToken,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl DirectoryWatcher {
    pub fn new(deployer: Arc<Mutex<ArtifactDeployer>>, interval: Duration) -> Self {
        Self {
            deployer,
            interval,
            cancel: CancellationToken::new(),
            handle: parking_lot::Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one tick now, waiting for the deployment lock.
    pub async fn trigger_now(&self) -> TickReport {
        let deployer = self.deployer.lock().await;
        reconcile(&deployer).await
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Spawn the polling loop. Calling it again while running is a no-op.
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }

        let deployer = self.deployer.clone();
        let cancel = self.cancel.clone();
        let period = self.interval;
        info!(interval = ?period, "Starting directory watcher");

        *handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let guard = tokio::select! {
                    _ = cancel.cancelled() => break,
                    guard = deployer.lock() => guard,
                };
                reconcile(&guard).await;
            }
            debug!("Directory watcher stopped");
        }));
    }

    /// Cancel the loop and wait for an in-flight tick to finish.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Directory watcher task ended abnormally");
            }
        }
    }
}
