// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::artifact::ArtifactKey;
use crate::domain::events::DeploymentListener;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// Fan-out of deployment callbacks to every registered listener.
///
/// Owned by one deployment service instance; there is no global registry. A
/// panicking listener is logged and does not stop delivery to the others.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Arc<dyn DeploymentListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn DeploymentListener>) {
        self.listeners.write().push(listener);
    }

    /// Remove a listener by identity. Returns whether it was registered.
    pub fn remove(&self, listener: &Arc<dyn DeploymentListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        before != listeners.len()
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    fn notify(&self, callback: &str, f: impl Fn(&dyn DeploymentListener)) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))).is_err() {
                error!(callback = %callback, "Deployment listener panicked");
            }
        }
    }
}

impl DeploymentListener for ListenerRegistry {
    fn on_deployment_start(&self, artifact: &ArtifactKey) {
        self.notify("on_deployment_start", |l| l.on_deployment_start(artifact));
    }

    fn on_deployment_success(&self, artifact: &ArtifactKey) {
        self.notify("on_deployment_success", |l| l.on_deployment_success(artifact));
    }

    fn on_deployment_failure(&self, artifact: &ArtifactKey, error: &str) {
        self.notify("on_deployment_failure", |l| l.on_deployment_failure(artifact, error));
    }

    fn on_undeployment_start(&self, artifact: &ArtifactKey) {
        self.notify("on_undeployment_start", |l| l.on_undeployment_start(artifact));
    }

    fn on_undeployment_success(&self, artifact: &ArtifactKey) {
        self.notify("on_undeployment_success", |l| l.on_undeployment_success(artifact));
    }

    fn on_undeployment_failure(&self, artifact: &ArtifactKey, error: &str) {
        self.notify("on_undeployment_failure", |l| l.on_undeployment_failure(artifact, error));
    }

    fn on_redeployment_start(&self, artifact: &ArtifactKey) {
        self.notify("on_redeployment_start", |l| l.on_redeployment_start(artifact));
    }

    fn on_redeployment_success(&self, artifact: &ArtifactKey) {
        self.notify("on_redeployment_success", |l| l.on_redeployment_success(artifact));
    }

    fn on_redeployment_failure(&self, artifact: &ArtifactKey, error: &str) {
        self.notify("on_redeployment_failure", |l| l.on_redeployment_failure(artifact, error));
    }
}
