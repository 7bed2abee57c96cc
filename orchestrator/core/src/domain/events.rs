// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::artifact::ArtifactKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Callbacks fired per artifact as deployment operations progress.
///
/// Every method has a no-op default so listeners only implement what they
/// observe. Callbacks run synchronously while the deployment lock is held and
/// must not block.
pub trait DeploymentListener: Send + Sync {
    fn on_deployment_start(&self, _artifact: &ArtifactKey) {}

    fn on_deployment_success(&self, _artifact: &ArtifactKey) {}

    fn on_deployment_failure(&self, _artifact: &ArtifactKey, _error: &str) {}

    fn on_undeployment_start(&self, _artifact: &ArtifactKey) {}

    fn on_undeployment_success(&self, _artifact: &ArtifactKey) {}

    fn on_undeployment_failure(&self, _artifact: &ArtifactKey, _error: &str) {}

    fn on_redeployment_start(&self, _artifact: &ArtifactKey) {}

    fn on_redeployment_success(&self, _artifact: &ArtifactKey) {}

    fn on_redeployment_failure(&self, _artifact: &ArtifactKey, _error: &str) {}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeploymentEvent {
    DeploymentStarted {
        artifact: ArtifactKey,
        started_at: DateTime<Utc>,
    },
    DeploymentSucceeded {
        artifact: ArtifactKey,
        deployed_at: DateTime<Utc>,
    },
    DeploymentFailed {
        artifact: ArtifactKey,
        error: String,
        failed_at: DateTime<Utc>,
    },
    UndeploymentStarted {
        artifact: ArtifactKey,
        started_at: DateTime<Utc>,
    },
    UndeploymentSucceeded {
        artifact: ArtifactKey,
        undeployed_at: DateTime<Utc>,
    },
    UndeploymentFailed {
        artifact: ArtifactKey,
        error: String,
        failed_at: DateTime<Utc>,
    },
    RedeploymentStarted {
        artifact: ArtifactKey,
        started_at: DateTime<Utc>,
    },
    RedeploymentSucceeded {
        artifact: ArtifactKey,
        redeployed_at: DateTime<Utc>,
    },
    RedeploymentFailed {
        artifact: ArtifactKey,
        error: String,
        failed_at: DateTime<Utc>,
    },
}

impl DeploymentEvent {
    pub fn artifact(&self) -> &ArtifactKey {
        match self {
            DeploymentEvent::DeploymentStarted { artifact, .. }
            | DeploymentEvent::DeploymentSucceeded { artifact, .. }
            | DeploymentEvent::DeploymentFailed { artifact, .. }
            | DeploymentEvent::UndeploymentStarted { artifact, .. }
            | DeploymentEvent::UndeploymentSucceeded { artifact, .. }
            | DeploymentEvent::UndeploymentFailed { artifact, .. }
            | DeploymentEvent::RedeploymentStarted { artifact, .. }
            | DeploymentEvent::RedeploymentSucceeded { artifact, .. }
            | DeploymentEvent::RedeploymentFailed { artifact, .. } => artifact,
        }
    }
}
