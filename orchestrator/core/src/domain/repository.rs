// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository interfaces for durable deployment state.
//!
//! Each artifact owns two flat property sets: the deployment-supplied
//! configuration and the status flags (`startArtifactOnDeployment`,
//! `<component>_startOnDeployment`). Both survive process restarts; they are
//! only removed on full undeploy.

use crate::domain::artifact::ArtifactKey;
use crate::domain::properties::DeploymentProperties;
use async_trait::async_trait;

#[async_trait]
pub trait DeploymentStateRepository: Send + Sync {
    /// Deployment-supplied properties, `None` if never persisted.
    async fn load_deployment_properties(
        &self,
        key: &ArtifactKey,
    ) -> Result<Option<DeploymentProperties>, RepositoryError>;

    async fn save_deployment_properties(
        &self,
        key: &ArtifactKey,
        properties: &DeploymentProperties,
    ) -> Result<(), RepositoryError>;

    async fn load_status_properties(
        &self,
        key: &ArtifactKey,
    ) -> Result<Option<DeploymentProperties>, RepositoryError>;

    async fn save_status_properties(
        &self,
        key: &ArtifactKey,
        properties: &DeploymentProperties,
    ) -> Result<(), RepositoryError>;

    /// Remove everything persisted for `key`. Missing state is not an error.
    async fn delete(&self, key: &ArtifactKey) -> Result<(), RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}
