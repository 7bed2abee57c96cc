// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Durable deployment state.
//!
//! Thin policy layer over a [`DeploymentStateRepository`]: decides which
//! deployment properties apply to an attempt and records start/stop intent so
//! it survives restarts.

use crate::domain::artifact::ArtifactKey;
use crate::domain::properties::{
    component_flag_key, DeploymentProperties, StartFlags, START_ARTIFACT_ON_DEPLOYMENT,
};
use crate::domain::repository::{DeploymentStateRepository, RepositoryError};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct DeploymentStateStore {
    repository: Arc<dyn DeploymentStateRepository>,
}

impl DeploymentStateStore {
    pub fn new(repository: Arc<dyn DeploymentStateRepository>) -> Self {
        Self { repository }
    }

    /// Properties for a deploy attempt.
    ///
    /// `Some` replaces whatever was persisted (an empty set clears it); `None`
    /// reuses the persisted set.
    pub async fn resolve_deployment_properties(
        &self,
        key: &ArtifactKey,
        supplied: Option<DeploymentProperties>,
    ) -> Result<DeploymentProperties, RepositoryError> {
        match supplied {
            Some(properties) => {
                debug!(artifact = %key, count = properties.len(), "Persisting supplied deployment properties");
                self.repository.save_deployment_properties(key, &properties).await?;
                Ok(properties)
            }
            None => Ok(self
                .repository
                .load_deployment_properties(key)
                .await?
                .unwrap_or_default()),
        }
    }

    pub async fn start_flags(&self, key: &ArtifactKey) -> Result<StartFlags, RepositoryError> {
        let status = self.repository.load_status_properties(key).await?.unwrap_or_default();
        Ok(StartFlags::from_status(&status))
    }

    pub async fn persist_artifact_start(&self, key: &ArtifactKey, start: bool) -> Result<(), RepositoryError> {
        self.update_status(key, |status| status.set_flag(START_ARTIFACT_ON_DEPLOYMENT, start))
            .await
    }

    pub async fn persist_component_start(
        &self,
        key: &ArtifactKey,
        component: &str,
        start: bool,
    ) -> Result<(), RepositoryError> {
        self.update_status(key, |status| status.set_flag(component_flag_key(component), start))
            .await
    }

    /// Make sure a successfully deployed artifact has a status record.
    pub async fn record_deployed(&self, key: &ArtifactKey) -> Result<(), RepositoryError> {
        let mut status = self.repository.load_status_properties(key).await?.unwrap_or_default();
        if status.get(START_ARTIFACT_ON_DEPLOYMENT).is_none() {
            status.set_flag(START_ARTIFACT_ON_DEPLOYMENT, true);
            self.repository.save_status_properties(key, &status).await?;
        }
        Ok(())
    }

    /// Drop everything persisted for the artifact (full undeploy only).
    pub async fn forget(&self, key: &ArtifactKey) -> Result<(), RepositoryError> {
        self.repository.delete(key).await
    }

    async fn update_status(
        &self,
        key: &ArtifactKey,
        update: impl FnOnce(&mut DeploymentProperties),
    ) -> Result<(), RepositoryError> {
        let mut status = self.repository.load_status_properties(key).await?.unwrap_or_default();
        update(&mut status);
        self.repository.save_status_properties(key, &status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::state_repository::InMemoryDeploymentStateRepository;

    fn store() -> DeploymentStateStore {
        DeploymentStateStore::new(Arc::new(InMemoryDeploymentStateRepository::new()))
    }

    #[tokio::test]
    async fn test_properties_reused_replaced_and_cleared() {
        let store = store();
        let key = ArtifactKey::application("app");

        let supplied = DeploymentProperties::from([("color", "blue")]);
        store.resolve_deployment_properties(&key, Some(supplied.clone())).await.unwrap();
        assert_eq!(store.resolve_deployment_properties(&key, None).await.unwrap(), supplied);

        let replaced = DeploymentProperties::from([("size", "large")]);
        store.resolve_deployment_properties(&key, Some(replaced.clone())).await.unwrap();
        assert_eq!(store.resolve_deployment_properties(&key, None).await.unwrap(), replaced);

        store
            .resolve_deployment_properties(&key, Some(DeploymentProperties::new()))
            .await
            .unwrap();
        assert!(store.resolve_deployment_properties(&key, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_flags_persisted() {
        let store = store();
        let key = ArtifactKey::application("app");
        assert!(store.start_flags(&key).await.unwrap().artifact);

        store.record_deployed(&key).await.unwrap();
        store.persist_artifact_start(&key, false).await.unwrap();
        store.persist_component_start(&key, "ingest", false).await.unwrap();
        // record_deployed never overrides an explicit stop
        store.record_deployed(&key).await.unwrap();

        let flags = store.start_flags(&key).await.unwrap();
        assert!(!flags.artifact);
        assert!(!flags.component("ingest"));

        store.forget(&key).await.unwrap();
        assert!(store.start_flags(&key).await.unwrap().artifact);
    }
}
