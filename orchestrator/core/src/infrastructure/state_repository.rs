// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Deployment State Repositories
//!
//! **File-backed:** one directory per artifact under the state root:
//!
//! ```text
//! <state>/<kind>/<name>/deployment.properties
//! <state>/<kind>/<name>/artifact-status.properties
//! ```
//!
//! Files are written to a temporary sibling and renamed into place, so a
//! crash mid-write leaves the previous version intact.
//!
//! **In-memory:** same contract, for tests and embedded use.

use crate::domain::artifact::ArtifactKey;
use crate::domain::properties::DeploymentProperties;
use crate::domain::repository::{DeploymentStateRepository, RepositoryError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEPLOYMENT_PROPERTIES_FILE: &str = "deployment.properties";
const STATUS_PROPERTIES_FILE: &str = "artifact-status.properties";

pub struct FileDeploymentStateRepository {
    root: PathBuf,
}

impl FileDeploymentStateRepository {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            RepositoryError::Storage(format!(
                "Failed to create state directory {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    fn artifact_dir(&self, key: &ArtifactKey) -> PathBuf {
        self.root.join(key.kind.as_str()).join(&key.name)
    }

    fn read(&self, path: &Path) -> Result<Option<DeploymentProperties>, RepositoryError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Some(DeploymentProperties::parse(&text))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RepositoryError::Storage(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn write(&self, key: &ArtifactKey, file: &str, properties: &DeploymentProperties) -> Result<(), RepositoryError> {
        let dir = self.artifact_dir(key);
        std::fs::create_dir_all(&dir).map_err(|e| {
            RepositoryError::Storage(format!("Failed to create {}: {}", dir.display(), e))
        })?;

        let mut staged = tempfile::Builder::new()
            .prefix(".props-")
            .tempfile_in(&dir)
            .map_err(|e| RepositoryError::Storage(format!("Failed to stage {}: {}", file, e)))?;
        staged
            .write_all(properties.to_properties_string().as_bytes())
            .and_then(|_| staged.as_file().sync_all())
            .map_err(|e| RepositoryError::Storage(format!("Failed to write {}: {}", file, e)))?;

        let target = dir.join(file);
        staged.persist(&target).map_err(|e| {
            RepositoryError::Storage(format!("Failed to replace {}: {}", target.display(), e.error))
        })?;
        Ok(())
    }
}

#[async_trait]
impl DeploymentStateRepository for FileDeploymentStateRepository {
    async fn load_deployment_properties(
        &self,
        key: &ArtifactKey,
    ) -> Result<Option<DeploymentProperties>, RepositoryError> {
        self.read(&self.artifact_dir(key).join(DEPLOYMENT_PROPERTIES_FILE))
    }

    async fn save_deployment_properties(
        &self,
        key: &ArtifactKey,
        properties: &DeploymentProperties,
    ) -> Result<(), RepositoryError> {
        self.write(key, DEPLOYMENT_PROPERTIES_FILE, properties)
    }

    async fn load_status_properties(
        &self,
        key: &ArtifactKey,
    ) -> Result<Option<DeploymentProperties>, RepositoryError> {
        self.read(&self.artifact_dir(key).join(STATUS_PROPERTIES_FILE))
    }

    async fn save_status_properties(
        &self,
        key: &ArtifactKey,
        properties: &DeploymentProperties,
    ) -> Result<(), RepositoryError> {
        self.write(key, STATUS_PROPERTIES_FILE, properties)
    }

    async fn delete(&self, key: &ArtifactKey) -> Result<(), RepositoryError> {
        let dir = self.artifact_dir(key);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RepositoryError::Storage(format!(
                "Failed to remove {}: {}",
                dir.display(),
                e
            ))),
        }
    }
}

#[derive(Default)]
struct StoredState {
    deployment: Option<DeploymentProperties>,
    status: Option<DeploymentProperties>,
}

#[derive(Clone, Default)]
pub struct InMemoryDeploymentStateRepository {
    state: Arc<Mutex<HashMap<ArtifactKey, StoredState>>>,
}

impl InMemoryDeploymentStateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentStateRepository for InMemoryDeploymentStateRepository {
    async fn load_deployment_properties(
        &self,
        key: &ArtifactKey,
    ) -> Result<Option<DeploymentProperties>, RepositoryError> {
        Ok(self.state.lock().get(key).and_then(|s| s.deployment.clone()))
    }

    async fn save_deployment_properties(
        &self,
        key: &ArtifactKey,
        properties: &DeploymentProperties,
    ) -> Result<(), RepositoryError> {
        self.state.lock().entry(key.clone()).or_default().deployment = Some(properties.clone());
        Ok(())
    }

    async fn load_status_properties(
        &self,
        key: &ArtifactKey,
    ) -> Result<Option<DeploymentProperties>, RepositoryError> {
        Ok(self.state.lock().get(key).and_then(|s| s.status.clone()))
    }

    async fn save_status_properties(
        &self,
        key: &ArtifactKey,
        properties: &DeploymentProperties,
    ) -> Result<(), RepositoryError> {
        self.state.lock().entry(key.clone()).or_default().status = Some(properties.clone());
        Ok(())
    }

    async fn delete(&self, key: &ArtifactKey) -> Result<(), RepositoryError> {
        self.state.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::properties::START_ARTIFACT_ON_DEPLOYMENT;

    #[tokio::test]
    async fn test_file_repository_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let key = ArtifactKey::application("orders");
        {
            let repo = FileDeploymentStateRepository::new(dir.path()).unwrap();
            repo.save_deployment_properties(&key, &DeploymentProperties::from([("db.url", "jdbc:h2")]))
                .await
                .unwrap();
            repo.save_status_properties(&key, &DeploymentProperties::from([(START_ARTIFACT_ON_DEPLOYMENT, "false")]))
                .await
                .unwrap();
        }

        let repo = FileDeploymentStateRepository::new(dir.path()).unwrap();
        let props = repo.load_deployment_properties(&key).await.unwrap().unwrap();
        assert_eq!(props.get("db.url"), Some("jdbc:h2"));
        let status = repo.load_status_properties(&key).await.unwrap().unwrap();
        assert_eq!(status.get(START_ARTIFACT_ON_DEPLOYMENT), Some("false"));

        let on_disk = dir.path().join("application/orders/artifact-status.properties");
        assert!(std::fs::read_to_string(on_disk).unwrap().contains("startArtifactOnDeployment=false"));

        repo.delete(&key).await.unwrap();
        assert!(repo.load_status_properties(&key).await.unwrap().is_none());
        repo.delete(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_kinds_are_separate() {
        let repo = InMemoryDeploymentStateRepository::new();
        repo.save_deployment_properties(&ArtifactKey::domain("x"), &DeploymentProperties::from([("a", "1")]))
            .await
            .unwrap();
        assert!(repo
            .load_deployment_properties(&ArtifactKey::application("x"))
            .await
            .unwrap()
            .is_none());
    }
}
