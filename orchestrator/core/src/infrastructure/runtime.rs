// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Logging Runtime
//!
//! Stand-in execution runtime for hosts that only need the deployment engine:
//! each lifecycle object records its status and logs every transition. The
//! `depot` binary uses it so artifacts can be deployed, started and stopped
//! without a real execution engine behind them.

use crate::domain::artifact::{ArtifactKey, ArtifactStatus};
use crate::domain::error::LifecycleError;
use crate::domain::lifecycle::{ArtifactLifecycle, ArtifactRuntime, LifecycleContext};
use crate::domain::properties::StartFlags;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Default, Clone)]
pub struct LoggingRuntime;

impl LoggingRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl ArtifactRuntime for LoggingRuntime {
    fn create(&self, context: LifecycleContext) -> Result<Arc<dyn ArtifactLifecycle>, LifecycleError> {
        let key = context.descriptor.key();
        let components = context
            .descriptor
            .components
            .iter()
            .map(|c| (c.clone(), false))
            .collect();
        info!(
            artifact = %key,
            location = %context.location.display(),
            region = %context.region.instance(),
            properties = context.deployment_properties.len(),
            "Created artifact instance"
        );
        Ok(Arc::new(LoggedLifecycle {
            key,
            start_components: context.start_flags.clone(),
            state: Mutex::new(LoggedState {
                status: ArtifactStatus::Created,
                components,
            }),
        }))
    }
}

struct LoggedState {
    status: ArtifactStatus,
    components: BTreeMap<String, bool>,
}

pub struct LoggedLifecycle {
    key: ArtifactKey,
    start_components: StartFlags,
    state: Mutex<LoggedState>,
}

impl LoggedLifecycle {
    fn transition(&self, next: ArtifactStatus) -> Result<(), String> {
        let mut state = self.state.lock();
        if state.status == next {
            return Ok(());
        }
        if !state.status.can_transition_to(next) {
            return Err(format!("{} cannot move from {} to {}", self.key, state.status, next));
        }
        state.status = next;
        Ok(())
    }
}

#[async_trait]
impl ArtifactLifecycle for LoggedLifecycle {
    async fn init(&self) -> Result<(), LifecycleError> {
        info!(artifact = %self.key, "Initialised");
        Ok(())
    }

    async fn start(&self) -> Result<(), LifecycleError> {
        self.transition(ArtifactStatus::Started).map_err(LifecycleError::Start)?;
        let mut state = self.state.lock();
        for (name, running) in state.components.iter_mut() {
            *running = self.start_components.component(name);
        }
        info!(artifact = %self.key, "Started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), LifecycleError> {
        self.transition(ArtifactStatus::Stopped).map_err(LifecycleError::Stop)?;
        self.state.lock().components.values_mut().for_each(|running| *running = false);
        info!(artifact = %self.key, "Stopped");
        Ok(())
    }

    async fn dispose(&self) -> Result<(), LifecycleError> {
        self.state.lock().status = ArtifactStatus::Destroyed;
        info!(artifact = %self.key, "Disposed");
        Ok(())
    }

    fn status(&self) -> ArtifactStatus {
        self.state.lock().status
    }

    async fn start_component(&self, component: &str) -> Result<(), LifecycleError> {
        let mut state = self.state.lock();
        let running = state
            .components
            .get_mut(component)
            .ok_or_else(|| LifecycleError::UnknownComponent(component.to_string()))?;
        *running = true;
        info!(artifact = %self.key, component = %component, "Component started");
        Ok(())
    }

    async fn stop_component(&self, component: &str) -> Result<(), LifecycleError> {
        let mut state = self.state.lock();
        let running = state
            .components
            .get_mut(component)
            .ok_or_else(|| LifecycleError::UnknownComponent(component.to_string()))?;
        *running = false;
        info!(artifact = %self.key, component = %component, "Component stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::isolation::IsolationResolver;
    use crate::domain::artifact::{ArtifactDescriptor, ArtifactKind, BundleCoordinates};
    use crate::domain::properties::DeploymentProperties;
    use semver::Version;
    use std::path::PathBuf;

    fn context() -> LifecycleContext {
        let mut descriptor = ArtifactDescriptor::new(
            ArtifactKind::Application,
            "orders",
            BundleCoordinates::new("com.acme", "orders", Version::new(1, 0, 0)),
        );
        descriptor.components = vec!["ingest".to_string()];
        let region = IsolationResolver::new(Vec::new(), Vec::new())
            .resolve(&descriptor, None)
            .unwrap();
        LifecycleContext {
            descriptor: Arc::new(descriptor),
            location: PathBuf::from("apps/orders"),
            region: Arc::new(region),
            deployment_properties: DeploymentProperties::new(),
            start_flags: StartFlags::default(),
            host: None,
        }
    }

    #[tokio::test]
    async fn test_logged_lifecycle_transitions() {
        let lifecycle = LoggingRuntime::new().create(context()).unwrap();
        assert_eq!(lifecycle.status(), ArtifactStatus::Created);
        assert!(lifecycle.stop().await.is_err());

        lifecycle.init().await.unwrap();
        lifecycle.start().await.unwrap();
        assert_eq!(lifecycle.status(), ArtifactStatus::Started);
        lifecycle.stop_component("ingest").await.unwrap();
        assert!(matches!(
            lifecycle.start_component("missing").await,
            Err(LifecycleError::UnknownComponent(_))
        ));

        lifecycle.stop().await.unwrap();
        lifecycle.dispose().await.unwrap();
        assert_eq!(lifecycle.status(), ArtifactStatus::Destroyed);
    }
}
