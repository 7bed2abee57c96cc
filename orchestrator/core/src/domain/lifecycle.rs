// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lifecycle contract consumed from the runtime that executes artifacts.
//!
//! The deployment engine never runs business logic itself. It asks an
//! [`ArtifactRuntime`] for a lifecycle object per deployed instance and drives
//! it through `init → start ⇄ stop → dispose`.

use crate::domain::artifact::{ArtifactDescriptor, ArtifactStatus};
use crate::domain::error::LifecycleError;
use crate::domain::properties::{DeploymentProperties, StartFlags};
use crate::domain::region::IsolationRegion;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

#[async_trait]
pub trait ArtifactLifecycle: Send + Sync {
    async fn init(&self) -> Result<(), LifecycleError>;

    async fn start(&self) -> Result<(), LifecycleError>;

    async fn stop(&self) -> Result<(), LifecycleError>;

    async fn dispose(&self) -> Result<(), LifecycleError>;

    fn status(&self) -> ArtifactStatus;

    async fn start_component(&self, component: &str) -> Result<(), LifecycleError> {
        Err(LifecycleError::UnknownComponent(component.to_string()))
    }

    async fn stop_component(&self, component: &str) -> Result<(), LifecycleError> {
        Err(LifecycleError::UnknownComponent(component.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Init,
    Start,
    Stop,
    Dispose,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecyclePhase::Init => "init",
            LifecyclePhase::Start => "start",
            LifecyclePhase::Stop => "stop",
            LifecyclePhase::Dispose => "dispose",
        };
        f.write_str(s)
    }
}

/// The application a policy instance is applied to.
#[derive(Debug, Clone)]
pub struct PolicyHost {
    pub application: String,
    /// Hosting application's configuration, hidden for isolated policies.
    pub configuration: Option<DeploymentProperties>,
}

/// Everything a runtime needs to build a lifecycle object for one instance.
#[derive(Debug, Clone)]
pub struct LifecycleContext {
    pub descriptor: Arc<ArtifactDescriptor>,
    pub location: PathBuf,
    pub region: Arc<IsolationRegion>,
    pub deployment_properties: DeploymentProperties,
    pub start_flags: StartFlags,
    pub host: Option<PolicyHost>,
}

/// Factory for lifecycle objects, implemented by the execution runtime.
pub trait ArtifactRuntime: Send + Sync {
    fn create(&self, context: LifecycleContext) -> Result<Arc<dyn ArtifactLifecycle>, LifecycleError>;
}
