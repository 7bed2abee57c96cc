// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Policy Pipeline
//!
//! Per-application ordered list of policy instances. A policy template is a
//! parsed `Policy` artifact; applying it to an application with a
//! [`PolicyParametrization`] resolves a fresh isolation region whose parent
//! is the application's domain, builds a lifecycle object through the
//! runtime and starts it.
//!
//! Parametrizations outlive the instances built from them: detaching an
//! application (redeploy) disposes the instances but keeps the list, and the
//! next attach re-applies every entry against the new region. Only
//! [`PolicyPipeline::forget_application`] drops the list.

use crate::application::executor::LifecycleExecutor;
use crate::application::isolation::IsolationResolver;
use crate::domain::artifact::{ArtifactDescriptor, ArtifactKey, ArtifactKind};
use crate::domain::descriptor::DescriptorParser;
use crate::domain::error::{LifecycleError, PolicyRegistrationError};
use crate::domain::lifecycle::{
    ArtifactLifecycle, ArtifactRuntime, LifecycleContext, LifecyclePhase, PolicyHost,
};
use crate::domain::policy::{PointcutParameters, PolicyParametrization};
use crate::domain::properties::{DeploymentProperties, StartFlags};
use crate::domain::region::IsolationRegion;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A registered policy artifact that parametrizations are built from.
#[derive(Debug, Clone)]
pub struct PolicyTemplate {
    pub descriptor: Arc<ArtifactDescriptor>,
    pub location: PathBuf,
}

/// Read-only view of an applied policy, in execution order.
#[derive(Clone)]
pub struct ParameterizedPolicy {
    pub id: String,
    pub template: String,
    pub order: i32,
    pub parameters: BTreeMap<String, String>,
    pub region: Uuid,
    pub lifecycle: Arc<dyn ArtifactLifecycle>,
}

struct PolicyInstance {
    region: Arc<IsolationRegion>,
    lifecycle: Arc<dyn ArtifactLifecycle>,
}

struct PolicyEntry {
    template: String,
    parametrization: PolicyParametrization,
    insertion: u64,
    instance: Option<PolicyInstance>,
}

/// An application able to host policies.
struct ApplicationHost {
    /// `None` while the application is detached for a redeploy.
    region: Option<Arc<IsolationRegion>>,
    configuration: DeploymentProperties,
    policies: Vec<PolicyEntry>,
}

pub struct PolicyPipeline {
    parser: Arc<dyn DescriptorParser>,
    runtime: Arc<dyn ArtifactRuntime>,
    resolver: Arc<IsolationResolver>,
    executor: LifecycleExecutor,
    isolate_from_application: bool,
    templates: RwLock<BTreeMap<String, PolicyTemplate>>,
    hosts: RwLock<BTreeMap<String, ApplicationHost>>,
    next_insertion: AtomicU64,
}

impl PolicyPipeline {
    pub fn new(
        parser: Arc<dyn DescriptorParser>,
        runtime: Arc<dyn ArtifactRuntime>,
        resolver: Arc<IsolationResolver>,
        executor: LifecycleExecutor,
        isolate_from_application: bool,
    ) -> Self {
        Self {
            parser,
            runtime,
            resolver,
            executor,
            isolate_from_application,
            templates: RwLock::new(BTreeMap::new()),
            hosts: RwLock::new(BTreeMap::new()),
            next_insertion: AtomicU64::new(0),
        }
    }

    /// Parse the policy artifact at `location` and register it as a template
    /// under its directory name.
    pub fn register_template(&self, location: &Path) -> Result<String, PolicyRegistrationError> {
        let invalid = |message: String| PolicyRegistrationError::InvalidTemplate {
            path: location.to_path_buf(),
            message,
        };
        let descriptor = self.parser.parse(location).map_err(|e| invalid(e.to_string()))?;
        if descriptor.kind != ArtifactKind::Policy {
            return Err(invalid(format!("expected a policy, found a {}", descriptor.kind)));
        }
        let id = descriptor.name.clone();
        info!(template = %id, location = %location.display(), "Registered policy template");
        self.templates.write().insert(
            id.clone(),
            PolicyTemplate {
                descriptor: Arc::new(descriptor),
                location: location.to_path_buf(),
            },
        );
        Ok(id)
    }

    pub fn template(&self, id: &str) -> Option<PolicyTemplate> {
        self.templates.read().get(id).cloned()
    }

    pub fn templates(&self) -> Vec<String> {
        self.templates.read().keys().cloned().collect()
    }

    /// Apply a policy template to an application.
    ///
    /// Re-adding an existing id fails unless the parametrization is marked as
    /// a reorder, in which case only its order changes.
    pub async fn add_policy(
        &self,
        application: &str,
        template_id: &str,
        parametrization: PolicyParametrization,
    ) -> Result<(), PolicyRegistrationError> {
        let (region, configuration) = {
            let mut hosts = self.hosts.write();
            let host = hosts
                .get_mut(application)
                .filter(|h| h.region.is_some())
                .ok_or_else(|| PolicyRegistrationError::ApplicationNotFound(application.to_string()))?;

            if let Some(existing) = host
                .policies
                .iter_mut()
                .find(|p| p.parametrization.id == parametrization.id)
            {
                if !parametrization.is_reorder {
                    return Err(PolicyRegistrationError::Duplicate {
                        application: application.to_string(),
                        policy: parametrization.id,
                    });
                }
                debug!(
                    application = %application,
                    policy = %parametrization.id,
                    from = existing.parametrization.order,
                    to = parametrization.order,
                    "Reordered policy"
                );
                existing.parametrization.order = parametrization.order;
                return Ok(());
            }
            (host.region.clone(), host.configuration.clone())
        };

        let template = self
            .template(template_id)
            .ok_or_else(|| PolicyRegistrationError::UnknownTemplate(template_id.to_string()))?;
        let region = region.ok_or_else(|| PolicyRegistrationError::ApplicationNotFound(application.to_string()))?;

        let instance = self
            .instantiate(application, &template, &parametrization, &region, &configuration)
            .await?;

        // The host may have changed while the instance was starting.
        let rejected = {
            let mut hosts = self.hosts.write();
            match hosts.get_mut(application) {
                None => Err((
                    instance,
                    PolicyRegistrationError::ApplicationNotFound(application.to_string()),
                )),
                Some(host) if host.policies.iter().any(|p| p.parametrization.id == parametrization.id) => Err((
                    instance,
                    PolicyRegistrationError::Duplicate {
                        application: application.to_string(),
                        policy: parametrization.id.clone(),
                    },
                )),
                Some(host) => {
                    info!(
                        application = %application,
                        policy = %parametrization.id,
                        order = parametrization.order,
                        "Applied policy"
                    );
                    metrics::counter!("depot_policies_applied_total").increment(1);
                    for listener in &parametrization.listeners {
                        listener.on_policy_applied(application, &parametrization.id);
                    }
                    host.policies.push(PolicyEntry {
                        template: template_id.to_string(),
                        parametrization: parametrization.clone(),
                        insertion: self.next_insertion.fetch_add(1, Ordering::SeqCst),
                        instance: Some(instance),
                    });
                    Ok(())
                }
            }
        };

        match rejected {
            Ok(()) => Ok(()),
            Err((instance, error)) => {
                self.dispose_instance(application, &parametrization.id, instance).await;
                Err(error)
            }
        }
    }

    pub async fn remove_policy(&self, application: &str, policy_id: &str) -> Result<(), PolicyRegistrationError> {
        let entry = {
            let mut hosts = self.hosts.write();
            let host = hosts
                .get_mut(application)
                .ok_or_else(|| PolicyRegistrationError::ApplicationNotFound(application.to_string()))?;
            let index = host
                .policies
                .iter()
                .position(|p| p.parametrization.id == policy_id)
                .ok_or_else(|| PolicyRegistrationError::UnknownPolicy {
                    application: application.to_string(),
                    policy: policy_id.to_string(),
                })?;
            host.policies.remove(index)
        };

        if let Some(instance) = entry.instance {
            self.dispose_instance(application, policy_id, instance).await;
        }
        for listener in &entry.parametrization.listeners {
            listener.on_policy_removed(application, policy_id);
        }
        info!(application = %application, policy = %policy_id, "Removed policy");
        Ok(())
    }

    /// Policies of `application` whose pointcut accepts `parameters`, lowest
    /// order first; equal orders keep registration order.
    pub fn find_policies(&self, application: &str, parameters: &PointcutParameters) -> Vec<ParameterizedPolicy> {
        let hosts = self.hosts.read();
        let Some(host) = hosts.get(application) else {
            return Vec::new();
        };
        let mut matching: Vec<&PolicyEntry> = host
            .policies
            .iter()
            .filter(|p| p.instance.is_some())
            .filter(|p| p.parametrization.pointcut.matches(parameters))
            .collect();
        matching.sort_by_key(|p| (p.parametrization.order, p.insertion));
        matching
            .into_iter()
            .filter_map(|p| {
                p.instance.as_ref().map(|instance| ParameterizedPolicy {
                    id: p.parametrization.id.clone(),
                    template: p.template.clone(),
                    order: p.parametrization.order,
                    parameters: p.parametrization.parameters.clone(),
                    region: instance.region.instance(),
                    lifecycle: instance.lifecycle.clone(),
                })
            })
            .collect()
    }

    /// Make a freshly deployed application available to policies and
    /// re-apply whatever was registered for it before a redeploy.
    pub async fn attach_application(
        &self,
        application: &str,
        region: Arc<IsolationRegion>,
        configuration: DeploymentProperties,
    ) {
        let pending: Vec<(String, PolicyParametrization)> = {
            let mut hosts = self.hosts.write();
            let host = hosts.entry(application.to_string()).or_insert_with(|| ApplicationHost {
                region: None,
                configuration: DeploymentProperties::new(),
                policies: Vec::new(),
            });
            host.region = Some(region.clone());
            host.configuration = configuration.clone();
            host.policies
                .iter()
                .filter(|p| p.instance.is_none())
                .map(|p| (p.template.clone(), p.parametrization.clone()))
                .collect()
        };

        for (template_id, parametrization) in pending {
            let result = match self.template(&template_id) {
                Some(template) => {
                    self.instantiate(application, &template, &parametrization, &region, &configuration)
                        .await
                }
                None => Err(PolicyRegistrationError::UnknownTemplate(template_id.clone())),
            };

            let mut hosts = self.hosts.write();
            let Some(host) = hosts.get_mut(application) else {
                break;
            };
            match result {
                Ok(instance) => {
                    if let Some(entry) = host
                        .policies
                        .iter_mut()
                        .find(|p| p.parametrization.id == parametrization.id)
                    {
                        entry.instance = Some(instance);
                    }
                    info!(application = %application, policy = %parametrization.id, "Re-applied policy");
                    for listener in &parametrization.listeners {
                        listener.on_policy_applied(application, &parametrization.id);
                    }
                }
                Err(e) => {
                    error!(
                        application = %application,
                        policy = %parametrization.id,
                        error = %e,
                        "Failed to re-apply policy, dropping it"
                    );
                    host.policies.retain(|p| p.parametrization.id != parametrization.id);
                }
            }
        }
    }

    /// Dispose every policy instance of `application` but keep their
    /// parametrizations for the next attach.
    pub async fn detach_application(&self, application: &str) {
        let instances: Vec<(String, PolicyInstance)> = {
            let mut hosts = self.hosts.write();
            let Some(host) = hosts.get_mut(application) else {
                return;
            };
            host.region = None;
            host.policies
                .iter_mut()
                .filter_map(|p| p.instance.take().map(|i| (p.parametrization.id.clone(), i)))
                .collect()
        };
        for (policy, instance) in instances {
            self.dispose_instance(application, &policy, instance).await;
        }
    }

    /// Dispose and drop every policy of `application`.
    pub async fn forget_application(&self, application: &str) {
        let Some(host) = self.hosts.write().remove(application) else {
            return;
        };
        for entry in host.policies {
            if let Some(instance) = entry.instance {
                self.dispose_instance(application, &entry.parametrization.id, instance)
                    .await;
            }
            for listener in &entry.parametrization.listeners {
                listener.on_policy_removed(application, &entry.parametrization.id);
            }
        }
    }

    async fn instantiate(
        &self,
        application: &str,
        template: &PolicyTemplate,
        parametrization: &PolicyParametrization,
        application_region: &Arc<IsolationRegion>,
        configuration: &DeploymentProperties,
    ) -> Result<PolicyInstance, PolicyRegistrationError> {
        let policy = parametrization.id.clone();
        let parent = application_region.parent().cloned();
        let region = Arc::new(
            self.resolver
                .resolve(&template.descriptor, parent)
                .map_err(|source| PolicyRegistrationError::Resolution {
                    policy: policy.clone(),
                    source,
                })?,
        );

        let host = PolicyHost {
            application: application.to_string(),
            configuration: (!self.isolate_from_application).then(|| configuration.clone()),
        };
        let context = LifecycleContext {
            descriptor: template.descriptor.clone(),
            location: template.location.clone(),
            region: region.clone(),
            deployment_properties: parametrization
                .parameters
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            start_flags: StartFlags::default(),
            host: Some(host),
        };
        let lifecycle_error = |source: LifecycleError| PolicyRegistrationError::Lifecycle {
            policy: policy.clone(),
            source,
        };

        let lifecycle = self.runtime.create(context).map_err(lifecycle_error)?;
        let key = ArtifactKey::policy(format!("{}/{}", application, policy));
        for phase in [LifecyclePhase::Init, LifecyclePhase::Start] {
            if let Err(e) = self.executor.dispatch(&key, phase, lifecycle.clone()).await {
                if let Err(dispose) = self
                    .executor
                    .dispatch(&key, LifecyclePhase::Dispose, lifecycle.clone())
                    .await
                {
                    warn!(policy = %key, error = %dispose, "Failed to dispose policy after failed {}", phase);
                }
                return Err(lifecycle_error(e));
            }
        }
        Ok(PolicyInstance { region, lifecycle })
    }

    async fn dispose_instance(&self, application: &str, policy: &str, instance: PolicyInstance) {
        let key = ArtifactKey::policy(format!("{}/{}", application, policy));
        for phase in [LifecyclePhase::Stop, LifecyclePhase::Dispose] {
            if let Err(e) = self
                .executor
                .dispatch(&key, phase, instance.lifecycle.clone())
                .await
            {
                warn!(policy = %key, phase = %phase, error = %e, "Policy cleanup step failed");
            }
        }
    }
}
