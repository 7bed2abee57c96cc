// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Request parameters a pointcut is evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointcutParameters {
    /// Component the request is addressed to.
    pub component: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl PointcutParameters {
    pub fn for_component(component: impl Into<String>) -> Self {
        Self {
            component: Some(component.into()),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Pure predicate deciding whether a policy applies to a request.
pub trait PolicyPointcut: Send + Sync {
    fn matches(&self, parameters: &PointcutParameters) -> bool;
}

impl<F> PolicyPointcut for F
where
    F: Fn(&PointcutParameters) -> bool + Send + Sync,
{
    fn matches(&self, parameters: &PointcutParameters) -> bool {
        self(parameters)
    }
}

/// Notified when a policy instance is applied to or removed from an application.
pub trait PolicyNotificationListener: Send + Sync {
    fn on_policy_applied(&self, application: &str, policy_id: &str);

    fn on_policy_removed(&self, application: &str, policy_id: &str);
}

/// A concrete instance of a policy template for one application.
#[derive(Clone)]
pub struct PolicyParametrization {
    pub id: String,
    pub pointcut: Arc<dyn PolicyPointcut>,
    /// Lower runs first.
    pub order: i32,
    pub parameters: BTreeMap<String, String>,
    pub config_resource: Option<PathBuf>,
    pub listeners: Vec<Arc<dyn PolicyNotificationListener>>,
    /// Re-adding an existing id with this set only changes its position.
    pub is_reorder: bool,
}

impl PolicyParametrization {
    /// Parametrization matching every request.
    pub fn new(id: impl Into<String>, order: i32) -> Self {
        Self {
            id: id.into(),
            pointcut: Arc::new(|_: &PointcutParameters| true),
            order,
            parameters: BTreeMap::new(),
            config_resource: None,
            listeners: Vec::new(),
            is_reorder: false,
        }
    }

    pub fn with_pointcut(mut self, pointcut: impl PolicyPointcut + 'static) -> Self {
        self.pointcut = Arc::new(pointcut);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_config_resource(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_resource = Some(path.into());
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn PolicyNotificationListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn reorder(mut self) -> Self {
        self.is_reorder = true;
        self
    }
}

impl fmt::Debug for PolicyParametrization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyParametrization")
            .field("id", &self.id)
            .field("order", &self.order)
            .field("parameters", &self.parameters)
            .field("config_resource", &self.config_resource)
            .field("listeners", &self.listeners.len())
            .field("is_reorder", &self.is_reorder)
            .finish()
    }
}
