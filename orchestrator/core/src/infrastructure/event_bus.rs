// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Deployment Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Registered as a deployment listener, it turns every callback into a
// serialisable DeploymentEvent for the CLI and other observers.
//
// In-memory only: events are lost on restart.

use crate::domain::artifact::ArtifactKey;
use crate::domain::events::{DeploymentEvent, DeploymentListener};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event bus for publishing and subscribing to deployment events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DeploymentEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish a deployment event to all subscribers
    pub fn publish(&self, event: DeploymentEvent) {
        debug!("Publishing event: {:?}", event);

        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all deployment events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe and filter for a single artifact
    pub fn subscribe_artifact(&self, artifact: ArtifactKey) -> ArtifactEventReceiver {
        ArtifactEventReceiver {
            receiver: self.sender.subscribe(),
            artifact,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl DeploymentListener for EventBus {
    fn on_deployment_start(&self, artifact: &ArtifactKey) {
        self.publish(DeploymentEvent::DeploymentStarted {
            artifact: artifact.clone(),
            started_at: Utc::now(),
        });
    }

    fn on_deployment_success(&self, artifact: &ArtifactKey) {
        self.publish(DeploymentEvent::DeploymentSucceeded {
            artifact: artifact.clone(),
            deployed_at: Utc::now(),
        });
    }

    fn on_deployment_failure(&self, artifact: &ArtifactKey, error: &str) {
        self.publish(DeploymentEvent::DeploymentFailed {
            artifact: artifact.clone(),
            error: error.to_string(),
            failed_at: Utc::now(),
        });
    }

    fn on_undeployment_start(&self, artifact: &ArtifactKey) {
        self.publish(DeploymentEvent::UndeploymentStarted {
            artifact: artifact.clone(),
            started_at: Utc::now(),
        });
    }

    fn on_undeployment_success(&self, artifact: &ArtifactKey) {
        self.publish(DeploymentEvent::UndeploymentSucceeded {
            artifact: artifact.clone(),
            undeployed_at: Utc::now(),
        });
    }

    fn on_undeployment_failure(&self, artifact: &ArtifactKey, error: &str) {
        self.publish(DeploymentEvent::UndeploymentFailed {
            artifact: artifact.clone(),
            error: error.to_string(),
            failed_at: Utc::now(),
        });
    }

    fn on_redeployment_start(&self, artifact: &ArtifactKey) {
        self.publish(DeploymentEvent::RedeploymentStarted {
            artifact: artifact.clone(),
            started_at: Utc::now(),
        });
    }

    fn on_redeployment_success(&self, artifact: &ArtifactKey) {
        self.publish(DeploymentEvent::RedeploymentSucceeded {
            artifact: artifact.clone(),
            redeployed_at: Utc::now(),
        });
    }

    fn on_redeployment_failure(&self, artifact: &ArtifactKey, error: &str) {
        self.publish(DeploymentEvent::RedeploymentFailed {
            artifact: artifact.clone(),
            error: error.to_string(),
            failed_at: Utc::now(),
        });
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all deployment events
pub struct EventReceiver {
    receiver: broadcast::Receiver<DeploymentEvent>,
}

impl EventReceiver {
    /// Receive the next event (blocks until event is available)
    pub async fn recv(&mut self) -> Result<DeploymentEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<DeploymentEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for one artifact's events (filtered)
pub struct ArtifactEventReceiver {
    receiver: broadcast::Receiver<DeploymentEvent>,
    artifact: ArtifactKey,
}

impl ArtifactEventReceiver {
    /// Receive the next event for the artifact, skipping all others
    pub async fn recv(&mut self) -> Result<DeploymentEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.artifact() == &self.artifact {
                return Ok(event);
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listener_callbacks_become_events() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();
        let key = ArtifactKey::application("orders");

        event_bus.on_deployment_failure(&key, "descriptor malformed");

        match receiver.recv().await.unwrap() {
            DeploymentEvent::DeploymentFailed { artifact, error, .. } => {
                assert_eq!(artifact, key);
                assert_eq!(error, "descriptor malformed");
            }
            other => panic!("Wrong event type received: {:?}", other),
        }
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Empty)));
    }

    #[tokio::test]
    async fn test_artifact_event_filtering() {
        let event_bus = EventBus::new(10);
        let key = ArtifactKey::domain("shared");
        let mut receiver = event_bus.subscribe_artifact(key.clone());

        event_bus.on_deployment_start(&ArtifactKey::application("shared"));
        event_bus.on_deployment_success(&key);

        let received = receiver.recv().await.unwrap();
        assert!(matches!(received, DeploymentEvent::DeploymentSucceeded { .. }));
        assert_eq!(received.artifact(), &key);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();
        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.on_undeployment_success(&ArtifactKey::application("app"));

        let _ = receiver1.recv().await.unwrap();
        let _ = receiver2.recv().await.unwrap();
    }
}
