// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Bounded worker pool for lifecycle transitions.
//!
//! The deployer decides what to run while holding the deployment lock and
//! hands the actual `init`/`start`/`stop`/`dispose` call to this pool, then
//! awaits the result. A panicking lifecycle task is reported as
//! [`LifecycleError::Aborted`] instead of tearing down the caller.

use crate::domain::artifact::ArtifactKey;
use crate::domain::error::LifecycleError;
use crate::domain::lifecycle::{ArtifactLifecycle, LifecyclePhase};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct LifecycleExecutor {
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl LifecycleExecutor {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tracker: TaskTracker::new(),
        }
    }

    /// Run one phase on the pool and wait for it.
    pub async fn dispatch(
        &self,
        key: &ArtifactKey,
        phase: LifecyclePhase,
        lifecycle: Arc<dyn ArtifactLifecycle>,
    ) -> Result<(), LifecycleError> {
        let permits = self.permits.clone();
        let task_key = key.clone();
        let handle = self.tracker.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| LifecycleError::Aborted("worker pool closed".to_string()))?;
            debug!(artifact = %task_key, phase = %phase, "Running lifecycle phase");
            match phase {
                LifecyclePhase::Init => lifecycle.init().await,
                LifecyclePhase::Start => lifecycle.start().await,
                LifecyclePhase::Stop => lifecycle.stop().await,
                LifecyclePhase::Dispose => lifecycle.dispose().await,
            }
        });

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                warn!(artifact = %key, phase = %phase, error = %e, "Lifecycle task did not complete");
                Err(LifecycleError::Aborted(format!("{} of {}: {}", phase, key, e)))
            }
        }
    }

    /// Run one phase on several independent artifacts concurrently.
    pub async fn dispatch_all(
        &self,
        phase: LifecyclePhase,
        targets: Vec<(ArtifactKey, Arc<dyn ArtifactLifecycle>)>,
    ) -> Vec<(ArtifactKey, Result<(), LifecycleError>)> {
        let runs = targets.into_iter().map(|(key, lifecycle)| async move {
            let result = self.dispatch(&key, phase, lifecycle).await;
            (key, result)
        });
        join_all(runs).await
    }

    /// Wait for every dispatched task to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::artifact::ArtifactStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Slow {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ArtifactLifecycle for Slow {
        async fn init(&self) -> Result<(), LifecycleError> {
            Ok(())
        }

        async fn start(&self) -> Result<(), LifecycleError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<(), LifecycleError> {
            panic!("stop exploded");
        }

        async fn dispose(&self) -> Result<(), LifecycleError> {
            Err(LifecycleError::Dispose("busy".to_string()))
        }

        fn status(&self) -> ArtifactStatus {
            ArtifactStatus::Created
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let executor = LifecycleExecutor::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let targets = (0..6)
            .map(|i| {
                let lifecycle: Arc<dyn ArtifactLifecycle> = Arc::new(Slow {
                    running: running.clone(),
                    peak: peak.clone(),
                });
                (ArtifactKey::application(format!("app-{}", i)), lifecycle)
            })
            .collect();

        let results = executor.dispatch_all(LifecyclePhase::Start, targets).await;
        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_errors_and_panics_are_reported() {
        let executor = LifecycleExecutor::new(1);
        let lifecycle: Arc<dyn ArtifactLifecycle> = Arc::new(Slow {
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        });
        let key = ArtifactKey::application("app");

        let stop = executor.dispatch(&key, LifecyclePhase::Stop, lifecycle.clone()).await;
        assert!(matches!(stop, Err(LifecycleError::Aborted(_))));

        let dispose = executor.dispatch(&key, LifecyclePhase::Dispose, lifecycle).await;
        assert!(matches!(dispose, Err(LifecycleError::Dispose(_))));

        executor.drain().await;
    }
}
