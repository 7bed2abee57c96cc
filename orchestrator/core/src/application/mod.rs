// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application
//!
//! The deployment engine: installer, graph, quarantine, isolation, lifecycle
//! execution, policy pipeline, watcher and the service facade that wires them.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Orchestrates domain types behind the deployment lock

pub mod deployer;
pub mod executor;
pub mod graph;
pub mod installer;
pub mod isolation;
pub mod listeners;
pub mod policy_pipeline;
pub mod quarantine;
pub mod scheduler;
pub mod service;
pub mod state_store;

pub use deployer::{ArtifactDeployer, TeardownMode};
pub use graph::{ArtifactGraph, ArtifactInfo};
pub use policy_pipeline::{ParameterizedPolicy, PolicyPipeline};
pub use scheduler::{DirectoryWatcher, TickReport};
pub use service::{DeploymentService, ZombieMap};
