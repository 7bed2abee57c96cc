// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lib
//!
//! Deployment engine for the depot artifact orchestrator.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Watches the domains and applications roots, deploys what it
//!   finds and exposes the same operations to clients through
//!   [`application::DeploymentService`]

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
