// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Artifact types, the lifecycle and parsing contracts consumed from external
//! collaborators, and the error taxonomy shared by every layer.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure types and traits, no I/O besides configuration loading

pub mod artifact;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod path_sanitizer;
pub mod policy;
pub mod properties;
pub mod region;
pub mod repository;
