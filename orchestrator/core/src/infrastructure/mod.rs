// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod descriptor_parser;
pub mod event_bus;
pub mod runtime;
pub mod state_repository;

pub use descriptor_parser::YamlDescriptorParser;
pub use event_bus::{EventBus, EventReceiver};
pub use runtime::LoggingRuntime;
pub use state_repository::{FileDeploymentStateRepository, InMemoryDeploymentStateRepository};
