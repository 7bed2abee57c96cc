// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::artifact::ArtifactDescriptor;
use crate::domain::error::DescriptorError;
use std::path::{Path, PathBuf};

/// Turns an exploded artifact directory into a typed descriptor.
pub trait DescriptorParser: Send + Sync {
    fn parse(&self, artifact_root: &Path) -> Result<ArtifactDescriptor, DescriptorError>;

    /// Primary configuration resource of the artifact, always tracked for redeploy.
    fn descriptor_file(&self, artifact_root: &Path) -> PathBuf;
}
