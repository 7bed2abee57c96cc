// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Path Sanitizer Domain Service
//!
//! Validates artifact names before they become directory or file names inside
//! a watched root, and keeps descriptor-declared resource paths inside the
//! artifact they belong to.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Name and path validation for the installer and deployer

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Path sanitization errors
#[derive(Debug, Error)]
pub enum PathSanitizerError {
    #[error("Path traversal attempt detected: {0}")]
    PathTraversal(String),

    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Path too long: {0}")]
    PathTooLong(String),
}

/// Path sanitizer domain service
///
/// # Guarantees
/// - Artifact names are a single path segment of `[A-Za-z0-9._-]`
/// - Names never start with `.` (reserved for staging entries)
/// - Resource paths are relative and contain no `..` components
pub struct PathSanitizer {
    /// Maximum allowed name length (default: 255)
    max_name_len: usize,
}

impl PathSanitizer {
    pub fn new() -> Self {
        Self { max_name_len: 255 }
    }

    pub fn with_max_length(max_name_len: usize) -> Self {
        Self { max_name_len }
    }

    /// Validate an artifact name used as a directory/file stem in a watched root.
    pub fn validate_name(&self, name: &str) -> Result<(), PathSanitizerError> {
        let invalid = |reason: &str| PathSanitizerError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("name is empty"));
        }
        if name.len() > self.max_name_len {
            return Err(PathSanitizerError::PathTooLong(name.to_string()));
        }
        if name == "." || name == ".." || name.contains("..") {
            tracing::warn!(name = %name, "Path traversal attempt detected in artifact name");
            return Err(PathSanitizerError::PathTraversal(name.to_string()));
        }
        if name.starts_with('.') {
            return Err(invalid("names starting with '.' are reserved"));
        }
        if let Some(c) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(invalid(&format!("character {:?} is not allowed", c)));
        }
        Ok(())
    }

    /// Join a descriptor-declared relative resource onto the artifact root,
    /// refusing anything that could escape it.
    pub fn resolve_within(&self, root: &Path, relative: &Path) -> Result<PathBuf, PathSanitizerError> {
        let shown = relative.display().to_string();
        if shown.len() > 4096 {
            return Err(PathSanitizerError::PathTooLong(shown));
        }
        let mut resolved = root.to_path_buf();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    tracing::warn!(path = %shown, "Resource path escapes artifact root");
                    return Err(PathSanitizerError::PathTraversal(shown));
                }
            }
        }
        Ok(resolved)
    }
}

impl Default for PathSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        let sanitizer = PathSanitizer::new();
        assert!(sanitizer.validate_name("empty-app").is_ok());
        assert!(sanitizer.validate_name("orders_v1.2").is_ok());
    }

    #[test]
    fn test_reject_traversal_and_separators() {
        let sanitizer = PathSanitizer::new();
        assert!(matches!(
            sanitizer.validate_name("..").unwrap_err(),
            PathSanitizerError::PathTraversal(_)
        ));
        assert!(sanitizer.validate_name("a/b").is_err());
        assert!(sanitizer.validate_name("a\\b").is_err());
        assert!(sanitizer.validate_name(".hidden").is_err());
        assert!(sanitizer.validate_name("with space").is_err());
        assert!(sanitizer.validate_name("").is_err());
    }

    #[test]
    fn test_name_too_long() {
        let sanitizer = PathSanitizer::with_max_length(5);
        assert!(matches!(
            sanitizer.validate_name("abcdefg").unwrap_err(),
            PathSanitizerError::PathTooLong(_)
        ));
    }

    #[test]
    fn test_resolve_within() {
        let sanitizer = PathSanitizer::new();
        let root = Path::new("/apps/orders");
        assert_eq!(
            sanitizer.resolve_within(root, Path::new("./conf/app.yaml")).unwrap(),
            PathBuf::from("/apps/orders/conf/app.yaml")
        );
        assert!(sanitizer.resolve_within(root, Path::new("../other/app.yaml")).is_err());
        assert!(sanitizer.resolve_within(root, Path::new("/etc/passwd")).is_err());
    }
}
