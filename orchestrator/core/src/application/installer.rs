// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Atomic Installer
//!
//! Materializes artifacts inside one watched root without ever exposing a
//! partially written entry to a concurrent scan.
//!
//! **Staging:**
//! Every copy or extraction lands in a hidden sibling (`.incoming-*`,
//! `.explode-*`) created inside the target root, so the final step is a
//! single `rename` on the same filesystem. Hidden entries are never reported
//! by [`ArtifactInstaller::scan`].
//!
//! **Replacement:**
//! An existing directory of the same name is first renamed to a hidden trash
//! name, the staged directory is renamed into place, and only then is the
//! trash removed. If the second rename fails the previous directory is moved
//! back, leaving the root exactly as it was.

use crate::domain::error::InstallError;
use crate::domain::path_sanitizer::PathSanitizer;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Entries of a watched root, keyed by artifact name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RootListing {
    pub archives: BTreeMap<String, PathBuf>,
    pub exploded: BTreeMap<String, PathBuf>,
}

pub struct ArtifactInstaller {
    root: PathBuf,
    archive_extension: String,
    anchor_suffix: String,
    sanitizer: PathSanitizer,
}

fn io_error(path: &Path, e: io::Error) -> InstallError {
    InstallError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

impl ArtifactInstaller {
    /// Create an installer for `root`, creating the directory if needed.
    pub fn new(
        root: impl Into<PathBuf>,
        archive_extension: impl Into<String>,
        anchor_suffix: impl Into<String>,
    ) -> Result<Self, InstallError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| io_error(&root, e))?;
        Ok(Self {
            root,
            archive_extension: archive_extension.into(),
            anchor_suffix: anchor_suffix.into(),
            sanitizer: PathSanitizer::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn archive_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.{}", name, self.archive_extension))
    }

    pub fn anchor_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}{}", name, self.anchor_suffix))
    }

    pub fn is_archive(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some(self.archive_extension.as_str())
    }

    /// Artifact name derived from a source path (archive stem or directory name).
    pub fn name_for_source(&self, source: &Path) -> Option<String> {
        let name = if self.is_archive(source) {
            source.file_stem()
        } else {
            source.file_name()
        };
        name.and_then(|n| n.to_str()).map(str::to_string)
    }

    fn validate_name(&self, name: &str) -> Result<(), InstallError> {
        self.sanitizer
            .validate_name(name)
            .map_err(|e| InstallError::InvalidName {
                name: name.to_string(),
                reason: e.to_string(),
            })
    }

    /// Install `source` (a packed archive or an exploded directory) into the
    /// root under `desired_name`, or the name derived from the source.
    ///
    /// Archives are copied as `<name>.<ext>`; directories are copied as `<name>/`.
    pub fn install(&self, source: &Path, desired_name: Option<&str>) -> Result<PathBuf, InstallError> {
        if !source.exists() {
            return Err(InstallError::SourceNotFound(source.to_path_buf()));
        }
        let name = match desired_name {
            Some(name) => name.to_string(),
            None => self
                .name_for_source(source)
                .ok_or_else(|| InstallError::UnsupportedSource(source.display().to_string()))?,
        };
        self.validate_name(&name)?;

        if source.is_dir() {
            self.install_directory(source, &name)
        } else if self.is_archive(source) {
            self.install_archive(source, &name)
        } else {
            Err(InstallError::UnsupportedSource(source.display().to_string()))
        }
    }

    fn install_archive(&self, source: &Path, name: &str) -> Result<PathBuf, InstallError> {
        let target = self.archive_path(name);
        if same_file(source, &target) {
            return Ok(target);
        }

        let mut staged = tempfile::Builder::new()
            .prefix(".incoming-")
            .suffix(".tmp")
            .tempfile_in(&self.root)
            .map_err(|e| io_error(&self.root, e))?;
        let mut input = File::open(source).map_err(|e| io_error(source, e))?;
        io::copy(&mut input, staged.as_file_mut()).map_err(|e| InstallError::Copy {
            path: source.to_path_buf(),
            message: e.to_string(),
        })?;
        staged
            .as_file()
            .sync_all()
            .map_err(|e| io_error(staged.path(), e))?;

        staged.persist(&target).map_err(|e| InstallError::Rename {
            from: e.file.path().to_path_buf(),
            to: target.clone(),
            message: e.error.to_string(),
        })?;
        debug!(archive = %target.display(), "Installed archive");
        Ok(target)
    }

    fn install_directory(&self, source: &Path, name: &str) -> Result<PathBuf, InstallError> {
        let target = self.artifact_dir(name);
        if same_file(source, &target) {
            return Ok(target);
        }

        let staged = self.staging_dir(".incoming-")?;
        for entry in WalkDir::new(source).min_depth(1) {
            let entry = entry.map_err(|e| InstallError::Copy {
                path: source.to_path_buf(),
                message: e.to_string(),
            })?;
            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(|e| InstallError::Copy {
                    path: entry.path().to_path_buf(),
                    message: e.to_string(),
                })?;
            let destination = staged.path().join(relative);
            let result = if entry.file_type().is_dir() {
                fs::create_dir_all(&destination)
            } else {
                fs::copy(entry.path(), &destination).map(|_| ())
            };
            result.map_err(|e| InstallError::Copy {
                path: entry.path().to_path_buf(),
                message: e.to_string(),
            })?;
        }

        self.move_into_place(staged, &target)
    }

    /// Extract a packed archive into `<root>/<name>/`, replacing any previous
    /// exploded directory of the same name.
    pub fn explode(&self, archive: &Path, name: &str) -> Result<PathBuf, InstallError> {
        self.validate_name(name)?;
        let staged = self.staging_dir(".explode-")?;

        let file = File::open(archive).map_err(|e| io_error(archive, e))?;
        tar::Archive::new(file)
            .unpack(staged.path())
            .map_err(|e| InstallError::Extract {
                path: archive.to_path_buf(),
                message: e.to_string(),
            })?;

        let target = self.artifact_dir(name);
        let installed = self.move_into_place(staged, &target)?;
        debug!(archive = %archive.display(), target = %installed.display(), "Exploded archive");
        Ok(installed)
    }

    fn staging_dir(&self, prefix: &str) -> Result<tempfile::TempDir, InstallError> {
        tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(&self.root)
            .map_err(|e| io_error(&self.root, e))
    }

    fn trash_path(&self, name: &str) -> PathBuf {
        self.root.join(format!(".trash-{}-{}", name, Uuid::new_v4().simple()))
    }

    fn move_into_place(&self, staged: tempfile::TempDir, target: &Path) -> Result<PathBuf, InstallError> {
        let name = target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("artifact")
            .to_string();

        let previous = if target.exists() {
            let trash = self.trash_path(&name);
            fs::rename(target, &trash).map_err(|e| InstallError::Rename {
                from: target.to_path_buf(),
                to: trash.clone(),
                message: e.to_string(),
            })?;
            Some(trash)
        } else {
            None
        };

        if let Err(e) = fs::rename(staged.path(), target) {
            if let Some(trash) = &previous {
                if let Err(restore) = fs::rename(trash, target) {
                    warn!(
                        target = %target.display(),
                        error = %restore,
                        "Failed to restore previous artifact directory"
                    );
                }
            }
            return Err(InstallError::Rename {
                from: staged.path().to_path_buf(),
                to: target.to_path_buf(),
                message: e.to_string(),
            });
        }

        if let Some(trash) = previous {
            if let Err(e) = fs::remove_dir_all(&trash) {
                warn!(path = %trash.display(), error = %e, "Failed to remove replaced artifact directory");
            }
        }
        Ok(target.to_path_buf())
    }

    /// Remove the exploded directory only, keeping any archive and anchor.
    pub fn remove_exploded(&self, name: &str) -> Result<(), InstallError> {
        let dir = self.artifact_dir(name);
        if !dir.exists() {
            return Ok(());
        }
        // Hide first so a concurrent scan never sees a half-deleted tree.
        let trash = self.trash_path(name);
        fs::rename(&dir, &trash).map_err(|e| InstallError::Rename {
            from: dir.clone(),
            to: trash.clone(),
            message: e.to_string(),
        })?;
        fs::remove_dir_all(&trash).map_err(|e| io_error(&trash, e))
    }

    /// Remove everything the root holds for `name`. Each step runs even if an
    /// earlier one failed; the first error is returned.
    pub fn uninstall(&self, name: &str) -> Result<(), InstallError> {
        let results = [
            self.remove_anchor(name),
            self.remove_exploded(name),
            remove_file_if_exists(&self.archive_path(name)),
        ];
        results.into_iter().collect::<Result<Vec<()>, _>>().map(|_| ())
    }

    pub fn create_anchor(&self, name: &str) -> Result<(), InstallError> {
        let anchor = self.anchor_path(name);
        File::create(&anchor).map_err(|e| io_error(&anchor, e))?;
        Ok(())
    }

    pub fn remove_anchor(&self, name: &str) -> Result<(), InstallError> {
        remove_file_if_exists(&self.anchor_path(name))
    }

    pub fn anchor_exists(&self, name: &str) -> bool {
        self.anchor_path(name).is_file()
    }

    /// Delete every anchor left in the root, returning how many were removed.
    pub fn delete_all_anchors(&self) -> Result<usize, InstallError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root).map_err(|e| io_error(&self.root, e))? {
            let entry = entry.map_err(|e| io_error(&self.root, e))?;
            let is_anchor = entry
                .file_name()
                .to_str()
                .map(|n| n.ends_with(&self.anchor_suffix))
                .unwrap_or(false);
            if is_anchor && entry.path().is_file() {
                remove_file_if_exists(&entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Classify the visible entries of the root.
    pub fn scan(&self) -> Result<RootListing, InstallError> {
        let mut listing = RootListing::default();
        for entry in fs::read_dir(&self.root).map_err(|e| io_error(&self.root, e))? {
            let entry = entry.map_err(|e| io_error(&self.root, e))?;
            let path = entry.path();
            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                warn!(path = %path.display(), "Skipping entry with non UTF-8 name");
                continue;
            };
            if file_name.starts_with('.') || file_name.ends_with(&self.anchor_suffix) {
                continue;
            }

            if path.is_dir() {
                if self.validate_name(&file_name).is_ok() {
                    listing.exploded.insert(file_name, path);
                } else {
                    warn!(path = %path.display(), "Skipping directory with invalid artifact name");
                }
            } else if self.is_archive(&path) {
                match self.name_for_source(&path) {
                    Some(name) if self.validate_name(&name).is_ok() => {
                        listing.archives.insert(name, path);
                    }
                    _ => warn!(path = %path.display(), "Skipping archive with invalid artifact name"),
                }
            }
        }
        Ok(listing)
    }
}

fn remove_file_if_exists(path: &Path) -> Result<(), InstallError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(path, e)),
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
