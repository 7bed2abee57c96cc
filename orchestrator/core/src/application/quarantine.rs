// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Quarantine Tracker
//!
//! Remembers artifacts whose last deploy attempt failed so the watcher does
//! not retry them on every tick. An entry is keyed by the resolved absolute
//! path of the backing archive or directory and stores the modification time
//! observed at failure; it stops applying as soon as the on-disk time differs.
//!
//! The table is process-wide and guarded by its own sharded map, independent
//! of the deployment lock, so status queries never wait on a running tick.
//! Nothing here is persisted: quarantine resets on restart.

use crate::domain::artifact::{ArtifactKey, ArtifactKind};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};
use url::Url;
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct QuarantineEntry {
    pub artifact: ArtifactKey,
    pub identity: PathBuf,
    pub observed: SystemTime,
    pub quarantined_at: DateTime<Utc>,
    pub reason: String,
    /// Domain whose successful deployment releases this entry.
    pub awaiting_domain: Option<String>,
}

#[derive(Debug, Default)]
pub struct QuarantineTracker {
    entries: DashMap<PathBuf, QuarantineEntry>,
}

impl QuarantineTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolved absolute path used as the identity of an artifact source.
    pub fn identity_of(path: &Path) -> PathBuf {
        path.canonicalize().unwrap_or_else(|_| {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()
                    .map(|cwd| cwd.join(path))
                    .unwrap_or_else(|_| path.to_path_buf())
            }
        })
    }

    /// Modification time of a file, or the newest modification time found in
    /// a directory tree. `None` if the path is gone.
    pub fn observed_timestamp(path: &Path) -> Option<SystemTime> {
        let metadata = std::fs::metadata(path).ok()?;
        if !metadata.is_dir() {
            return metadata.modified().ok();
        }
        WalkDir::new(path)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.metadata().ok())
            .filter_map(|metadata| metadata.modified().ok())
            .max()
    }

    pub fn is_quarantined(&self, path: &Path) -> bool {
        let identity = Self::identity_of(path);
        let Some(observed) = self.entries.get(&identity).map(|e| e.observed) else {
            return false;
        };
        match Self::observed_timestamp(&identity) {
            Some(current) if current == observed => true,
            _ => {
                debug!(path = %identity.display(), "Quarantined artifact changed, releasing");
                false
            }
        }
    }

    /// Record a failed attempt for the artifact backed by `path`.
    pub fn mark_failed(
        &self,
        artifact: &ArtifactKey,
        path: &Path,
        reason: impl Into<String>,
        awaiting_domain: Option<String>,
    ) {
        let identity = Self::identity_of(path);
        let observed = Self::observed_timestamp(&identity).unwrap_or(SystemTime::UNIX_EPOCH);
        let reason = reason.into();
        info!(
            artifact = %artifact,
            path = %identity.display(),
            reason = %reason,
            "Quarantining artifact until it changes"
        );
        self.entries.insert(
            identity.clone(),
            QuarantineEntry {
                artifact: artifact.clone(),
                identity,
                observed,
                quarantined_at: Utc::now(),
                reason,
                awaiting_domain,
            },
        );
    }

    /// Clear the entry for `path` and any other entry recorded for the same artifact.
    pub fn mark_succeeded(&self, artifact: &ArtifactKey, path: &Path) {
        let identity = Self::identity_of(path);
        self.entries.remove(&identity);
        self.entries.retain(|_, entry| &entry.artifact != artifact);
    }

    pub fn forget(&self, path: &Path) {
        self.entries.remove(&Self::identity_of(path));
    }

    pub fn forget_artifact(&self, artifact: &ArtifactKey) {
        self.entries.retain(|_, entry| &entry.artifact != artifact);
    }

    /// Drop entries whose backing file or directory no longer exists.
    pub fn forget_missing(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|identity, _| identity.exists());
        before - self.entries.len()
    }

    /// Release entries that were waiting for `domain` to deploy.
    pub fn release_awaiting(&self, domain: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.awaiting_domain.as_deref() != Some(domain));
        before - self.entries.len()
    }

    pub fn entry(&self, path: &Path) -> Option<QuarantineEntry> {
        self.entries.get(&Self::identity_of(path)).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Failed artifacts of one kind: name → (source URI → modification time
    /// observed when the attempt failed).
    pub fn zombie_map(&self, kind: ArtifactKind) -> BTreeMap<String, BTreeMap<Url, DateTime<Utc>>> {
        let mut map: BTreeMap<String, BTreeMap<Url, DateTime<Utc>>> = BTreeMap::new();
        for entry in self.entries.iter().filter(|e| e.artifact.kind == kind) {
            let Ok(url) = Url::from_file_path(&entry.identity) else {
                continue;
            };
            map.entry(entry.artifact.name.clone())
                .or_default()
                .insert(url, DateTime::<Utc>::from(entry.observed));
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::TempDir;

    fn bump_mtime(path: &Path) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(10)).unwrap();
    }

    #[test]
    fn test_quarantine_released_when_timestamp_changes() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("broken-app.jar");
        std::fs::write(&archive, b"broken").unwrap();

        let tracker = QuarantineTracker::new();
        let key = ArtifactKey::application("broken-app");
        tracker.mark_failed(&key, &archive, "malformed", None);
        assert!(tracker.is_quarantined(&archive));

        bump_mtime(&archive);
        assert!(!tracker.is_quarantined(&archive));
    }

    #[test]
    fn test_directory_identity_tracks_newest_file() {
        let dir = TempDir::new().unwrap();
        let app = dir.path().join("app");
        std::fs::create_dir_all(app.join("conf")).unwrap();
        std::fs::write(app.join("conf/app.yaml"), "a").unwrap();

        let tracker = QuarantineTracker::new();
        tracker.mark_failed(&ArtifactKey::application("app"), &app, "bad", None);
        assert!(tracker.is_quarantined(&app));

        bump_mtime(&app.join("conf/app.yaml"));
        assert!(!tracker.is_quarantined(&app));
    }

    #[test]
    fn test_same_name_different_paths_are_independent() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a/app");
        let b = dir.path().join("b/app");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();

        let tracker = QuarantineTracker::new();
        tracker.mark_failed(&ArtifactKey::application("app"), &a, "bad", None);
        assert!(tracker.is_quarantined(&a));
        assert!(!tracker.is_quarantined(&b));
    }

    #[test]
    fn test_forget_missing_and_success() {
        let dir = TempDir::new().unwrap();
        let gone = dir.path().join("gone.jar");
        let kept = dir.path().join("kept.jar");
        std::fs::write(&gone, b"x").unwrap();
        std::fs::write(&kept, b"x").unwrap();

        let tracker = QuarantineTracker::new();
        tracker.mark_failed(&ArtifactKey::application("gone"), &gone, "bad", None);
        tracker.mark_failed(&ArtifactKey::application("kept"), &kept, "bad", None);
        std::fs::remove_file(&gone).unwrap();

        assert_eq!(tracker.forget_missing(), 1);
        assert_eq!(tracker.len(), 1);

        tracker.mark_succeeded(&ArtifactKey::application("kept"), &kept);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_zombie_map_and_domain_release() {
        let dir = TempDir::new().unwrap();
        let app = dir.path().join("app");
        std::fs::create_dir_all(&app).unwrap();

        let tracker = QuarantineTracker::new();
        tracker.mark_failed(
            &ArtifactKey::application("app"),
            &app,
            "domain missing",
            Some("shared".to_string()),
        );

        let zombies = tracker.zombie_map(ArtifactKind::Application);
        assert_eq!(zombies.len(), 1);
        let uris = &zombies["app"];
        assert_eq!(uris.len(), 1);
        assert!(uris.keys().next().unwrap().as_str().starts_with("file://"));
        assert!(tracker.zombie_map(ArtifactKind::Domain).is_empty());

        assert_eq!(tracker.release_awaiting("other"), 0);
        assert_eq!(tracker.release_awaiting("shared"), 1);
        assert!(tracker.zombie_map(ArtifactKind::Application).is_empty());
    }

    #[test]
    fn test_zombie_map_reports_observed_modification_time() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("broken-app.jar");
        std::fs::write(&archive, b"broken").unwrap();
        let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000_000);
        File::options().write(true).open(&archive).unwrap().set_modified(modified).unwrap();

        let tracker = QuarantineTracker::new();
        tracker.mark_failed(&ArtifactKey::application("broken-app"), &archive, "malformed", None);

        let zombies = tracker.zombie_map(ArtifactKind::Application);
        let observed = zombies["broken-app"].values().next().copied().unwrap();
        assert_eq!(observed.timestamp(), 1_000_000_000);
    }
}
