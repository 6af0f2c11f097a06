// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Named copies of an installed loader tree.
//!
//! Snapshots live in `{game}/BepInEx_Snapshots/{name}_{timestamp}/` and hold
//! `BepInEx/`, `winhttp.dll`, `doorstop_config.ini` and a `snapshot.json`
//! with the captured versions.
//!
//! Restore is best effort. It removes the current loader files and copies
//! the snapshot back; a failure part way leaves the game directory in
//! between, and the error names the step that failed.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::archive::ArchiveService;
use crate::error::{InstallerError, Result};
use crate::install::RunPermit;
use crate::layout::{Detector, GameLayout, DOORSTOP_CONFIG, ENTRY_POINT, LOADER_DIR};
use crate::types::ProgressSink;
use crate::utils::{sanitize_file_name, timestamp_suffix};

pub const METADATA_FILE: &str = "snapshot.json";

/// Contents of `snapshot.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loader_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translator_version: Option<String>,
}

/// One snapshot as listed.
#[derive(Debug, Clone)]
pub struct SnapshotInfo {
    pub path: PathBuf,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub loader_version: Option<String>,
    pub translator_version: Option<String>,
    pub size_bytes: u64,
    /// False for snapshots made before metadata was written
    pub has_metadata: bool,
}

#[derive(Clone)]
pub struct SnapshotManager {
    layout: GameLayout,
    detector: Arc<dyn Detector>,
    archive: ArchiveService,
}

impl SnapshotManager {
    pub fn new(game: impl Into<PathBuf>, detector: Arc<dyn Detector>) -> Self {
        Self {
            layout: GameLayout::new(game),
            detector,
            archive: ArchiveService::new(),
        }
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.layout.snapshots_dir()
    }

    /// Copy the current installation into a new snapshot directory.
    pub async fn create(&self, name: &str) -> Result<PathBuf> {
        let game = self.layout.root();
        let status = self.detector.detect_installation(game);
        if !status.anything_installed() || !self.layout.loader_dir().is_dir() {
            return Err(InstallerError::NotInstalled(game.to_path_buf()));
        }

        let dir_name = format!("{}_{}", sanitize_file_name(name), timestamp_suffix(Local::now()));
        let dest = self.snapshots_dir().join(dir_name);
        if dest.exists() {
            return Err(InstallerError::Snapshot(format!("{} already exists", dest.display())));
        }
        tokio::fs::create_dir_all(&dest).await?;

        let result = self.capture(&dest, name, status.loader_version, status.translator_version).await;
        if let Err(e) = result {
            // a half-written snapshot is worse than none
            let _ = self.archive.remove_dir(&dest).await;
            return Err(e);
        }

        tracing::info!(snapshot = %dest.display(), "Snapshot created");
        Ok(dest)
    }

    async fn capture(
        &self,
        dest: &Path,
        name: &str,
        loader_version: Option<String>,
        translator_version: Option<String>,
    ) -> Result<()> {
        self.archive
            .copy_dir(&self.layout.loader_dir(), &dest.join(LOADER_DIR))
            .await?;

        for file in [self.layout.entry_point(), self.layout.doorstop_config()] {
            if let Some(file_name) = file.file_name() {
                if file.is_file() {
                    tokio::fs::copy(&file, dest.join(file_name)).await?;
                }
            }
        }

        let metadata = SnapshotMetadata {
            name: name.to_string(),
            created_at: Utc::now(),
            loader_version,
            translator_version,
        };
        let json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| InstallerError::Snapshot(format!("could not write metadata: {}", e)))?;
        tokio::fs::write(dest.join(METADATA_FILE), json).await?;
        Ok(())
    }

    /// All snapshots, newest first.
    pub async fn list(&self) -> Result<Vec<SnapshotInfo>> {
        let root = self.snapshots_dir();
        let mut entries = match tokio::fs::read_dir(&root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut snapshots = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match self.read_info(&path).await {
                Some(info) => snapshots.push(info),
                None => tracing::debug!(path = %path.display(), "Skipping directory without snapshot contents"),
            }
        }

        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(snapshots)
    }

    async fn read_info(&self, path: &Path) -> Option<SnapshotInfo> {
        let size_bytes = self.archive.dir_size(path).await.unwrap_or(0);

        if let Ok(text) = tokio::fs::read_to_string(path.join(METADATA_FILE)).await {
            match serde_json::from_str::<SnapshotMetadata>(&text) {
                Ok(meta) => {
                    return Some(SnapshotInfo {
                        path: path.to_path_buf(),
                        name: meta.name,
                        created_at: meta.created_at,
                        loader_version: meta.loader_version,
                        translator_version: meta.translator_version,
                        size_bytes,
                        has_metadata: true,
                    })
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Unreadable snapshot metadata"),
            }
        }

        // legacy snapshot: only trust it if it actually holds a loader tree
        if !path.join(LOADER_DIR).is_dir() {
            return None;
        }
        let meta = tokio::fs::metadata(path).await.ok()?;
        let created = meta.created().or_else(|_| meta.modified()).ok()?;
        let name = path.file_name()?.to_string_lossy().to_string();

        Some(SnapshotInfo {
            path: path.to_path_buf(),
            name,
            created_at: DateTime::<Utc>::from(created),
            loader_version: None,
            translator_version: None,
            size_bytes,
            has_metadata: false,
        })
    }

    /// Replace the current loader files with the snapshot's.
    ///
    /// Requires the run permit so it can't overlap an install or uninstall.
    ///
    /// Auxiliary loader files the snapshot does not carry are removed too.
    /// Failures there come back as warnings.
    pub async fn restore(&self, snapshot: &Path, _permit: &RunPermit, progress: ProgressSink) -> Result<Vec<String>> {
        if !snapshot.join(LOADER_DIR).is_dir() {
            return Err(InstallerError::Snapshot(format!(
                "{} does not contain a {} directory",
                snapshot.display(),
                LOADER_DIR
            )));
        }

        tracing::info!(snapshot = %snapshot.display(), "Restoring snapshot");
        progress(0);

        self.archive
            .remove_dir(&self.layout.loader_dir())
            .await
            .map_err(|e| step_failed("removing current BepInEx directory", e))?;
        for file in [self.layout.entry_point(), self.layout.doorstop_config()] {
            self.archive
                .remove_file(&file)
                .await
                .map_err(|e| step_failed(&format!("removing {}", file.display()), e))?;
        }
        let mut warnings = Vec::new();
        for file in self.layout.extra_loader_files() {
            if let Err(e) = self.archive.remove_file(&file).await {
                tracing::warn!(file = %file.display(), error = %e, "Could not remove file");
                warnings.push(format!("Could not remove {}: {}", file.display(), e));
            }
        }
        progress(30);

        self.archive
            .copy_dir(&snapshot.join(LOADER_DIR), &self.layout.loader_dir())
            .await
            .map_err(|e| step_failed("copying BepInEx directory", e))?;
        progress(80);

        for file_name in [ENTRY_POINT, DOORSTOP_CONFIG] {
            let source = snapshot.join(file_name);
            if source.is_file() {
                tokio::fs::copy(&source, self.layout.root().join(file_name))
                    .await
                    .map_err(|e| step_failed(&format!("copying {}", file_name), e.into()))?;
            }
        }
        progress(100);

        tracing::info!(snapshot = %snapshot.display(), "Snapshot restored");
        Ok(warnings)
    }

    /// Remove a snapshot. Missing snapshots are not an error.
    ///
    /// Only direct children of the snapshots directory are accepted.
    pub async fn delete(&self, snapshot: &Path) -> Result<()> {
        let root = self.snapshots_dir();
        let traverses = snapshot
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::CurDir));
        if traverses || snapshot.parent() != Some(root.as_path()) {
            return Err(InstallerError::Snapshot(format!(
                "{} is not inside {}",
                snapshot.display(),
                root.display()
            )));
        }
        if self.archive.remove_dir(snapshot).await? {
            tracing::info!(snapshot = %snapshot.display(), "Snapshot deleted");
        }
        Ok(())
    }
}

fn step_failed(step: &str, error: InstallerError) -> InstallerError {
    InstallerError::Snapshot(format!("restore failed while {}: {}", step, error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::FsDetector;
    use tempfile::TempDir;

    fn installed_game() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("BepInEx/core")).unwrap();
        std::fs::create_dir_all(root.join("BepInEx/plugins/XUnity.AutoTranslator")).unwrap();
        std::fs::write(root.join("BepInEx/core/BepInEx.dll"), b"core").unwrap();
        std::fs::write(root.join("BepInEx/changelog.txt"), "5.4.23.2\n- fixes\n").unwrap();
        std::fs::write(root.join("winhttp.dll"), b"proxy").unwrap();
        std::fs::write(root.join("doorstop_config.ini"), "[General]\nenabled=true\n").unwrap();
        dir
    }

    fn manager(dir: &TempDir) -> SnapshotManager {
        SnapshotManager::new(dir.path(), Arc::new(FsDetector))
    }

    #[test]
    fn test_metadata_is_camel_case() {
        let meta = SnapshotMetadata {
            name: "before update".to_string(),
            created_at: Utc::now(),
            loader_version: Some("5.4.23.2".to_string()),
            translator_version: None,
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"createdAt\""));
        assert!(json.contains("\"loaderVersion\""));
        assert!(!json.contains("translatorVersion"));
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let game = installed_game();
        let manager = manager(&game);

        let path = manager.create("before/update").await.unwrap();
        assert!(path.starts_with(manager.snapshots_dir()));
        assert!(path.join("BepInEx/core/BepInEx.dll").is_file());
        assert!(path.join("winhttp.dll").is_file());
        assert!(path.join(METADATA_FILE).is_file());

        let listed = manager.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "before/update");
        assert_eq!(listed[0].loader_version.as_deref(), Some("5.4.23.2"));
        assert!(listed[0].has_metadata);
        assert!(listed[0].size_bytes > 0);
    }

    #[tokio::test]
    async fn test_create_requires_installation() {
        let dir = TempDir::new().unwrap();
        let err = manager(&dir).create("empty").await.unwrap_err();
        assert!(matches!(err, InstallerError::NotInstalled(_)));
    }

    #[tokio::test]
    async fn test_list_includes_legacy_snapshots() {
        let game = installed_game();
        let manager = manager(&game);
        let legacy = manager.snapshots_dir().join("old_20230101_000000");
        std::fs::create_dir_all(legacy.join("BepInEx")).unwrap();
        std::fs::create_dir_all(manager.snapshots_dir().join("not_a_snapshot")).unwrap();

        let listed = manager.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "old_20230101_000000");
        assert!(!listed[0].has_metadata);
    }

    #[tokio::test]
    async fn test_list_without_snapshot_dir() {
        let dir = TempDir::new().unwrap();
        assert!(manager(&dir).list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let game = installed_game();
        let manager = manager(&game);
        let path = manager.create("temp").await.unwrap();

        manager.delete(&path).await.unwrap();
        assert!(!path.exists());
        manager.delete(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_refuses_outside_paths() {
        let game = installed_game();
        let manager = manager(&game);
        let err = manager.delete(&game.path().join("BepInEx")).await.unwrap_err();
        assert!(matches!(err, InstallerError::Snapshot(_)));
        assert!(game.path().join("BepInEx").is_dir());
    }

    #[tokio::test]
    async fn test_delete_refuses_traversal_and_root() {
        let game = installed_game();
        let manager = manager(&game);
        let kept = manager.create("kept").await.unwrap();

        let sneaky = manager.snapshots_dir().join("..").join("BepInEx");
        let err = manager.delete(&sneaky).await.unwrap_err();
        assert!(matches!(err, InstallerError::Snapshot(_)));
        assert!(game.path().join("BepInEx/core/BepInEx.dll").is_file());

        let err = manager.delete(&manager.snapshots_dir()).await.unwrap_err();
        assert!(matches!(err, InstallerError::Snapshot(_)));
        assert!(kept.is_dir());

        let nested = kept.join("BepInEx");
        assert!(manager.delete(&nested).await.is_err());
        assert!(nested.is_dir());
    }
}
