// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Zip archives and directory trees.
//!
//! The `zip` crate and `walkdir` are synchronous, so every operation runs on
//! the blocking pool and the async wrappers only await the join handle.
//!
//! # Layout preservation
//!
//! [`ArchiveService::extract_zip`] writes entries relative to the destination
//! exactly as they are named inside the archive. Both packages rely on this:
//! the loader ships `BepInEx/core/...` next to `winhttp.dll`, and the
//! translator ships `BepInEx/plugins/XUnity.AutoTranslator/...`.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{InstallerError, Result};
use crate::types::ProgressSink;

/// Filesystem utility used by the installer and snapshot manager.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveService;

impl ArchiveService {
    pub fn new() -> Self {
        Self
    }

    /// Extract `archive` into `dest`, overwriting existing files.
    ///
    /// Entries whose names escape `dest` (absolute paths, `..`) are skipped.
    /// Returns the number of files written.
    pub async fn extract_zip(
        &self,
        archive: &Path,
        dest: &Path,
        progress: ProgressSink,
    ) -> Result<usize> {
        let archive = archive.to_path_buf();
        let dest = dest.to_path_buf();
        run_blocking(move || extract_zip_blocking(&archive, &dest, &progress)).await
    }

    /// Zip `source_dir` into `archive_path`.
    ///
    /// Entries are stored under `root_name/` when given, so a backup of
    /// `BepInEx/` restores to the same place when extracted into the game root.
    pub async fn create_zip(
        &self,
        source_dir: &Path,
        archive_path: &Path,
        root_name: Option<&str>,
    ) -> Result<u64> {
        let source_dir = source_dir.to_path_buf();
        let archive_path = archive_path.to_path_buf();
        let root_name = root_name.map(str::to_string);
        run_blocking(move || create_zip_blocking(&source_dir, &archive_path, root_name.as_deref()))
            .await
    }

    /// Copy a directory tree. Returns the number of bytes copied.
    pub async fn copy_dir(&self, source: &Path, dest: &Path) -> Result<u64> {
        let source = source.to_path_buf();
        let dest = dest.to_path_buf();
        run_blocking(move || copy_dir_blocking(&source, &dest)).await
    }

    /// Remove a directory tree. Returns `false` when it did not exist.
    pub async fn remove_dir(&self, path: &Path) -> Result<bool> {
        let path = path.to_path_buf();
        run_blocking(move || match fs::remove_dir_all(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        })
        .await
    }

    /// Remove a single file. Returns `false` when it did not exist.
    pub async fn remove_file(&self, path: &Path) -> Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Total size in bytes of all files below `path` (0 if missing).
    pub async fn dir_size(&self, path: &Path) -> Result<u64> {
        let path = path.to_path_buf();
        run_blocking(move || Ok(dir_size_blocking(&path))).await
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| InstallerError::Archive(format!("worker task failed: {}", e)))?
}

fn extract_zip_blocking(archive: &Path, dest: &Path, progress: &ProgressSink) -> Result<usize> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(file)?;
    let total = zip.len().max(1);
    let mut written = 0usize;

    fs::create_dir_all(dest)?;
    progress(0);

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!(entry = entry.name(), "Skipping archive entry outside destination");
            continue;
        };
        let out_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
        } else {
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&out_path)?;
            io::copy(&mut entry, &mut out)?;
            written += 1;
        }

        progress((((i + 1) * 100) / total) as u8);
    }

    tracing::debug!(
        archive = %archive.display(),
        dest = %dest.display(),
        files = written,
        "Extracted archive"
    );
    Ok(written)
}

fn create_zip_blocking(source_dir: &Path, archive_path: &Path, root_name: Option<&str>) -> Result<u64> {
    if !source_dir.is_dir() {
        return Err(InstallerError::Archive(format!(
            "{} is not a directory",
            source_dir.display()
        )));
    }
    if let Some(parent) = archive_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = File::create(archive_path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(source_dir).follow_links(false) {
        let entry = entry.map_err(|e| InstallerError::Archive(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(|e| InstallerError::Archive(e.to_string()))?;
        if relative.as_os_str().is_empty() {
            continue;
        }

        let mut name = relative.to_string_lossy().replace('\\', "/");
        if let Some(root) = root_name {
            name = format!("{}/{}", root, name);
        }

        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options)?;
            let mut source = File::open(entry.path())?;
            io::copy(&mut source, &mut zip)?;
        }
    }

    let mut file = zip.finish()?;
    file.flush()?;
    let size = file.metadata()?.len();
    Ok(size)
}

fn copy_dir_blocking(source: &Path, dest: &Path) -> Result<u64> {
    fs::create_dir_all(dest)?;
    let mut copied = 0u64;

    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|e| InstallerError::Archive(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| InstallerError::Archive(e.to_string()))?;
        if relative.as_os_str().is_empty() {
            continue;
        }

        let target: PathBuf = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            copied += fs::copy(entry.path(), &target)?;
        }
    }

    Ok(copied)
}

fn dir_size_blocking(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
