// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared fixtures: an in-memory version source, zip builders and a wired
//! installer pointing at temp directories.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use xunity_installer::error::{InstallerError, Result};
use xunity_installer::sources::BoxFuture;
use xunity_installer::{
    Detector, DownloadSource, FsDetector, GameEngine, InstallationStatus, Installer, PackageKind,
    Platform, ProgressSink, SourceRouter, VersionCache, VersionRecord, VersionResolver,
    VersionSource,
};

pub const LOADER_URL: &str = "https://example.test/BepInEx_win_x64_5.4.23.2.zip";
pub const TRANSLATOR_URL: &str = "https://example.test/XUnity.AutoTranslator-BepInEx-5.4.5.zip";

// =============================================================================
// MOCK SOURCE
// =============================================================================

/// Version source backed by fixed records and local zip files.
pub struct MockSource {
    name: String,
    loader: Vec<VersionRecord>,
    translator: Vec<VersionRecord>,
    archives: HashMap<String, PathBuf>,
    listing_fails: bool,
    download_delay: Duration,
    failing_downloads: AtomicU32,
    pub download_calls: AtomicU32,
    pub list_calls: AtomicU32,
}

impl MockSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            loader: Vec::new(),
            translator: Vec::new(),
            archives: HashMap::new(),
            listing_fails: false,
            download_delay: Duration::ZERO,
            failing_downloads: AtomicU32::new(0),
            download_calls: AtomicU32::new(0),
            list_calls: AtomicU32::new(0),
        }
    }

    pub fn with_loader(mut self, records: Vec<VersionRecord>) -> Self {
        self.loader = records;
        self
    }

    pub fn with_translator(mut self, records: Vec<VersionRecord>) -> Self {
        self.translator = records;
        self
    }

    /// Serve `archive` for downloads of `url`.
    pub fn with_archive(mut self, url: &str, archive: &Path) -> Self {
        self.archives.insert(url.to_string(), archive.to_path_buf());
        self
    }

    /// Every listing call fails.
    pub fn failing(mut self) -> Self {
        self.listing_fails = true;
        self
    }

    /// The next `count` downloads fail after writing a partial file.
    pub fn failing_downloads(self, count: u32) -> Self {
        self.failing_downloads.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = delay;
        self
    }

    pub fn downloads(&self) -> u32 {
        self.download_calls.load(Ordering::SeqCst)
    }

    fn listing(&self, records: &[VersionRecord]) -> Result<Vec<VersionRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.listing_fails {
            return Err(InstallerError::source_unavailable(&self.name, "connection refused"));
        }
        Ok(records.to_vec())
    }
}

impl VersionSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_loader_versions(&self, max_count: usize) -> BoxFuture<'_, Result<Vec<VersionRecord>>> {
        Box::pin(async move {
            let mut records = self.listing(&self.loader)?;
            records.truncate(max_count.max(1) * 4);
            Ok(records)
        })
    }

    fn list_translator_versions(
        &self,
        max_count: usize,
    ) -> BoxFuture<'_, Result<Vec<VersionRecord>>> {
        Box::pin(async move {
            let mut records = self.listing(&self.translator)?;
            records.truncate(max_count.max(1) * 2);
            Ok(records)
        })
    }

    fn download<'a>(
        &'a self,
        url: &'a str,
        dest: &'a Path,
        progress: ProgressSink,
    ) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            self.download_calls.fetch_add(1, Ordering::SeqCst);
            if !self.download_delay.is_zero() {
                tokio::time::sleep(self.download_delay).await;
            }
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let should_fail = self
                .failing_downloads
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if should_fail {
                tokio::fs::write(dest, b"truncated").await?;
                return Err(InstallerError::SizeMismatch {
                    expected: 1024,
                    received: 9,
                });
            }

            let source = self.archives.get(url).ok_or_else(|| InstallerError::HttpStatus {
                status: 404,
                url: url.to_string(),
            })?;
            progress(50);
            let bytes = tokio::fs::copy(source, dest).await?;
            progress(100);
            Ok(bytes)
        })
    }

    fn validate_connection(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { !self.listing_fails })
    }
}

// =============================================================================
// FAKE DETECTOR
// =============================================================================

/// Detector with canned answers.
#[derive(Debug, Clone)]
pub struct FakeDetector {
    pub engine: GameEngine,
    pub status: InstallationStatus,
    pub executable: Option<PathBuf>,
}

impl FakeDetector {
    pub fn il2cpp() -> Self {
        Self {
            engine: GameEngine::UnityIl2Cpp,
            status: InstallationStatus::default(),
            executable: None,
        }
    }
}

impl Detector for FakeDetector {
    fn detect_engine(&self, _game: &Path) -> GameEngine {
        self.engine
    }

    fn detect_installation(&self, _game: &Path) -> InstallationStatus {
        self.status.clone()
    }

    fn find_executable(&self, _game: &Path) -> Option<PathBuf> {
        self.executable.clone()
    }
}

// =============================================================================
// RECORDS AND ARCHIVES
// =============================================================================

pub fn record(
    kind: PackageKind,
    version: &str,
    platform: Option<Platform>,
    day: u32,
    prerelease: bool,
) -> VersionRecord {
    let url = match kind {
        PackageKind::Loader => format!("https://example.test/loader/{}/{:?}.zip", version, platform),
        PackageKind::Translator => format!("https://example.test/translator/{}/{:?}.zip", version, platform),
    };
    VersionRecord {
        kind,
        version: version.to_string(),
        target_platform: platform,
        release_date: Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
        download_url: url,
        file_size: 0,
        is_prerelease: prerelease,
    }
}

pub fn with_url(mut record: VersionRecord, url: &str) -> VersionRecord {
    record.download_url = url.to_string();
    record
}

/// Write a zip at `path` containing `(name, contents)` entries.
pub fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let file = File::create(path).unwrap();
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    for (name, contents) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(contents.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

pub fn loader_zip(dir: &Path) -> PathBuf {
    let path = dir.join("loader.zip");
    write_zip(
        &path,
        &[
            ("winhttp.dll", "proxy"),
            ("doorstop_config.ini", "[General]\nenabled=true\n"),
            ("changelog.txt", "5.4.23.2\n- fixes\n"),
            ("BepInEx/core/BepInEx.dll", "core"),
            ("BepInEx/core/BepInEx.Preloader.dll", "preloader"),
        ],
    );
    path
}

pub fn translator_zip(dir: &Path) -> PathBuf {
    let path = dir.join("translator.zip");
    write_zip(
        &path,
        &[
            ("BepInEx/plugins/XUnity.AutoTranslator/XUnity.AutoTranslator.Plugin.Core.dll", "core"),
            ("BepInEx/core/XUnity.Common.dll", "common"),
        ],
    );
    path
}

/// A Mono game directory with an executable.
pub fn mono_game(root: &Path) -> PathBuf {
    let game = root.join("Demo");
    fs::create_dir_all(game.join("Demo_Data").join("Managed")).unwrap();
    fs::write(game.join("UnityPlayer.dll"), "unity").unwrap();
    fs::write(game.join("Demo.exe"), "exe").unwrap();
    game
}

/// A game with the loader and translator already present.
pub fn installed_game(root: &Path) -> PathBuf {
    let game = mono_game(root);
    fs::create_dir_all(game.join("BepInEx/core")).unwrap();
    fs::create_dir_all(game.join("BepInEx/plugins/XUnity.AutoTranslator")).unwrap();
    fs::write(game.join("BepInEx/core/BepInEx.dll"), "core").unwrap();
    fs::write(game.join("BepInEx/changelog.txt"), "5.4.22\n").unwrap();
    fs::write(game.join("winhttp.dll"), "proxy").unwrap();
    fs::write(game.join("doorstop_config.ini"), "[General]\n").unwrap();
    game
}

// =============================================================================
// WIRING
// =============================================================================

pub struct Harness {
    pub primary: Arc<MockSource>,
    pub mirror: Arc<MockSource>,
    pub builds: Arc<MockSource>,
    pub cache: Arc<VersionCache>,
    pub installer: Installer,
    pub temp: TempDir,
}

impl Harness {
    pub fn new(
        primary: MockSource,
        mirror: MockSource,
        builds: MockSource,
        preference: DownloadSource,
        temp: TempDir,
    ) -> Self {
        let primary = Arc::new(primary);
        let mirror = Arc::new(mirror);
        let builds = Arc::new(builds);

        let router = Arc::new(SourceRouter::new(
            Arc::clone(&primary) as Arc<dyn VersionSource>,
            Arc::clone(&mirror) as Arc<dyn VersionSource>,
            Arc::clone(&builds) as Arc<dyn VersionSource>,
            preference,
        ));
        let cache = Arc::new(VersionCache::new(router, 10));
        let resolver = Arc::new(VersionResolver::new(Arc::clone(&cache)));
        let installer = Installer::new(resolver, Arc::new(FsDetector), temp.path().join("downloads"))
            .with_retry_delay(Duration::from_millis(10));

        Self {
            primary,
            mirror,
            builds,
            cache,
            installer,
            temp,
        }
    }

    /// A primary source serving one loader and one translator release.
    pub fn standard() -> Self {
        let temp = TempDir::new().unwrap();
        let primary = standard_source(temp.path());
        Self::new(
            primary,
            MockSource::new("mirror"),
            MockSource::new("builds"),
            DownloadSource::Github,
            temp,
        )
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.temp.path().join("downloads")
    }

    /// Another installer over the same sources with a different detector.
    pub fn installer_with(&self, detector: Arc<dyn Detector>) -> Installer {
        Installer::new(Arc::clone(self.installer.resolver()), detector, self.downloads_dir())
            .with_retry_delay(Duration::from_millis(10))
    }
}

/// Source with v5.4.23.2 (x64, x86) and translator 5.4.5, archives in `dir`.
pub fn standard_source(dir: &Path) -> MockSource {
    named_standard_source("github", dir)
}

pub fn named_standard_source(name: &str, dir: &Path) -> MockSource {
    let loader = loader_zip(dir);
    let translator = translator_zip(dir);
    MockSource::new(name)
        .with_loader(vec![
            with_url(record(PackageKind::Loader, "v5.4.23.2", Some(Platform::X64), 20, false), LOADER_URL),
            record(PackageKind::Loader, "v5.4.23.2", Some(Platform::X86), 20, false),
        ])
        .with_translator(vec![with_url(
            record(PackageKind::Translator, "v5.4.5", None, 18, false),
            TRANSLATOR_URL,
        )])
        .with_archive(LOADER_URL, &loader)
        .with_archive(TRANSLATOR_URL, &translator)
}
