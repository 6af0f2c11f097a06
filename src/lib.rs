// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! xunity-installer - BepInEx and XUnity.AutoTranslator installer library
//!
//! Finds released versions of the BepInEx plugin loader and the
//! XUnity.AutoTranslator plugin across several unreliable upstreams, picks
//! the right build for a game, and installs, snapshots or removes them.
//!
//! **Sources** -> **Cache** -> **Resolver** -> **Installer**
//!
//! # Core Modules
//!
//! - [`sources`] - Atom feed, REST API, WebDAV mirror and build index readers
//! - [`cache`] - Merged, atomically swapped view of every source
//! - [`resolver`] - Platform-aware recommendation and exact version lookup
//! - [`install`] - Guarded install/uninstall/restore runs with progress
//! - [`snapshot`] - Named copies of an installed loader tree
//! - [`archive`] - Zip extraction and directory tree helpers
//! - [`layout`] - Game directory layout and installation detection
//! - [`config`] - Persistent user settings
//! - [`error`] - Error type and actionable error formatting
//!
//! # Wiring
//!
//! ```no_run
//! use std::sync::Arc;
//! use xunity_installer::{
//!     FsDetector, InstallOptions, Installer, Settings, SourceRouter, VersionCache, VersionResolver,
//! };
//!
//! # async fn run() -> anyhow::Result<()> {
//! let settings = Settings::load()?;
//! let router = Arc::new(SourceRouter::from_settings(&settings)?);
//! let cache = Arc::new(VersionCache::new(router, settings.max_versions));
//! cache.initialize().await;
//!
//! let resolver = Arc::new(VersionResolver::new(cache));
//! let installer = Installer::new(resolver, Arc::new(FsDetector), xunity_installer::config::download_dir()?);
//! let mut run = installer.start_install("/games/demo", InstallOptions::default())?;
//! let outcome = run.wait().await;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod cache;
pub mod config;
pub mod error;
pub mod install;
pub mod layout;
pub mod locks;
pub mod logging;
pub mod resolver;
pub mod snapshot;
pub mod sources;
pub mod types;
pub mod utils;

pub use archive::ArchiveService;
pub use cache::{VersionCache, VersionCacheSnapshot, VersionCounts, VersionsUpdated};
pub use config::Settings;
pub use error::{format_error, ErrorBuilder, InstallerError, Result};
pub use install::{
    InstallOptions, InstallationRun, Installer, LaunchVerifier, RunKind, RunOutcome, RunPermit,
    RunPhase, RunProgress, VerifyReport,
};
pub use layout::{Detector, FsDetector, GameEngine, GameLayout, InstallationStatus};
pub use resolver::VersionResolver;
pub use snapshot::{SnapshotInfo, SnapshotManager, SnapshotMetadata};
pub use sources::{SourceRouter, VersionSource};
pub use types::{
    silent_progress, DownloadSource, GithubBackend, PackageKind, Platform, ProgressSink,
    VersionRecord,
};
