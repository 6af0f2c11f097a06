// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Installation orchestration.
//!
//! An install is a linear sequence of steps, each owning a band of the
//! overall percentage:
//!
//! | Step                     | Progress |
//! |--------------------------|----------|
//! | start                    | 0        |
//! | backup (optional)        | 10       |
//! | clean (optional)         | 20       |
//! | download + extract loader| 30-60    |
//! | download + extract translator | 60-87 |
//! | launch and verify (optional) | 87-95 |
//! | done                     | 100      |
//!
//! Backup, clean and launch-verify are best effort: their failures become
//! warnings on an otherwise successful run. Resolution, download and
//! extraction failures end the run. A loader that was already extracted
//! when the translator fails is left in place.
//!
//! # Run guard
//!
//! Install, uninstall and snapshot restore share one permit. Starting a run
//! while another holds it fails at once with [`InstallerError::Busy`]; runs
//! are never queued.

pub mod launch;
pub mod types;
mod uninstall;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

use crate::archive::ArchiveService;
use crate::error::{InstallerError, Result};
use crate::layout::{Detector, GameLayout, LOADER_DIR};
use crate::resolver::VersionResolver;
use crate::snapshot::SnapshotManager;
use crate::types::{PackageKind, ProgressSink, VersionRecord};
use crate::utils::{format_bytes, scale_progress, timestamp_suffix};

pub use launch::{LaunchVerifier, VerifyReport};
pub use types::{InstallOptions, RunKind, RunOutcome, RunPhase, RunProgress};

/// Download attempts per package.
pub const DOWNLOAD_ATTEMPTS: u32 = 3;

/// Base delay between download attempts; attempt `n` waits `n` times this.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Proof that the caller holds the process-wide run permit.
#[derive(Debug)]
pub struct RunPermit {
    _permit: OwnedSemaphorePermit,
}

/// Handle to a running install, uninstall or restore.
#[derive(Debug, Clone)]
pub struct InstallationRun {
    pub kind: RunKind,
    progress_rx: watch::Receiver<RunProgress>,
}

impl InstallationRun {
    /// Latest progress.
    pub fn progress(&self) -> RunProgress {
        self.progress_rx.borrow().clone()
    }

    /// A receiver that is notified on every progress change.
    pub fn subscribe(&self) -> watch::Receiver<RunProgress> {
        self.progress_rx.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.progress_rx.borrow().is_terminal()
    }

    /// Wait for the run to end.
    pub async fn wait(&mut self) -> RunOutcome {
        loop {
            if let Some(outcome) = self.progress_rx.borrow().outcome.clone() {
                return outcome;
            }
            if self.progress_rx.changed().await.is_err() {
                // sender dropped without an outcome: the task panicked
                return self.progress_rx.borrow().outcome.clone().unwrap_or_else(|| {
                    RunOutcome::Failed {
                        error: Arc::new(InstallerError::Io(std::io::Error::other(
                            "run ended without reporting an outcome",
                        ))),
                    }
                });
            }
        }
    }
}

/// Publishes progress for one run. Percentages never go backwards.
#[derive(Clone)]
pub(crate) struct Reporter {
    tx: Arc<watch::Sender<RunProgress>>,
}

impl Reporter {
    fn new(initial: RunProgress) -> (Self, watch::Receiver<RunProgress>) {
        let (tx, rx) = watch::channel(initial);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub(crate) fn report(&self, phase: RunPhase, percent: u8, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(phase = phase.label(), percent, %message, "Progress");
        self.tx.send_modify(|p| {
            p.phase = phase;
            p.percent = p.percent.max(percent.min(100));
            p.message = message;
        });
    }

    /// Sink that maps a sub-step's 0-100 into `base..base+span`.
    pub(crate) fn band(&self, phase: RunPhase, base: u8, span: u8, label: impl Into<String>) -> ProgressSink {
        let reporter = self.clone();
        let label = label.into();
        Arc::new(move |p| {
            reporter.report(phase, scale_progress(base, span, p), format!("{} ({}%)", label, p))
        })
    }

    fn finish(&self, outcome: RunOutcome) {
        self.tx.send_modify(|p| {
            match &outcome {
                RunOutcome::Succeeded { warnings } => {
                    p.phase = RunPhase::Done;
                    p.percent = 100;
                    p.message = if warnings.is_empty() {
                        "Completed".to_string()
                    } else {
                        format!("Completed with {} warning(s)", warnings.len())
                    };
                }
                RunOutcome::Failed { error } => {
                    p.message = format!("Failed: {}", error);
                }
            }
            p.outcome = Some(outcome);
        });
    }
}

/// Progress bands for one package.
struct PackageSteps {
    download: RunPhase,
    extract: RunPhase,
    download_base: u8,
    download_span: u8,
    extract_base: u8,
    extract_span: u8,
}

const LOADER_STEPS: PackageSteps = PackageSteps {
    download: RunPhase::DownloadLoader,
    extract: RunPhase::ExtractLoader,
    download_base: 30,
    download_span: 25,
    extract_base: 55,
    extract_span: 5,
};

const TRANSLATOR_STEPS: PackageSteps = PackageSteps {
    download: RunPhase::DownloadTranslator,
    extract: RunPhase::ExtractTranslator,
    download_base: 60,
    download_span: 25,
    extract_base: 85,
    extract_span: 2,
};

/// Runs installs, uninstalls and restores against one game directory at a
/// time. Cheap to clone; clones share the run guard.
#[derive(Clone)]
pub struct Installer {
    resolver: Arc<VersionResolver>,
    detector: Arc<dyn Detector>,
    archive: ArchiveService,
    verifier: LaunchVerifier,
    download_dir: PathBuf,
    retry_delay: Duration,
    guard: Arc<Semaphore>,
}

impl Installer {
    pub fn new(resolver: Arc<VersionResolver>, detector: Arc<dyn Detector>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            resolver,
            detector,
            archive: ArchiveService::new(),
            verifier: LaunchVerifier::new(),
            download_dir: download_dir.into(),
            retry_delay: DEFAULT_RETRY_DELAY,
            guard: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_verifier(mut self, verifier: LaunchVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn resolver(&self) -> &Arc<VersionResolver> {
        &self.resolver
    }

    pub fn detector(&self) -> &Arc<dyn Detector> {
        &self.detector
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Snapshot manager for `game` sharing this installer's detector.
    pub fn snapshots(&self, game: impl Into<PathBuf>) -> SnapshotManager {
        SnapshotManager::new(game, Arc::clone(&self.detector))
    }

    /// Take the run permit without waiting.
    pub fn try_acquire(&self) -> Result<RunPermit> {
        Arc::clone(&self.guard)
            .try_acquire_owned()
            .map(|permit| RunPermit { _permit: permit })
            .map_err(|_| InstallerError::Busy)
    }

    pub fn is_busy(&self) -> bool {
        self.guard.available_permits() == 0
    }

    /// Start installing both packages into `game`.
    pub fn start_install(&self, game: impl Into<PathBuf>, options: InstallOptions) -> Result<InstallationRun> {
        let permit = self.try_acquire()?;
        let game = game.into();
        let this = self.clone();

        Ok(self.spawn_run(RunKind::Install, permit, move |reporter, permit| async move {
            let _permit = permit;
            this.run_install(&game, &options, &reporter).await
        }))
    }

    /// Start restoring the snapshot at `snapshot` into `game`.
    pub fn start_restore(&self, game: impl Into<PathBuf>, snapshot: impl Into<PathBuf>) -> Result<InstallationRun> {
        let permit = self.try_acquire()?;
        let manager = self.snapshots(game);
        let snapshot = snapshot.into();

        Ok(self.spawn_run(RunKind::Restore, permit, move |reporter, permit| async move {
            reporter.report(RunPhase::Restore, 10, format!("Restoring {}", snapshot.display()));
            let sink = reporter.band(RunPhase::Restore, 10, 85, "Restoring snapshot");
            manager.restore(&snapshot, &permit, sink).await
        }))
    }

    /// Spawn `work` with the permit. The permit is released before the
    /// outcome is published, so a caller that saw the outcome can start the
    /// next run immediately.
    fn spawn_run<F, Fut>(&self, kind: RunKind, permit: RunPermit, work: F) -> InstallationRun
    where
        F: FnOnce(Reporter, RunPermit) -> Fut,
        Fut: Future<Output = Result<Vec<String>>> + Send + 'static,
    {
        let (reporter, progress_rx) = Reporter::new(RunProgress::new(format!("Starting {}", kind.label())));
        let work = work(reporter.clone(), permit);

        tokio::spawn(async move {
            let outcome = match work.await {
                Ok(warnings) => {
                    tracing::info!(run = kind.label(), warnings = warnings.len(), "Run completed");
                    RunOutcome::Succeeded { warnings }
                }
                Err(e) => {
                    tracing::error!(run = kind.label(), error = %e, "Run failed");
                    RunOutcome::Failed { error: Arc::new(e) }
                }
            };
            reporter.finish(outcome);
        });

        InstallationRun { kind, progress_rx }
    }

    async fn run_install(&self, game: &Path, options: &InstallOptions, reporter: &Reporter) -> Result<Vec<String>> {
        if !game.is_dir() {
            return Err(InstallerError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("game directory {} does not exist", game.display()),
            )));
        }

        let layout = GameLayout::new(game);
        let mut warnings = Vec::new();

        tracing::info!(game = %game.display(), platform = %options.platform, "Starting installation");
        reporter.report(RunPhase::Starting, 0, format!("Installing into {}", game.display()));

        if options.backup && layout.loader_dir().is_dir() {
            reporter.report(RunPhase::Backup, 10, "Backing up existing installation");
            match self.backup(&layout).await {
                Ok(path) => tracing::info!(backup = %path.display(), "Backup created"),
                Err(e) => {
                    tracing::warn!(error = %e, "Backup failed, continuing");
                    warnings.push(format!("Backup failed: {}", e));
                }
            }
        }

        if options.clean {
            reporter.report(RunPhase::Clean, 20, "Removing previous installation");
            warnings.extend(self.clean(&layout).await);
        }

        let loader = self.resolve(PackageKind::Loader, options).await?;
        self.install_package(&loader, game, reporter, &LOADER_STEPS).await?;

        let translator = self.resolve(PackageKind::Translator, options).await?;
        self.install_package(&translator, game, reporter, &TRANSLATOR_STEPS).await?;

        if options.launch_and_verify {
            reporter.report(RunPhase::LaunchVerify, 87, "Launching game to generate config files");
            warnings.extend(self.launch_and_verify(game, options, reporter).await);
        }

        reporter.report(RunPhase::Done, 100, "Installation complete");
        Ok(warnings)
    }

    /// Pinned version if given, else the recommendation.
    async fn resolve(&self, kind: PackageKind, options: &InstallOptions) -> Result<VersionRecord> {
        let pin = match kind {
            PackageKind::Loader => options.loader_version.as_deref(),
            PackageKind::Translator => options.translator_version.as_deref(),
        };
        if let Some(version) = pin {
            return self.resolver.resolve_exact(kind, version, options.platform).await;
        }

        // IL2CPP loaders only ship as bleeding-edge prereleases
        let include_prerelease =
            options.include_prerelease || (kind == PackageKind::Loader && options.platform.is_il2cpp());

        self.resolver
            .recommend(kind, options.platform, include_prerelease)
            .await?
            .ok_or(InstallerError::NoCandidate {
                kind,
                platform: options.platform,
            })
    }

    async fn install_package(
        &self,
        record: &VersionRecord,
        game: &Path,
        reporter: &Reporter,
        steps: &PackageSteps,
    ) -> Result<()> {
        let label = format!("{} {}", record.kind, record.version);

        reporter.report(steps.download, steps.download_base, format!("Downloading {}", label));
        let sink = reporter.band(
            steps.download,
            steps.download_base,
            steps.download_span,
            format!("Downloading {}", label),
        );
        let archive = self.download_with_retry(record, sink).await?;

        reporter.report(steps.extract, steps.extract_base, format!("Extracting {}", label));
        let sink = reporter.band(steps.extract, steps.extract_base, steps.extract_span, format!("Extracting {}", label));
        let extracted = self.archive.extract_zip(&archive, game, sink).await;

        if let Err(e) = self.archive.remove_file(&archive).await {
            tracing::debug!(archive = %archive.display(), error = %e, "Could not remove downloaded archive");
        }

        let files = extracted?;
        tracing::info!(package = %record.kind, version = %record.version, files, "Package extracted");
        Ok(())
    }

    /// Download into the download directory, retrying with a linearly
    /// growing delay. A failed attempt never leaves a file at the target.
    pub async fn download_with_retry(&self, record: &VersionRecord, progress: ProgressSink) -> Result<PathBuf> {
        let dest = self.download_dir.join(record.file_name());
        let mut last_error = String::new();

        for attempt in 1..=DOWNLOAD_ATTEMPTS {
            match self.resolver.download(record, &dest, Arc::clone(&progress)).await {
                Ok(bytes) => {
                    tracing::info!(
                        file = %dest.display(),
                        size = %format_bytes(bytes),
                        attempt,
                        "Download finished"
                    );
                    return Ok(dest);
                }
                Err(e) => {
                    tracing::warn!(
                        url = %record.download_url,
                        attempt,
                        max_attempts = DOWNLOAD_ATTEMPTS,
                        error = %e,
                        "Download attempt failed"
                    );
                    let _ = tokio::fs::remove_file(&dest).await;
                    last_error = e.to_string();

                    if attempt < DOWNLOAD_ATTEMPTS {
                        tokio::time::sleep(self.retry_delay * attempt).await;
                    }
                }
            }
        }

        Err(InstallerError::DownloadFailed {
            url: record.download_url.clone(),
            attempts: DOWNLOAD_ATTEMPTS,
            reason: last_error,
        })
    }

    async fn backup(&self, layout: &GameLayout) -> Result<PathBuf> {
        let path = layout.backup_archive(&timestamp_suffix(Local::now()));
        self.archive
            .create_zip(&layout.loader_dir(), &path, Some(LOADER_DIR))
            .await?;
        Ok(path)
    }

    /// Remove loader files. Returns one warning per failed removal.
    async fn clean(&self, layout: &GameLayout) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Err(e) = self.archive.remove_dir(&layout.loader_dir()).await {
            tracing::warn!(error = %e, "Could not remove loader directory");
            warnings.push(format!("Could not remove {}: {}", layout.loader_dir().display(), e));
        }
        for file in [layout.entry_point(), layout.doorstop_config()] {
            if let Err(e) = self.archive.remove_file(&file).await {
                tracing::warn!(file = %file.display(), error = %e, "Could not remove file");
                warnings.push(format!("Could not remove {}: {}", file.display(), e));
            }
        }

        warnings
    }

    async fn launch_and_verify(&self, game: &Path, options: &InstallOptions, reporter: &Reporter) -> Vec<String> {
        let Some(exe) = self.detector.find_executable(game) else {
            tracing::warn!(game = %game.display(), "No executable found, skipping launch verification");
            return vec!["No game executable found; config files were not generated".to_string()];
        };

        let sink = reporter.band(RunPhase::LaunchVerify, 87, 8, "Waiting for config files");
        match self.verifier.verify(&exe, game, options.verify_timeout, sink).await {
            Ok(report) => report.warnings(),
            Err(e) => {
                tracing::warn!(exe = %exe.display(), error = %e, "Could not launch game");
                vec![format!("Could not launch {}: {}", exe.display(), e)]
            }
        }
    }
}
