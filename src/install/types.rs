// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Install run types.

use std::sync::Arc;
use std::time::Duration;

use crate::error::InstallerError;
use crate::types::Platform;

/// Default time allowed for the game to write its config files.
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(60);

/// What the user asked for.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub platform: Platform,
    /// Exact loader version; `None` installs the recommendation
    pub loader_version: Option<String>,
    /// Exact translator version; `None` installs the recommendation
    pub translator_version: Option<String>,
    /// Zip the existing `BepInEx/` before touching it
    pub backup: bool,
    /// Remove the existing loader files before extracting
    pub clean: bool,
    /// Start the game once to have it write its config files
    pub launch_and_verify: bool,
    pub include_prerelease: bool,
    pub verify_timeout: Duration,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            platform: Platform::X64,
            loader_version: None,
            translator_version: None,
            backup: true,
            clean: false,
            launch_and_verify: false,
            include_prerelease: false,
            verify_timeout: DEFAULT_VERIFY_TIMEOUT,
        }
    }
}

/// Which operation a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Install,
    Uninstall,
    Restore,
}

impl RunKind {
    pub fn label(&self) -> &'static str {
        match self {
            RunKind::Install => "installation",
            RunKind::Uninstall => "uninstallation",
            RunKind::Restore => "snapshot restore",
        }
    }
}

/// Step a run is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Starting,
    Backup,
    Clean,
    DownloadLoader,
    ExtractLoader,
    DownloadTranslator,
    ExtractTranslator,
    LaunchVerify,
    Detect,
    Remove,
    Verify,
    Restore,
    Done,
}

impl RunPhase {
    pub fn label(&self) -> &'static str {
        match self {
            RunPhase::Starting => "starting",
            RunPhase::Backup => "backup",
            RunPhase::Clean => "clean",
            RunPhase::DownloadLoader => "download loader",
            RunPhase::ExtractLoader => "extract loader",
            RunPhase::DownloadTranslator => "download translator",
            RunPhase::ExtractTranslator => "extract translator",
            RunPhase::LaunchVerify => "launch and verify",
            RunPhase::Detect => "detect",
            RunPhase::Remove => "remove",
            RunPhase::Verify => "verify",
            RunPhase::Restore => "restore",
            RunPhase::Done => "done",
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Completed; `warnings` lists optional steps that did not work out
    Succeeded { warnings: Vec<String> },
    /// An essential step failed
    Failed { error: Arc<InstallerError> },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded { .. })
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            RunOutcome::Succeeded { warnings } => warnings,
            RunOutcome::Failed { .. } => &[],
        }
    }
}

/// Latest state of a run.
#[derive(Debug, Clone)]
pub struct RunProgress {
    pub phase: RunPhase,
    /// 0-100, never decreases within a run
    pub percent: u8,
    pub message: String,
    /// Set once, when the run ends
    pub outcome: Option<RunOutcome>,
}

impl RunProgress {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            phase: RunPhase::Starting,
            percent: 0,
            message: message.into(),
            outcome: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }
}
