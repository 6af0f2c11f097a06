// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::{Path, PathBuf};

use super::{InstallationRun, Installer, Reporter, RunKind, RunPhase};
use crate::error::{InstallerError, Result};
use crate::layout::GameLayout;

impl Installer {
    /// Start removing the loader, translator and doorstop files from `game`.
    pub fn start_uninstall(&self, game: impl Into<PathBuf>) -> Result<InstallationRun> {
        let permit = self.try_acquire()?;
        let game = game.into();
        let this = self.clone();

        Ok(self.spawn_run(RunKind::Uninstall, permit, move |reporter, permit| async move {
            let _permit = permit;
            this.run_uninstall(&game, &reporter).await
        }))
    }

    async fn run_uninstall(&self, game: &Path, reporter: &Reporter) -> Result<Vec<String>> {
        let layout = GameLayout::new(game);
        let mut warnings = Vec::new();

        reporter.report(RunPhase::Starting, 0, format!("Uninstalling from {}", game.display()));

        reporter.report(RunPhase::Detect, 10, "Checking installation");
        let status = self.detector.detect_installation(game);
        let leftovers = !remaining_files(&layout).is_empty();
        if !status.anything_installed() && !leftovers {
            return Err(InstallerError::NotInstalled(game.to_path_buf()));
        }

        reporter.report(RunPhase::Remove, 30, "Removing BepInEx directory");
        self.archive.remove_dir(&layout.loader_dir()).await?;

        reporter.report(RunPhase::Remove, 60, "Removing winhttp.dll");
        self.archive.remove_file(&layout.entry_point()).await?;

        reporter.report(RunPhase::Remove, 70, "Removing doorstop_config.ini");
        self.archive.remove_file(&layout.doorstop_config()).await?;

        reporter.report(RunPhase::Remove, 80, "Removing auxiliary files");
        for file in layout.extra_loader_files() {
            if let Err(e) = self.archive.remove_file(&file).await {
                tracing::warn!(file = %file.display(), error = %e, "Could not remove file");
                warnings.push(format!("Could not remove {}: {}", file.display(), e));
            }
        }

        reporter.report(RunPhase::Verify, 90, "Verifying removal");
        let after = self.detector.detect_installation(game);
        let remaining = remaining_files(&layout);
        if after.anything_installed() || !remaining.is_empty() {
            tracing::warn!(remaining = remaining.len(), "Files remain after uninstall");
            warnings.push("Some files could not be removed".to_string());
            for path in remaining {
                warnings.push(format!("Still present: {}", path.display()));
            }
        }

        reporter.report(RunPhase::Done, 100, "Uninstall complete");
        tracing::info!(game = %game.display(), warnings = warnings.len(), "Uninstall finished");
        Ok(warnings)
    }
}

/// Loader paths that still exist in `layout`.
fn remaining_files(layout: &GameLayout) -> Vec<PathBuf> {
    [layout.loader_dir(), layout.entry_point(), layout.doorstop_config()]
        .into_iter()
        .filter(|p| p.exists())
        .collect()
}
