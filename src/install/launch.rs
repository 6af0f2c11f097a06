// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Launch-and-verify.
//!
//! BepInEx and the translator only write their config files on the first
//! game start. This step launches the game, waits for both files to show up
//! with content, then closes it again. Nothing here fails the install: a
//! timeout becomes a warning with whatever diagnostics could be gathered.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};

use crate::error::Result;
use crate::layout::GameLayout;
use crate::types::ProgressSink;

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);
pub const GRACE_PERIOD: Duration = Duration::from_secs(3);
pub const MAX_DIAGNOSTIC_LINES: usize = 50;

/// What happened during a verification launch.
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    pub verified: bool,
    pub elapsed: Duration,
    /// Config files that never appeared (or stayed empty)
    pub missing: Vec<PathBuf>,
    /// Trailing ERROR/FATAL lines from `LogOutput.log`
    pub log_errors: Vec<String>,
    /// The game quit on its own before verification finished
    pub exited_early: bool,
}

impl VerifyReport {
    /// Warning lines for the run outcome. Empty when verified.
    pub fn warnings(&self) -> Vec<String> {
        if self.verified {
            return Vec::new();
        }

        let mut warnings = Vec::new();
        if self.exited_early {
            warnings.push("Game exited before its config files were written".to_string());
        } else {
            warnings.push(format!(
                "Config files were not generated within {}s",
                self.elapsed.as_secs()
            ));
        }
        for path in &self.missing {
            warnings.push(format!("Missing: {}", path.display()));
        }
        for line in &self.log_errors {
            warnings.push(format!("Log: {}", line));
        }
        warnings
    }
}

#[derive(Debug, Clone)]
pub struct LaunchVerifier {
    poll_interval: Duration,
    settle_delay: Duration,
    grace_period: Duration,
}

impl Default for LaunchVerifier {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            settle_delay: SETTLE_DELAY,
            grace_period: GRACE_PERIOD,
        }
    }
}

impl LaunchVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timing(poll_interval: Duration, settle_delay: Duration, grace_period: Duration) -> Self {
        Self {
            poll_interval,
            settle_delay,
            grace_period,
        }
    }

    /// Launch `executable` in `game` and wait up to `timeout` for the loader
    /// and translator config files.
    ///
    /// Only a failure to start the process is an error.
    pub async fn verify(
        &self,
        executable: &Path,
        game: &Path,
        timeout: Duration,
        progress: ProgressSink,
    ) -> Result<VerifyReport> {
        let layout = GameLayout::new(game);
        let targets = [layout.loader_config(), layout.translator_config()];

        tracing::info!(exe = %executable.display(), timeout_secs = timeout.as_secs(), "Launching game to generate config");

        let mut child = Command::new(executable)
            .current_dir(game)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let started = Instant::now();
        let mut exited_early = false;
        progress(0);

        let verified = loop {
            if all_written(&targets).await {
                // give the game a moment to finish writing
                tokio::time::sleep(self.settle_delay).await;
                break true;
            }

            if let Ok(Some(status)) = child.try_wait() {
                tracing::warn!(%status, "Game exited during verification");
                exited_early = true;
                break all_written(&targets).await;
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                break false;
            }

            let percent = (elapsed.as_millis() * 100 / timeout.as_millis().max(1)).min(99) as u8;
            progress(percent);
            tokio::time::sleep(self.poll_interval).await;
        };

        if !exited_early {
            self.close(&mut child).await;
        }
        progress(100);

        let mut missing = Vec::new();
        for target in &targets {
            if !is_written(target).await {
                missing.push(target.clone());
            }
        }

        let log_errors = if verified {
            Vec::new()
        } else {
            tail_log_errors(&layout.log_output(), MAX_DIAGNOSTIC_LINES).await
        };

        let report = VerifyReport {
            verified,
            elapsed: started.elapsed(),
            missing,
            log_errors,
            exited_early,
        };

        if report.verified {
            tracing::info!(elapsed_ms = report.elapsed.as_millis() as u64, "Config files generated");
        } else {
            tracing::warn!(
                missing = report.missing.len(),
                log_errors = report.log_errors.len(),
                "Config files not generated"
            );
        }

        Ok(report)
    }

    /// Ask the game to close, then force it after the grace period.
    async fn close(&self, child: &mut Child) {
        if let Some(pid) = child.id() {
            if let Err(e) = request_close(pid).await {
                tracing::debug!(pid, error = %e, "Close request failed");
            }
        }

        match tokio::time::timeout(self.grace_period, child.wait()).await {
            Ok(_) => tracing::debug!("Game closed"),
            Err(_) => {
                tracing::warn!("Game did not close in time, killing it");
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "Failed to kill game process");
                }
            }
        }
    }
}

#[cfg(target_os = "windows")]
async fn request_close(pid: u32) -> std::io::Result<()> {
    Command::new("taskkill")
        .args(["/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    Ok(())
}

#[cfg(not(target_os = "windows"))]
async fn request_close(pid: u32) -> std::io::Result<()> {
    Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    Ok(())
}

async fn is_written(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

async fn all_written(paths: &[PathBuf]) -> bool {
    for path in paths {
        if !is_written(path).await {
            return false;
        }
    }
    true
}

/// Last `max` lines of the loader log that mention ERROR or FATAL.
pub async fn tail_log_errors(log: &Path, max: usize) -> Vec<String> {
    let Ok(bytes) = tokio::fs::read(log).await else {
        return Vec::new();
    };
    let text = String::from_utf8_lossy(&bytes);
    let errors: Vec<String> = text
        .lines()
        .filter(|l| l.contains("ERROR") || l.contains("FATAL"))
        .map(|l| l.trim_end().to_string())
        .collect();
    let skip = errors.len().saturating_sub(max);
    errors.into_iter().skip(skip).collect()
}
