// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistent user settings.
//!
//! Settings live in `~/.xunity-installer/settings.json`. Missing fields take
//! their defaults, so older files keep loading after new keys are added.
//! The GitHub token can also come from the environment, which always wins
//! over the stored value.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::TOKEN_ENV_VAR;
use crate::sources::webdav::DEFAULT_MIRROR_URL;
use crate::types::{DownloadSource, GithubBackend};
use crate::utils::mask_sensitive;

/// Name of the per-user data directory under the home directory.
pub const DATA_DIR_NAME: &str = ".xunity-installer";

/// Settings file name inside the data directory.
pub const SETTINGS_FILE: &str = "settings.json";

/// Fallback token variable honoured after [`TOKEN_ENV_VAR`].
pub const GENERIC_TOKEN_ENV_VAR: &str = "GITHUB_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Preferred upstream for version listing and downloads
    #[serde(default)]
    pub download_source: DownloadSource,
    /// How GitHub releases are read when GitHub is preferred
    #[serde(default)]
    pub github_backend: GithubBackend,
    /// Personal access token for the REST backend (optional)
    #[serde(default)]
    pub github_token: Option<String>,
    /// Base URL of the WebDAV mirror
    #[serde(default = "default_mirror_url")]
    pub mirror_url: String,
    /// Timeout for listing requests, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Releases requested from each source per refresh
    #[serde(default = "default_max_versions")]
    pub max_versions: usize,
    /// Whether `install` backs up an existing tree unless told otherwise
    #[serde(default = "default_backup_existing")]
    pub backup_existing: bool,
    /// Last game directory used
    #[serde(default)]
    pub last_game_path: Option<PathBuf>,
}

fn default_mirror_url() -> String {
    DEFAULT_MIRROR_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_versions() -> usize {
    10
}

fn default_backup_existing() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_source: DownloadSource::default(),
            github_backend: GithubBackend::default(),
            github_token: None,
            mirror_url: default_mirror_url(),
            request_timeout_secs: default_request_timeout_secs(),
            max_versions: default_max_versions(),
            backup_existing: default_backup_existing(),
            last_game_path: None,
        }
    }
}

impl Settings {
    /// Load settings from the default location, falling back to defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&settings_path()?)
    }

    /// Load settings from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid settings file {}", path.display()))?
        } else {
            Settings::default()
        };

        if let Some(token) = settings.effective_token() {
            tracing::debug!(token = %mask_sensitive(&token, 4), "GitHub token configured");
        }

        Ok(settings)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&settings_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Token from the environment, else the stored one. Blank values count as unset.
    pub fn effective_token(&self) -> Option<String> {
        [TOKEN_ENV_VAR, GENERIC_TOKEN_ENV_VAR]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .chain(self.github_token.clone())
            .map(|t| t.trim().to_string())
            .find(|t| !t.is_empty())
    }
}

/// `~/.xunity-installer`, created on first use.
pub fn data_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    let dir = home.join(DATA_DIR_NAME);
    if !dir.exists() {
        fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

pub fn settings_path() -> Result<PathBuf> {
    Ok(data_dir()?.join(SETTINGS_FILE))
}

/// Where downloaded archives are staged before extraction.
pub fn download_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("downloads"))
}

pub fn log_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load_from(&dir.path().join("settings.json")).unwrap();
        assert_eq!(settings.download_source, DownloadSource::Github);
        assert_eq!(settings.github_backend, GithubBackend::Atom);
        assert_eq!(settings.max_versions, 10);
        assert!(settings.backup_existing);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"download_source":"mirror"}"#).unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.download_source, DownloadSource::Mirror);
        assert_eq!(settings.request_timeout_secs, 30);
        assert_eq!(settings.mirror_url, DEFAULT_MIRROR_URL);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        settings.github_backend = GithubBackend::Api;
        settings.github_token = Some("ghp_test".into());
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.github_backend, GithubBackend::Api);
        assert_eq!(loaded.github_token.as_deref(), Some("ghp_test"));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();
        assert!(Settings::load_from(&path).is_err());
    }
}
