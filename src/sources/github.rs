// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! GitHub REST API source.
//!
//! Lists releases through `/repos/{owner}/{repo}/releases`, which includes
//! real asset names and sizes. Anonymous clients get 60 requests per hour,
//! authenticated ones 5000; an exhausted quota is reported as
//! [`InstallerError::RateLimited`] so the caller can tell the user where to
//! put a token.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;

use super::naming::translator_platform;
use super::{build_client, download_to_file, BoxFuture, VersionSource};
use crate::error::{InstallerError, Result};
use crate::types::{normalize_tag, PackageKind, Platform, ProgressSink, VersionRecord};
use crate::utils::mask_sensitive;

pub const API_BASE: &str = "https://api.github.com";
pub const LOADER_REPO: &str = "BepInEx/BepInEx";
pub const TRANSLATOR_REPO: &str = "bbepis/XUnity.AutoTranslator";

/// GitHub caps `per_page` at 100.
const MAX_PER_PAGE: usize = 100;

/// Remaining-quota level below which a warning is logged.
const LOW_QUOTA_WARNING: u64 = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct GithubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub draft: bool,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assets: Vec<GithubAsset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubAsset {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    pub browser_download_url: String,
}

impl GithubRelease {
    fn is_prerelease(&self) -> bool {
        self.prerelease || self.tag_name.contains('-')
    }

    fn release_date(&self) -> DateTime<Utc> {
        self.published_at.unwrap_or_else(Utc::now)
    }
}

/// Loader records: zip assets named for x64 or x86. IL2CPP builds are
/// skipped here; they come from the builds index.
pub fn loader_records(releases: &[GithubRelease]) -> Vec<VersionRecord> {
    let mut records = Vec::new();

    for release in releases.iter().filter(|r| !r.draft) {
        let tag = normalize_tag(&release.tag_name);
        for asset in &release.assets {
            let name = asset.name.to_lowercase();
            if !name.ends_with(".zip") || name.contains("il2cpp") {
                continue;
            }
            let platform = if name.contains("x64") {
                Platform::X64
            } else if name.contains("x86") {
                Platform::X86
            } else {
                continue;
            };

            records.push(VersionRecord {
                kind: PackageKind::Loader,
                version: tag.clone(),
                target_platform: Some(platform),
                release_date: release.release_date(),
                download_url: asset.browser_download_url.clone(),
                file_size: asset.size,
                is_prerelease: release.is_prerelease(),
            });
        }
    }

    records
}

/// Translator records: the BepInEx zip (platform-agnostic) and, when
/// present, the IL2CPP zip. ReiPatcher packages are ignored.
pub fn translator_records(releases: &[GithubRelease]) -> Vec<VersionRecord> {
    let mut records = Vec::new();

    for release in releases.iter().filter(|r| !r.draft) {
        let tag = normalize_tag(&release.tag_name);
        let mut seen_mono = false;
        let mut seen_il2cpp = false;

        for asset in &release.assets {
            let lower = asset.name.to_lowercase();
            if !lower.ends_with(".zip") || lower.contains("reipatcher") {
                continue;
            }
            let il2cpp = lower.contains("il2cpp");
            let seen = if il2cpp { &mut seen_il2cpp } else { &mut seen_mono };
            if *seen {
                continue;
            }
            *seen = true;

            records.push(VersionRecord {
                kind: PackageKind::Translator,
                version: tag.clone(),
                target_platform: translator_platform(il2cpp),
                release_date: release.release_date(),
                download_url: asset.browser_download_url.clone(),
                file_size: asset.size,
                is_prerelease: release.is_prerelease(),
            });
        }
    }

    records
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Map a rejected response to [`InstallerError::RateLimited`] when the
/// quota headers say it is exhausted.
pub fn rate_limit_error(
    status: StatusCode,
    headers: &HeaderMap,
    authenticated: bool,
) -> Option<InstallerError> {
    if status != StatusCode::FORBIDDEN && status != StatusCode::TOO_MANY_REQUESTS {
        return None;
    }
    let remaining = header_u64(headers, "x-ratelimit-remaining")?;
    if remaining > 0 {
        return None;
    }
    let reset_at = header_u64(headers, "x-ratelimit-reset")
        .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single());

    Some(InstallerError::RateLimited {
        remaining: 0,
        reset_at,
        authenticated,
    })
}

/// Reads releases through the GitHub REST API.
pub struct GithubApiSource {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl GithubApiSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            api_base: API_BASE.to_string(),
            token: None,
        })
    }

    /// Authenticate requests with a personal access token.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.trim().is_empty());
        if let Some(token) = &self.token {
            tracing::debug!(token = %mask_sensitive(token, 4), "GitHub API source authenticated");
        }
        self
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .get(url)
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        builder
    }

    async fn fetch_releases(&self, repo: &str, max_count: usize) -> Result<Vec<GithubRelease>> {
        let per_page = max_count.clamp(1, MAX_PER_PAGE);
        let mut releases = Vec::new();
        let mut page = 1;

        while releases.len() < max_count {
            let url = format!(
                "{}/repos/{}/releases?per_page={}&page={}",
                self.api_base, repo, per_page, page
            );
            let response = self
                .request(&url)
                .send()
                .await
                .map_err(|e| InstallerError::source_unavailable(self.name(), e))?;

            let status = response.status();
            let headers = response.headers().clone();

            if let Some(err) = rate_limit_error(status, &headers, self.token.is_some()) {
                tracing::warn!(repo, "GitHub API rate limit exhausted");
                return Err(err);
            }
            if !status.is_success() {
                return Err(InstallerError::HttpStatus {
                    status: status.as_u16(),
                    url,
                });
            }
            if let Some(remaining) = header_u64(&headers, "x-ratelimit-remaining") {
                if remaining < LOW_QUOTA_WARNING {
                    tracing::warn!(remaining, "GitHub API quota nearly exhausted");
                } else {
                    tracing::debug!(remaining, "GitHub API quota");
                }
            }

            let batch: Vec<GithubRelease> = response
                .json()
                .await
                .map_err(|e| InstallerError::parse("GitHub releases", e))?;
            if batch.is_empty() {
                break;
            }
            let short_page = batch.len() < per_page;
            releases.extend(batch);
            if short_page {
                break;
            }
            page += 1;
        }

        releases.truncate(max_count);
        Ok(releases)
    }
}

impl VersionSource for GithubApiSource {
    fn name(&self) -> &str {
        "GitHub (REST API)"
    }

    fn list_loader_versions(&self, max_count: usize) -> BoxFuture<'_, Result<Vec<VersionRecord>>> {
        Box::pin(async move {
            let releases = self.fetch_releases(LOADER_REPO, max_count).await?;
            let records = loader_records(&releases);
            tracing::info!(count = records.len(), "Fetched loader versions from GitHub API");
            Ok(records)
        })
    }

    fn list_translator_versions(
        &self,
        max_count: usize,
    ) -> BoxFuture<'_, Result<Vec<VersionRecord>>> {
        Box::pin(async move {
            let releases = self.fetch_releases(TRANSLATOR_REPO, max_count).await?;
            let records = translator_records(&releases);
            tracing::info!(count = records.len(), "Fetched translator versions from GitHub API");
            Ok(records)
        })
    }

    fn download<'a>(
        &'a self,
        url: &'a str,
        dest: &'a Path,
        progress: ProgressSink,
    ) -> BoxFuture<'a, Result<u64>> {
        Box::pin(download_to_file(&self.client, url, dest, progress))
    }

    fn validate_connection(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            let url = format!("{}/rate_limit", self.api_base);
            match self.request(&url).send().await {
                Ok(response) => response.status().is_success(),
                Err(_) => false,
            }
        })
    }
}
