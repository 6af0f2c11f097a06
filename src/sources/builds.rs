// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bleeding-edge build index.
//!
//! IL2CPP loader builds are only published on `builds.bepinex.dev`, which
//! has no API. The project page is scraped with a list of patterns tried in
//! order; the page layout has changed before and will again, so the first
//! pattern that yields anything wins.
//!
//! Only the newest build is checked. Each architecture gets a HEAD request:
//! a success or a transport error keeps the record, a definite non-success
//! status drops it.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use reqwest::header::CONTENT_LENGTH;

use super::{build_client, download_to_file, get_text, head_ok, BoxFuture, VersionSource};
use crate::error::{InstallerError, Result};
use crate::types::{PackageKind, Platform, ProgressSink, VersionRecord};

pub const BUILDS_BASE_URL: &str = "https://builds.bepinex.dev";
pub const PROJECT_PATH: &str = "projects/bepinex_be";

static BUILD_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?im)#(\d+)[^<]*?6\.0\.0-be\.(\d+)\+([a-f0-9]+)",
        r"(?im)build[^\d]*(\d+)[^<]*?6\.0\.0-be\.(\d+)\+([a-f0-9]+)",
        r"(?im)6\.0\.0-be\.(\d+)\+([a-f0-9]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("build index regex is valid"))
    .collect()
});

/// One build listed on the index page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub build_number: String,
    pub version: String,
}

/// Scrape builds from the index page, in page order, unique by build number.
pub fn parse_builds(html: &str) -> Vec<BuildInfo> {
    for pattern in BUILD_PATTERNS.iter() {
        let mut builds: Vec<BuildInfo> = Vec::new();

        for caps in pattern.captures_iter(html) {
            // the last pattern has no build number; the BE number stands in
            let (build_number, be, hash) = match caps.len() {
                4 => (caps[1].to_string(), &caps[2], &caps[3]),
                3 => (caps[1].to_string(), &caps[1], &caps[2]),
                _ => continue,
            };

            if builds.iter().any(|b| b.build_number == build_number) {
                continue;
            }
            builds.push(BuildInfo {
                build_number,
                version: format!("6.0.0-be.{}+{}", be, hash),
            });
        }

        if !builds.is_empty() {
            return builds;
        }
    }

    Vec::new()
}

/// Architecture segment used in artifact names.
fn artifact_arch(platform: Platform) -> &'static str {
    match platform {
        Platform::X86 | Platform::Il2CppX86 => "win-x86",
        Platform::X64 | Platform::Il2CppX64 => "win-x64",
    }
}

/// Download URL for one build artifact. Only spaces are escaped; the
/// server expects the raw `+` in the version.
pub fn artifact_url(base_url: &str, build_number: &str, version: &str, platform: Platform) -> String {
    let file_name = format!("BepInEx-Unity.IL2CPP-{}-{}.zip", artifact_arch(platform), version);
    format!(
        "{}/{}/{}/{}",
        base_url.trim_end_matches('/'),
        PROJECT_PATH,
        build_number,
        file_name.replace(' ', "%20")
    )
}

/// Result of probing an artifact URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadOutcome {
    /// Server answered with success; size from `Content-Length`, or 0.
    Found(u64),
    /// Server answered with a non-success status.
    Missing,
    /// Request never got an answer.
    Unknown,
}

impl HeadOutcome {
    /// Size to record, or `None` if the artifact should be skipped.
    pub fn record_size(self) -> Option<u64> {
        match self {
            HeadOutcome::Found(size) => Some(size),
            HeadOutcome::Missing => None,
            HeadOutcome::Unknown => Some(0),
        }
    }
}

/// Lists IL2CPP loader builds from the bleeding-edge index.
pub struct BuildsIndexSource {
    client: reqwest::Client,
    base_url: String,
}

impl BuildsIndexSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: BUILDS_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn index_url(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), PROJECT_PATH)
    }

    async fn head_check(&self, url: &str) -> HeadOutcome {
        match self.client.head(url).send().await {
            Ok(response) if response.status().is_success() => {
                let size = response
                    .headers()
                    .get(CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                if size.is_none() {
                    tracing::warn!(url, "Artifact exists but has no Content-Length");
                }
                HeadOutcome::Found(size.unwrap_or(0))
            }
            Ok(response) => {
                tracing::debug!(url, status = response.status().as_u16(), "Artifact not found, skipping");
                HeadOutcome::Missing
            }
            Err(e) => {
                tracing::warn!(url, error = %e, "HEAD request failed, keeping artifact");
                HeadOutcome::Unknown
            }
        }
    }

    async fn build_records(&self, build: &BuildInfo) -> Vec<VersionRecord> {
        let mut records = Vec::new();

        for platform in [Platform::Il2CppX86, Platform::Il2CppX64] {
            let url = artifact_url(&self.base_url, &build.build_number, &build.version, platform);
            let Some(file_size) = self.head_check(&url).await.record_size() else {
                continue;
            };

            records.push(VersionRecord {
                kind: PackageKind::Loader,
                version: build.version.clone(),
                target_platform: Some(platform),
                // the index carries no dates
                release_date: Utc::now(),
                download_url: url,
                file_size,
                is_prerelease: true,
            });
        }

        records
    }
}

impl VersionSource for BuildsIndexSource {
    fn name(&self) -> &str {
        "BepInEx builds (bleeding edge)"
    }

    fn list_loader_versions(&self, _max_count: usize) -> BoxFuture<'_, Result<Vec<VersionRecord>>> {
        Box::pin(async move {
            let url = self.index_url();
            let html = get_text(&self.client, &url)
                .await
                .map_err(|e| InstallerError::source_unavailable(self.name(), e))?;

            let builds = parse_builds(&html);
            if builds.is_empty() {
                let head: String = html.chars().take(500).collect();
                tracing::warn!(url = %url, snippet = %head, "No builds found on index page");
                return Ok(Vec::new());
            }

            // only the newest build is worth the HEAD round-trips
            let newest = &builds[0];
            tracing::debug!(build = %newest.build_number, version = %newest.version, "Probing newest build");
            let records = self.build_records(newest).await;
            tracing::info!(count = records.len(), "Fetched IL2CPP loader builds");
            Ok(records)
        })
    }

    fn list_translator_versions(
        &self,
        _max_count: usize,
    ) -> BoxFuture<'_, Result<Vec<VersionRecord>>> {
        Box::pin(async { Ok(Vec::new()) })
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
        Box::pin(async move { head_ok(&self.client, &self.index_url()).await })
    }
}
