// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Version sources.
//!
//! A [`VersionSource`] answers two questions for each package family: which
//! versions exist, and how to download one. Four implementations exist:
//!
//! - [`atom::AtomFeedSource`] - GitHub release Atom feeds
//! - [`github::GithubApiSource`] - GitHub REST API, optional token
//! - [`webdav::WebDavSource`] - WebDAV mirror directory listings
//! - [`builds::BuildsIndexSource`] - bleeding-edge IL2CPP build index
//!
//! [`router::SourceRouter`] picks the preferred one and falls back to the
//! mirror for the rest of the session when GitHub fails.
//!
//! # Failure model
//!
//! Listing methods return `Err` for network or parse failures. Callers treat
//! an error as "zero versions from this source"; nothing here panics or
//! aborts the process.

pub mod atom;
pub mod builds;
pub mod github;
pub mod naming;
pub mod router;
pub mod webdav;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use tokio::io::AsyncWriteExt;

use crate::error::{InstallerError, Result};
use crate::types::{ProgressSink, VersionRecord};

pub use atom::AtomFeedSource;
pub use builds::BuildsIndexSource;
pub use github::GithubApiSource;
pub use router::SourceRouter;
pub use webdav::WebDavSource;

/// Boxed future returned by [`VersionSource`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// User agent sent with every request. GitHub rejects requests without one.
pub const USER_AGENT: &str = concat!("xunity-installer/", env!("CARGO_PKG_VERSION"));

/// Default timeout for listing requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for whole-archive downloads.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Capability contract shared by all sources.
pub trait VersionSource: Send + Sync {
    /// Human-readable name used in logs and errors.
    fn name(&self) -> &str;

    /// Loader releases, newest first, at most `max_count` releases' worth.
    fn list_loader_versions(&self, max_count: usize) -> BoxFuture<'_, Result<Vec<VersionRecord>>>;

    /// Translator releases, newest first.
    fn list_translator_versions(
        &self,
        max_count: usize,
    ) -> BoxFuture<'_, Result<Vec<VersionRecord>>>;

    /// Download `url` to `dest`, reporting 0-100 progress. Returns bytes written.
    fn download<'a>(
        &'a self,
        url: &'a str,
        dest: &'a Path,
        progress: ProgressSink,
    ) -> BoxFuture<'a, Result<u64>>;

    /// Cheap reachability check.
    fn validate_connection(&self) -> BoxFuture<'_, bool>;
}

/// Build the shared HTTP client.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(15))
        .timeout(timeout)
        .build()?)
}

/// Fetch `url` as text, mapping non-success statuses to errors.
pub(crate) async fn get_text(client: &reqwest::Client, url: &str) -> Result<String> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(InstallerError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(response.text().await?)
}

/// `{dest}.part`, the staging name used while a download is in flight.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Stream `url` into `dest`.
///
/// Bytes go to `{dest}.part` first; the file is renamed onto `dest` only when
/// the received length matches `Content-Length` (if the server sent one).
/// On any error the partial file is removed.
pub async fn download_to_file(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    progress: ProgressSink,
) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let part = partial_path(dest);
    let result = stream_to(client, url, &part, &progress).await;

    match result {
        Ok(received) => {
            tokio::fs::rename(&part, dest).await?;
            progress(100);
            tracing::debug!(url, dest = %dest.display(), bytes = received, "Download complete");
            Ok(received)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&part).await;
            Err(e)
        }
    }
}

async fn stream_to(
    client: &reqwest::Client,
    url: &str,
    part: &Path,
    progress: &ProgressSink,
) -> Result<u64> {
    let response = client
        .get(url)
        .timeout(DOWNLOAD_TIMEOUT)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(InstallerError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let expected = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let mut file = tokio::fs::File::create(part).await?;
    let mut stream = response.bytes_stream();
    let mut received = 0u64;
    let mut last_percent = 0u8;
    progress(0);

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        received += chunk.len() as u64;

        if let Some(total) = expected.filter(|t| *t > 0) {
            let percent = ((received.min(total) * 100) / total) as u8;
            if percent != last_percent {
                last_percent = percent;
                progress(percent);
            }
        }
    }
    file.flush().await?;
    drop(file);

    if let Some(total) = expected {
        if received != total {
            return Err(InstallerError::SizeMismatch {
                expected: total,
                received,
            });
        }
    }

    Ok(received)
}

/// HEAD request; `true` on any success status.
pub(crate) async fn head_ok(client: &reqwest::Client, url: &str) -> bool {
    match client.head(url).send().await {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            tracing::debug!(url, error = %e, "HEAD request failed");
            false
        }
    }
}
