// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! WebDAV mirror source.
//!
//! The mirror is a plain file share with one collection per package. There
//! is no metadata service, so platform, version and prerelease state all
//! come from the file name. Files that match neither naming template are
//! skipped without comment.

use std::borrow::Cow;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;

use super::naming::{is_prerelease, translator_platform};
use super::{build_client, download_to_file, BoxFuture, VersionSource};
use crate::error::{InstallerError, Result};
use crate::types::{normalize_tag, PackageKind, Platform, ProgressSink, VersionRecord};

pub const DEFAULT_MIRROR_URL: &str = "https://fraxelia.com:60761/";
pub const LOADER_COLLECTION: &str = "BepInEx/";
pub const TRANSLATOR_COLLECTION: &str = "XUnity/";

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:getcontentlength/>
    <d:getlastmodified/>
    <d:resourcetype/>
  </d:prop>
</d:propfind>"#;

static LOADER_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^BepInEx_win_(x86|x64)_(\d+\.\d+\.\d+(?:\.\d+)?(?:-[a-zA-Z0-9]+)?)\.zip$")
        .expect("loader file regex is valid")
});

static TRANSLATOR_FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^XUnity\.AutoTranslator-BepInEx-(IL2CPP-)?(\d+\.\d+\.\d+(?:\.\d+)?(?:-[a-zA-Z0-9]+)?)\.zip$",
    )
    .expect("translator file regex is valid")
});

/// One `<response>` of a PROPFIND multistatus document.
#[derive(Debug, Clone, PartialEq)]
pub struct DavEntry {
    pub href: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl DavEntry {
    /// Decoded last path segment of the href.
    pub fn file_name(&self) -> String {
        let trimmed = self.href.trim_end_matches('/');
        decode_href(trimmed.rsplit('/').next().unwrap_or_default())
    }
}

#[derive(Clone, Copy)]
enum DavField {
    None,
    Href,
    Length,
    Modified,
}

/// Parse a WebDAV multistatus body.
pub fn parse_multistatus(xml: &str) -> Result<Vec<DavEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<DavEntry> = None;
    let mut field = DavField::None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                field = match e.local_name().as_ref() {
                    b"response" => {
                        current = Some(DavEntry {
                            href: String::new(),
                            size: 0,
                            modified: None,
                        });
                        DavField::None
                    }
                    b"href" => DavField::Href,
                    b"getcontentlength" => DavField::Length,
                    b"getlastmodified" => DavField::Modified,
                    _ => DavField::None,
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| InstallerError::parse("WebDAV listing", e))?;
                if let Some(entry) = current.as_mut() {
                    match field {
                        DavField::Href => entry.href = text.trim().to_string(),
                        DavField::Length => entry.size = text.trim().parse().unwrap_or(0),
                        DavField::Modified => {
                            entry.modified = DateTime::parse_from_rfc2822(text.trim())
                                .ok()
                                .map(|d| d.with_timezone(&Utc));
                        }
                        DavField::None => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"response" {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
                field = DavField::None;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(InstallerError::parse("WebDAV listing", e)),
            _ => {}
        }
    }

    Ok(entries)
}

/// Percent-decoded href, or the raw href when it doesn't decode to UTF-8.
fn decode_href(href: &str) -> String {
    urlencoding::decode(href)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| href.to_string())
}

/// `v` + the full file-name version, suffix included, so `5.5.0` and
/// `5.5.0-beta1` stay distinct.
fn mirror_tag(version: &str) -> String {
    normalize_tag(version)
}

fn newest_first(entries: &mut [DavEntry]) {
    entries.sort_by(|a, b| b.modified.cmp(&a.modified));
}

/// Loader records from a listing, newest first, at most `limit`.
pub fn loader_records(entries: &[DavEntry], base_url: &str, limit: usize) -> Vec<VersionRecord> {
    let mut sorted = entries.to_vec();
    newest_first(&mut sorted);

    sorted
        .iter()
        .filter_map(|entry| {
            let name = entry.file_name();
            let caps = LOADER_FILE_RE.captures(&name)?;
            let platform = if caps[1].eq_ignore_ascii_case("x64") {
                Platform::X64
            } else {
                Platform::X86
            };
            let version = caps[2].to_string();

            Some(VersionRecord {
                kind: PackageKind::Loader,
                version: mirror_tag(&version),
                target_platform: Some(platform),
                release_date: entry.modified.unwrap_or_else(Utc::now),
                download_url: resolve_href(base_url, LOADER_COLLECTION, &entry.href),
                file_size: entry.size,
                is_prerelease: is_prerelease(&version, &version),
            })
        })
        .take(limit)
        .collect()
}

/// Translator records from a listing, newest first, at most `limit`.
pub fn translator_records(entries: &[DavEntry], base_url: &str, limit: usize) -> Vec<VersionRecord> {
    let mut sorted = entries.to_vec();
    newest_first(&mut sorted);

    sorted
        .iter()
        .filter_map(|entry| {
            let name = entry.file_name();
            let caps = TRANSLATOR_FILE_RE.captures(&name)?;
            let il2cpp = caps.get(1).is_some();
            let version = caps[2].to_string();

            Some(VersionRecord {
                kind: PackageKind::Translator,
                version: mirror_tag(&version),
                target_platform: translator_platform(il2cpp),
                release_date: entry.modified.unwrap_or_else(Utc::now),
                download_url: resolve_href(base_url, TRANSLATOR_COLLECTION, &entry.href),
                file_size: entry.size,
                is_prerelease: is_prerelease(&version, &version),
            })
        })
        .take(limit)
        .collect()
}

/// Absolute download URL for an href from the listing.
fn resolve_href(base_url: &str, collection: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    let base = base_url.trim_end_matches('/');
    if href.starts_with('/') {
        // hrefs are server-absolute paths; keep only scheme://host:port of the base
        let origin = base
            .find("://")
            .and_then(|i| base[i + 3..].find('/').map(|j| &base[..i + 3 + j]))
            .unwrap_or(base);
        format!("{}{}", origin, href)
    } else {
        format!("{}/{}{}", base, collection, href)
    }
}

/// Lists and downloads packages from the WebDAV mirror.
pub struct WebDavSource {
    client: reqwest::Client,
    base_url: String,
}

impl WebDavSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: DEFAULT_MIRROR_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn propfind(&self, url: &str, depth: &str) -> Result<String> {
        let method = Method::from_bytes(b"PROPFIND")
            .map_err(|e| InstallerError::source_unavailable(self.name(), e))?;
        let response = self
            .client
            .request(method, url)
            .header("Depth", depth)
            .header(CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(PROPFIND_BODY)
            .send()
            .await
            .map_err(|e| InstallerError::source_unavailable(self.name(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(InstallerError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.text().await?)
    }

    async fn list(&self, collection: &str) -> Result<Vec<DavEntry>> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), collection);
        let body = self.propfind(&url, "1").await?;
        let entries = parse_multistatus(&body)?;
        tracing::debug!(url = %url, entries = entries.len(), "Listed mirror collection");
        Ok(entries)
    }
}

impl VersionSource for WebDavSource {
    fn name(&self) -> &str {
        "Mirror (WebDAV)"
    }

    fn list_loader_versions(&self, max_count: usize) -> BoxFuture<'_, Result<Vec<VersionRecord>>> {
        Box::pin(async move {
            let entries = self.list(LOADER_COLLECTION).await?;
            // two architectures per release
            let records = loader_records(&entries, &self.base_url, max_count * 2);
            tracing::info!(count = records.len(), "Fetched loader versions from mirror");
            Ok(records)
        })
    }

    fn list_translator_versions(
        &self,
        max_count: usize,
    ) -> BoxFuture<'_, Result<Vec<VersionRecord>>> {
        Box::pin(async move {
            let entries = self.list(TRANSLATOR_COLLECTION).await?;
            let records = translator_records(&entries, &self.base_url, max_count);
            tracing::info!(count = records.len(), "Fetched translator versions from mirror");
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
        Box::pin(async move { self.propfind(&self.base_url, "0").await.is_ok() })
    }
}
