// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! GitHub release Atom feeds.
//!
//! Feeds are unauthenticated and not rate limited, but they carry no asset
//! list. Loader records are therefore synthesized from the naming template
//! for each architecture; a template that does not exist upstream only
//! surfaces when it is downloaded. Translator releases can be checked
//! against the release's expanded-assets page to find the real Mono and
//! IL2CPP archives.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;

use super::naming::{
    extract_version, is_prerelease, loader_asset_url, translator_asset_url, translator_platform,
};
use super::{build_client, download_to_file, get_text, BoxFuture, VersionSource};
use crate::error::{InstallerError, Result};
use crate::types::{normalize_tag, PackageKind, Platform, ProgressSink, VersionRecord};

pub const LOADER_FEED_URL: &str = "https://github.com/BepInEx/BepInEx/releases.atom";
pub const TRANSLATOR_FEED_URL: &str = "https://github.com/bbepis/XUnity.AutoTranslator/releases.atom";
pub const TRANSLATOR_ASSETS_URL: &str =
    "https://github.com/bbepis/XUnity.AutoTranslator/releases/expanded_assets";

static TRANSLATOR_ASSET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"href="([^"]*/releases/download/[^"]+/XUnity\.AutoTranslator-BepInEx(-IL2CPP)?-[^"/]+\.zip)""#)
        .expect("translator asset regex is valid")
});

/// One `<entry>` of an Atom feed.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomEntry {
    pub title: String,
    pub updated: DateTime<Utc>,
    pub link: String,
}

#[derive(Clone, Copy)]
enum Field {
    None,
    Title,
    Updated,
}

/// Parse the entries of an Atom document.
///
/// Missing or unparsable `<updated>` values become "now".
pub fn parse_atom_entries(xml: &str) -> Result<Vec<AtomEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<AtomEntry> = None;
    let mut field = Field::None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"entry" => {
                    current = Some(AtomEntry {
                        title: String::new(),
                        updated: Utc::now(),
                        link: String::new(),
                    })
                }
                b"title" => field = Field::Title,
                b"updated" => field = Field::Updated,
                b"link" => {
                    if let Some(entry) = current.as_mut() {
                        entry.link = href_of(&e)?;
                    }
                }
                _ => field = Field::None,
            },
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"link" {
                    if let Some(entry) = current.as_mut() {
                        entry.link = href_of(&e)?;
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| InstallerError::parse("Atom feed", e))?;
                apply_text(current.as_mut(), field, &text);
            }
            Ok(Event::CData(c)) => {
                let text = String::from_utf8_lossy(&c.into_inner()).to_string();
                apply_text(current.as_mut(), field, &text);
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"entry" {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
                field = Field::None;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(InstallerError::parse("Atom feed", e)),
            _ => {}
        }
    }

    Ok(entries)
}

fn href_of(e: &quick_xml::events::BytesStart<'_>) -> Result<String> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| InstallerError::parse("Atom link", err))?;
        if attr.key.local_name().as_ref() == b"href" {
            let value = attr
                .unescape_value()
                .map_err(|err| InstallerError::parse("Atom link", err))?;
            return Ok(value.into_owned());
        }
    }
    Ok(String::new())
}

fn apply_text(entry: Option<&mut AtomEntry>, field: Field, text: &str) {
    let Some(entry) = entry else { return };
    match field {
        Field::Title => entry.title.push_str(text),
        Field::Updated => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text.trim()) {
                entry.updated = parsed.with_timezone(&Utc);
            }
        }
        Field::None => {}
    }
}

/// Loader records for each architecture of each release entry.
pub fn loader_records(entries: &[AtomEntry], max_count: usize) -> Vec<VersionRecord> {
    let mut records = Vec::new();

    for entry in entries.iter().take(max_count) {
        let Some(version) = extract_version(&entry.title) else {
            tracing::warn!(title = %entry.title, "Could not parse loader version from feed entry");
            continue;
        };
        let tag = normalize_tag(&version);
        let prerelease = is_prerelease(&entry.title, &version);

        for platform in [Platform::X64, Platform::X86] {
            records.push(VersionRecord {
                kind: PackageKind::Loader,
                version: tag.clone(),
                target_platform: Some(platform),
                release_date: entry.updated,
                download_url: loader_asset_url(&tag, &version, platform),
                file_size: 0,
                is_prerelease: prerelease,
            });
        }
    }

    records
}

/// Translator asset URLs found on an expanded-assets page, as `(url, il2cpp)`.
pub fn scan_translator_assets(html: &str) -> Vec<(String, bool)> {
    let mut found: Vec<(String, bool)> = Vec::new();
    for caps in TRANSLATOR_ASSET_RE.captures_iter(html) {
        let Some(href) = caps.get(1) else { continue };
        let url = if href.as_str().starts_with('/') {
            format!("https://github.com{}", href.as_str())
        } else {
            href.as_str().to_string()
        };
        let il2cpp = caps.get(2).is_some();
        if !found.iter().any(|(u, _)| *u == url) {
            found.push((url, il2cpp));
        }
    }
    found
}

/// Reads releases from GitHub Atom feeds.
pub struct AtomFeedSource {
    client: reqwest::Client,
    loader_feed: String,
    translator_feed: String,
    assets_base: String,
    asset_lookup: bool,
}

impl AtomFeedSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            loader_feed: LOADER_FEED_URL.to_string(),
            translator_feed: TRANSLATOR_FEED_URL.to_string(),
            assets_base: TRANSLATOR_ASSETS_URL.to_string(),
            asset_lookup: true,
        })
    }

    /// Point the source at different feeds (mirrors, tests).
    pub fn with_feeds(mut self, loader: impl Into<String>, translator: impl Into<String>) -> Self {
        self.loader_feed = loader.into();
        self.translator_feed = translator.into();
        self
    }

    /// Enable or disable the per-release translator asset lookup.
    pub fn with_asset_lookup(mut self, enabled: bool) -> Self {
        self.asset_lookup = enabled;
        self
    }

    async fn fetch_entries(&self, url: &str) -> Result<Vec<AtomEntry>> {
        let xml = get_text(&self.client, url)
            .await
            .map_err(|e| InstallerError::source_unavailable(self.name(), e))?;
        let entries = parse_atom_entries(&xml)?;
        tracing::debug!(url, entries = entries.len(), "Parsed Atom feed");
        Ok(entries)
    }

    async fn lookup_translator_assets(&self, tag: &str) -> Vec<(String, bool)> {
        if !self.asset_lookup {
            return Vec::new();
        }
        let url = format!("{}/{}", self.assets_base, tag);
        match get_text(&self.client, &url).await {
            Ok(html) => scan_translator_assets(&html),
            Err(e) => {
                tracing::debug!(tag, error = %e, "Translator asset lookup failed, using templated URLs");
                Vec::new()
            }
        }
    }

    async fn translator_records(&self, max_count: usize) -> Result<Vec<VersionRecord>> {
        let entries = self.fetch_entries(&self.translator_feed).await?;
        let mut records = Vec::new();

        for entry in entries.iter().take(max_count) {
            let Some(version) = extract_version(&entry.title) else {
                tracing::warn!(title = %entry.title, "Could not parse translator version from feed entry");
                continue;
            };
            let tag = normalize_tag(&version);
            let prerelease = is_prerelease(&entry.title, &version);

            let mut assets = self.lookup_translator_assets(&tag).await;
            if assets.is_empty() {
                assets = vec![
                    (translator_asset_url(&tag, &version, false), false),
                    (translator_asset_url(&tag, &version, true), true),
                ];
            }

            for (url, il2cpp) in assets {
                records.push(VersionRecord {
                    kind: PackageKind::Translator,
                    version: tag.clone(),
                    target_platform: translator_platform(il2cpp),
                    release_date: entry.updated,
                    download_url: url,
                    file_size: 0,
                    is_prerelease: prerelease,
                });
            }
        }

        tracing::info!(count = records.len(), "Fetched translator versions from Atom feed");
        Ok(records)
    }
}

impl VersionSource for AtomFeedSource {
    fn name(&self) -> &str {
        "GitHub (Atom feed)"
    }

    fn list_loader_versions(&self, max_count: usize) -> BoxFuture<'_, Result<Vec<VersionRecord>>> {
        Box::pin(async move {
            let entries = self.fetch_entries(&self.loader_feed).await?;
            let records = loader_records(&entries, max_count);
            tracing::info!(count = records.len(), "Fetched loader versions from Atom feed");
            Ok(records)
        })
    }

    fn list_translator_versions(
        &self,
        max_count: usize,
    ) -> BoxFuture<'_, Result<Vec<VersionRecord>>> {
        Box::pin(self.translator_records(max_count))
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
        Box::pin(async move { get_text(&self.client, &self.loader_feed).await.is_ok() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Release notes from BepInEx</title>
  <entry>
    <id>tag:github.com,2008:Repository/1/v5.4.23.2</id>
    <updated>2024-06-24T12:00:00Z</updated>
    <link rel="alternate" type="text/html" href="https://github.com/BepInEx/BepInEx/releases/tag/v5.4.23.2"/>
    <title>BepInEx 5.4.23.2</title>
  </entry>
  <entry>
    <updated>not-a-date</updated>
    <title>BepInEx 6.0.0 Pre-release 2</title>
  </entry>
  <entry>
    <updated>2023-01-01T00:00:00Z</updated>
    <title>Nightly notes</title>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_entries() {
        let entries = parse_atom_entries(FEED).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].title, "BepInEx 5.4.23.2");
        assert_eq!(
            entries[0].link,
            "https://github.com/BepInEx/BepInEx/releases/tag/v5.4.23.2"
        );
        assert_eq!(entries[0].updated.to_rfc3339(), "2024-06-24T12:00:00+00:00");
    }

    #[test]
    fn test_loader_records_synthesize_both_architectures() {
        let entries = parse_atom_entries(FEED).unwrap();
        let records = loader_records(&entries, 10);

        // the third entry has no version and is skipped
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].version, "v5.4.23.2");
        assert_eq!(records[0].target_platform, Some(Platform::X64));
        assert!(records[0].download_url.ends_with("/v5.4.23.2/BepInEx_win_x64_5.4.23.2.zip"));
        assert_eq!(records[1].target_platform, Some(Platform::X86));
        assert!(!records[0].is_prerelease);
        assert!(records[2].is_prerelease);
    }

    #[test]
    fn test_loader_records_respect_max_count() {
        let entries = parse_atom_entries(FEED).unwrap();
        assert_eq!(loader_records(&entries, 1).len(), 2);
    }

    #[test]
    fn test_scan_translator_assets() {
        let html = r#"
            <a href="/bbepis/XUnity.AutoTranslator/releases/download/v5.4.4/XUnity.AutoTranslator-BepInEx-5.4.4.zip">a</a>
            <a href="/bbepis/XUnity.AutoTranslator/releases/download/v5.4.4/XUnity.AutoTranslator-BepInEx-IL2CPP-5.4.4.zip">b</a>
            <a href="/bbepis/XUnity.AutoTranslator/releases/download/v5.4.4/XUnity.AutoTranslator-ReiPatcher-5.4.4.zip">c</a>
        "#;
        let assets = scan_translator_assets(html);
        assert_eq!(assets.len(), 2);
        assert_eq!(
            assets[0],
            (
                "https://github.com/bbepis/XUnity.AutoTranslator/releases/download/v5.4.4/XUnity.AutoTranslator-BepInEx-5.4.4.zip".to_string(),
                false
            )
        );
        assert!(assets[1].1);
    }

    #[test]
    fn test_malformed_feed_is_an_error() {
        assert!(parse_atom_entries("<feed><entry><title>x</entry></feed>").is_err());
    }
}
