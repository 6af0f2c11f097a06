// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Version selection.
//!
//! `recommend` answers "what should be installed" and returns `None` when
//! nothing qualifies. `resolve_exact` answers "where is this pinned version"
//! and fails with [`InstallerError::VersionNotFound`] when it does not
//! exist. The two are kept apart so callers can tell "nothing installable"
//! from "you asked for something that isn't there".

use std::path::Path;
use std::sync::Arc;

use crate::cache::VersionCache;
use crate::error::{InstallerError, Result};
use crate::sources::SourceRouter;
use crate::types::{PackageKind, Platform, ProgressSink, VersionRecord};

/// Releases fetched per source when the cache is cold.
pub const DIRECT_QUERY_COUNT: usize = 5;

/// Releases fetched when a pinned version is missing from the cache.
pub const EXACT_LOOKUP_COUNT: usize = 30;

// ============================================================================
// SELECTION
// ============================================================================

/// Newest record; on equal dates the earlier one wins.
fn newest<'a, I>(records: I) -> Option<&'a VersionRecord>
where
    I: IntoIterator<Item = &'a VersionRecord>,
{
    records.into_iter().fold(None, |best, record| match best {
        Some(b) if b.release_date >= record.release_date => Some(b),
        _ => Some(record),
    })
}

/// Newest loader built for exactly `platform`.
pub fn select_loader(
    records: &[VersionRecord],
    platform: Platform,
    include_prerelease: bool,
) -> Option<&VersionRecord> {
    newest(records.iter().filter(|r| {
        r.kind == PackageKind::Loader
            && r.target_platform == Some(platform)
            && (include_prerelease || !r.is_prerelease)
    }))
}

/// Newest translator, preferring the variant that matches the platform's
/// scripting backend. The other variant is used only when no preferred one
/// qualifies.
pub fn select_translator(
    records: &[VersionRecord],
    platform: Platform,
    include_prerelease: bool,
) -> Option<&VersionRecord> {
    let eligible = |r: &&VersionRecord| {
        r.kind == PackageKind::Translator && (include_prerelease || !r.is_prerelease)
    };

    newest(
        records
            .iter()
            .filter(eligible)
            .filter(|r| r.is_il2cpp_variant() == platform.is_il2cpp()),
    )
    .or_else(|| newest(records.iter().filter(eligible)))
}

/// Pick from `records` for `kind`.
pub fn select(
    records: &[VersionRecord],
    kind: PackageKind,
    platform: Platform,
    include_prerelease: bool,
) -> Option<&VersionRecord> {
    match kind {
        PackageKind::Loader => select_loader(records, platform, include_prerelease),
        PackageKind::Translator => select_translator(records, platform, include_prerelease),
    }
}

/// Exact lookup of a pinned version. Translators accept either variant,
/// preferring the one that matches the platform.
pub fn find_exact<'a>(
    records: &'a [VersionRecord],
    kind: PackageKind,
    version: &str,
    platform: Platform,
) -> Option<&'a VersionRecord> {
    let mut matching = records
        .iter()
        .filter(|r| r.kind == kind && r.matches_version(version));

    match kind {
        PackageKind::Loader => matching.find(|r| r.target_platform == Some(platform)),
        PackageKind::Translator => {
            let candidates: Vec<&VersionRecord> = matching.collect();
            candidates
                .iter()
                .find(|r| r.is_il2cpp_variant() == platform.is_il2cpp())
                .or_else(|| candidates.first())
                .copied()
        }
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

pub struct VersionResolver {
    cache: Arc<VersionCache>,
    router: Arc<SourceRouter>,
}

impl VersionResolver {
    pub fn new(cache: Arc<VersionCache>) -> Self {
        let router = Arc::clone(cache.router());
        Self { cache, router }
    }

    pub fn cache(&self) -> &Arc<VersionCache> {
        &self.cache
    }

    /// Best version to install, or `None` when nothing qualifies.
    ///
    /// Uses the cache when it has been populated; otherwise queries the
    /// best source for the platform directly. Source errors from a direct
    /// query are returned so rate-limit advice reaches the user.
    pub async fn recommend(
        &self,
        kind: PackageKind,
        platform: Platform,
        include_prerelease: bool,
    ) -> Result<Option<VersionRecord>> {
        if self.cache.is_initialized() {
            let cached = match kind {
                PackageKind::Loader => self.cache.latest_loader(platform, include_prerelease),
                PackageKind::Translator => self.cache.latest_translator(platform, include_prerelease),
            };
            if cached.is_some() {
                return Ok(cached);
            }
            tracing::debug!(%kind, %platform, "No cached candidate, querying sources");
        }

        let records = self.query_direct(kind, platform, DIRECT_QUERY_COUNT).await?;
        Ok(select(&records, kind, platform, include_prerelease).cloned())
    }

    /// Locate a pinned `version` for `platform`.
    pub async fn resolve_exact(
        &self,
        kind: PackageKind,
        version: &str,
        platform: Platform,
    ) -> Result<VersionRecord> {
        let snapshot = self.cache.snapshot();
        let cached = match kind {
            PackageKind::Loader => &snapshot.loader,
            PackageKind::Translator => &snapshot.translator,
        };
        if let Some(found) = find_exact(cached, kind, version, platform) {
            return Ok(found.clone());
        }

        let records = self.query_direct(kind, platform, EXACT_LOOKUP_COUNT).await?;
        find_exact(&records, kind, version, platform)
            .cloned()
            .ok_or_else(|| InstallerError::VersionNotFound {
                kind,
                version: version.to_string(),
                platform: Some(platform),
            })
    }

    /// Download `record` to `dest` through the routed sources.
    pub async fn download(&self, record: &VersionRecord, dest: &Path, progress: ProgressSink) -> Result<u64> {
        tracing::info!(
            package = %record.kind,
            version = %record.version,
            url = %record.download_url,
            "Downloading"
        );
        self.router.download(&record.download_url, dest, progress).await
    }

    async fn query_direct(
        &self,
        kind: PackageKind,
        platform: Platform,
        max_count: usize,
    ) -> Result<Vec<VersionRecord>> {
        match kind {
            // IL2CPP loaders only exist on the build index
            PackageKind::Loader if platform.is_il2cpp() => {
                self.router.builds().list_loader_versions(max_count).await
            }
            PackageKind::Loader => self.router.list_loader_versions(max_count).await,
            PackageKind::Translator => self.router.list_translator_versions(max_count).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn rec(
        kind: PackageKind,
        version: &str,
        platform: Option<Platform>,
        day: u32,
        prerelease: bool,
    ) -> VersionRecord {
        VersionRecord {
            kind,
            version: version.to_string(),
            target_platform: platform,
            release_date: Utc.with_ymd_and_hms(2024, 6, day, 0, 0, 0).unwrap(),
            download_url: format!("https://example.invalid/{}", version),
            file_size: 0,
            is_prerelease: prerelease,
        }
    }

    #[test]
    fn test_loader_exact_platform() {
        let records = vec![
            rec(PackageKind::Loader, "v5.4.23", Some(Platform::X64), 10, false),
            rec(PackageKind::Loader, "v5.4.23", Some(Platform::X86), 10, false),
            rec(PackageKind::Loader, "v6.0.0-be.738", Some(Platform::Il2CppX64), 20, true),
        ];
        let picked = select_loader(&records, Platform::X86, false).unwrap();
        assert_eq!(picked.target_platform, Some(Platform::X86));

        assert!(select_loader(&records, Platform::Il2CppX64, false).is_none());
        assert_eq!(
            select_loader(&records, Platform::Il2CppX64, true).unwrap().version,
            "v6.0.0-be.738"
        );
    }

    #[test]
    fn test_never_prerelease_unless_asked() {
        let records = vec![
            rec(PackageKind::Loader, "v6.0.0-pre.2", Some(Platform::X64), 25, true),
            rec(PackageKind::Loader, "v5.4.23", Some(Platform::X64), 10, false),
        ];
        let picked = select_loader(&records, Platform::X64, false).unwrap();
        assert!(!picked.is_prerelease);
        assert_eq!(select_loader(&records, Platform::X64, true).unwrap().version, "v6.0.0-pre.2");
    }

    #[test]
    fn test_translator_prefers_matching_variant() {
        let records = vec![
            rec(PackageKind::Translator, "v5.4.5", None, 15, false),
            rec(PackageKind::Translator, "v5.4.4", Some(Platform::Il2CppX64), 10, false),
        ];
        // IL2CPP platform takes the older IL2CPP build over the newer Mono one
        let picked = select_translator(&records, Platform::Il2CppX64, false).unwrap();
        assert_eq!(picked.version, "v5.4.4");

        let picked = select_translator(&records, Platform::X64, false).unwrap();
        assert_eq!(picked.version, "v5.4.5");
    }

    #[test]
    fn test_translator_admits_other_variant() {
        let records = vec![rec(PackageKind::Translator, "v5.4.5", None, 15, false)];
        let picked = select_translator(&records, Platform::Il2CppX86, false).unwrap();
        assert_eq!(picked.version, "v5.4.5");
    }

    #[test]
    fn test_ties_keep_first() {
        let records = vec![
            rec(PackageKind::Loader, "first", Some(Platform::X64), 10, false),
            rec(PackageKind::Loader, "second", Some(Platform::X64), 10, false),
        ];
        assert_eq!(select_loader(&records, Platform::X64, false).unwrap().version, "first");
    }

    #[test]
    fn test_empty_is_none() {
        assert!(select(&[], PackageKind::Loader, Platform::X64, true).is_none());
        assert!(select(&[], PackageKind::Translator, Platform::X64, true).is_none());
    }

    #[test]
    fn test_find_exact() {
        let records = vec![
            rec(PackageKind::Loader, "v5.4.22", Some(Platform::X64), 1, false),
            rec(PackageKind::Loader, "v5.4.22", Some(Platform::X86), 1, false),
            rec(PackageKind::Translator, "v5.4.4", None, 1, false),
            rec(PackageKind::Translator, "v5.4.4", Some(Platform::Il2CppX64), 1, false),
        ];
        let found = find_exact(&records, PackageKind::Loader, "5.4.22", Platform::X86).unwrap();
        assert_eq!(found.target_platform, Some(Platform::X86));

        assert!(find_exact(&records, PackageKind::Loader, "5.4.21", Platform::X64).is_none());
        assert!(find_exact(&records, PackageKind::Loader, "5.4.22", Platform::Il2CppX64).is_none());

        let found = find_exact(&records, PackageKind::Translator, "v5.4.4", Platform::Il2CppX64).unwrap();
        assert!(found.is_il2cpp_variant());
        let found = find_exact(&records, PackageKind::Translator, "v5.4.4", Platform::X86).unwrap();
        assert!(!found.is_il2cpp_variant());
    }
}
