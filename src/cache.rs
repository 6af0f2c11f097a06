// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared version cache.
//!
//! One snapshot holds the merged loader and translator lists. A refresh
//! builds a complete new snapshot and swaps it in under a short write lock,
//! so readers either see the old lists or the new ones, never a mix.
//! Reads never touch the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};

use crate::error::{InstallerError, Result};
use crate::locks::{resilient_read, resilient_write};
use crate::resolver::{select_loader, select_translator};
use crate::sources::SourceRouter;
use crate::types::{Platform, VersionRecord};

/// Immutable merged view of every source.
#[derive(Debug, Clone, Default)]
pub struct VersionCacheSnapshot {
    pub loader: Vec<VersionRecord>,
    pub translator: Vec<VersionRecord>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Sent to subscribers after each successful refresh.
#[derive(Debug, Clone)]
pub struct VersionsUpdated {
    pub snapshot: Arc<VersionCacheSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VersionCounts {
    pub loader: usize,
    pub translator: usize,
}

pub struct VersionCache {
    router: Arc<SourceRouter>,
    max_versions: usize,
    snapshot: RwLock<Arc<VersionCacheSnapshot>>,
    initialized: AtomicBool,
    refresh_guard: Mutex<()>,
    updates: broadcast::Sender<VersionsUpdated>,
}

impl VersionCache {
    pub fn new(router: Arc<SourceRouter>, max_versions: usize) -> Self {
        let (updates, _) = broadcast::channel(16);
        Self {
            router,
            max_versions: max_versions.max(1),
            snapshot: RwLock::new(Arc::new(VersionCacheSnapshot::default())),
            initialized: AtomicBool::new(false),
            refresh_guard: Mutex::new(()),
            updates,
        }
    }

    pub fn router(&self) -> &Arc<SourceRouter> {
        &self.router
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Populate the cache once. Errors are logged, not returned; the cache
    /// stays uninitialized and the resolver queries sources directly.
    pub async fn initialize(&self) {
        if self.is_initialized() {
            return;
        }
        if let Err(e) = self.refresh().await {
            tracing::warn!(error = %e, "Version cache initialization failed");
        }
    }

    /// Query every source and replace the snapshot.
    ///
    /// Loader sources (preferred/mirror plus the build index) and the
    /// translator source run concurrently. A failing source contributes
    /// nothing; if every source for a package fails, that package keeps its
    /// previous list. Fails only when all sources fail, leaving the old
    /// snapshot in place.
    pub async fn refresh(&self) -> Result<Arc<VersionCacheSnapshot>> {
        let _guard = self.refresh_guard.lock().await;
        let max = self.max_versions;
        let builds = self.router.builds();

        tracing::info!(max_versions = max, "Refreshing version cache");

        let (loader_primary, loader_builds, translator) = tokio::join!(
            self.router.list_loader_versions(max),
            builds.list_loader_versions(max),
            self.router.list_translator_versions(max),
        );

        let mut failures = Vec::new();
        let loader_primary = keep_ok("loader", loader_primary, &mut failures);
        let loader_builds = keep_ok("loader build index", loader_builds, &mut failures);
        let translator = keep_ok("translator", translator, &mut failures);

        if loader_primary.is_none() && loader_builds.is_none() && translator.is_none() {
            return Err(InstallerError::source_unavailable(
                "all version sources",
                failures.join("; "),
            ));
        }

        let previous = self.snapshot();
        let loader = if loader_primary.is_none() && loader_builds.is_none() {
            previous.loader.clone()
        } else {
            merge_newest_first([loader_primary, loader_builds].into_iter().flatten())
        };
        let translator = match translator {
            Some(list) => merge_newest_first([list]),
            None => previous.translator.clone(),
        };

        let next = Arc::new(VersionCacheSnapshot {
            loader,
            translator,
            refreshed_at: Some(Utc::now()),
        });

        *resilient_write(&self.snapshot) = Arc::clone(&next);
        self.initialized.store(true, Ordering::SeqCst);

        tracing::info!(
            loader = next.loader.len(),
            translator = next.translator.len(),
            "Version cache refreshed"
        );

        // no subscribers is fine
        let _ = self.updates.send(VersionsUpdated {
            snapshot: Arc::clone(&next),
        });

        Ok(next)
    }

    /// Current snapshot. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<VersionCacheSnapshot> {
        Arc::clone(&resilient_read(&self.snapshot))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VersionsUpdated> {
        self.updates.subscribe()
    }

    pub fn loader_versions(&self) -> Vec<VersionRecord> {
        self.snapshot().loader.clone()
    }

    pub fn translator_versions(&self) -> Vec<VersionRecord> {
        self.snapshot().translator.clone()
    }

    pub fn latest_loader(&self, platform: Platform, include_prerelease: bool) -> Option<VersionRecord> {
        select_loader(&self.snapshot().loader, platform, include_prerelease).cloned()
    }

    pub fn latest_translator(&self, platform: Platform, include_prerelease: bool) -> Option<VersionRecord> {
        select_translator(&self.snapshot().translator, platform, include_prerelease).cloned()
    }

    pub fn counts(&self) -> VersionCounts {
        let snapshot = self.snapshot();
        VersionCounts {
            loader: snapshot.loader.len(),
            translator: snapshot.translator.len(),
        }
    }
}

fn keep_ok(
    what: &str,
    result: Result<Vec<VersionRecord>>,
    failures: &mut Vec<String>,
) -> Option<Vec<VersionRecord>> {
    match result {
        Ok(records) => Some(records),
        Err(e) => {
            tracing::warn!(source = what, error = %e, "Version source failed, excluding it from refresh");
            failures.push(format!("{}: {}", what, e));
            None
        }
    }
}

/// Concatenate lists and order by release date, newest first. Equal dates
/// keep their input order.
pub fn merge_newest_first<I>(lists: I) -> Vec<VersionRecord>
where
    I: IntoIterator<Item = Vec<VersionRecord>>,
{
    let mut merged: Vec<VersionRecord> = lists.into_iter().flatten().collect();
    merged.sort_by(|a, b| b.release_date.cmp(&a.release_date));
    merged
}
