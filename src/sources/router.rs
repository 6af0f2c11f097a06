// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Source routing with a session-wide mirror fallback.
//!
//! GitHub is the preferred upstream unless the user picked the mirror. The
//! first GitHub failure in a session flips the router to the mirror and the
//! operation is retried there; every later operation goes straight to the
//! mirror until the process exits. A mirror preference never falls back.

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{AtomFeedSource, BuildsIndexSource, GithubApiSource, VersionSource, WebDavSource};
use crate::config::Settings;
use crate::error::{InstallerError, Result};
use crate::types::{DownloadSource, GithubBackend, ProgressSink, VersionRecord};
use crate::utils::mask_sensitive;

pub struct SourceRouter {
    primary: Arc<dyn VersionSource>,
    mirror: Arc<dyn VersionSource>,
    builds: Arc<dyn VersionSource>,
    preference: DownloadSource,
    fell_back: AtomicBool,
}

impl SourceRouter {
    pub fn new(
        primary: Arc<dyn VersionSource>,
        mirror: Arc<dyn VersionSource>,
        builds: Arc<dyn VersionSource>,
        preference: DownloadSource,
    ) -> Self {
        Self {
            primary,
            mirror,
            builds,
            preference,
            fell_back: AtomicBool::new(false),
        }
    }

    /// Wire up the real sources from user settings.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let timeout = Duration::from_secs(settings.request_timeout_secs.max(1));

        let primary: Arc<dyn VersionSource> = match settings.github_backend {
            GithubBackend::Atom => Arc::new(AtomFeedSource::new(timeout)?),
            GithubBackend::Api => {
                let token = settings.effective_token();
                if let Some(t) = &token {
                    tracing::debug!(token = %mask_sensitive(t, 4), "Using GitHub token");
                }
                Arc::new(GithubApiSource::new(timeout)?.with_token(token))
            }
        };
        let mirror = Arc::new(WebDavSource::new(timeout)?.with_base_url(settings.mirror_url.clone()));
        let builds = Arc::new(BuildsIndexSource::new(timeout)?);

        tracing::debug!(
            preference = %settings.download_source,
            backend = %settings.github_backend,
            "Source router configured"
        );

        Ok(Self::new(primary, mirror, builds, settings.download_source))
    }

    pub fn preference(&self) -> DownloadSource {
        self.preference
    }

    /// True once a GitHub failure has moved this session to the mirror.
    pub fn has_fallen_back(&self) -> bool {
        self.fell_back.load(Ordering::SeqCst)
    }

    /// Source the next operation will try first.
    pub fn active(&self) -> Arc<dyn VersionSource> {
        if self.preference == DownloadSource::Mirror || self.has_fallen_back() {
            Arc::clone(&self.mirror)
        } else {
            Arc::clone(&self.primary)
        }
    }

    /// Bleeding-edge build index. Never part of the fallback chain.
    pub fn builds(&self) -> Arc<dyn VersionSource> {
        Arc::clone(&self.builds)
    }

    /// Run `op` against the active source, moving to the mirror once if the
    /// preferred GitHub source fails.
    pub async fn with_fallback<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(Arc<dyn VersionSource>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let source = self.active();
        let primary_err = match op(Arc::clone(&source)).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let can_fall_back = self.preference == DownloadSource::Github && !self.has_fallen_back();
        if !can_fall_back {
            return Err(primary_err);
        }

        // another task may have switched already; either way we end up on the mirror
        if !self.fell_back.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                source = source.name(),
                error = %primary_err,
                "GitHub source failed, switching to mirror for this session"
            );
        }

        match op(Arc::clone(&self.mirror)).await {
            Ok(value) => Ok(value),
            Err(mirror_err) => Err(InstallerError::AllSourcesFailed {
                primary: primary_err.to_string(),
                mirror: mirror_err.to_string(),
            }),
        }
    }

    pub async fn list_loader_versions(&self, max_count: usize) -> Result<Vec<VersionRecord>> {
        self.with_fallback(|s| async move { s.list_loader_versions(max_count).await })
            .await
    }

    pub async fn list_translator_versions(&self, max_count: usize) -> Result<Vec<VersionRecord>> {
        self.with_fallback(|s| async move { s.list_translator_versions(max_count).await })
            .await
    }

    pub async fn download(&self, url: &str, dest: &Path, progress: ProgressSink) -> Result<u64> {
        self.with_fallback(|s| {
            let progress = Arc::clone(&progress);
            async move { s.download(url, dest, progress).await }
        })
        .await
    }
}
