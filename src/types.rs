// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Canonical types shared by sources, the cache, the resolver and the installer.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two package families this installer knows how to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PackageKind {
    /// BepInEx plugin loader
    Loader,
    /// XUnity.AutoTranslator plugin
    Translator,
}

impl PackageKind {
    /// Display name of the upstream project.
    pub fn display_name(&self) -> &'static str {
        match self {
            PackageKind::Loader => "BepInEx",
            PackageKind::Translator => "XUnity.AutoTranslator",
        }
    }
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Target runtime of the game.
///
/// Mono games take the stable loader builds; IL2CPP games need the
/// bleeding-edge IL2CPP builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "x64")]
    X64,
    #[serde(rename = "x86")]
    X86,
    #[serde(rename = "IL2CPP_x64")]
    Il2CppX64,
    #[serde(rename = "IL2CPP_x86")]
    Il2CppX86,
}

impl Platform {
    pub fn is_il2cpp(&self) -> bool {
        matches!(self, Platform::Il2CppX64 | Platform::Il2CppX86)
    }

    /// Architecture suffix used in artifact names ("x64" or "x86").
    pub fn architecture(&self) -> &'static str {
        match self {
            Platform::X64 | Platform::Il2CppX64 => "x64",
            Platform::X86 | Platform::Il2CppX86 => "x86",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::X64 => "x64",
            Platform::X86 => "x86",
            Platform::Il2CppX64 => "IL2CPP_x64",
            Platform::Il2CppX86 => "IL2CPP_x86",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "x64" => Ok(Platform::X64),
            "x86" => Ok(Platform::X86),
            "il2cpp_x64" | "il2cpp" => Ok(Platform::Il2CppX64),
            "il2cpp_x86" => Ok(Platform::Il2CppX86),
            other => Err(format!("unknown platform '{}'", other)),
        }
    }
}

/// One downloadable artifact as reported by a source.
///
/// `(kind, version, target_platform)` is unique within one source. The same
/// artifact may appear from several sources; duplicates are only collapsed
/// when a version is selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub kind: PackageKind,
    /// Normalized tag, e.g. "v5.4.23.2"
    pub version: String,
    /// `None` means platform-agnostic
    pub target_platform: Option<Platform>,
    pub release_date: DateTime<Utc>,
    pub download_url: String,
    /// 0 when the source does not expose a size
    pub file_size: u64,
    pub is_prerelease: bool,
}

impl VersionRecord {
    /// True when this record carries the IL2CPP variant of its package.
    pub fn is_il2cpp_variant(&self) -> bool {
        self.target_platform.map(|p| p.is_il2cpp()).unwrap_or(false)
    }

    /// Whether `version` names this record, ignoring a leading `v` and case.
    pub fn matches_version(&self, version: &str) -> bool {
        strip_tag_prefix(&self.version).eq_ignore_ascii_case(strip_tag_prefix(version))
    }

    /// Artifact file name derived from the download URL.
    pub fn file_name(&self) -> String {
        let path = self.download_url.split(['?', '#']).next().unwrap_or_default();
        let name = path.rsplit('/').next().unwrap_or_default().replace("%20", " ");
        if name.is_empty() {
            format!("{}-{}.zip", self.kind.display_name(), strip_tag_prefix(&self.version))
        } else {
            name
        }
    }
}

/// Strip a leading `v`/`V` from a tag.
pub fn strip_tag_prefix(tag: &str) -> &str {
    tag.strip_prefix('v')
        .or_else(|| tag.strip_prefix('V'))
        .unwrap_or(tag)
}

/// Build the normalized tag for a bare version string.
pub fn normalize_tag(version: &str) -> String {
    format!("v{}", strip_tag_prefix(version.trim()))
}

/// Receives a 0-100 completion percentage for one long-running step.
pub type ProgressSink = Arc<dyn Fn(u8) + Send + Sync>;

/// A sink that discards updates.
pub fn silent_progress() -> ProgressSink {
    Arc::new(|_| {})
}

/// Which upstream a session should prefer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadSource {
    /// Official GitHub releases
    #[default]
    Github,
    /// WebDAV mirror
    Mirror,
}

impl fmt::Display for DownloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadSource::Github => f.write_str("github"),
            DownloadSource::Mirror => f.write_str("mirror"),
        }
    }
}

/// How releases are read from GitHub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GithubBackend {
    /// Public Atom feeds, no rate limit
    #[default]
    Atom,
    /// REST API, rate limited, optional token
    Api,
}

impl fmt::Display for GithubBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GithubBackend::Atom => f.write_str("atom"),
            GithubBackend::Api => f.write_str("api"),
        }
    }
}
