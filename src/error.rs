// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types and actionable error formatting.
//!
//! [`InstallerError`] is the single error type returned by the library.
//! [`format_error`] and [`ErrorBuilder`] render an error title together with
//! possible causes and suggested fixes for terminal output.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{PackageKind, Platform};

/// Issue tracker shown at the bottom of formatted errors.
pub const ISSUES_URL: &str = "https://github.com/bbepis/XUnity.AutoTranslator/issues";

/// Environment variable that supplies a GitHub token.
pub const TOKEN_ENV_VAR: &str = "XUNITY_GITHUB_TOKEN";

/// Library result alias.
pub type Result<T, E = InstallerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum InstallerError {
    /// One source failed to answer. Callers treat this as zero versions.
    #[error("{source_name} is unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    /// The GitHub REST quota is exhausted.
    #[error("{}", rate_limit_message(.remaining, .reset_at, .authenticated))]
    RateLimited {
        remaining: u32,
        reset_at: Option<DateTime<Utc>>,
        authenticated: bool,
    },

    /// Both the preferred source and the mirror failed.
    #[error("GitHub and mirror sources both failed. GitHub: {primary}; mirror: {mirror}")]
    AllSourcesFailed { primary: String, mirror: String },

    /// An explicitly pinned version does not exist.
    #[error("{kind} version {version} not found{}", platform_suffix(.platform))]
    VersionNotFound {
        kind: PackageKind,
        version: String,
        platform: Option<Platform>,
    },

    /// Nothing installable was found when resolving automatically.
    #[error("no installable {kind} version available for {platform}")]
    NoCandidate { kind: PackageKind, platform: Platform },

    #[error("download of {url} failed after {attempts} attempt(s): {reason}")]
    DownloadFailed {
        url: String,
        attempts: u32,
        reason: String,
    },

    #[error("incomplete download: expected {expected} bytes, received {received}")]
    SizeMismatch { expected: u64, received: u64 },

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Another install, uninstall or restore holds the run permit.
    #[error("another install, uninstall or restore is already running; wait for it to finish and retry")]
    Busy,

    #[error("no installation found in {}", .0.display())]
    NotInstalled(PathBuf),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("could not parse {what}: {reason}")]
    Parse { what: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl InstallerError {
    pub fn source_unavailable(source_name: impl Into<String>, reason: impl fmt::Display) -> Self {
        InstallerError::SourceUnavailable {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(what: impl Into<String>, reason: impl fmt::Display) -> Self {
        InstallerError::Parse {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors caused by the rate limit of the REST source.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, InstallerError::RateLimited { .. })
    }

    /// Render this error with causes and fixes when there are any to give.
    pub fn remediation(&self) -> Option<String> {
        match self {
            InstallerError::RateLimited { authenticated, .. } => {
                let mut builder = ErrorBuilder::new(self.to_string())
                    .cause("Too many GitHub API requests from this network in the last hour");
                if !authenticated {
                    builder = builder
                        .cause("No GitHub token configured (anonymous limit is 60 requests/hour)")
                        .fix("Store a token: xunity-installer config set-token <TOKEN>")
                        .fix(format!("Or export {}=<TOKEN>", TOKEN_ENV_VAR));
                }
                Some(
                    builder
                        .fix("Switch to the Atom feed backend: xunity-installer config set-backend atom")
                        .fix("Or use the mirror: xunity-installer config set-source mirror")
                        .build(),
                )
            }
            InstallerError::AllSourcesFailed { .. } => Some(
                ErrorBuilder::new(self.to_string())
                    .cause("No network connection")
                    .cause("GitHub and the mirror are both unreachable from this network")
                    .fix("Check your connection and retry")
                    .build(),
            ),
            InstallerError::Busy => Some(
                ErrorBuilder::new(self.to_string())
                    .cause("A previous run is still downloading or extracting")
                    .fix("Wait for the active run to finish, then retry")
                    .build(),
            ),
            _ => None,
        }
    }
}

fn rate_limit_message(
    remaining: &u32,
    reset_at: &Option<DateTime<Utc>>,
    authenticated: &bool,
) -> String {
    let authenticated = *authenticated;
    let limit = if authenticated { 5000 } else { 60 };
    let reset = reset_at
        .as_ref()
        .map(|t| format!(", resets at {}", t.format("%Y-%m-%d %H:%M:%S UTC")))
        .unwrap_or_default();
    let hint = if authenticated {
        String::new()
    } else {
        format!(
            ". Configure a GitHub token (settings key \"github_token\" or {}) to raise the limit to 5000 requests/hour",
            TOKEN_ENV_VAR
        )
    };
    format!(
        "GitHub API rate limit exhausted ({} of {} requests/hour remaining{}){}",
        remaining, limit, reset, hint
    )
}

fn platform_suffix(platform: &Option<Platform>) -> String {
    platform.map(|p| format!(" for {}", p)).unwrap_or_default()
}

/// Formats an error message with title, causes, fixes, and help link.
///
/// # Example
///
/// ```
/// use xunity_installer::error::format_error;
///
/// let error = format_error(
///     "Failed to download BepInEx",
///     &["GitHub is unreachable", "The release asset was removed"],
///     &["Retry later", "Switch source: xunity-installer config set-source mirror"],
/// );
/// println!("{}", error);
/// ```
pub fn format_error(title: &str, causes: &[&str], fixes: &[&str]) -> String {
    let mut output = format!("[✗] {}\n\n", title);

    if !causes.is_empty() {
        output.push_str("Possible causes:\n");
        for cause in causes {
            output.push_str(&format!("  - {}\n", cause));
        }
        output.push('\n');
    }

    if !fixes.is_empty() {
        output.push_str("Try these fixes:\n");
        for (i, fix) in fixes.iter().enumerate() {
            output.push_str(&format!("  {}. {}\n", i + 1, fix));
        }
        output.push('\n');
    }

    output.push_str(&format!("Need help? {}", ISSUES_URL));
    output
}

/// Builder for constructing formatted error messages.
#[derive(Debug, Clone)]
pub struct ErrorBuilder {
    title: String,
    causes: Vec<String>,
    fixes: Vec<String>,
}

impl ErrorBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            causes: Vec::new(),
            fixes: Vec::new(),
        }
    }

    pub fn cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    pub fn fix(mut self, fix: impl Into<String>) -> Self {
        self.fixes.push(fix.into());
        self
    }

    pub fn build(self) -> String {
        let causes: Vec<&str> = self.causes.iter().map(|s| s.as_str()).collect();
        let fixes: Vec<&str> = self.fixes.iter().map(|s| s.as_str()).collect();
        format_error(&self.title, &causes, &fixes)
    }
}

impl fmt::Display for ErrorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.clone().build())
    }
}
