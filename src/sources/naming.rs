// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Release naming rules shared by the GitHub-backed sources.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::Platform;

pub const LOADER_DOWNLOAD_BASE: &str = "https://github.com/BepInEx/BepInEx/releases/download";
pub const TRANSLATOR_DOWNLOAD_BASE: &str =
    "https://github.com/bbepis/XUnity.AutoTranslator/releases/download";

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+\.\d+\.\d+(?:\.\d+)?)").expect("version regex is valid")
});

/// First dotted numeric version in `text` ("BepInEx 5.4.23.2" -> "5.4.23.2").
pub fn extract_version(text: &str) -> Option<String> {
    VERSION_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Prerelease if the title says so or the version carries a suffix.
pub fn is_prerelease(title: &str, version: &str) -> bool {
    let title = title.to_lowercase();
    title.contains("pre") || title.contains("rc") || title.contains("beta") || version.contains('-')
}

/// `BepInEx_win_{arch}_{version}.zip`
pub fn loader_asset_name(version: &str, platform: Platform) -> String {
    format!("BepInEx_win_{}_{}.zip", platform.architecture(), version)
}

pub fn loader_asset_url(tag: &str, version: &str, platform: Platform) -> String {
    format!(
        "{}/{}/{}",
        LOADER_DOWNLOAD_BASE,
        tag,
        loader_asset_name(version, platform)
    )
}

/// `XUnity.AutoTranslator-BepInEx[-IL2CPP]-{version}.zip`
pub fn translator_asset_name(version: &str, il2cpp: bool) -> String {
    if il2cpp {
        format!("XUnity.AutoTranslator-BepInEx-IL2CPP-{}.zip", version)
    } else {
        format!("XUnity.AutoTranslator-BepInEx-{}.zip", version)
    }
}

pub fn translator_asset_url(tag: &str, version: &str, il2cpp: bool) -> String {
    format!(
        "{}/{}/{}",
        TRANSLATOR_DOWNLOAD_BASE,
        tag,
        translator_asset_name(version, il2cpp)
    )
}

/// Platform tag for a translator artifact. The IL2CPP build works for
/// either architecture; it is filed under `IL2CPP_x64`.
pub fn translator_platform(il2cpp: bool) -> Option<Platform> {
    il2cpp.then_some(Platform::Il2CppX64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_version() {
        assert_eq!(extract_version("BepInEx 5.4.23.2").as_deref(), Some("5.4.23.2"));
        assert_eq!(extract_version("v5.4.0").as_deref(), Some("5.4.0"));
        assert_eq!(extract_version("Release notes"), None);
    }

    #[test]
    fn test_is_prerelease() {
        assert!(is_prerelease("BepInEx 6.0.0 Pre-release 1", "6.0.0"));
        assert!(is_prerelease("Something", "6.0.0-be.1"));
        assert!(is_prerelease("5.5.0 RC2", "5.5.0"));
        assert!(!is_prerelease("BepInEx 5.4.23.2", "5.4.23.2"));
    }

    #[test]
    fn test_asset_urls() {
        assert_eq!(
            loader_asset_url("v5.4.23.2", "5.4.23.2", Platform::X86),
            "https://github.com/BepInEx/BepInEx/releases/download/v5.4.23.2/BepInEx_win_x86_5.4.23.2.zip"
        );
        assert_eq!(
            translator_asset_url("v5.4.4", "5.4.4", true),
            "https://github.com/bbepis/XUnity.AutoTranslator/releases/download/v5.4.4/XUnity.AutoTranslator-BepInEx-IL2CPP-5.4.4.zip"
        );
    }
}
