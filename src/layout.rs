// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Game directory layout and installation detection.
//!
//! [`GameLayout`] names every path the installer touches inside a game
//! directory. [`Detector`] answers "what is installed here and what kind of
//! Unity game is this"; [`FsDetector`] does it from file presence alone.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::Platform;

/// Loader root directory inside the game.
pub const LOADER_DIR: &str = "BepInEx";
/// Proxy DLL that bootstraps the loader.
pub const ENTRY_POINT: &str = "winhttp.dll";
/// Doorstop configuration next to the entry point.
pub const DOORSTOP_CONFIG: &str = "doorstop_config.ini";
/// Loose files some loader releases leave in the game root.
pub const EXTRA_LOADER_FILES: [&str; 3] = [".doorstop_version", "doorstop.dll", "changelog.txt"];
/// Snapshot collection directory inside the game.
pub const SNAPSHOT_DIR: &str = "BepInEx_Snapshots";

/// Version hint reported when IL2CPP loader binaries are present.
pub const IL2CPP_VERSION_HINT: &str = "IL2CPP (Bleeding Edge)";

/// Paths inside one game directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameLayout {
    root: PathBuf,
}

impl GameLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn loader_dir(&self) -> PathBuf {
        self.root.join(LOADER_DIR)
    }

    pub fn core_dir(&self) -> PathBuf {
        self.loader_dir().join("core")
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.loader_dir().join("plugins")
    }

    pub fn translator_dir(&self) -> PathBuf {
        self.plugins_dir().join("XUnity.AutoTranslator")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.loader_dir().join("config")
    }

    /// Written by the loader on first launch.
    pub fn loader_config(&self) -> PathBuf {
        self.config_dir().join("BepInEx.cfg")
    }

    /// Written by the translator on first launch.
    pub fn translator_config(&self) -> PathBuf {
        self.config_dir().join("AutoTranslatorConfig.ini")
    }

    pub fn log_output(&self) -> PathBuf {
        self.loader_dir().join("LogOutput.log")
    }

    pub fn changelog(&self) -> PathBuf {
        self.loader_dir().join("changelog.txt")
    }

    pub fn entry_point(&self) -> PathBuf {
        self.root.join(ENTRY_POINT)
    }

    pub fn doorstop_config(&self) -> PathBuf {
        self.root.join(DOORSTOP_CONFIG)
    }

    pub fn extra_loader_files(&self) -> Vec<PathBuf> {
        EXTRA_LOADER_FILES.iter().map(|f| self.root.join(f)).collect()
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join(SNAPSHOT_DIR)
    }

    /// `BepInEx_backup_{stamp}.zip` next to the loader directory.
    pub fn backup_archive(&self, stamp: &str) -> PathBuf {
        self.root.join(format!("BepInEx_backup_{}.zip", stamp))
    }
}

/// Unity scripting backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEngine {
    UnityMono,
    UnityIl2Cpp,
    Unknown,
}

/// What is currently installed in a game directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationStatus {
    pub loader_installed: bool,
    pub loader_version: Option<String>,
    pub translator_installed: bool,
    pub translator_version: Option<String>,
}

impl InstallationStatus {
    pub fn anything_installed(&self) -> bool {
        self.loader_installed || self.translator_installed
    }
}

/// Detection collaborator.
///
/// The installer only uses these answers as hints: a default platform, the
/// executable to launch, and what to record in snapshot metadata.
pub trait Detector: Send + Sync {
    fn detect_engine(&self, game: &Path) -> GameEngine;

    fn detect_installation(&self, game: &Path) -> InstallationStatus;

    fn find_executable(&self, game: &Path) -> Option<PathBuf>;

    /// Platform to preselect when the user has not chosen one.
    fn default_platform(&self, game: &Path) -> Platform {
        match self.detect_engine(game) {
            GameEngine::UnityIl2Cpp => Platform::Il2CppX64,
            _ => Platform::X64,
        }
    }
}

/// Detection from file presence.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsDetector;

impl FsDetector {
    fn loader_version(&self, game: &Path) -> Option<String> {
        let layout = GameLayout::new(game);

        if self.detect_engine(game) == GameEngine::UnityIl2Cpp {
            let core = layout.core_dir();
            let markers = [
                core.join("BepInEx.IL2CPP.dll"),
                core.join("BepInEx.Unity.IL2CPP.dll"),
                layout.loader_dir().join("unity-libs").join("BepInEx.IL2CPP.dll"),
            ];
            if markers.iter().any(|p| p.exists()) {
                return Some(IL2CPP_VERSION_HINT.to_string());
            }
        }

        // changelog.txt starts with the release version
        for changelog in [layout.changelog(), game.join("changelog.txt")] {
            if let Ok(text) = fs::read_to_string(&changelog) {
                if let Some(first) = text.lines().map(str::trim).find(|l| !l.is_empty()) {
                    return Some(first.to_string());
                }
            }
        }

        None
    }
}

impl Detector for FsDetector {
    fn detect_engine(&self, game: &Path) -> GameEngine {
        if game.join("GameAssembly.dll").exists() {
            return GameEngine::UnityIl2Cpp;
        }
        if game.join("UnityPlayer.dll").exists() {
            return GameEngine::UnityMono;
        }

        let has_managed = fs::read_dir(game)
            .map(|entries| {
                entries.flatten().any(|entry| {
                    let name = entry.file_name().to_string_lossy().to_string();
                    name.ends_with("_Data") && entry.path().join("Managed").is_dir()
                })
            })
            .unwrap_or(false);

        if has_managed {
            GameEngine::UnityMono
        } else {
            GameEngine::Unknown
        }
    }

    fn detect_installation(&self, game: &Path) -> InstallationStatus {
        let layout = GameLayout::new(game);
        let loader_installed = layout.loader_dir().is_dir() && layout.entry_point().is_file();
        let translator_installed = layout.translator_dir().is_dir();

        InstallationStatus {
            loader_installed,
            loader_version: if loader_installed { self.loader_version(game) } else { None },
            translator_installed,
            translator_version: None,
        }
    }

    fn find_executable(&self, game: &Path) -> Option<PathBuf> {
        let mut candidates: Vec<PathBuf> = fs::read_dir(game)
            .ok()?
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .map(|ext| ext.eq_ignore_ascii_case("exe"))
                        .unwrap_or(false)
            })
            .filter(|p| {
                let name = p.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
                !name.contains("UnityCrashHandler") && !name.contains("Uninstall")
            })
            .collect();

        candidates.sort();
        candidates.into_iter().next()
    }
}
