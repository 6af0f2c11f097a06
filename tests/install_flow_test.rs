// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Install, uninstall and snapshot runs against temp game directories with
//! in-memory version sources.

mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use common::*;
use xunity_installer::{
    Detector, DownloadSource, FsDetector, GameEngine, InstallOptions, InstallerError, Platform,
    RunKind, RunOutcome,
};

fn mono_options() -> InstallOptions {
    InstallOptions {
        backup: false,
        ..InstallOptions::default()
    }
}

// =============================================================================
// INSTALL
// =============================================================================

#[tokio::test]
async fn test_install_extracts_both_packages() {
    let harness = Harness::standard();
    let game = mono_game(harness.temp.path());

    let mut run = harness.installer.start_install(&game, mono_options()).unwrap();
    assert_eq!(run.kind, RunKind::Install);

    let outcome = run.wait().await;
    assert!(outcome.is_success(), "install failed: {:?}", outcome);

    assert!(game.join("winhttp.dll").is_file());
    assert!(game.join("doorstop_config.ini").is_file());
    assert!(game.join("BepInEx/core/BepInEx.dll").is_file());
    assert!(game
        .join("BepInEx/plugins/XUnity.AutoTranslator/XUnity.AutoTranslator.Plugin.Core.dll")
        .is_file());

    let status = FsDetector.detect_installation(&game);
    assert!(status.loader_installed);
    assert!(status.translator_installed);

    let progress = run.progress();
    assert_eq!(progress.percent, 100);
    assert!(run.is_complete());
    assert_eq!(harness.primary.downloads(), 2);
}

#[tokio::test]
async fn test_install_removes_downloaded_archives() {
    let harness = Harness::standard();
    let game = mono_game(harness.temp.path());

    let outcome = harness.installer.start_install(&game, mono_options()).unwrap().wait().await;
    assert!(outcome.is_success());

    let leftovers = fs::read_dir(harness.downloads_dir())
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_progress_never_goes_backwards() {
    let harness = Harness::standard();
    let game = mono_game(harness.temp.path());

    let mut run = harness.installer.start_install(&game, mono_options()).unwrap();
    let mut rx = run.subscribe();
    let watcher = tokio::spawn(async move {
        let mut seen = Vec::new();
        loop {
            let current = rx.borrow_and_update().clone();
            seen.push(current.percent);
            if current.is_terminal() || rx.changed().await.is_err() {
                break;
            }
        }
        seen
    });

    assert!(run.wait().await.is_success());
    let seen = watcher.await.unwrap();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {:?}", seen);
    assert_eq!(seen.last().copied(), Some(100));
}

#[tokio::test]
async fn test_install_backs_up_existing_loader() {
    let harness = Harness::standard();
    let game = installed_game(harness.temp.path());

    let options = InstallOptions {
        backup: true,
        ..InstallOptions::default()
    };
    let outcome = harness.installer.start_install(&game, options).unwrap().wait().await;
    assert!(outcome.is_success());
    assert!(outcome.warnings().is_empty());

    let backups: Vec<_> = fs::read_dir(&game)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with("BepInEx_backup_") && name.ends_with(".zip"))
        .collect();
    assert_eq!(backups.len(), 1);
}

#[tokio::test]
async fn test_clean_install_removes_stale_files() {
    let harness = Harness::standard();
    let game = installed_game(harness.temp.path());
    fs::write(game.join("BepInEx/core/Stale.dll"), "old").unwrap();

    let options = InstallOptions {
        backup: false,
        clean: true,
        ..InstallOptions::default()
    };
    let outcome = harness.installer.start_install(&game, options).unwrap().wait().await;
    assert!(outcome.is_success());

    assert!(!game.join("BepInEx/core/Stale.dll").exists());
    assert!(game.join("BepInEx/core/BepInEx.dll").is_file());
}

#[tokio::test]
async fn test_missing_game_directory_fails() {
    let harness = Harness::standard();
    let missing = harness.temp.path().join("nope");

    let outcome = harness.installer.start_install(&missing, mono_options()).unwrap().wait().await;
    assert!(!outcome.is_success());
    assert_eq!(harness.primary.downloads(), 0);
}

#[tokio::test]
async fn test_pinned_version_not_found() {
    let harness = Harness::standard();
    let game = mono_game(harness.temp.path());

    let options = InstallOptions {
        loader_version: Some("5.4.99".to_string()),
        ..mono_options()
    };
    let outcome = harness.installer.start_install(&game, options).unwrap().wait().await;

    match outcome {
        RunOutcome::Failed { error } => {
            assert!(matches!(*error, InstallerError::VersionNotFound { .. }), "{}", error)
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(harness.primary.downloads(), 0);
}

#[tokio::test]
async fn test_pinned_version_without_prefix_is_found() {
    let harness = Harness::standard();
    let game = mono_game(harness.temp.path());

    let options = InstallOptions {
        loader_version: Some("5.4.23.2".to_string()),
        translator_version: Some("v5.4.5".to_string()),
        ..mono_options()
    };
    let outcome = harness.installer.start_install(&game, options).unwrap().wait().await;
    assert!(outcome.is_success(), "{:?}", outcome);
}

// =============================================================================
// DOWNLOAD RETRIES
// =============================================================================

#[tokio::test]
async fn test_download_retries_then_succeeds() {
    let temp = TempDir::new().unwrap();
    let mirror = named_standard_source("mirror", temp.path()).failing_downloads(1);
    let harness = Harness::new(
        MockSource::new("github"),
        mirror,
        MockSource::new("builds"),
        DownloadSource::Mirror,
        temp,
    );
    let game = mono_game(harness.temp.path());

    let outcome = harness.installer.start_install(&game, mono_options()).unwrap().wait().await;
    assert!(outcome.is_success(), "{:?}", outcome);

    // loader: one failure plus one success, translator: one success
    assert_eq!(harness.mirror.downloads(), 3);
    assert_eq!(harness.primary.downloads(), 0);
}

#[tokio::test]
async fn test_download_fails_twice_then_succeeds() {
    let temp = TempDir::new().unwrap();
    let mirror = named_standard_source("mirror", temp.path()).failing_downloads(2);
    let harness = Harness::new(
        MockSource::new("github"),
        mirror,
        MockSource::new("builds"),
        DownloadSource::Mirror,
        temp,
    );
    let game = mono_game(harness.temp.path());

    let outcome = harness.installer.start_install(&game, mono_options()).unwrap().wait().await;
    assert!(outcome.is_success(), "{:?}", outcome);

    // loader succeeds on the third attempt, translator on the first
    assert_eq!(harness.mirror.downloads(), 4);
    assert!(game.join("winhttp.dll").is_file());
    assert!(!harness.downloads_dir().join("BepInEx_win_x64_5.4.23.2.zip").exists());
}

#[tokio::test]
async fn test_exhausted_retries_leave_no_file() {
    let temp = TempDir::new().unwrap();
    let mirror = named_standard_source("mirror", temp.path()).failing_downloads(100);
    let harness = Harness::new(
        MockSource::new("github"),
        mirror,
        MockSource::new("builds"),
        DownloadSource::Mirror,
        temp,
    );
    let game = mono_game(harness.temp.path());

    let outcome = harness.installer.start_install(&game, mono_options()).unwrap().wait().await;
    match outcome {
        RunOutcome::Failed { error } => match &*error {
            InstallerError::DownloadFailed { attempts, .. } => assert_eq!(*attempts, 3),
            other => panic!("expected DownloadFailed, got {}", other),
        },
        other => panic!("expected failure, got {:?}", other),
    }

    assert_eq!(harness.mirror.downloads(), 3);
    assert!(!harness.downloads_dir().join("BepInEx_win_x64_5.4.23.2.zip").exists());
    assert!(!game.join("winhttp.dll").exists());
}

#[tokio::test]
async fn test_download_falls_back_to_mirror() {
    let temp = TempDir::new().unwrap();
    let primary = standard_source(temp.path()).failing_downloads(100);
    let mirror = named_standard_source("mirror", temp.path());
    let harness = Harness::new(primary, mirror, MockSource::new("builds"), DownloadSource::Github, temp);
    let game = mono_game(harness.temp.path());

    let outcome = harness.installer.start_install(&game, mono_options()).unwrap().wait().await;
    assert!(outcome.is_success(), "{:?}", outcome);

    assert!(harness.cache.router().has_fallen_back());
    // once fallen back, the session stays on the mirror
    assert_eq!(harness.primary.downloads(), 1);
    assert_eq!(harness.mirror.downloads(), 2);
}

// =============================================================================
// UNINSTALL
// =============================================================================

#[tokio::test]
async fn test_uninstall_removes_everything() {
    let harness = Harness::standard();
    let game = installed_game(harness.temp.path());
    fs::write(game.join(".doorstop_version"), "4.0").unwrap();

    let mut run = harness.installer.start_uninstall(&game).unwrap();
    assert_eq!(run.kind, RunKind::Uninstall);
    let outcome = run.wait().await;
    assert!(outcome.is_success(), "{:?}", outcome);
    assert!(outcome.warnings().is_empty());

    assert!(!game.join("BepInEx").exists());
    assert!(!game.join("winhttp.dll").exists());
    assert!(!game.join("doorstop_config.ini").exists());
    assert!(!game.join(".doorstop_version").exists());
    // game files untouched
    assert!(game.join("Demo.exe").is_file());
    assert!(!FsDetector.detect_installation(&game).anything_installed());
}

#[tokio::test]
async fn test_uninstall_without_installation() {
    let harness = Harness::standard();
    let game = mono_game(harness.temp.path());

    let outcome = harness.installer.start_uninstall(&game).unwrap().wait().await;
    match outcome {
        RunOutcome::Failed { error } => assert!(matches!(*error, InstallerError::NotInstalled(_))),
        other => panic!("expected NotInstalled, got {:?}", other),
    }
}

#[tokio::test]
async fn test_install_then_uninstall() {
    let harness = Harness::standard();
    let game = mono_game(harness.temp.path());

    assert!(harness.installer.start_install(&game, mono_options()).unwrap().wait().await.is_success());
    assert!(harness.installer.start_uninstall(&game).unwrap().wait().await.is_success());

    assert!(!game.join("BepInEx").exists());
    assert!(!game.join("changelog.txt").exists());
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

#[tokio::test]
async fn test_snapshot_restore_reproduces_installation() {
    let harness = Harness::standard();
    let game = installed_game(harness.temp.path());
    fs::write(game.join("BepInEx/plugins/Custom.dll"), "mine").unwrap();

    let snapshots = harness.installer.snapshots(&game);
    let snapshot = snapshots.create("before update").await.unwrap();

    // wreck the installation
    fs::remove_dir_all(game.join("BepInEx/plugins")).unwrap();
    fs::write(game.join("BepInEx/core/Broken.dll"), "x").unwrap();
    fs::remove_file(game.join("winhttp.dll")).unwrap();

    let mut run = harness.installer.start_restore(&game, &snapshot).unwrap();
    assert_eq!(run.kind, RunKind::Restore);
    let outcome = run.wait().await;
    assert!(outcome.is_success(), "{:?}", outcome);

    assert!(game.join("BepInEx/plugins/Custom.dll").is_file());
    assert!(game.join("BepInEx/plugins/XUnity.AutoTranslator").is_dir());
    assert!(!game.join("BepInEx/core/Broken.dll").exists());
    assert!(game.join("winhttp.dll").is_file());
    assert!(game.join("doorstop_config.ini").is_file());

    let listed = snapshots.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "before update");
    assert_eq!(listed[0].loader_version.as_deref(), Some("5.4.22"));
}

#[tokio::test]
async fn test_restore_clears_auxiliary_loader_files() {
    let harness = Harness::standard();
    let game = installed_game(harness.temp.path());
    let snapshot = harness.installer.snapshots(&game).create("plain").await.unwrap();

    // a later install dropped extra doorstop files next to the game
    fs::write(game.join("doorstop.dll"), "proxy").unwrap();
    fs::write(game.join(".doorstop_version"), "4.0.0").unwrap();

    let outcome = harness.installer.start_restore(&game, &snapshot).unwrap().wait().await;
    assert!(outcome.is_success(), "{:?}", outcome);

    assert!(!game.join("doorstop.dll").exists());
    assert!(!game.join(".doorstop_version").exists());
    assert!(game.join("winhttp.dll").is_file());
    assert!(game.join("BepInEx/core/BepInEx.dll").is_file());
}

#[tokio::test]
async fn test_restore_rejects_non_snapshot() {
    let harness = Harness::standard();
    let game = installed_game(harness.temp.path());
    let bogus = harness.temp.path().join("not-a-snapshot");
    fs::create_dir_all(&bogus).unwrap();

    let outcome = harness.installer.start_restore(&game, &bogus).unwrap().wait().await;
    assert!(!outcome.is_success());
    // the current installation is left alone
    assert!(game.join("BepInEx/core/BepInEx.dll").is_file());
}

#[tokio::test]
async fn test_snapshot_requires_installation() {
    let harness = Harness::standard();
    let game = mono_game(harness.temp.path());

    let err = harness.installer.snapshots(&game).create("empty").await.unwrap_err();
    assert!(matches!(err, InstallerError::NotInstalled(_)));
}

#[tokio::test]
async fn test_snapshot_delete() {
    let harness = Harness::standard();
    let game = installed_game(harness.temp.path());
    let snapshots = harness.installer.snapshots(&game);

    let path = snapshots.create("one").await.unwrap();
    snapshots.delete(&path).await.unwrap();
    assert!(!path.exists());
    assert!(snapshots.list().await.unwrap().is_empty());

    // already gone
    snapshots.delete(&path).await.unwrap();
}

#[tokio::test]
async fn test_wait_is_bounded() {
    let harness = Harness::standard();
    let game = mono_game(harness.temp.path());

    let mut run = harness.installer.start_install(&game, mono_options()).unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(30), run.wait()).await;
    assert!(outcome.is_ok());
}

// =============================================================================
// DETECTOR SEAM
// =============================================================================

#[tokio::test]
async fn test_launch_without_executable_is_a_warning() {
    let harness = Harness::standard();
    let game = mono_game(harness.temp.path());
    let installer = harness.installer_with(Arc::new(FakeDetector {
        engine: GameEngine::UnityMono,
        status: Default::default(),
        executable: None,
    }));

    let options = InstallOptions {
        launch_and_verify: true,
        ..mono_options()
    };
    let outcome = installer.start_install(&game, options).unwrap().wait().await;

    assert!(outcome.is_success(), "{:?}", outcome);
    assert_eq!(outcome.warnings().len(), 1);
    assert!(outcome.warnings()[0].contains("executable"));
}

#[test]
fn test_detected_il2cpp_game_defaults_platform() {
    let detector = FakeDetector::il2cpp();
    let game = std::path::Path::new("/games/demo");
    assert_eq!(detector.default_platform(game), Platform::Il2CppX64);
    assert_eq!(FsDetector.default_platform(game), Platform::X64);
}

#[tokio::test]
async fn test_uninstall_trusts_detector_and_leftovers() {
    let harness = Harness::standard();
    let game = mono_game(harness.temp.path());
    // detector sees nothing, but a stray entry point is still on disk
    fs::write(game.join("winhttp.dll"), "proxy").unwrap();
    let installer = harness.installer_with(Arc::new(FakeDetector {
        engine: GameEngine::UnityMono,
        status: Default::default(),
        executable: None,
    }));

    let outcome = installer.start_uninstall(&game).unwrap().wait().await;
    assert!(outcome.is_success(), "{:?}", outcome);
    assert!(!game.join("winhttp.dll").exists());
}
