// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

use xunity_installer::config::{self, Settings};
use xunity_installer::error::format_error;
use xunity_installer::utils::{format_bytes, mask_sensitive};
use xunity_installer::{
    logging, Detector, DownloadSource, FsDetector, GameEngine, GithubBackend, InstallOptions,
    InstallationRun, Installer, InstallerError, PackageKind, Platform, RunOutcome, SourceRouter,
    VersionCache, VersionRecord, VersionResolver,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes following sysexits.h conventions
mod exit_codes {
    /// General error - unspecified error
    pub const ERROR: i32 = 1;
    /// Data error - nothing installed where something was expected
    pub const DATA_ERR: i32 = 65;
    /// Service unavailable - every version source failed
    pub const SERVICE_UNAVAILABLE: i32 = 69;
    /// I/O error - network or file operation failed
    pub const IO_ERR: i32 = 74;
    /// Temporary failure - another run holds the lock, or rate limited
    pub const TEMP_FAIL: i32 = 75;
}

use exit_codes::*;

/// Progress bar helpers for install runs
mod progress {
    use indicatif::{ProgressBar, ProgressStyle};
    use std::time::Duration;

    pub fn create(quiet: bool) -> ProgressBar {
        if quiet {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(100);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("  {spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% | {msg}")
        {
            pb.set_style(style.progress_chars("█▓░"));
        }
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    pub fn spinner(message: &str, quiet: bool) -> ProgressBar {
        if quiet {
            return ProgressBar::hidden();
        }
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner
    }
}

/// xunity-installer - install BepInEx and XUnity.AutoTranslator into Unity games.
#[derive(Parser)]
#[command(name = "xunity-installer")]
#[command(version = VERSION)]
#[command(about = "Install, update, snapshot and remove BepInEx + XUnity.AutoTranslator.")]
#[command(long_about = "xunity-installer - BepInEx and XUnity.AutoTranslator for Unity games\n\n\
    List versions:       xunity-installer versions\n\
    Install:             xunity-installer install \"C:\\Games\\Demo\"\n\
    Check a game:        xunity-installer status \"C:\\Games\\Demo\"\n\
    Snapshot first:      xunity-installer snapshot create \"C:\\Games\\Demo\" before-update\n\
    Use the mirror:      xunity-installer config set-source mirror")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Quiet mode: warnings and results only
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Verbose mode: debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List available versions from all sources
    ///
    /// Examples:
    ///   xunity-installer versions
    ///   xunity-installer versions --kind loader --platform il2cpp-x64 --prerelease
    Versions {
        /// Only show one package
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
        /// Only show records for this platform
        #[arg(short, long, value_enum)]
        platform: Option<PlatformArg>,
        /// Include prereleases
        #[arg(long)]
        prerelease: bool,
    },

    /// Show the versions that would be installed
    ///
    /// Examples:
    ///   xunity-installer recommend --platform x86
    ///   xunity-installer recommend --game "C:\Games\Demo"
    Recommend {
        /// Target platform (detected from --game when omitted)
        #[arg(short, long, value_enum)]
        platform: Option<PlatformArg>,
        /// Game directory used to detect the platform
        #[arg(short, long)]
        game: Option<PathBuf>,
        /// Allow prereleases
        #[arg(long)]
        prerelease: bool,
    },

    /// Install BepInEx and XUnity.AutoTranslator into a game
    ///
    /// Examples:
    ///   xunity-installer install "C:\Games\Demo"
    ///   xunity-installer install "C:\Games\Demo" --platform il2cpp-x64 --launch
    ///   xunity-installer install "C:\Games\Demo" --loader-version 5.4.22 --clean
    Install {
        /// Game directory (the one containing the game executable)
        game: PathBuf,
        /// Target platform (detected when omitted)
        #[arg(short, long, value_enum)]
        platform: Option<PlatformArg>,
        /// Exact BepInEx version to install
        #[arg(long, value_name = "VERSION")]
        loader_version: Option<String>,
        /// Exact XUnity.AutoTranslator version to install
        #[arg(long, value_name = "VERSION")]
        translator_version: Option<String>,
        /// Do not back up an existing BepInEx directory
        #[arg(long)]
        no_backup: bool,
        /// Remove the existing loader files first
        #[arg(long)]
        clean: bool,
        /// Launch the game once to generate config files
        #[arg(long)]
        launch: bool,
        /// Seconds to wait for config files when launching
        #[arg(long, default_value_t = 60)]
        timeout: u64,
        /// Allow prereleases when resolving versions
        #[arg(long)]
        prerelease: bool,
    },

    /// Remove BepInEx, the translator and doorstop files from a game
    Uninstall {
        game: PathBuf,
    },

    /// Show what is installed in a game directory
    #[command(alias = "s")]
    Status {
        game: PathBuf,
    },

    /// Manage snapshots of an installation
    ///
    /// Examples:
    ///   xunity-installer snapshot create "C:\Games\Demo" before-update
    ///   xunity-installer snapshot list "C:\Games\Demo"
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommands,
    },

    /// View or change settings
    ///
    /// Examples:
    ///   xunity-installer config show
    ///   xunity-installer config set-backend api
    ///   xunity-installer config set-token ghp_xxx
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum SnapshotCommands {
    /// Copy the current installation into a named snapshot
    Create { game: PathBuf, name: String },
    /// List snapshots, newest first
    List { game: PathBuf },
    /// Replace the current installation with a snapshot
    Restore { game: PathBuf, snapshot: PathBuf },
    /// Delete a snapshot
    Delete { game: PathBuf, snapshot: PathBuf },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current settings
    Show,
    /// Prefer GitHub or the WebDAV mirror
    SetSource {
        #[arg(value_enum)]
        source: SourceArg,
    },
    /// Read GitHub through Atom feeds or the REST API
    SetBackend {
        #[arg(value_enum)]
        backend: BackendArg,
    },
    /// Store a GitHub token for the REST API
    SetToken { token: String },
    /// Forget the stored GitHub token
    ClearToken,
}

#[derive(Clone, Copy, ValueEnum)]
enum PlatformArg {
    X64,
    X86,
    #[value(name = "il2cpp-x64")]
    Il2cppX64,
    #[value(name = "il2cpp-x86")]
    Il2cppX86,
}

impl From<PlatformArg> for Platform {
    fn from(arg: PlatformArg) -> Self {
        match arg {
            PlatformArg::X64 => Platform::X64,
            PlatformArg::X86 => Platform::X86,
            PlatformArg::Il2cppX64 => Platform::Il2CppX64,
            PlatformArg::Il2cppX86 => Platform::Il2CppX86,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Loader,
    Translator,
}

impl From<KindArg> for PackageKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Loader => PackageKind::Loader,
            KindArg::Translator => PackageKind::Translator,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    Github,
    Mirror,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Atom,
    Api,
}

/// Everything a command needs, built once from settings.
struct App {
    settings: Settings,
    cache: Arc<VersionCache>,
    resolver: Arc<VersionResolver>,
    installer: Installer,
    quiet: bool,
}

impl App {
    fn new(settings: Settings, quiet: bool) -> Result<Self> {
        let router = Arc::new(SourceRouter::from_settings(&settings)?);
        let cache = Arc::new(VersionCache::new(router, settings.max_versions));
        let resolver = Arc::new(VersionResolver::new(Arc::clone(&cache)));
        let installer = Installer::new(Arc::clone(&resolver), Arc::new(FsDetector), config::download_dir()?);

        Ok(Self {
            settings,
            cache,
            resolver,
            installer,
            quiet,
        })
    }

    async fn warm_cache(&self) {
        let spinner = progress::spinner("Fetching version lists...", self.quiet);
        self.cache.initialize().await;
        spinner.finish_and_clear();
    }
}

fn main() {
    let cli = Cli::parse();

    let log_dir = config::log_dir().ok();
    if let Err(e) = logging::init_logging(log_dir.as_deref(), cli.verbose, cli.quiet) {
        eprintln!("{} Failed to open session log: {}", "[!]".yellow(), e);
        // console only
        let _ = logging::init_logging(None, cli.verbose, cli.quiet);
    }

    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => report_error(&err),
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let settings = Settings::load()?;

    let command = match cli.command {
        // config edits need neither the network nor a runtime
        Commands::Config { command } => {
            handle_config(command, settings)?;
            return Ok(0);
        }
        other => other,
    };

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let app = App::new(settings, cli.quiet)?;
    runtime.block_on(run_async(command, app))
}

async fn run_async(command: Commands, mut app: App) -> Result<i32> {
    match command {
        Commands::Versions { kind, platform, prerelease } => {
            list_versions(&app, kind.map(Into::into), platform.map(Into::into), prerelease).await?;
            Ok(0)
        }
        Commands::Recommend { platform, game, prerelease } => {
            let platform = choose_platform(platform, game.as_deref());
            show_recommendation(&app, platform, prerelease).await?;
            Ok(0)
        }
        Commands::Install {
            game,
            platform,
            loader_version,
            translator_version,
            no_backup,
            clean,
            launch,
            timeout,
            prerelease,
        } => {
            ensure_game_dir(&game)?;
            let options = InstallOptions {
                platform: choose_platform(platform, Some(&game)),
                loader_version,
                translator_version,
                backup: !no_backup && app.settings.backup_existing,
                clean,
                launch_and_verify: launch,
                include_prerelease: prerelease,
                verify_timeout: Duration::from_secs(timeout.max(1)),
            };

            println!(
                "{} Installing into {} ({})",
                "⋯".cyan(),
                game.display().to_string().bold(),
                options.platform
            );
            app.warm_cache().await;

            let run = app.installer.start_install(&game, options)?;
            let code = finish_run(run, app.quiet).await;
            if code == 0 {
                app.settings.last_game_path = Some(game);
                if let Err(e) = app.settings.save() {
                    tracing::warn!(error = %e, "Could not save settings");
                }
            }
            Ok(code)
        }
        Commands::Uninstall { game } => {
            ensure_game_dir(&game)?;
            let run = app.installer.start_uninstall(&game)?;
            Ok(finish_run(run, app.quiet).await)
        }
        Commands::Status { game } => {
            ensure_game_dir(&game)?;
            show_status(&app, &game).await?;
            Ok(0)
        }
        Commands::Snapshot { command } => handle_snapshot(&app, command).await,
        Commands::Config { .. } => Ok(0),
    }
}

// ============================================================================
// VERSIONS
// ============================================================================

async fn list_versions(
    app: &App,
    kind: Option<PackageKind>,
    platform: Option<Platform>,
    prerelease: bool,
) -> Result<()> {
    let spinner = progress::spinner("Fetching version lists...", app.quiet);
    let snapshot = app.cache.refresh().await;
    spinner.finish_and_clear();
    let snapshot = snapshot?;

    let sections = [
        (PackageKind::Loader, &snapshot.loader),
        (PackageKind::Translator, &snapshot.translator),
    ];

    for (section_kind, records) in sections {
        if kind.is_some_and(|k| k != section_kind) {
            continue;
        }

        println!();
        println!("{}", section_kind.display_name().bold());
        let shown: Vec<&VersionRecord> = records
            .iter()
            .filter(|r| prerelease || !r.is_prerelease)
            .filter(|r| match (platform, r.target_platform) {
                (Some(wanted), Some(actual)) => wanted == actual,
                (Some(_), None) => section_kind == PackageKind::Translator,
                (None, _) => true,
            })
            .collect();

        if shown.is_empty() {
            println!("  {}", "(none)".dimmed());
            continue;
        }
        for record in shown {
            print_record(record);
        }
    }

    if app.cache.router().has_fallen_back() {
        println!();
        println!("{} GitHub was unreachable; versions came from the mirror.", "[!]".yellow());
    }
    Ok(())
}

fn print_record(record: &VersionRecord) {
    let platform = record
        .target_platform
        .map(|p| p.to_string())
        .unwrap_or_else(|| "any".to_string());
    let size = if record.file_size > 0 {
        format_bytes(record.file_size)
    } else {
        "-".to_string()
    };
    let pre = if record.is_prerelease {
        " prerelease".yellow().to_string()
    } else {
        String::new()
    };

    println!(
        "  {:<28} {:<11} {}  {:>9}{}",
        record.version.cyan(),
        platform,
        record.release_date.format("%Y-%m-%d"),
        size,
        pre
    );
}

async fn show_recommendation(app: &App, platform: Platform, prerelease: bool) -> Result<()> {
    app.warm_cache().await;

    println!("Recommended for {}:", platform.to_string().bold());
    for kind in [PackageKind::Loader, PackageKind::Translator] {
        let include = prerelease || (kind == PackageKind::Loader && platform.is_il2cpp());
        match app.resolver.recommend(kind, platform, include).await? {
            Some(record) => print_record(&record),
            None => println!("  {:<28} {}", kind.display_name(), "nothing available".yellow()),
        }
    }
    Ok(())
}

// ============================================================================
// RUNS
// ============================================================================

/// Render a run until it ends and return the process exit code.
async fn finish_run(mut run: InstallationRun, quiet: bool) -> i32 {
    let pb = progress::create(quiet);
    let mut rx = run.subscribe();

    loop {
        let current = rx.borrow_and_update().clone();
        pb.set_position(current.percent as u64);
        pb.set_message(current.message.clone());
        if current.is_terminal() || rx.changed().await.is_err() {
            break;
        }
    }
    pb.finish_and_clear();

    match run.wait().await {
        RunOutcome::Succeeded { warnings } => {
            if warnings.is_empty() {
                println!("{} {} finished", "[OK]".green(), run.kind.label());
            } else {
                println!(
                    "{} {} finished with {} warning(s):",
                    "[!]".yellow(),
                    run.kind.label(),
                    warnings.len()
                );
                for warning in &warnings {
                    println!("    {}", warning);
                }
            }
            0
        }
        RunOutcome::Failed { error } => {
            eprintln!("{} {} failed", "[X]".red(), run.kind.label());
            print_installer_error(&error)
        }
    }
}

fn choose_platform(requested: Option<PlatformArg>, game: Option<&Path>) -> Platform {
    if let Some(platform) = requested {
        return platform.into();
    }
    match game {
        Some(game) => {
            let detected = FsDetector.default_platform(game);
            tracing::info!(platform = %detected, "Detected platform");
            detected
        }
        None => Platform::X64,
    }
}

fn ensure_game_dir(game: &Path) -> Result<()> {
    if game.is_dir() {
        return Ok(());
    }
    let title = format!("Game directory not found: {}", game.display());
    anyhow::bail!(format_error(
        &title,
        &["The path is misspelled", "The game was moved or uninstalled"],
        &["Pass the folder that contains the game's .exe"],
    ))
}

// ============================================================================
// STATUS / SNAPSHOTS / CONFIG
// ============================================================================

async fn show_status(app: &App, game: &Path) -> Result<()> {
    let detector = app.installer.detector();
    let engine = detector.detect_engine(game);
    let status = detector.detect_installation(game);

    println!("{}", game.display().to_string().bold());
    let engine = match engine {
        GameEngine::UnityMono => "Unity (Mono)",
        GameEngine::UnityIl2Cpp => "Unity (IL2CPP)",
        GameEngine::Unknown => "unknown",
    };
    println!("  Engine:      {}", engine);
    println!("  Platform:    {}", detector.default_platform(game));
    println!(
        "  Executable:  {}",
        detector
            .find_executable(game)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "not found".to_string())
    );

    let installed = |yes: bool, version: &Option<String>| {
        if yes {
            format!("{} {}", "installed".green(), version.as_deref().unwrap_or(""))
        } else {
            "not installed".dimmed().to_string()
        }
    };
    println!("  BepInEx:     {}", installed(status.loader_installed, &status.loader_version));
    println!(
        "  Translator:  {}",
        installed(status.translator_installed, &status.translator_version)
    );

    let snapshots = app.installer.snapshots(game).list().await?;
    println!("  Snapshots:   {}", snapshots.len());
    Ok(())
}

async fn handle_snapshot(app: &App, command: SnapshotCommands) -> Result<i32> {
    match command {
        SnapshotCommands::Create { game, name } => {
            ensure_game_dir(&game)?;
            let path = app.installer.snapshots(&game).create(&name).await?;
            println!("{} Snapshot saved to {}", "[OK]".green(), path.display());
            Ok(0)
        }
        SnapshotCommands::List { game } => {
            ensure_game_dir(&game)?;
            let snapshots = app.installer.snapshots(&game).list().await?;
            if snapshots.is_empty() {
                println!("No snapshots in {}", game.display());
            }
            for snap in snapshots {
                let versions = [snap.loader_version.as_deref(), snap.translator_version.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" / ");
                println!(
                    "  {}  {:<24} {:>9}  {}",
                    snap.created_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
                    snap.name.bold(),
                    format_bytes(snap.size_bytes),
                    versions.dimmed()
                );
                println!("      {}", snap.path.display().to_string().dimmed());
            }
            Ok(0)
        }
        SnapshotCommands::Restore { game, snapshot } => {
            ensure_game_dir(&game)?;
            let run = app.installer.start_restore(&game, &snapshot)?;
            Ok(finish_run(run, app.quiet).await)
        }
        SnapshotCommands::Delete { game, snapshot } => {
            app.installer.snapshots(&game).delete(&snapshot).await?;
            println!("{} Deleted {}", "[OK]".green(), snapshot.display());
            Ok(0)
        }
    }
}

fn handle_config(command: Option<ConfigCommands>, mut settings: Settings) -> Result<()> {
    match command.unwrap_or(ConfigCommands::Show) {
        ConfigCommands::Show => {
            let token = settings
                .effective_token()
                .map(|t| mask_sensitive(&t, 4))
                .unwrap_or_else(|| "(not set)".to_string());
            println!("{}", "Settings".bold());
            println!("  Source:          {}", settings.download_source);
            println!("  GitHub backend:  {}", settings.github_backend);
            println!("  GitHub token:    {}", token);
            println!("  Mirror:          {}", settings.mirror_url);
            println!("  Timeout:         {}s", settings.request_timeout_secs);
            println!("  Versions/source: {}", settings.max_versions);
            println!("  Backup:          {}", settings.backup_existing);
            if let Some(game) = &settings.last_game_path {
                println!("  Last game:       {}", game.display());
            }
            println!();
            println!("  File: {}", config::settings_path()?.display().to_string().dimmed());
            return Ok(());
        }
        ConfigCommands::SetSource { source } => {
            settings.download_source = match source {
                SourceArg::Github => DownloadSource::Github,
                SourceArg::Mirror => DownloadSource::Mirror,
            };
            println!("{} Download source set to {}", "[OK]".green(), settings.download_source);
        }
        ConfigCommands::SetBackend { backend } => {
            settings.github_backend = match backend {
                BackendArg::Atom => GithubBackend::Atom,
                BackendArg::Api => GithubBackend::Api,
            };
            println!("{} GitHub backend set to {}", "[OK]".green(), settings.github_backend);
        }
        ConfigCommands::SetToken { token } => {
            let token = token.trim().to_string();
            anyhow::ensure!(!token.is_empty(), "Token must not be empty");
            println!("{} GitHub token set ({})", "[OK]".green(), mask_sensitive(&token, 4));
            settings.github_token = Some(token);
        }
        ConfigCommands::ClearToken => {
            settings.github_token = None;
            println!("{} GitHub token cleared", "[OK]".green());
        }
    }

    settings.save()
}

// ============================================================================
// ERRORS
// ============================================================================

fn report_error(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<InstallerError>() {
        Some(installer_err) => print_installer_error(installer_err),
        None => {
            eprintln!("{} {:#}", "[X]".red(), err);
            ERROR
        }
    }
}

fn print_installer_error(err: &InstallerError) -> i32 {
    match err.remediation() {
        Some(text) => eprintln!("{}", text),
        None => eprintln!("{} {}", "[X]".red(), err),
    }
    exit_code_for(err)
}

fn exit_code_for(err: &InstallerError) -> i32 {
    match err {
        InstallerError::Busy | InstallerError::RateLimited { .. } => TEMP_FAIL,
        InstallerError::SourceUnavailable { .. } | InstallerError::AllSourcesFailed { .. } => {
            SERVICE_UNAVAILABLE
        }
        InstallerError::NotInstalled(_) => DATA_ERR,
        InstallerError::Io(_) | InstallerError::Http(_) | InstallerError::DownloadFailed { .. } => IO_ERR,
        _ => ERROR,
    }
}
