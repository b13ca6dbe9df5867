//! keytally CLI
//!
//! Runs the capture daemon and inspects or controls its data.

use anyhow::{bail, Context};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use keytally::{
    collector::{check_permission, SystemSource},
    core::display_name,
    engine::request_clear,
    health::HealthLog,
    storage::{format_summary, list_backups, read_last_backup_at},
    AggregateStats, BackupInterval, CaptureState, Config, DateRange, Engine, ExportFormat,
    RangeSummary, SnapshotStore, StartupLoad, PERMISSION_INSTRUCTIONS, VERSION,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "keytally")]
#[command(version = VERSION)]
#[command(about = "Background keystroke statistics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start capturing keystrokes (runs until Ctrl+C)
    Start {
        /// Override the autosave interval in seconds
        #[arg(long)]
        autosave_secs: Option<u64>,

        /// Seconds between capture retries while permission is missing
        #[arg(long, default_value = "5")]
        retry_secs: u64,
    },

    /// Show permission, configuration and data status
    Status,

    /// Summarize keystrokes over a date range
    Report {
        /// today, week, month, all, or <n>d
        #[arg(long, default_value = "today")]
        range: DateRange,

        /// Number of top keys to list
        #[arg(long, default_value = "10")]
        top: usize,
    },

    /// Export the statistics
    Export {
        /// Output file or directory (defaults to the export directory)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Export format (json or report)
        #[arg(long, default_value = "json")]
        format: ExportFormat,
    },

    /// Delete all collected statistics
    Clear {
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },

    /// List existing backups
    Backups,

    /// Show or change configuration
    Config {
        /// Enable or disable scheduled backups
        #[arg(long)]
        backup_enabled: Option<bool>,

        /// Days between backups (1, 3 or 7)
        #[arg(long)]
        backup_interval: Option<u8>,

        /// Keep at most this many backups (0 keeps all)
        #[arg(long)]
        backup_retain: Option<usize>,

        /// Key identifier counted as delete
        #[arg(long)]
        delete_key: Option<u16>,
    },

    /// Print the name of a key identifier
    KeyName {
        /// Key identifier
        id: u16,
    },
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            autosave_secs,
            retry_secs,
        } => cmd_start(autosave_secs, retry_secs),
        Commands::Status => cmd_status(),
        Commands::Report { range, top } => cmd_report(range, top),
        Commands::Export { output, format } => cmd_export(output, format),
        Commands::Clear { yes } => cmd_clear(yes),
        Commands::Backups => cmd_backups(),
        Commands::Config {
            backup_enabled,
            backup_interval,
            backup_retain,
            delete_key,
        } => cmd_config(backup_enabled, backup_interval, backup_retain, delete_key),
        Commands::KeyName { id } => {
            println!("{}", display_name(id));
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keytally=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_config() -> Config {
    Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: could not read {:?}: {e}", Config::config_path());
        eprintln!("Using default configuration.");
        Config::default()
    })
}

fn cmd_start(autosave_secs: Option<u64>, retry_secs: u64) -> anyhow::Result<()> {
    println!("keytally v{VERSION}");
    println!();

    let mut config = load_config();
    if let Some(secs) = autosave_secs {
        config.autosave_interval = Duration::from_secs(secs.max(1));
    }

    println!("Data directory: {:?}", config.data_path);
    println!("  Autosave every {}s", config.autosave_interval.as_secs());
    if config.backup.enabled {
        println!("  Backups: {}", config.backup.interval_days);
    } else {
        println!("  Backups: disabled");
    }

    let mut engine =
        Engine::start(config, SystemSource::new()).context("failed to start keytally")?;

    match engine.startup_load() {
        StartupLoad::Loaded { total_count } => {
            println!("  Loaded {total_count} keystrokes from the previous session")
        }
        StartupLoad::Empty => println!("  Starting with empty statistics"),
        StartupLoad::Recovered { quarantined } => {
            eprintln!("Warning: the saved statistics were unreadable and have been moved to {quarantined:?}");
        }
        StartupLoad::Cleared => println!("  Applied a pending clear request"),
    }
    println!();
    report_capture_state(engine.capture_state());

    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let retry_every = Duration::from_secs(retry_secs.max(1));
    let mut last_poll = Instant::now();
    let mut last_retry = Instant::now();

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));

        // Let `keytally config` and `keytally clear` control a running daemon.
        if last_poll.elapsed() >= Duration::from_secs(1) {
            if let Ok(cfg) = Config::load() {
                if cfg.backup != engine.config().backup {
                    let reset = engine.apply_backup_settings(cfg.backup);
                    println!("Backup settings updated");
                    if reset {
                        println!("  Next backup deferred by a full interval");
                    }
                }
            }
            if engine.process_clear_request() {
                println!("[{}] Statistics cleared", Local::now().format("%H:%M:%S"));
            }
            engine.save_health();
            last_poll = Instant::now();
        }

        let waiting = matches!(
            engine.capture_state(),
            CaptureState::PermissionDenied | CaptureState::Failed(_)
        );
        if waiting && last_retry.elapsed() >= retry_every {
            if engine.retry_capture() == &CaptureState::Running {
                report_capture_state(engine.capture_state());
            }
            last_retry = Instant::now();
        }
    }

    println!();
    println!("Stopping...");
    engine.shutdown();

    let today = engine.summary(DateRange::Today, 5);
    println!("{} keystrokes today, {} total", today.total, engine.stats().total_count);
    println!();
    println!("{}", engine.health().summary());
    Ok(())
}

fn report_capture_state(state: &CaptureState) {
    match state {
        CaptureState::Running => println!("Capturing keystrokes."),
        CaptureState::PermissionDenied => {
            eprintln!("Input Monitoring permission not granted.");
            eprintln!();
            eprintln!("{PERMISSION_INSTRUCTIONS}");
            eprintln!();
        }
        CaptureState::Failed(reason) => {
            eprintln!("Capture failed to start: {reason}");
            eprintln!("Retrying in the background.");
        }
        CaptureState::Stopped => println!("Capture stopped."),
    }
}

/// Read the persisted statistics without modifying anything on disk.
fn read_stats(config: &Config) -> anyhow::Result<AggregateStats> {
    let store = SnapshotStore::new(config.snapshot_path());
    Ok(store
        .read()
        .with_context(|| format!("failed to read {:?}", store.path()))?
        .unwrap_or_default())
}

fn cmd_status() -> anyhow::Result<()> {
    let config = load_config();

    println!("keytally Status");
    println!("===============");
    println!();

    println!(
        "Input Monitoring Permission: {}",
        if check_permission() {
            "Granted ✓"
        } else {
            "Not Granted ✗"
        }
    );
    println!();

    println!("Configuration:");
    println!("  Config file: {:?}", Config::config_path());
    println!("  Data directory: {:?}", config.data_path);
    println!("  Autosave interval: {}s", config.autosave_interval.as_secs());
    if config.backup.enabled {
        println!("  Backups: {}", config.backup.interval_days);
    } else {
        println!("  Backups: disabled");
    }
    if let Some(last) = read_last_backup_at(&config.backup_state_path()) {
        println!("  Last backup: {}", last.with_timezone(&Local).format("%Y-%m-%d %H:%M"));
    }
    println!();

    match read_stats(&config) {
        Ok(stats) if !stats.is_empty() => {
            println!("Statistics:");
            println!("  Total keystrokes: {}", stats.total_count);
            println!("  Total deletes: {}", stats.total_delete_count);
            if let Some(first) = stats.first_day() {
                println!("  Tracking since: {first}");
            }
        }
        Ok(_) => println!("No statistics recorded yet."),
        Err(e) => eprintln!("Warning: {e:#}"),
    }
    println!();

    match HealthLog::read(&config.health_path()) {
        Ok(Some(health)) => println!("Last {}", health.summary()),
        Ok(None) => println!("No previous session data found."),
        Err(e) => eprintln!("Warning: could not read health log: {e}"),
    }
    Ok(())
}

fn cmd_report(range: DateRange, top: usize) -> anyhow::Result<()> {
    let config = load_config();
    let stats = read_stats(&config)?;
    let summary = RangeSummary::compute(&stats, range, Local::now().date_naive(), top);
    print!("{}", format_summary(&summary));
    Ok(())
}

fn cmd_export(output: Option<PathBuf>, format: ExportFormat) -> anyhow::Result<()> {
    let config = load_config();
    let stats = read_stats(&config)?;
    let destination = output.unwrap_or_else(|| config.export_path.clone());
    if destination == config.export_path {
        std::fs::create_dir_all(&destination)
            .with_context(|| format!("failed to create {destination:?}"))?;
    }

    let store = SnapshotStore::new(config.snapshot_path());
    let written = store.export(&stats, &destination, format)?;
    println!("Exported to {written:?}");
    Ok(())
}

fn cmd_clear(yes: bool) -> anyhow::Result<()> {
    if !yes && !confirm("Delete all collected keystroke statistics? [y/N] ")? {
        println!("Nothing cleared.");
        return Ok(());
    }

    let config = load_config();
    request_clear(&config)?;
    println!("Statistics cleared.");
    println!("A running keytally will reset within a second.");
    Ok(())
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn cmd_backups() -> anyhow::Result<()> {
    let config = load_config();
    let backups = list_backups(&config.backup_dir())?;

    if backups.is_empty() {
        println!("No backups in {:?}", config.backup_dir());
        return Ok(());
    }

    println!("{} backup(s) in {:?}", backups.len(), config.backup_dir());
    for path in &backups {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if let Some(name) = path.file_name() {
            println!("  {}  ({size} bytes)", name.to_string_lossy());
        }
    }

    if let (true, Some(last)) = (
        config.backup.enabled,
        read_last_backup_at(&config.backup_state_path()),
    ) {
        let next = last + config.backup.interval_days.duration();
        if next > Utc::now() {
            println!("Next backup after {}", next.with_timezone(&Local).format("%Y-%m-%d %H:%M"));
        }
    }
    Ok(())
}

fn cmd_config(
    backup_enabled: Option<bool>,
    backup_interval: Option<u8>,
    backup_retain: Option<usize>,
    delete_key: Option<u16>,
) -> anyhow::Result<()> {
    let mut config = load_config();
    let changing = backup_enabled.is_some()
        || backup_interval.is_some()
        || backup_retain.is_some()
        || delete_key.is_some();

    if let Some(enabled) = backup_enabled {
        config.backup.enabled = enabled;
    }
    if let Some(days) = backup_interval {
        match BackupInterval::try_from(days) {
            Ok(interval) => config.backup.interval_days = interval,
            Err(e) => bail!(e),
        }
    }
    if let Some(retain) = backup_retain {
        config.backup.retain = (retain > 0).then_some(retain);
    }
    if let Some(key) = delete_key {
        config.delete_key_id = key;
        println!("Delete key set to {}; restart keytally to apply.", display_name(key));
    }

    if changing {
        config.save()?;
        println!("Configuration saved.");
        println!();
    }

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("failed to install Ctrl+C handler")
}
