pub mod process;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::{clear_config, load_config, save_config, BridgeConfig, DataDir};
use crate::instance::is_monitor_running;
use crate::logging::{init_logging, ActivityLog};
use crate::monitor::{run_until_signal, Monitor, MonitorSettings};
use crate::startup::{StartupCheck, StartupManager};
use crate::status::{load_status, MonitorState};
use process::stop_running_monitor;

// Longer than one request timeout so an in-flight upload can finish
const STOP_WAIT: Duration = Duration::from_secs(40);

#[derive(Parser, Debug)]
#[command(name = "hikibridge", version, long_about = None)]
#[command(about = "Forwards access-control terminal CSV exports to an HTTP endpoint")]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
    #[arg(
        long,
        global = true,
        env = "HIKIBRIDGE_HOME",
        help = "Application data directory. Defaults to ~/.hikibridge"
    )]
    data_dir: Option<PathBuf>,
    #[arg(long, short, global = true, help = "Enable debug logging")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Show or change the saved settings")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    #[command(about = "Monitor the folder in this console until Ctrl-C")]
    Start,
    #[command(about = "Stop a running monitor")]
    Stop,
    #[command(about = "Show monitoring state and upload counters")]
    Status,
    #[command(about = "Show recent activity")]
    Logs {
        #[arg(long, short = 'n', default_value_t = 50, help = "Number of entries to show")]
        lines: usize,
        #[arg(long, help = "Empty the activity log")]
        clear: bool,
    },
    #[command(about = "Manage launching at login")]
    Startup {
        #[command(subcommand)]
        action: StartupAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Show,
    Set {
        #[arg(long, help = "URL the records are POSTed to")]
        endpoint: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long, help = "Folder the terminal exports CSV files into")]
        folder: Option<String>,
        #[arg(long, help = "Start monitoring when launched without a command")]
        auto_start: Option<bool>,
    },
    Clear,
}

#[derive(Subcommand, Debug)]
enum StartupAction {
    Enable,
    Disable,
    Verify,
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let data_dir = DataDir::resolve(args.data_dir)?;
    data_dir.ensure()?;
    init_logging(&data_dir.logs_dir(), args.verbose)?;

    match args.command {
        None => launch(&data_dir).await,
        Some(Commands::Start) => start_monitoring(&data_dir).await,
        Some(Commands::Stop) => stop_monitoring(&data_dir).await,
        Some(Commands::Status) => print_status(&data_dir),
        Some(Commands::Logs { lines, clear }) => show_logs(&data_dir, lines, clear),
        Some(Commands::Config { action }) => process_config_command(&data_dir, action),
        Some(Commands::Startup { action }) => process_startup_command(&data_dir, action),
    }
}

/// Plain launch (also what start-at-login runs)
async fn launch(data_dir: &DataDir) -> Result<()> {
    let config = load_config(data_dir)?;
    if config.auto_start {
        return start_monitoring(data_dir).await;
    }

    print_status(data_dir)?;
    println!();
    println!("Run `hikibridge start` to begin monitoring, or `hikibridge config set --auto-start true` to start on launch.");
    Ok(())
}

async fn start_monitoring(data_dir: &DataDir) -> Result<()> {
    let config = load_config(data_dir)?;
    let monitor = Monitor::start(data_dir, &config, MonitorSettings::default())
        .context("Could not start monitoring")?;

    println!(
        "Monitoring {} -> {} (Ctrl-C to stop)",
        monitor.folder().display(),
        config.api_endpoint.trim()
    );

    let status = run_until_signal(monitor).await?;
    println!(
        "Stopped. Uploaded {} files ({} records), rejected {}, failed {}.",
        status.uploaded_files, status.uploaded_entries, status.rejected_files, status.failed
    );
    Ok(())
}

async fn stop_monitoring(data_dir: &DataDir) -> Result<()> {
    let lock_file = data_dir.lock_file();
    let pid_file = data_dir.pid_file();

    let stopped =
        tokio::task::spawn_blocking(move || stop_running_monitor(&lock_file, &pid_file, STOP_WAIT))
            .await??;

    if stopped {
        info!("Monitoring stopped by request");
        println!("Monitoring stopped");
    } else {
        println!("Monitoring is not running");
    }
    Ok(())
}

fn print_status(data_dir: &DataDir) -> Result<()> {
    let status = load_status(&data_dir.status_file());
    let running = is_monitor_running(&data_dir.lock_file());

    let state = match (running, status.state) {
        (true, _) => "running",
        (false, MonitorState::Running) => "stopped (last session ended unexpectedly)",
        (false, MonitorState::Stopped) => "stopped",
    };

    println!("State:     {}", state);
    if let Some(pid) = status.pid.filter(|_| running) {
        println!("PID:       {}", pid);
    }
    if let Some(folder) = &status.watched_folder {
        println!("Folder:    {}", folder.display());
    }
    if let Some(endpoint) = &status.endpoint {
        println!("Endpoint:  {}", endpoint);
    }
    if let Some(started_at) = status.started_at {
        println!("Started:   {}", format_time(started_at));
    }
    if let Some(updated_at) = status.updated_at {
        println!("Updated:   {}", format_time(updated_at));
    }
    println!(
        "Uploads:   {} files, {} records ({} pending, {} in progress)",
        status.uploaded_files, status.uploaded_entries, status.pending, status.processing
    );
    println!("Rejected:  {}", status.rejected_files);
    println!("Failed:    {}", status.failed);
    for failed in &status.failed_files {
        println!(
            "  - {} after {} attempts: {}",
            failed.file_name,
            failed.attempts,
            failed.error.as_deref().unwrap_or("unknown error")
        );
    }
    if let Some(error) = &status.last_error {
        println!("Last error: {}", error);
    }

    Ok(())
}

fn show_logs(data_dir: &DataDir, lines: usize, clear: bool) -> Result<()> {
    let activity_log = ActivityLog::new(data_dir.activity_log_file());

    if clear {
        activity_log.clear()?;
        println!("Activity log cleared");
        return Ok(());
    }

    let mut entries = activity_log.read_recent(Some(lines))?;
    if entries.is_empty() {
        println!("No activity recorded yet");
        return Ok(());
    }

    // Oldest first, like a console
    entries.reverse();
    for entry in entries {
        let when = DateTime::parse_from_rfc3339(&entry.timestamp)
            .map(|t| format_time(t.with_timezone(&Utc)))
            .unwrap_or(entry.timestamp);
        println!("[{}] {:?}: {}", when, entry.level, entry.message);
    }
    Ok(())
}

fn process_config_command(data_dir: &DataDir, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(data_dir)?;
            print_config(&config);
            if let Ok(manager) = StartupManager::for_current_platform(data_dir.root()) {
                println!("Registered at login: {}", manager.is_enabled());
            }
            Ok(())
        }
        ConfigAction::Set {
            endpoint,
            api_key,
            folder,
            auto_start,
        } => {
            let mut config = load_config(data_dir)?;
            if let Some(endpoint) = endpoint {
                config.api_endpoint = endpoint;
            }
            if let Some(api_key) = api_key {
                config.api_key = api_key;
            }
            if let Some(folder) = folder {
                config.folder_path = folder;
            }
            if let Some(auto_start) = auto_start {
                config.auto_start = auto_start;
            }

            save_config(data_dir, &config)?;
            println!("Configuration saved");

            if let Err(e) = config.validate() {
                println!("Note: monitoring cannot start yet: {}", e);
            }
            if is_monitor_running(&data_dir.lock_file()) {
                println!("Restart monitoring to apply the new settings");
            }
            Ok(())
        }
        ConfigAction::Clear => {
            clear_config(data_dir)?;
            println!("Configuration cleared");
            Ok(())
        }
    }
}

fn print_config(config: &BridgeConfig) {
    println!("API Endpoint: {}", config.api_endpoint);
    println!("API Key:      {}", config.masked_api_key());
    println!("Folder:       {}", config.folder_path);
    println!("Auto start:   {}", config.auto_start);
    println!("Start at login (saved): {}", config.launch_at_login);
}

fn process_startup_command(data_dir: &DataDir, action: StartupAction) -> Result<()> {
    let manager = StartupManager::for_current_platform(data_dir.root())?;

    match action {
        StartupAction::Enable => {
            manager.enable()?;
            if manager.verify()? != StartupCheck::Configured {
                manager.disable()?;
                bail!("Failed to verify startup configuration");
            }
            set_launch_at_login(data_dir, true)?;
            println!("Added to startup ({})", manager.location());
        }
        StartupAction::Disable => {
            manager.disable()?;
            set_launch_at_login(data_dir, false)?;
            println!("Removed from startup");
        }
        StartupAction::Verify => match manager.verify()? {
            StartupCheck::Configured => {
                println!("Startup is configured ({})", manager.location())
            }
            StartupCheck::Missing => println!("Startup is not configured"),
            StartupCheck::Mismatch { found } => println!(
                "Startup entry runs {} instead of this executable and data directory; run `hikibridge startup enable` to fix it",
                found
            ),
        },
    }
    Ok(())
}

fn set_launch_at_login(data_dir: &DataDir, enabled: bool) -> Result<()> {
    let mut config = load_config(data_dir)?;
    config.launch_at_login = enabled;
    save_config(data_dir, &config)?;
    Ok(())
}

fn format_time(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
