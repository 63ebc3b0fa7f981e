//! Command-line front end for the action engine.
//!
//! ```text
//! daq-actions run scan.toml
//! daq-actions history --hours 12
//! daq-actions rerun 7f1c...-entry-id
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use uuid::Uuid;

use daq_actions::{
    Action, ActionInfo, ActionLog, ActionRegistry, AutoOperator, EngineConfig,
    LogEntry, RunnerEvent, SystemHealthMonitor,
};

/// How long to wait for outstanding log writes once the queue is idle.
const LOG_SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "daq-actions", version, about = "Queue, run and log beamline actions")]
struct Cli {
    /// Engine configuration file
    #[arg(short, long, default_value = "config/daq-actions.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every action in a queue file, in order, then print their log entries
    Run {
        /// TOML file with one `[[action]]` table per queued action
        queue: PathBuf,
    },
    /// List logged actions, most recent first
    History {
        /// How far back to look
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
    /// Build a fresh copy of a logged action and run it
    Rerun {
        /// Log entry id
        entry: Uuid,
    },
}

#[derive(Debug, Deserialize)]
struct QueueFile {
    #[serde(default, rename = "action")]
    actions: Vec<ActionInfo>,
}

fn read_queue_file(path: &Path) -> Result<Vec<ActionInfo>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading queue file {}", path.display()))?;
    let file: QueueFile =
        toml::from_str(&text).with_context(|| format!("parsing queue file {}", path.display()))?;
    Ok(file.actions)
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("daq_actions={level},{level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    init_tracing(&config.logging.level);

    let monitor = Arc::new(SystemHealthMonitor::default());
    let log = config.open_log(monitor.clone())?;
    let registry = ActionRegistry::with_builtins();

    match cli.command {
        Command::Run { queue } => {
            let infos = read_queue_file(&queue)?;
            let actions = infos
                .iter()
                .map(|info| registry.create(info))
                .collect::<Result<Vec<_>, _>>()
                .context("building queued actions")?;
            info!(count = actions.len(), queue = %queue.display(), "Loaded queue file");
            run_to_completion(&config, log.clone(), actions).await?;
        }
        Command::History { hours } => {
            let now = Utc::now();
            let entries = log
                .entries_between(now - chrono::Duration::hours(hours), now, Some(config.log.page_size))
                .await?;
            if entries.is_empty() {
                println!("No actions logged in the last {hours} h");
            }
            for entry in &entries {
                print_entry(entry);
            }
        }
        Command::Rerun { entry } => {
            let entry = log.get(entry).await?;
            let action = registry
                .rerun(&entry)
                .with_context(|| format!("cannot re-run '{}'", entry.info.short_description))?;
            run_to_completion(&config, log.clone(), vec![action]).await?;
        }
    }

    let errors = monitor.recent_errors();
    if !errors.is_empty() {
        warn!(count = errors.len(), "Errors were reported while running");
        for error in errors {
            eprintln!("[{:?}] {}: {}", error.severity, error.source, error.message);
        }
    }
    Ok(())
}

/// Queue `actions`, run them and print what was logged.
async fn run_to_completion(config: &EngineConfig, log: ActionLog, actions: Vec<Action>) -> Result<()> {
    if actions.is_empty() {
        println!("Nothing to run");
        return Ok(());
    }
    let started = Utc::now();
    let runner = config.spawn_runner(log.clone(), Arc::new(AutoOperator));

    // Queue everything before the first one starts.
    runner.set_paused(true).await?;
    let mut events = runner.subscribe();
    // Top-level Actions that have started but are not logged yet.
    let mut pending: HashSet<Uuid> = HashSet::new();
    for action in actions {
        let id = action.id();
        if !runner.add_to_queue(action).await? {
            warn!(action = %id, "Runner refused a queued action");
        }
    }
    runner.set_paused(false).await?;

    let mut idle_since: Option<tokio::time::Instant> = None;
    loop {
        let deadline = idle_since.map(|at| at + LOG_SETTLE_TIMEOUT);
        let settle = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            event = events.recv() => match event {
                Ok(RunnerEvent::CurrentActionChanged(None)) => {
                    if runner.queue_len().await? == 0 || runner.is_paused().await? {
                        idle_since.get_or_insert_with(tokio::time::Instant::now);
                    }
                }
                Ok(RunnerEvent::CurrentActionChanged(Some(action))) => {
                    idle_since = None;
                    if !action.logs_children_individually() {
                        pending.insert(action.id());
                    }
                    info!(action = %action.id(), description = %action.info().short_description, "Running");
                }
                Ok(RunnerEvent::ActionLogged(entry)) => {
                    pending.remove(&entry.action_id);
                }
                Ok(RunnerEvent::PausedChanged(true)) => {
                    warn!("Queue paused; stopping");
                    idle_since.get_or_insert_with(tokio::time::Instant::now);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed runner events"),
                Err(RecvError::Closed) => break,
            },
            _ = settle => {
                warn!(outstanding = pending.len(), "Gave up waiting for log writes");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted; cancelling the current action");
                runner.cancel_current().await?;
                idle_since.get_or_insert_with(tokio::time::Instant::now);
            }
        }
        if idle_since.is_some() && pending.is_empty() {
            break;
        }
    }

    runner.shutdown().await?;
    print_log(&log, started).await
}

async fn print_log(log: &ActionLog, since: DateTime<Utc>) -> Result<()> {
    let mut entries = log.entries_between(since, Utc::now(), None).await?;
    entries.reverse();
    for entry in &entries {
        print_entry(entry);
    }
    Ok(())
}

fn print_entry(entry: &LogEntry) {
    let failure = entry
        .failure_message
        .as_deref()
        .map(|msg| format!(" ({msg})"))
        .unwrap_or_default();
    let child = if entry.parent_id.is_some() { "  " } else { "" };
    println!(
        "{} {child}{:<10} {:>8.2}s  {:<10} {}{failure}  [{}]",
        entry.end_time.format("%Y-%m-%d %H:%M:%S"),
        entry.info.type_name,
        entry.duration_secs(),
        entry.final_state.to_string(),
        entry.info.short_description,
        entry.id,
    );
}
