//! uc - updatecoord command-line host
//!
//! Runs one coordinator per configured source and prints every update.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use serde_json::Value;
use tracing::{debug, info, warn};

use updatecoord::cli::{Cli, Command};
use updatecoord::config::{Config, SourceConfig};
use updatecoord::coordinator::{Coordinator, CoordinatorHandle, Listener, Update};
use updatecoord::events::{DEFAULT_CHANNEL_CAPACITY, EventBus, spawn_event_logger};
use updatecoord::source::CommandFetcher;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("updatecoord")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("uc.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(sources = config.sources.len(), "uc loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run { names } => cmd_run(&config, &names).await,
        Command::Once { name } => cmd_once(&config, &name).await,
        Command::List => cmd_list(&config),
    }
}

/// Listener that prints each update for one source
struct Printer {
    name: String,
}

impl Listener<Value> for Printer {
    fn on_update(&self, update: &Update<Value>) {
        let at = update.at().format("%H:%M:%S").to_string();
        match update {
            Update::Refreshed { value, .. } => {
                println!("{} {} {} {}", at.dimmed(), "✓".green(), self.name.cyan(), render(value));
            }
            Update::Failed { error, .. } => {
                println!(
                    "{} {} {} {}",
                    at.dimmed(),
                    "✗".red(),
                    self.name.cyan(),
                    error.to_string().red()
                );
            }
        }
    }
}

/// Strings print bare; everything else as compact JSON
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn select_sources<'a>(config: &'a Config, names: &[String]) -> Result<Vec<&'a SourceConfig>> {
    if names.is_empty() {
        return Ok(config.sources.iter().collect());
    }
    names
        .iter()
        .map(|name| config.source(name).ok_or_else(|| eyre!("Unknown source '{}'", name)))
        .collect()
}

fn start_source(source: &SourceConfig, bus: &EventBus) -> (CoordinatorHandle<Value>, tokio::task::JoinHandle<()>) {
    debug!(name = source.name(), command = %source.command, "start_source: called");
    let fetcher = CommandFetcher::new(&source.command, source.output);
    let coordinator = Coordinator::with_event_bus(source.coordinator.clone(), fetcher, bus.clone());
    let handle = coordinator.handle();
    (handle, tokio::spawn(coordinator.run()))
}

/// Run coordinators until Ctrl-C
async fn cmd_run(config: &Config, names: &[String]) -> Result<()> {
    debug!(?names, "cmd_run: called");
    let sources = select_sources(config, names)?;
    if sources.is_empty() {
        return Err(eyre!("No sources configured"));
    }

    let bus = EventBus::new(DEFAULT_CHANNEL_CAPACITY);
    let event_logger = match &config.event_log {
        Some(path) => Some(spawn_event_logger(&bus, path).context("Failed to start event log")?),
        None => None,
    };

    let mut handles = Vec::new();
    let mut tasks = Vec::new();
    let mut printers = Vec::new();
    for source in sources {
        let (handle, task) = start_source(source, &bus);
        let printer = Arc::new(Printer {
            name: source.name().to_string(),
        });
        handle
            .register(&printer)
            .await
            .context(format!("Failed to register listener for '{}'", source.name()))?;

        println!(
            "{} {} ({})",
            "▶".green(),
            source.name().cyan(),
            describe_interval(source).dimmed()
        );
        handles.push(handle);
        tasks.push(task);
        printers.push(printer);
    }

    tokio::signal::ctrl_c().await.context("Failed to wait for Ctrl-C")?;
    info!("cmd_run: interrupt received, shutting down");

    futures::future::join_all(handles.iter().map(|h| h.shutdown())).await;
    for result in futures::future::join_all(tasks).await {
        if let Err(e) = result {
            warn!(error = %e, "cmd_run: coordinator task failed");
        }
    }

    // The event logger exits once every bus sender is gone
    drop(handles);
    drop(printers);
    drop(bus);
    if let Some(logger) = event_logger {
        let _ = logger.await;
    }

    println!("{} stopped", "■".yellow());
    Ok(())
}

/// Refresh one source once and print the value
async fn cmd_once(config: &Config, name: &str) -> Result<()> {
    debug!(%name, "cmd_once: called");
    let source = config.source(name).ok_or_else(|| eyre!("Unknown source '{}'", name))?;

    let bus = EventBus::new(DEFAULT_CHANNEL_CAPACITY);
    let (handle, task) = start_source(source, &bus);
    let result = handle.request_refresh().await;
    handle.shutdown().await;
    let _ = task.await;

    let value = result.map_err(|e| eyre!("Refresh of '{}' failed: {}", name, e))?;
    println!("{}", render(&value));
    Ok(())
}

/// Print configured sources
fn cmd_list(config: &Config) -> Result<()> {
    debug!("cmd_list: called");
    if config.sources.is_empty() {
        println!("No sources configured");
        return Ok(());
    }

    for source in &config.sources {
        println!(
            "{} {} {}",
            source.name().cyan(),
            source.coordinator.resource_id.yellow(),
            describe_interval(source).dimmed()
        );
        println!("    {}", source.command);
    }
    Ok(())
}

fn describe_interval(source: &SourceConfig) -> String {
    match source.coordinator.refresh_interval() {
        Some(interval) if interval.subsec_millis() == 0 => format!("every {}s", interval.as_secs()),
        Some(interval) => format!("every {}ms", interval.as_millis()),
        None => "manual".to_string(),
    }
}
