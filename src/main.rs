/*!
 * pubsub-logger CLI
 *
 * Version: 0.1.0
 * Author: Shane Wall <shaneawall@gmail.com>
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pubsub_logger::{
    config::{LogLevel, LoggerConfig},
    decoder::{decode_envelope, Record},
    error::{LoggerError, EXIT_FATAL, EXIT_SUCCESS},
    fleet::{serve_until_shutdown, FleetOrchestrator},
    logging,
    resolver::resolver_from_config,
    transport::{locator_from_config, DaemonLauncher, SubscriptionLauncher, TransportLocator},
};
use pubsub_logger_browser::{BrowserConfig, StatusProvider};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

/// Config file picked up from the working directory when none is given
const DEFAULT_CONFIG_FILE: &str = "pubsub-logger.toml";

#[derive(Parser)]
#[command(name = "pubsub-logger")]
#[command(version, about = "Record pubsub channels to per-day append-only logs", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, env = "PUBSUB_LOGGER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Root directory for channel logs
    #[arg(long, value_name = "DIR", global = true)]
    log_dir: Option<PathBuf>,

    /// Log browser port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Log browser bind host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Diagnostic log level
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Path to diagnostic log file (default: stdout)
    #[arg(long, value_name = "FILE", global = true)]
    log: Option<PathBuf>,

    /// Enable verbose logging (equivalent to --log-level=debug)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Seconds between transport lookups and resubscriptions
    #[arg(long, value_name = "SECS", global = true)]
    retry_interval: Option<u64>,

    /// Do not start the log browser
    #[arg(long, global = true)]
    no_server: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record every configured channel (default)
    Run,

    /// Find the transport daemon executable and print its path
    Locate,

    /// Decode envelope lines from stdin and print what would be logged
    Decode,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // The runtime is dropped before exiting so subscription children are killed
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
        .and_then(|runtime| runtime.block_on(run(cli)));

    let code = match result {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<LoggerError>()
                .map(LoggerError::exit_code)
                .unwrap_or(EXIT_FATAL)
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            init_logging(&config);
            run_fleet(config).await
        }
        Commands::Locate => {
            init_logging(&config);
            let executable = locator_from_config(&config.transport)
                .locate()
                .await
                .map_err(LoggerError::from)?;
            println!("{}", executable.display());
            Ok(())
        }
        // stdout carries the decoded records, so diagnostics stay off
        Commands::Decode => decode_stdin().await,
    }
}

/// Config file, then command-line overrides, then validation
fn load_config(cli: &Cli) -> Result<LoggerConfig> {
    let mut config = match config_path(cli.config.as_deref()) {
        Some(path) => LoggerConfig::from_file(&path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => LoggerConfig::default(),
    };

    if let Some(ref dir) = cli.log_dir {
        config.log_dir = dir.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    if cli.log.is_some() {
        config.log_file = cli.log.clone();
    }
    if cli.verbose {
        config.verbose = true;
    }
    if let Some(secs) = cli.retry_interval {
        config.retry_interval_secs = secs;
    }
    if cli.no_server {
        config.server.enabled = false;
    }

    config.validate()?;
    Ok(config)
}

fn config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
            fallback.is_file().then_some(fallback)
        }
    }
}

fn init_logging(config: &LoggerConfig) {
    if let Err(e) = logging::init_logging(config) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }
}

async fn run_fleet(config: LoggerConfig) -> Result<()> {
    info!(
        "pubsub-logger {} recording {} channel(s) into {}",
        pubsub_logger::VERSION,
        config.channels.len(),
        config.log_dir.display()
    );
    if config.channels.is_empty() {
        warn!("No channels configured; nothing will be recorded");
    }

    let resolver = resolver_from_config(&config.resolver);
    let locator = locator_from_config(&config.transport);
    let launcher: Arc<dyn SubscriptionLauncher> = Arc::new(DaemonLauncher);
    let fleet = Arc::new(FleetOrchestrator::new(&config, resolver, locator, launcher).start());

    if config.server.enabled {
        let browser = BrowserConfig {
            root: config.log_dir.clone(),
            host: config.server.host.clone(),
            port: config.server.port,
        };
        let status: Arc<dyn StatusProvider> = fleet.clone();
        let shutdown = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Interrupted, shutting down"),
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
        };
        serve_until_shutdown(pubsub_logger_browser::serve(browser, Some(status)), shutdown).await;
    } else {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!("Interrupted, shutting down");
    }

    Ok(())
}

async fn decode_stdin() -> Result<()> {
    let mut input = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut line = Vec::new();

    loop {
        line.clear();
        if input.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        match decode_envelope(trim_line(&line)) {
            Ok(Record::Unrepresentable(_)) => eprintln!("skipped empty payload"),
            Ok(record) => {
                if let Some(text) = record.as_text() {
                    stdout.write_all(text.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                }
            }
            // Not a payload line
            Err(_) => {}
        }
    }

    stdout.flush().await?;
    Ok(())
}

fn trim_line(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|b| !matches!(b, b'\n' | b'\r'))
        .map_or(0, |i| i + 1);
    &line[..end]
}
