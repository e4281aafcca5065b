//! Comlink - serial bridge and port monitor
//!
//! - `comlink bridge`: relay lines between the two ports named in config.txt
//! - `comlink monitor`: watch for serial ports being plugged in or removed
//! - `comlink list-ports`: print the serial ports visible right now

mod tui;

use clap::{Parser, Subcommand, ValueEnum};
use comlink_core::cli::{exit_code_description, exit_code_for, ExitCodes};
use comlink_core::config::{self, AppConfig, LoggingSettings, MonitorSettings};
use comlink_core::{open_pair, ForwardingPair, PortRegistry, RegistryEvent, SystemPorts};
use crossbeam_channel::Receiver;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Output format for `list-ports`
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// One port per line
    Text,
    /// JSON array
    Json,
}

/// Comlink CLI
#[derive(Parser, Debug)]
#[command(
    name = "comlink",
    version,
    about = "Bridge two serial ports and watch for serial hot-plug events",
    long_about = None
)]
struct Cli {
    /// Settings file (TOML)
    #[arg(long, global = true, env = "COMLINK_SETTINGS")]
    settings: Option<PathBuf>,

    /// Verbose output (logs every relayed unit)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write daily log files into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Relay lines between the two configured serial ports
    Bridge {
        /// Channel configuration file
        #[arg(short, long, default_value = config::DEFAULT_CHANNEL_FILE)]
        config: PathBuf,

        /// Pause after each relayed line (milliseconds)
        #[arg(long)]
        yield_ms: Option<u64>,

        /// Read timeout slice (milliseconds)
        #[arg(long)]
        read_timeout_ms: Option<u64>,
    },

    /// Watch serial ports being inserted and removed
    Monitor {
        /// Poll interval (milliseconds)
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Log events instead of drawing the terminal view
        #[arg(long)]
        plain: bool,
    },

    /// List available serial ports
    ListPorts {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match AppConfig::load(cli.settings.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(ExitCodes::CONFIG_ERROR);
        }
    };

    // The terminal view owns the screen; logs then only go to files.
    let to_stderr = !matches!(cli.command, Commands::Monitor { plain: false, .. });
    let _log_guard = init_logging(&cli, &settings.logging, to_stderr);

    match run(&cli, settings) {
        Ok(code) => code,
        Err(e) => {
            let code = exit_code_for(&e);
            error!(code, "{e:#}");
            eprintln!("error: {e:#} ({})", exit_code_description(code));
            ExitCode::from(code)
        }
    }
}

fn init_logging(cli: &Cli, logging: &LoggingSettings, to_stderr: bool) -> Option<WorkerGuard> {
    let level = if cli.verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let directory = cli.log_dir.as_ref().or(logging.directory.as_ref());
    let (file_layer, guard) = match directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "comlink.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    let stderr_layer =
        to_stderr.then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

fn run(cli: &Cli, settings: AppConfig) -> anyhow::Result<ExitCode> {
    info!("Starting Comlink v{}", comlink_core::VERSION);

    match &cli.command {
        Commands::Bridge {
            config,
            yield_ms,
            read_timeout_ms,
        } => {
            let mut bridge = settings.bridge;
            if let Some(ms) = yield_ms {
                bridge.yield_ms = *ms;
            }
            if let Some(ms) = read_timeout_ms {
                bridge.read_timeout_ms = *ms;
            }
            run_bridge(config, &bridge)
        }
        Commands::Monitor { interval_ms, plain } => {
            let mut monitor = settings.monitor;
            if let Some(ms) = interval_ms {
                monitor.interval_ms = *ms;
            }
            run_monitor(&monitor, *plain)
        }
        Commands::ListPorts { format } => list_ports(*format),
    }
}

fn run_bridge(config: &Path, settings: &config::BridgeSettings) -> anyhow::Result<ExitCode> {
    info!("Loading channel configuration from {}", config.display());
    let (a, b) = config::load_channels(config)?;
    info!(a = %a, b = %b, "channels validated");

    let (a, b) = open_pair(a, b, &settings.channel_options())?;
    let (a, b) = (Arc::new(a), Arc::new(b));

    // Ctrl+C closes both channels; the bridge then stops like on any other failure.
    {
        let (a, b) = (Arc::clone(&a), Arc::clone(&b));
        ctrlc::set_handler(move || {
            info!("Interrupted, closing channels");
            a.close();
            b.close();
        })?;
    }

    let pair = ForwardingPair::new(&a, &b, settings.bridge_options())?;
    let report = pair.run()?;

    for direction in report.directions() {
        info!(
            source = %direction.source,
            destination = %direction.destination,
            units = direction.units,
            bytes = direction.bytes,
            "direction finished"
        );
    }

    match report.root_cause() {
        Some(cause) if !cause.is_closed() => {
            error!(port = %cause.port(), operation = cause.operation(), "bridge lost: {cause}");
            Ok(ExitCode::from(ExitCodes::LINK_LOST))
        }
        _ => Ok(ExitCode::SUCCESS),
    }
}

fn run_monitor(settings: &MonitorSettings, plain: bool) -> anyhow::Result<ExitCode> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let _registry = PortRegistry::new(SystemPorts).spawn(settings.interval(), tx)?;

    if plain {
        log_events(&rx);
    } else {
        tui::run(&rx, settings)?;
    }
    Ok(ExitCode::SUCCESS)
}

fn log_events(events: &Receiver<RegistryEvent>) {
    for event in events {
        match event {
            RegistryEvent::Primed { ports, .. } => {
                info!(count = ports.len(), "Watching serial ports: {}", ports.join(", "));
            }
            RegistryEvent::Transition(t) => {
                info!(port = %t.port, at = %t.at.format("%H:%M:%S"), "{} {}", t.port, t.kind);
            }
            RegistryEvent::EnumerationFailed { error, at } => {
                warn!(at = %at.format("%H:%M:%S"), "{error}");
            }
        }
    }
    warn!("Port registry stopped");
}

fn list_ports(format: OutputFormat) -> anyhow::Result<ExitCode> {
    let ports = serialport::available_ports()?;

    match format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.port_name,
                        "type": format!("{:?}", p.port_type)
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            if ports.is_empty() {
                println!("No serial ports found.");
            }
            for port in &ports {
                println!("{}", port.port_name);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
