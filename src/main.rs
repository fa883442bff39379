//! Signal Relay - Main Entry Point
//!
//! Listens for TradingView webhooks and replaces the open position on
//! Gate.io with a fresh market order for every signal.

use anyhow::{Context, Result};
use clap::Parser;
use signal_relay::config::Config;
use signal_relay::exchange::{ExchangeAdapter, GateClient, MockExchange};
use signal_relay::notify::{LogNotifier, Notifier, WeComNotifier};
use signal_relay::server::{self, AppState};
use signal_relay::signal::SignalIntake;
use signal_relay::trading::PositionManager;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Signal Relay CLI
#[derive(Parser)]
#[command(name = "signal-relay")]
#[command(version, about = "Relay TradingView signals to Gate.io perpetual futures")]
struct Cli {
    /// Path to the JSON config file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Override the listen host
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Simulate orders locally while reading live market data
    #[arg(long, env = "PAPER_TRADING")]
    paper: bool,

    /// Directory for the log file
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _guard = init_logging(&cli.log_dir, cli.json_logs)?;

    if let Err(e) = run(cli).await {
        error!("Startup failed: {:#}", e);
        return Err(e);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    info!("Signal Relay v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(&cli.config)?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    config.validate(cli.paper)?;
    log_config(&config, cli.paper);

    let exchange = init_exchange(&config, cli.paper)?;
    let notifier = init_notifier(&config)?;

    let manager = Arc::new(PositionManager::new(exchange, notifier, &config.gateio));
    let intake = SignalIntake::new(config.trading.clone(), manager);
    let state = Arc::new(AppState::new(intake));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    server::serve(&addr, state).await?;

    info!("Signal Relay shutdown complete");
    Ok(())
}

fn init_exchange(config: &Config, paper: bool) -> Result<Arc<dyn ExchangeAdapter>> {
    let client = GateClient::new(&config.gateio).context("Failed to initialize exchange")?;

    if paper {
        info!("PAPER TRADING MODE - orders are simulated locally");
        Ok(Arc::new(MockExchange::with_upstream(Arc::new(client))))
    } else {
        warn!("LIVE TRADING MODE - real money at risk");
        Ok(Arc::new(client))
    }
}

fn init_notifier(config: &Config) -> Result<Arc<dyn Notifier>> {
    match (&config.notifier.webhook_url, config.notifier.enabled) {
        (Some(url), true) if !url.is_empty() => Ok(Arc::new(WeComNotifier::new(url.clone())?)),
        _ => {
            info!("No chat webhook configured, notifications go to the log only");
            Ok(Arc::new(LogNotifier))
        }
    }
}

/// Initialize logging to stdout and a daily-rolling file.
fn init_logging(log_dir: &Path, json: bool) -> Result<WorkerGuard> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "webhook.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::from_default_env()
        .add_directive("signal_relay=debug".parse()?)
        .add_directive(Level::INFO.into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.with_ansi(false).init();
    }

    Ok(guard)
}

/// Log configuration on startup.
fn log_config(config: &Config, paper: bool) {
    info!("Configuration:");
    info!("   Mode: {}", if paper { "paper" } else { "live" });
    info!("   Capital: {}U", config.gateio.capital);
    info!("   Leverage: {}x", config.gateio.leverage);
    info!(
        "   Instrument: {} (accepts {} signals)",
        config.trading.symbol, config.trading.allowed_token
    );
    info!("   Testnet: {}", config.gateio.testnet);
    info!(
        "   Notifications: {}",
        if config.notifier.enabled && config.notifier.webhook_url.is_some() {
            "wecom"
        } else {
            "log"
        }
    );
}
