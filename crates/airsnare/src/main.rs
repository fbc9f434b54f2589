#![deny(unsafe_op_in_unsafe_fn)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use airsnare_logging::LoggingConfig;
use airsnare_wireless::{Command, Engine, EngineConfig, LiveRadio, MemoryRegistry};

#[derive(Parser, Debug)]
#[command(name = "airsnare", version, about = "802.11 recon and attack console")]
struct Args {
    /// Monitor mode interface
    #[arg(short, long)]
    interface: Option<String>,
    /// Replay frames from a radiotap pcap instead of the interface
    #[arg(short = 'r', long)]
    source_file: Option<PathBuf>,
    /// Where captured handshakes are appended
    #[arg(long)]
    handshakes_file: Option<PathBuf>,
    /// Channel dwell time in milliseconds
    #[arg(long)]
    hop_period: Option<u64>,
    /// JSON engine configuration; AIRSNARE_* variables are used otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// State directory holding logs/ and config/logging.json
    #[arg(long, default_value = "/var/lib/airsnare")]
    root: PathBuf,
    /// Start recon immediately
    #[arg(long)]
    recon: bool,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_cfg = airsnare_logging::fs::read_config(&args.root);
    let _logging_guards = airsnare_logging::init("airsnare", &args.root, &log_cfg)?;
    if let Err(err) = airsnare_logging::run_retention(&args.root, &log_cfg) {
        warn!("Log retention failed: {}", err);
    }

    let config = engine_config(&args)?;
    if config.source_file.is_none() && !airsnare_wireless::check_privileges() {
        warn!("Not running as root; live capture will likely fail");
    }

    let radio = Arc::new(LiveRadio::new(config.interface.clone()));
    let engine = Arc::new(Engine::new(
        config,
        radio,
        Arc::new(MemoryRegistry::new()),
    ));
    spawn_event_printer(&engine);

    if args.recon {
        run_line(&engine, &args.root, "wifi.recon on").await;
    }

    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    info!("airsnare ready on {}", engine.interface());
    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
            line = lines.next_line() => {
                match line.context("reading operator input")? {
                    Some(line) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if matches!(line, "quit" | "exit") {
                            break;
                        }
                        run_line(&engine, &args.root, line).await;
                    }
                    None => break,
                }
            }
        }
    }

    if engine.is_running() {
        engine.stop().await.context("stopping wifi recon")?;
    }
    info!("airsnare stopped");
    Ok(())
}

fn engine_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading engine config {}", path.display()))?,
        None => EngineConfig::from_env(),
    };
    if let Some(iface) = &args.interface {
        config.interface = iface.clone();
    }
    if let Some(path) = &args.source_file {
        config.source_file = Some(path.clone());
    }
    if let Some(path) = &args.handshakes_file {
        config.handshakes_file = path.clone();
    }
    if let Some(period) = args.hop_period {
        anyhow::ensure!(period > 0, "hop period must be positive");
        config.hop_period_ms = period;
    }
    Ok(config)
}

fn spawn_event_printer(engine: &Engine) {
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => println!("{}", json),
                    Err(err) => warn!("Failed to encode event: {}", err),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Event printer lagged, {} events dropped", missed);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn run_line(engine: &Engine, root: &Path, line: &str) {
    let result = match line.strip_prefix("log.level") {
        Some(level) => set_log_level(root, level.trim()),
        None => execute(engine, line).await,
    };
    match result {
        Ok(output) => println!("{}", output),
        Err(err) => {
            eprintln!("Error: {}", err);
            for cause in err.chain().skip(1) {
                eprintln!("  -> {}", cause);
            }
        }
    }
}

async fn execute(engine: &Engine, line: &str) -> Result<String> {
    let command: Command = line.parse()?;
    let output = command
        .execute(engine)
        .await
        .with_context(|| format!("{} failed", line))?;
    Ok(output)
}

fn set_log_level(root: &Path, level: &str) -> Result<String> {
    anyhow::ensure!(!level.is_empty(), "usage: log.level <filter>");
    let cfg = LoggingConfig {
        level: level.to_string(),
        ..airsnare_logging::fs::read_config(root)
    };
    airsnare_logging::fs::write_config_atomic(root, &cfg)?;
    airsnare_logging::apply(&cfg)?;
    Ok(format!("log level = {}", level))
}
