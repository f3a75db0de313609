use clap::Parser;
use log::{error, info};
use smooth_lock_bridge::config::{AutolockMode, EngineConfig, load_dotenv};
use smooth_lock_bridge::error::Result;
use smooth_lock_bridge::lock::LockStateEngine;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::signal;

#[derive(Parser)]
#[command(name = "smooth-lock-bridge")]
#[command(about = "Keep a smart-home bridge in sync with a network-controlled door lock")]
struct Cli {
    /// JSON accessory config (defaults to <config dir>/smooth-lock/config.json)
    #[arg(long, env = "SMOOTH_LOCK_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL of the lock device
    #[arg(long)]
    device_root: Option<String>,

    /// Port the push listener binds to
    #[arg(long)]
    listener_port: Option<u16>,

    /// Seconds between status polls
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Who relocks after an unlock: none, device or plugin
    #[arg(long)]
    autolock: Option<AutolockMode>,
}

impl Cli {
    fn resolve_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_file(path)?,
            None => match EngineConfig::default_path().filter(|p| p.exists()) {
                Some(path) => {
                    info!("Using config file {}", path.display());
                    EngineConfig::from_file(&path)?
                }
                None => EngineConfig::default(),
            },
        };

        config.apply_env();
        if let Some(root) = &self.device_root {
            config.device_root = root.clone();
        }
        if let Some(port) = self.listener_port {
            config.listener_port = port;
        }
        if let Some(interval) = self.poll_interval {
            config.poll_interval = interval;
        }
        if let Some(mode) = self.autolock {
            config.autolock = mode;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() -> ExitCode {
    // Before the runtime starts, while the process is single-threaded
    load_dotenv();
    init_logger();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!("Starting Smooth Lock Bridge");

    let config = cli.resolve_config()?;
    let accessory = config.accessory_info();
    info!("Configuration loaded:");
    info!("  Name: {}", config.name);
    info!("  Device root: {}", config.device_root());
    info!("  Manufacturer: {}", accessory.manufacturer);
    info!("  Model: {}", accessory.model);
    info!("  Serial: {}", accessory.serial);
    info!("  Firmware: {}", accessory.firmware);
    if config.token_timeout == 0 {
        info!("  Token validation disabled");
    }

    let engine = LockStateEngine::new(config)?;
    engine.start().await?;

    // Stand-in for the bridge's characteristic model: mirror every change
    let mut updates = engine.subscribe();
    let mirror_task = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let status = *updates.borrow_and_update();
            info!(
                "[Bridge] Current state: {}, target state: {}",
                status.current, status.target
            );
        }
    });

    info!("Smooth Lock Bridge is running");
    info!("  - Press Ctrl+C to exit");

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal");
        }
        Err(e) => {
            error!("Failed to listen for shutdown signal: {}", e);
        }
    }

    engine.shutdown().await;
    mirror_task.abort();

    info!("Smooth Lock Bridge stopped");
    Ok(())
}
