//! AppKettle - command line driver for the AppKettle network kettle.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;

use appkettle as app;

use app::config::{AppConfig, ConfigLoadResult};
use app::kettle::{Command, Inbound, Kettle, SumComplement, decode_command, probe};

/// Frames to wait for a status heartbeat or a command ack.
const SETTLE_FRAMES: usize = 5;

/// Control and monitor an AppKettle over the local network.
#[derive(Parser)]
#[command(name = "appkettle", version)]
struct Cli {
    /// Path to config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use config.toml from current directory (dev mode)
    #[arg(long, global = true)]
    dev: bool,

    /// Kettle IP address or host name (overrides config)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Kettle IMEI (overrides config)
    #[arg(long, global = true)]
    imei: Option<String>,

    /// Send commands AES encrypted
    #[arg(long, global = true)]
    encrypt: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Broadcast a discovery probe and print the kettle details
    Discover,
    /// Stay connected and log every state change
    Monitor,
    /// Turn the kettle on
    On {
        /// Target temperature in Celsius
        #[arg(long, value_parser = clap::value_parser!(u8).range(40..=100))]
        temp: Option<u8>,
        /// Keep warm after boiling
        #[arg(long)]
        keep_warm: bool,
    },
    /// Turn the kettle off
    Off,
    /// Wake the kettle (display on)
    Wake,
    /// Decode a captured inner command hex string
    Decode { hex: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Determine config path based on mode
    let config_path = if cli.dev {
        PathBuf::from("config.toml")
    } else {
        cli.config.clone().unwrap_or_else(AppConfig::default_path)
    };

    let loaded = AppConfig::try_load(&config_path);
    let file_dir = match &loaded {
        ConfigLoadResult::Loaded(config) => config.logging.file_dir.clone(),
        _ => None,
    };
    let _guard = init_logging(cli.verbose, file_dir.as_deref());
    tracing::info!("Config path: {:?}", config_path);

    let mut config = match loaded {
        ConfigLoadResult::Loaded(config) => {
            tracing::info!("Config loaded successfully");
            config
        }
        ConfigLoadResult::Missing => {
            tracing::info!("Config missing, using defaults");
            AppConfig::default()
        }
        ConfigLoadResult::Invalid(e) => bail!("Config invalid: {e}"),
    };

    if let Some(host) = cli.host {
        config.device.host = host;
    }
    if let Some(imei) = cli.imei {
        config.device.imei = imei;
    }
    if cli.encrypt {
        config.device.send_encrypted = true;
    }
    config.validate().context("invalid settings")?;

    match cli.command {
        Cmd::Discover => discover(&config).await,
        Cmd::Decode { hex } => decode(&hex),
        Cmd::Monitor => {
            let mut kettle = Kettle::from_config(&config)?;
            tokio::select! {
                result = monitor(&mut kettle) => result?,
                _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
            }
            kettle.close();
            Ok(())
        }
        Cmd::On { temp, keep_warm } => {
            let mut kettle = connect(&config).await?;
            kettle.set_keep_warm(keep_warm);
            if let Some(temp) = temp {
                kettle.set_target_temp(temp);
            }
            kettle.turn_on(None).await?;
            finish(kettle).await
        }
        Cmd::Off => {
            let mut kettle = connect(&config).await?;
            kettle.turn_off().await?;
            finish(kettle).await
        }
        Cmd::Wake => {
            let mut kettle = connect(&config).await?;
            kettle.wake().await?;
            finish(kettle).await
        }
    }
}

fn init_logging(verbose: bool, file_dir: Option<&Path>) -> Option<WorkerGuard> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    match file_dir {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "appkettle.log"));
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

async fn discover(config: &AppConfig) -> anyhow::Result<()> {
    match probe(&config.discovery).await? {
        Some(found) => {
            println!("Discovered kettle with following parameters:");
            println!("- Name: {}", found.ap_ssid);
            println!("- IP: {}", found.address);
            println!("- IMEI: {}", found.imei);
            println!("- Wifi SSID: {}", found.dev_router);
            println!("- Software version: {}", found.version);
            println!("- Device Status: {}", found.device_status);
        }
        None => println!("No kettle found"),
    }
    Ok(())
}

fn decode(hex: &str) -> anyhow::Result<()> {
    let record = decode_command(hex, &SumComplement)?;
    println!("{}: {record}", record.command);
    println!("{:#?}", record.fields);
    Ok(())
}

/// Connect and wait for the first heartbeat so the state is known.
async fn connect(config: &AppConfig) -> anyhow::Result<Kettle> {
    let mut kettle = Kettle::from_config(config)?;
    kettle.connect().await?;

    for _ in 0..SETTLE_FRAMES {
        kettle.poll().await;
        if kettle.state().status.is_some() || !kettle.is_connected() {
            break;
        }
    }
    tracing::info!("Kettle: {}", kettle.state());
    Ok(kettle)
}

/// Read a few frames to pick up the command ack, then close.
async fn finish(mut kettle: Kettle) -> anyhow::Result<()> {
    for _ in 0..SETTLE_FRAMES {
        if !kettle.is_connected() {
            break;
        }
        if let Some(Inbound::Device(record)) = kettle.poll().await {
            if record.command != Command::Status && record.ack.is_some() {
                tracing::info!("{} acknowledged: {}", record.command, record.ack_ok());
                break;
            }
        }
    }
    println!("{}", kettle.state());
    kettle.close();
    Ok(())
}

/// Receive loop with keep-alive; reconnects when the kettle drops the socket.
async fn monitor(kettle: &mut Kettle) -> anyhow::Result<()> {
    loop {
        if !kettle.is_connected() {
            kettle.connect().await?;
        }

        if let Err(e) = kettle.keep_alive_if_due().await {
            tracing::warn!("Keep alive failed: {e}");
            continue;
        }

        let before = kettle.state().clone();
        if let Some(Inbound::Device(_)) = kettle.poll().await {
            // Heartbeats bump seq every second; only report real changes.
            let mut now = kettle.state().clone();
            now.seq = before.seq;
            now.cmd = before.cmd;
            if now != before {
                tracing::info!("Kettle: {}", kettle.state());
            }
        }
    }
}
