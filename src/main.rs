//! Tungate - TUN traffic interception engine
//!
//! This is the main entry point for the Tungate host harness. It runs the
//! engine over an in-memory interface; on a VPN platform the embedding
//! service supplies the real TUN device and socket protector instead.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use tungate::config::{load_config, Config};
use tungate::engine::Engine;
use tungate::tun::{ChannelDevice, ChannelTunProvider};

/// Tungate - relays TUN traffic through a local SOCKS5 proxy
#[derive(Parser, Debug)]
#[command(name = "tungate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    setup_logging(&args.log_level, args.json_log)?;

    // Load configuration
    let config = match &args.config {
        Some(path) => {
            let config = load_config(path)?;
            info!("Configuration loaded from: {:?}", path);
            config
        }
        None => Config::default(),
    };

    info!("Tungate v{}", tungate::VERSION);
    info!(
        "SOCKS5 proxy: {}:{}",
        config.engine.proxy_host, config.engine.proxy_port
    );
    if config.engine.dns.enabled {
        info!("DNS interception enabled (port {})", config.engine.dns.port);
    }

    // Setup shutdown signal
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

    // Handle Ctrl+C and termination signals (cross-platform)
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down...");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            // On Windows, only handle Ctrl+C
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down...");
        }

        let _ = shutdown_tx_clone.send(true);
    });

    // Run the engine over an in-memory interface.
    let engine = Arc::new(Engine::new(config.engine));
    let (device, _handle) = ChannelDevice::new();
    let provider = ChannelTunProvider::new(device);

    engine.start(&provider).await?;
    info!("Engine running; press Ctrl+C to stop");

    let _ = shutdown_rx.recv().await;
    engine.stop().await;

    Ok(())
}

/// Setup logging based on configuration
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
