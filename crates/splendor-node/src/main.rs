//! Splendor Node - a high-throughput EVM-compatible chain node.
//!
//! This is the main entry point for the splendor-node binary.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod config;
mod node;

use config::NodeConfig;
use node::Node;

/// Splendor blockchain node.
#[derive(Parser, Debug)]
#[command(name = "splendor-node")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "splendor-node.toml")]
    config: PathBuf,

    /// Network to join (splendor, splendor-dev)
    #[arg(short, long, default_value = "splendor")]
    network: String,

    /// API bind address
    #[arg(long)]
    api_bind: Option<String>,

    /// Enable block production
    #[arg(long)]
    validator: bool,

    /// Disable the GPU path regardless of configuration
    #[arg(long)]
    no_gpu: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print version and exit
    #[arg(long)]
    version_info: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.version_info {
        print_version();
        return Ok(());
    }

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Splendor Node v{}", env!("CARGO_PKG_VERSION"));

    let config = NodeConfig::load(&args.config, &args)?;
    info!("Network: {} (chain id {})", config.network, config.chain_id);
    info!("API: {}", config.api.bind_address);
    info!(
        "GPU: {}",
        if config.gpu.enabled { "enabled" } else { "disabled" }
    );

    let node = Node::new(config).await?;

    let node_handle = node.clone();
    let shutdown_signal = async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        node_handle.shutdown().await;
    };

    tokio::select! {
        result = node.run() => {
            if let Err(e) = result {
                tracing::error!("Node error: {}", e);
            }
        }
        _ = shutdown_signal => {
            info!("Shutdown complete");
        }
    }

    info!("Splendor node stopped");
    Ok(())
}

fn print_version() {
    println!("Splendor Node");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Built with:");
    println!("  k256 + ML-DSA dual sealing");
    println!("  GPU batch offload (CUDA/OpenCL) with CPU fallback");
    println!("  Native x402 micropayments");
    println!("  Tokio for async runtime");
}
