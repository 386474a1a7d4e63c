//! Node configuration.

use crate::Args;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use splendor_consensus::PostQuantumParams;
use splendor_gpu::{GpuConfig, HybridConfig};
use splendor_types::Address;
use splendor_x402::X402Config;
use std::path::Path;

/// Complete node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name.
    pub node_name: String,
    /// Network (splendor, splendor-dev).
    pub network: String,
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// Seconds between produced blocks.
    #[serde(default = "default_period")]
    pub period: u64,
    /// Checkpoint interval in blocks.
    #[serde(default = "default_epoch_length")]
    pub epoch_length: u64,
    /// API configuration.
    #[serde(default)]
    pub api: ApiConfig,
    /// Validator (block production) configuration.
    #[serde(default)]
    pub validator: ValidatorConfig,
    /// GPU processor configuration (`ENABLE_GPU`, `PREFERRED_GPU_TYPE`,
    /// `GPU_MAX_BATCH_SIZE`, `GPU_*_WORKERS`, `GPU_MAX_MEMORY_USAGE`,
    /// `GPU_ENABLE_PIPELINING`).
    #[serde(default)]
    pub gpu: GpuConfig,
    /// Hybrid scheduler configuration (`GPU_THRESHOLD`, `CPU_GPU_RATIO`,
    /// `THROUGHPUT_TARGET`, `ADAPTIVE_LOAD_BALANCING`,
    /// `MAX_CPU_UTILIZATION`, `MAX_GPU_UTILIZATION`).
    #[serde(default)]
    pub hybrid: HybridConfig,
    /// x402 configuration (`X402_ENABLED`, `X402_MIN_PAYMENT`,
    /// `X402_MAX_PAYMENT`, `X402_SETTLEMENT_TIMEOUT`, `X402_RATE_LIMITING`,
    /// `X402_MAX_REQUESTS_PER_MINUTE`, `X402_SIGNATURE_VALIDATION`,
    /// `X402_ENABLE_ANTI_REPLAY`).
    #[serde(default)]
    pub x402: X402Config,
    /// Post-quantum fork schedule (`pqtBlock`, `transitionBlocks`,
    /// `defaultMLDSAAlgorithm`).
    #[serde(default)]
    pub post_quantum: Option<PostQuantumParams>,
    /// Genesis balance allocations.
    #[serde(default)]
    pub genesis: Vec<GenesisAccount>,
}

fn default_period() -> u64 {
    1
}

fn default_epoch_length() -> u64 {
    30_000
}

/// API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API bind address.
    pub bind_address: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { bind_address: "127.0.0.1:8545".to_string() }
    }
}

/// Validator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ValidatorConfig {
    /// Produce blocks.
    pub enabled: bool,
    /// Hex-encoded 32-byte ECDSA sealing key. A throwaway dev key is
    /// generated when absent and production is enabled.
    pub secret: Option<String>,
    /// Additional authorised signers beyond the local validator.
    #[serde(default)]
    pub extra_validators: Vec<Address>,
}

/// A genesis allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub address: Address,
    /// Balance in wei, hex-encoded.
    pub balance: String,
}

impl NodeConfig {
    /// Load configuration from file and CLI args.
    pub fn load(config_path: &Path, args: &Args) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content =
                std::fs::read_to_string(config_path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Self::default_for_network(&args.network)
        };

        if let Some(ref api_bind) = args.api_bind {
            config.api.bind_address = api_bind.clone();
        }
        if args.validator {
            config.validator.enabled = true;
        }
        if args.no_gpu {
            config.gpu.enabled = false;
        }

        Ok(config)
    }

    /// Create default config for a network.
    pub fn default_for_network(network: &str) -> Self {
        let chain_id = match network {
            "splendor-dev" => 1337,
            _ => 2691,
        };
        Self {
            node_name: "splendor-rust-node".to_string(),
            network: network.to_string(),
            chain_id,
            period: default_period(),
            epoch_length: default_epoch_length(),
            api: ApiConfig::default(),
            validator: ValidatorConfig {
                enabled: network == "splendor-dev",
                ..Default::default()
            },
            gpu: GpuConfig::default(),
            hybrid: HybridConfig::default(),
            x402: X402Config::default(),
            post_quantum: None,
            genesis: Vec::new(),
        }
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_network_defaults() {
        let config = NodeConfig::default_for_network("splendor-dev");
        assert_eq!(config.chain_id, 1337);
        assert!(config.validator.enabled);
        assert!(config.x402.enabled);
    }

    #[test]
    fn mainnet_defaults() {
        let config = NodeConfig::default_for_network("splendor");
        assert_eq!(config.chain_id, 2691);
        assert!(!config.validator.enabled);
        assert!(config.gpu.enabled);
    }
}
