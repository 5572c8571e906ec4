//! Command-line entrypoint: argument parsing and config/identity loading.

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

use crate::config::FarmConfig;
use crate::error::{FarmerbotError, Result};

#[derive(Parser, Debug)]
#[command(name = "farmerbot", version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Path to the farm configuration document (TOML).
    #[arg(long)]
    pub config: PathBuf,

    /// Chain network to connect to (e.g. "main", "test", "qa", "dev").
    #[arg(long, default_value = "main")]
    pub network: String,

    /// Path to a file containing the farmer's mnemonic phrase.
    #[arg(long)]
    pub mnemonic_file: PathBuf,

    /// Log level filter, e.g. "info", "farmerbot=debug".
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Admin RPC listen address.
    #[arg(long, default_value = "127.0.0.1:9944")]
    pub rpc_addr: SocketAddr,
}

/// On-disk representation of the config document, before validation.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(flatten)]
    farm: FarmConfig,
}

impl Cli {
    pub fn init_logging(&self) {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&self.log_level)),
            )
            .init();
    }

    pub fn load_config(&self) -> Result<FarmConfig> {
        let raw = fs::read_to_string(&self.config).map_err(|e| {
            FarmerbotError::Fatal(format!("failed to read config file {:?}: {e}", self.config))
        })?;
        let parsed: ConfigFile = toml::from_str(&raw)
            .map_err(|e| FarmerbotError::Fatal(format!("failed to parse config file: {e}")))?;
        Ok(parsed.farm)
    }

    pub fn load_mnemonic(&self) -> Result<String> {
        fs::read_to_string(&self.mnemonic_file)
            .map(|s| s.trim().to_string())
            .map_err(|e| {
                FarmerbotError::Fatal(format!(
                    "failed to read mnemonic file {:?}: {e}",
                    self.mnemonic_file
                ))
            })
    }
}
