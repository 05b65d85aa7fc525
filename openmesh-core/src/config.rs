//! Configuration management for openmesh
//!
//! Handles CLI argument parsing, config file loading, and defaults.

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::rewards::RewardPolicy;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Parser, Debug)]
#[command(name = "openmesh")]
#[command(about = "Community WiFi node pipeline", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the pipeline service
    Start(StartCommand),
}

#[derive(Parser, Debug, Clone)]
pub struct StartCommand {
    /// Data directory for the durable store
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// HTTP port for the REST API
    #[arg(long, default_value_t = 8080)]
    pub api_port: u16,

    /// Base URL of the ledger signing gateway; omit to run without one
    #[arg(long)]
    pub ledger_url: Option<String>,

    /// Timeout for individual ledger calls, in seconds
    #[arg(long, default_value_t = 10)]
    pub ledger_timeout_secs: u64,

    /// Interval between stats snapshots, in seconds
    #[arg(long, default_value_t = 300)]
    pub snapshot_interval_secs: u64,

    /// Interval between reward cycles, in seconds (0 disables them)
    #[arg(long, default_value_t = 86400)]
    pub reward_interval_secs: u64,

    /// Keep all state in memory instead of the on-disk store
    #[arg(long, default_value_t = false)]
    pub ephemeral: bool,

    /// Logging level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data_dir: PathBuf,
    pub api_port: u16,
    #[serde(default)]
    pub ledger_url: Option<String>,
    pub ledger_timeout_secs: u64,
    pub snapshot_interval_secs: u64,
    pub reward_interval_secs: u64,
    #[serde(default)]
    pub ephemeral: bool,
    pub log_level: String,
    #[serde(default)]
    pub reward_policy: RewardPolicy,
}

impl Config {
    /// Create config from CLI arguments
    pub fn from_cli() -> Result<Self, ConfigError> {
        let cli = Cli::parse();

        match cli.command {
            Commands::Start(cmd) => Ok(cmd.into()),
        }
    }

    /// Load config from a TOML file
    pub fn load_from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "ledger_timeout_secs must be positive".to_string(),
            ));
        }
        if self.snapshot_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "snapshot_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from("./data"),
            api_port: 8080,
            ledger_url: None,
            ledger_timeout_secs: 10,
            snapshot_interval_secs: 300,
            reward_interval_secs: 86400,
            ephemeral: false,
            log_level: "info".to_string(),
            reward_policy: RewardPolicy::default(),
        }
    }
}

impl From<StartCommand> for Config {
    fn from(cmd: StartCommand) -> Self {
        Config {
            data_dir: cmd.data_dir,
            api_port: cmd.api_port,
            ledger_url: cmd.ledger_url,
            ledger_timeout_secs: cmd.ledger_timeout_secs,
            snapshot_interval_secs: cmd.snapshot_interval_secs,
            reward_interval_secs: cmd.reward_interval_secs,
            ephemeral: cmd.ephemeral,
            log_level: cmd.log_level,
            reward_policy: RewardPolicy::default(),
        }
    }
}
