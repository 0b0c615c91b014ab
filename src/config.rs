//! Configuration module for the delegated-transfer tool
//!
//! This module handles configuration loading from TOML files, `.env` files and
//! environment variables, and provides structured configuration types.

use crate::ledger::RetryPolicy;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use solana_sdk::{
    commitment_config::{CommitmentConfig, CommitmentLevel},
    pubkey::Pubkey,
};
use std::{str::FromStr, time::Duration};

/// Environment variable overriding `rpc.url`
pub const ENV_RPC_URL: &str = "DELEGATED_TRANSFER_RPC_URL";
/// Environment variable overriding `rpc.commitment`
pub const ENV_COMMITMENT: &str = "DELEGATED_TRANSFER_COMMITMENT";
/// Environment variable overriding `wallet.sender.keypair_path`
pub const ENV_SENDER_KEYPAIR: &str = "DELEGATED_TRANSFER_SENDER_KEYPAIR";
/// Environment variable overriding `wallet.fee_payer.keypair_path`
pub const ENV_FEE_PAYER_KEYPAIR: &str = "DELEGATED_TRANSFER_FEE_PAYER_KEYPAIR";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// RPC endpoint configuration
    pub rpc: RpcConfig,

    /// Credential sources for both parties
    pub wallet: WalletConfig,

    /// Defaults for transfer commands
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Logging and metrics output
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// JSON-RPC endpoint
    pub url: String,

    /// Commitment level used for reads and confirmation
    #[serde(default = "default_commitment")]
    pub commitment: String,

    /// Request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,

    /// Retries for idempotent reads
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

/// Where a keypair is loaded from
///
/// `keypair_path` wins over `secret_env` when both are set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeySource {
    /// Path to a keypair file (JSON byte array or raw 64 bytes)
    #[serde(default)]
    pub keypair_path: Option<String>,

    /// Name of an environment variable holding a JSON byte array
    #[serde(default)]
    pub secret_env: Option<String>,
}

impl KeySource {
    pub fn is_configured(&self) -> bool {
        self.keypair_path.is_some() || self.secret_env.is_some()
    }
}

/// Which side of the handshake a command acts for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Sender,
    FeePayer,
}

impl Party {
    fn field(self) -> &'static str {
        match self {
            Party::Sender => "wallet.sender",
            Party::FeePayer => "wallet.fee_payer",
        }
    }
}

/// Each party's host only needs its own credential configured
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Credential of the party moving the funds
    #[serde(default)]
    pub sender: KeySource,

    /// Credential of the party paying the fee
    #[serde(default)]
    pub fee_payer: KeySource,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Default token mint for `send`/`prepare`
    #[serde(default)]
    pub mint: Option<String>,

    /// Durable nonce account used when no `--nonce` is given
    #[serde(default)]
    pub nonce_account: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Emit JSON log lines instead of human-readable ones
    #[serde(default)]
    pub json_logs: bool,

    /// Dump the Prometheus registry on exit
    #[serde(default)]
    pub print_metrics: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            json_logs: false,
            print_metrics: false,
        }
    }
}

// Default value functions
fn default_commitment() -> String { "confirmed".to_string() }
fn default_rpc_timeout() -> u64 { 30 }
fn default_max_retries() -> usize { 3 }

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path))?;
        Ok(config)
    }

    /// Load configuration with `.env` and environment variable overrides
    pub fn from_file_with_env(path: &str) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_RPC_URL) {
            self.rpc.url = url;
        }
        if let Some(commitment) = lookup(ENV_COMMITMENT) {
            self.rpc.commitment = commitment;
        }
        if let Some(path) = lookup(ENV_SENDER_KEYPAIR) {
            self.wallet.sender.keypair_path = Some(path);
        }
        if let Some(path) = lookup(ENV_FEE_PAYER_KEYPAIR) {
            self.wallet.fee_payer.keypair_path = Some(path);
        }
    }

    /// Reject values that would only fail later at the first RPC call
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rpc.url.trim().is_empty() {
            bail!("rpc.url must not be empty");
        }
        if !(self.rpc.url.starts_with("http://") || self.rpc.url.starts_with("https://")) {
            bail!("rpc.url must be an http(s) URL, got {}", self.rpc.url);
        }
        if self.rpc.timeout_secs == 0 {
            bail!("rpc.timeout_secs must be positive");
        }
        self.commitment()?;
        self.transfer.mint()?;
        self.transfer.nonce_account()?;
        Ok(())
    }

    /// Credential source of `party`, failing when it is not configured
    pub fn key_source(&self, party: Party) -> anyhow::Result<&KeySource> {
        let source = match party {
            Party::Sender => &self.wallet.sender,
            Party::FeePayer => &self.wallet.fee_payer,
        };
        if !source.is_configured() {
            bail!("{} needs keypair_path or secret_env", party.field());
        }
        Ok(source)
    }

    pub fn commitment(&self) -> anyhow::Result<CommitmentConfig> {
        let level = CommitmentLevel::from_str(&self.rpc.commitment)
            .map_err(|_| anyhow::anyhow!("unknown commitment level {}", self.rpc.commitment))?;
        Ok(CommitmentConfig { commitment: level })
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.rpc.max_retries,
            ..RetryPolicy::default()
        }
    }
}

impl TransferConfig {
    pub fn mint(&self) -> anyhow::Result<Option<Pubkey>> {
        parse_optional_pubkey(self.mint.as_deref(), "transfer.mint")
    }

    pub fn nonce_account(&self) -> anyhow::Result<Option<Pubkey>> {
        parse_optional_pubkey(self.nonce_account.as_deref(), "transfer.nonce_account")
    }
}

fn parse_optional_pubkey(value: Option<&str>, field: &str) -> anyhow::Result<Option<Pubkey>> {
    value
        .map(|s| Pubkey::from_str(s).with_context(|| format!("{} is not a valid address", field)))
        .transpose()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcConfig {
                url: "https://api.devnet.solana.com".to_string(),
                commitment: default_commitment(),
                timeout_secs: default_rpc_timeout(),
                max_retries: default_max_retries(),
            },
            wallet: WalletConfig {
                sender: KeySource {
                    keypair_path: Some("~/.config/solana/id.json".to_string()),
                    secret_env: None,
                },
                fee_payer: KeySource::default(),
            },
            transfer: TransferConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}
