//! Configuration management for the sponsor relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relayer: RelayerConfig,
    pub ledger: LedgerConfig,
    pub wallet: WalletConfig,
    #[serde(default)]
    pub store: StoreConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    /// Minimum relay fee percentage a request must offer
    pub fee_percent: u64,
    /// Markup applied on top of the network gas price
    pub gas_price_markup_percent: u64,
    /// Re-query the ledger nonce on every allocation instead of caching it
    #[serde(default)]
    pub dev_mode: bool,
    #[serde(default = "default_confirmation_blocks")]
    pub confirmation_blocks: u64,
    #[serde(default = "default_resend_interval_secs")]
    pub resend_interval_secs: u64,
    /// Gas price multiplier for resends, in percent (120 = x1.2)
    #[serde(default = "default_gas_price_bump_percent")]
    pub gas_price_bump_percent: u64,
    /// Gas added on top of the request gas limit to cover the hub's own accounting
    #[serde(default = "default_hub_overhead_gas")]
    pub hub_overhead_gas: u64,
    /// Largest request gas limit the relay will sponsor
    #[serde(default = "default_max_gas_limit")]
    pub max_gas_limit: u64,
    /// Largest request gas price the relay will pay, in wei
    #[serde(default = "default_max_gas_price")]
    pub max_gas_price: u64,
    pub poll_interval_ms: u64,
    pub gas_price_refresh_secs: u64,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    pub health_check_interval_secs: u64,
}

fn default_confirmation_blocks() -> u64 {
    12
}

fn default_resend_interval_secs() -> u64 {
    5 * 60
}

fn default_gas_price_bump_percent() -> u64 {
    120
}

fn default_hub_overhead_gas() -> u64 {
    100_000
}

fn default_max_gas_limit() -> u64 {
    8_000_000
}

fn default_max_gas_price() -> u64 {
    // 10_000 gwei
    10_000_000_000_000
}

fn default_rpc_timeout_ms() -> u64 {
    30_000
}

impl RelayerConfig {
    pub fn resend_interval(&self) -> Duration {
        Duration::from_secs(self.resend_interval_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            fee_percent: 10,
            gas_price_markup_percent: 10,
            dev_mode: false,
            confirmation_blocks: default_confirmation_blocks(),
            resend_interval_secs: default_resend_interval_secs(),
            gas_price_bump_percent: default_gas_price_bump_percent(),
            hub_overhead_gas: default_hub_overhead_gas(),
            max_gas_limit: default_max_gas_limit(),
            max_gas_price: default_max_gas_price(),
            poll_interval_ms: 5_000,
            gas_price_refresh_secs: 60,
            rpc_timeout_ms: default_rpc_timeout_ms(),
            health_check_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub chain_id: u64,
    /// RPC endpoints, tried in order on failure
    pub rpc_urls: Vec<String>,
    pub relay_hub_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Name of the environment variable holding the relay's private key
    pub private_key_env: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    pub database: Option<DatabaseConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("SPONSOR_RELAYER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse settings from a TOML document, substituting `${VAR}` references first
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config_str = substitute_env_vars(raw);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.ledger.rpc_urls.is_empty() {
            anyhow::bail!("Ledger has no RPC URLs configured");
        }
        if self.ledger.relay_hub_address.is_empty() {
            anyhow::bail!("Ledger has no relay hub address configured");
        }
        if self.relayer.gas_price_bump_percent <= 100 {
            anyhow::bail!(
                "gas_price_bump_percent must exceed 100, got {}",
                self.relayer.gas_price_bump_percent
            );
        }
        if self.relayer.max_gas_limit == 0 || self.relayer.max_gas_price == 0 {
            anyhow::bail!("max_gas_limit and max_gas_price must be positive");
        }
        if self.relayer.confirmation_blocks == 0 {
            anyhow::bail!("confirmation_blocks must be at least 1");
        }
        if self.store.backend == StoreBackend::Postgres && self.store.database.is_none() {
            anyhow::bail!("Postgres store selected but no [store.database] section given");
        }
        if self.relayer.dev_mode {
            tracing::warn!("Dev mode enabled - nonce cache bypassed on every relay request");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
    }

    let mut result = input.to_string();
    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
