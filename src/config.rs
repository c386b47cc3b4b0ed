//! Automation configuration
//!
//! Loaded from the environment (dotenv honoured) or from a TOML file. The
//! signer key is only ever read from the environment.

use std::{env, path::Path, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn as_str(&self) -> &str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }

    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://node.mainnet.etherlink.com",
            Network::Testnet => "https://node.ghostnet.etherlink.com",
        }
    }

    pub fn default_explorer_api_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://explorer.etherlink.com/api/v2",
            Network::Testnet => "https://testnet.explorer.etherlink.com/api/v2",
        }
    }

    pub fn contract_address_var(&self) -> &'static str {
        match self {
            Network::Mainnet => "BETCYCLE_CONTRACT_ADDRESS",
            Network::Testnet => "BETCYCLE_TESTNET_CONTRACT_ADDRESS",
        }
    }
}

/// How the scheduler chooses the stake currency for a new bet
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CurrencyPolicy {
    Random,
    Native,
    Stable,
}

impl CurrencyPolicy {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Some(CurrencyPolicy::Random),
            "native" => Some(CurrencyPolicy::Native),
            "stable" => Some(CurrencyPolicy::Stable),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub network: Network,
    pub contract_address: Option<String>,
    /// Never serialized; environment only
    #[serde(skip)]
    pub signer_key: Option<String>,
    pub rpc_url: String,
    pub explorer_api_url: String,
    pub price_api_url: String,
    pub price_asset_id: String,
    pub price_quote: String,
    pub notification_db_path: String,
    pub notification_retention_secs: i64,
    pub cycle_interval_secs: u64,
    pub retry_interval_secs: u64,
    pub bet_window_secs: i64,
    pub expected_block_time_secs: u64,
    pub betting_cutoff_secs: i64,
    pub fee_bps: u32,
    pub sample_size_min: usize,
    pub sample_size_max: usize,
    pub native_stake_wei: u128,
    pub stable_stake_units: u128,
    pub currency_policy: CurrencyPolicy,
    pub block_fetch_concurrency: usize,
    pub http_timeout_secs: u64,
    pub api_bind_addr: String,
    pub rng_seed: Option<u64>,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        let network = Network::Mainnet;
        Self {
            network,
            contract_address: None,
            signer_key: None,
            rpc_url: network.default_rpc_url().to_string(),
            explorer_api_url: network.default_explorer_api_url().to_string(),
            price_api_url: "https://api.coingecko.com/api/v3/simple/price".to_string(),
            price_asset_id: "tezos".to_string(),
            price_quote: "usd".to_string(),
            notification_db_path: "betcycle_notifications.db".to_string(),
            notification_retention_secs: 30 * 24 * 60 * 60,
            cycle_interval_secs: 5 * 60,
            retry_interval_secs: 60,
            bet_window_secs: 5 * 60,
            expected_block_time_secs: 15,
            betting_cutoff_secs: 60,
            fee_bps: 500,
            sample_size_min: 40,
            sample_size_max: 60,
            native_stake_wei: 100_000_000_000_000_000, // 0.1 native coin
            stable_stake_units: 1_000_000,             // 1 stablecoin, 6 decimals
            currency_policy: CurrencyPolicy::Random,
            block_fetch_concurrency: 8,
            http_timeout_secs: 10,
            api_bind_addr: "0.0.0.0:3000".to_string(),
            rng_seed: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .and_then(|v| v.trim().parse::<T>().ok())
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl AutomationConfig {
    pub fn from_env() -> Result<Self> {
        let is_testnet = env::var("IS_TESTNET")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(false);
        let network = if is_testnet {
            Network::Testnet
        } else {
            Network::Mainnet
        };

        let mut config = Self {
            network,
            rpc_url: network.default_rpc_url().to_string(),
            explorer_api_url: network.default_explorer_api_url().to_string(),
            ..Self::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML; environment variables still override and supply secrets.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Endpoints left out of the file follow the file's network.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let table: toml::Table = content.parse().context("parse automation config TOML")?;
        let has_rpc = table.contains_key("rpc_url");
        let has_explorer = table.contains_key("explorer_api_url");

        let mut config: Self = toml::Value::Table(table)
            .try_into()
            .context("parse automation config TOML")?;
        if !has_rpc {
            config.rpc_url = config.network.default_rpc_url().to_string();
        }
        if !has_explorer {
            config.explorer_api_url = config.network.default_explorer_api_url().to_string();
        }
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(address) = env_string(self.network.contract_address_var()) {
            self.contract_address = Some(address);
        }
        self.signer_key = env_string("AUTOMATION_PRIVATE_KEY").or(self.signer_key.take());

        if let Some(v) = env_string("RPC_URL") {
            self.rpc_url = v;
        }
        if let Some(v) = env_string("EXPLORER_API_URL") {
            self.explorer_api_url = v;
        }
        if let Some(v) = env_string("PRICE_API_URL") {
            self.price_api_url = v;
        }
        if let Some(v) = env_string("PRICE_ASSET_ID") {
            self.price_asset_id = v;
        }
        if let Some(v) = env_string("PRICE_QUOTE") {
            self.price_quote = v;
        }
        if let Some(v) = env_string("NOTIFICATION_DB_PATH") {
            self.notification_db_path = v;
        }
        if let Some(v) = env_string("API_BIND_ADDR") {
            self.api_bind_addr = v;
        }
        if let Some(v) = env_string("CURRENCY_POLICY") {
            self.currency_policy = CurrencyPolicy::parse(&v)
                .ok_or_else(|| anyhow!("invalid CURRENCY_POLICY: {}", v))?;
        }

        self.notification_retention_secs = env_parse("NOTIFICATION_RETENTION_SECS")
            .unwrap_or(self.notification_retention_secs);
        self.cycle_interval_secs =
            env_parse("CYCLE_INTERVAL_SECS").unwrap_or(self.cycle_interval_secs);
        self.retry_interval_secs =
            env_parse("RETRY_INTERVAL_SECS").unwrap_or(self.retry_interval_secs);
        self.bet_window_secs = env_parse("BET_WINDOW_SECS").unwrap_or(self.bet_window_secs);
        self.expected_block_time_secs =
            env_parse("EXPECTED_BLOCK_TIME_SECS").unwrap_or(self.expected_block_time_secs);
        self.betting_cutoff_secs =
            env_parse("BETTING_CUTOFF_SECS").unwrap_or(self.betting_cutoff_secs);
        self.fee_bps = env_parse("FEE_BPS").unwrap_or(self.fee_bps);
        self.sample_size_min = env_parse("SAMPLE_SIZE_MIN").unwrap_or(self.sample_size_min);
        self.sample_size_max = env_parse("SAMPLE_SIZE_MAX").unwrap_or(self.sample_size_max);
        self.native_stake_wei = env_parse("NATIVE_STAKE_WEI").unwrap_or(self.native_stake_wei);
        self.stable_stake_units =
            env_parse("STABLE_STAKE_UNITS").unwrap_or(self.stable_stake_units);
        self.block_fetch_concurrency =
            env_parse("BLOCK_FETCH_CONCURRENCY").unwrap_or(self.block_fetch_concurrency);
        self.http_timeout_secs = env_parse("HTTP_TIMEOUT_SECS").unwrap_or(self.http_timeout_secs);
        if let Some(seed) = env_parse("AUTOMATION_RNG_SEED") {
            self.rng_seed = Some(seed);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_size_min == 0 || self.sample_size_min > self.sample_size_max {
            bail!(
                "invalid sample size range {}..={}",
                self.sample_size_min,
                self.sample_size_max
            );
        }
        if self.fee_bps > 10_000 {
            bail!("FEE_BPS must be at most 10000, got {}", self.fee_bps);
        }
        if self.expected_block_time_secs == 0 {
            bail!("EXPECTED_BLOCK_TIME_SECS must be positive");
        }
        if self.bet_window_secs <= 0 {
            bail!("BET_WINDOW_SECS must be positive");
        }
        if self.betting_cutoff_secs < 0 || self.betting_cutoff_secs >= self.bet_window_secs {
            bail!(
                "BETTING_CUTOFF_SECS must be within the bet window ({}s)",
                self.bet_window_secs
            );
        }
        Ok(())
    }

    /// Fail unless the ledger write credentials are present.
    pub fn require_ledger_credentials(&self) -> Result<(&str, &str)> {
        let address = self.contract_address.as_deref().ok_or_else(|| {
            anyhow!(
                "missing {} for {}",
                self.network.contract_address_var(),
                self.network.as_str()
            )
        })?;
        let key = self
            .signer_key
            .as_deref()
            .ok_or_else(|| anyhow!("missing AUTOMATION_PRIVATE_KEY"))?;
        Ok((address, key))
    }

    pub fn expected_blocks_per_window(&self) -> u64 {
        self.bet_window_secs.max(0) as u64 / self.expected_block_time_secs
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
