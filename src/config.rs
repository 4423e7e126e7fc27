//! Configuration management for txpilot
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub submission: SubmissionConfig,
    #[serde(default)]
    pub confirmation: ConfirmationConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    pub contracts: ContractsConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl EndpointConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_retry_delay_secs")]
    pub rpc_retry_delay_secs: u64,
    #[serde(default = "default_true")]
    pub reconnect_on_network_error: bool,
    #[serde(default = "default_gas_bump_percent")]
    pub gas_bump_percent: u64,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            rpc_retry_delay_secs: default_retry_delay_secs(),
            reconnect_on_network_error: true,
            gas_bump_percent: default_gas_bump_percent(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmationConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_confirmation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: default_confirmation_timeout_secs(),
            max_rounds: default_max_rounds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            private_key_env: default_private_key_env(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractsConfig {
    pub router: String,
    pub token: String,
    pub wrapped_native: String,
    pub checkin: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Native balance below which a cycle is skipped
    #[serde(default = "default_min_native_balance")]
    pub min_native_balance: f64,
    #[serde(default = "default_swap_min")]
    pub swap_min: f64,
    #[serde(default = "default_swap_max")]
    pub swap_max: f64,
    /// Token kept back when swapping the token balance back to native
    #[serde(default = "default_token_reserve")]
    pub token_reserve: f64,
    #[serde(default = "default_cycle_sleep_min_secs")]
    pub cycle_sleep_min_secs: u64,
    #[serde(default = "default_cycle_sleep_max_secs")]
    pub cycle_sleep_max_secs: u64,
    #[serde(default = "default_first_checkin_gap_secs")]
    pub first_checkin_gap_secs: (u64, u64),
    #[serde(default = "default_checkin_gap_secs")]
    pub checkin_gap_secs: (u64, u64),
    #[serde(default = "default_checkin_timeout_secs")]
    pub checkin_timeout_secs: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            min_native_balance: default_min_native_balance(),
            swap_min: default_swap_min(),
            swap_max: default_swap_max(),
            token_reserve: default_token_reserve(),
            cycle_sleep_min_secs: default_cycle_sleep_min_secs(),
            cycle_sleep_max_secs: default_cycle_sleep_max_secs(),
            first_checkin_gap_secs: default_first_checkin_gap_secs(),
            checkin_gap_secs: default_checkin_gap_secs(),
            checkin_timeout_secs: default_checkin_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    20
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_secs() -> u64 {
    5
}
fn default_true() -> bool {
    true
}
fn default_gas_bump_percent() -> u64 {
    20
}
fn default_poll_interval_secs() -> u64 {
    5
}
fn default_confirmation_timeout_secs() -> u64 {
    300
}
fn default_max_rounds() -> u32 {
    2
}
fn default_private_key_env() -> String {
    "TXPILOT_PRIVATE_KEY".to_string()
}
fn default_min_native_balance() -> f64 {
    1.0
}
fn default_swap_min() -> f64 {
    0.2
}
fn default_swap_max() -> f64 {
    0.99
}
fn default_token_reserve() -> f64 {
    0.1
}
fn default_cycle_sleep_min_secs() -> u64 {
    220
}
fn default_cycle_sleep_max_secs() -> u64 {
    450
}
fn default_first_checkin_gap_secs() -> (u64, u64) {
    (14_400, 18_000)
}
fn default_checkin_gap_secs() -> (u64, u64) {
    (64_800, 79_200)
}
fn default_checkin_timeout_secs() -> u64 {
    180
}
fn default_metrics_port() -> u16 {
    9100
}

impl Settings {
    /// Load settings from the file named by `TXPILOT_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("TXPILOT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    fn from_toml(raw: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(raw);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.endpoint.rpc_url.trim().is_empty() {
            anyhow::bail!("endpoint.rpc_url must not be empty");
        }
        if self.endpoint.request_timeout_secs == 0 {
            anyhow::bail!("endpoint.request_timeout_secs must be positive");
        }
        if self.submission.max_attempts == 0 {
            anyhow::bail!("submission.max_attempts must be at least 1");
        }
        if self.submission.gas_bump_percent == 0 {
            anyhow::bail!("submission.gas_bump_percent must be positive");
        }
        if self.confirmation.max_rounds == 0 {
            anyhow::bail!("confirmation.max_rounds must be at least 1");
        }
        if self.confirmation.poll_interval_secs == 0 {
            anyhow::bail!("confirmation.poll_interval_secs must be positive");
        }
        if self.bot.swap_min > self.bot.swap_max {
            anyhow::bail!("bot.swap_min must not exceed bot.swap_max");
        }
        if self.bot.cycle_sleep_min_secs > self.bot.cycle_sleep_max_secs {
            anyhow::bail!("bot.cycle_sleep_min_secs must not exceed bot.cycle_sleep_max_secs");
        }
        if self.metrics.enabled && self.metrics.port == 0 {
            tracing::warn!("Metrics enabled on port 0 - the OS will pick a port");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static pattern");
    }

    let mut result = input.to_string();
    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
