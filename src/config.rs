use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub chain: ChainConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// JSON-RPC endpoint
    pub rpc_url: String,
    /// Chain ID for the signer
    pub chain_id: u64,
    /// Fund factory contract address
    pub factory_address: String,
    /// Payment token (6-decimal ERC-20) address
    pub payment_token: String,
    /// Recipient of the deployment fee transfer
    pub payment_recipient: String,
    /// Fee in whole tokens (6 decimals applied on-chain)
    #[serde(default = "default_payment_amount")]
    pub payment_amount: u64,
    /// How long to wait for a transaction receipt
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,
}

fn default_payment_amount() -> u64 {
    50
}

fn default_confirmation_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Registration backend base URL
    pub base_url: String,
    /// API key sent as x-api-key
    pub api_key: String,
    /// Value reported as deploySource in registrations
    #[serde(default = "default_deploy_source")]
    pub deploy_source: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Sliding-window rate limit toward the backend
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

fn default_deploy_source() -> String {
    "fundry".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_requests() -> usize {
    10
}

fn default_window_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Outbound webhook URL; notifications are disabled when unset
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_notify_retries")]
    pub max_retries: u32,
    #[serde(default = "default_notify_source")]
    pub source: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            max_retries: default_notify_retries(),
            source: default_notify_source(),
        }
    }
}

fn default_notify_retries() -> u32 {
    3
}

fn default_notify_source() -> String {
    "fundry".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Pause between jobs, keeps receipts and nonces well separated
    #[serde(default = "default_job_delay")]
    pub job_delay_ms: u64,
    /// Times a failed job is re-dispatched before being dropped
    #[serde(default = "default_job_retries")]
    pub max_job_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            job_delay_ms: default_job_delay(),
            max_job_retries: default_job_retries(),
        }
    }
}

fn default_job_delay() -> u64 {
    1000
}

fn default_job_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Flat record store location
    #[serde(default = "default_store_path")]
    pub store_path: String,
    /// Most-recent records kept in memory
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    /// Non-terminal records older than this are reset for retry
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            cache_size: default_cache_size(),
            stale_after_secs: default_stale_after(),
        }
    }
}

fn default_store_path() -> String {
    "data/transactions.json".to_string()
}

fn default_cache_size() -> usize {
    100
}

fn default_stale_after() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Fallback agent name when the buyer does not supply one
    #[serde(default = "default_agent_name")]
    pub agent_name_default: String,
    /// Referral code forwarded to the backend
    #[serde(default)]
    pub referral_code: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_name_default: default_agent_name(),
            referral_code: None,
        }
    }
}

fn default_agent_name() -> String {
    "fundry-agent".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("chain.payment_amount", 50)?
            .set_default("chain.confirmation_timeout_secs", 120)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("FUNDRY_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (FUNDRY_CHAIN__RPC_URL, etc.)
            .add_source(
                Environment::with_prefix("FUNDRY")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values, reporting every problem at once
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.chain.rpc_url.trim().is_empty() {
            errors.push("chain.rpc_url must be set".to_string());
        }
        for (name, value) in [
            ("chain.factory_address", &self.chain.factory_address),
            ("chain.payment_token", &self.chain.payment_token),
            ("chain.payment_recipient", &self.chain.payment_recipient),
        ] {
            if !is_hex_address(value) {
                errors.push(format!("{name} must be a 0x-prefixed 40-hex-digit address"));
            }
        }
        if self.chain.payment_amount == 0 {
            errors.push("chain.payment_amount must be positive".to_string());
        }

        if self.backend.base_url.trim().is_empty() {
            errors.push("backend.base_url must be set".to_string());
        }
        if self.backend.api_key.trim().is_empty() {
            errors.push("backend.api_key must be set".to_string());
        }
        if self.backend.deploy_source.trim().is_empty() {
            errors.push("backend.deploy_source must not be empty".to_string());
        }
        if self.backend.max_requests == 0 {
            errors.push("backend.max_requests must be positive".to_string());
        }

        if self.tracker.cache_size == 0 {
            errors.push("tracker.cache_size must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn is_hex_address(value: &str) -> bool {
    value.len() == 42
        && value.starts_with("0x")
        && value[2..].chars().all(|c| c.is_ascii_hexdigit())
}
