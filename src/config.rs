use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use config::builder::DefaultState;
use config::ConfigBuilder;
use serde::Deserialize;

use crate::error::{Result, WatcherError};
use crate::notifier::RetryPolicy;

const INFURA_WS_ENDPOINT: &str = "wss://mainnet.infura.io/ws/v3";
const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";
const DEFAULT_ABI_PATH: &str = "./contractABI.json";
const DEFAULT_PORT: u16 = 3000;

/// Everything the watcher needs, loaded once before the subscription is opened.
///
/// Keys map 1:1 to upper-case environment variables (`TELEGRAM_BOT_TOKEN` -> `telegram_bot_token`).
#[derive(Deserialize, Clone)]
pub struct Config {
    pub infura_project_id: Option<String>,
    /// Full node WebSocket URL, overrides the Infura endpoint when set.
    pub ws_rpc_url: Option<String>,
    pub telegram_bot_token: String,
    pub telegram_chat_id: String,
    pub telegram_api_url: String,
    pub contract_address: String,
    pub contract_abi_path: String,
    pub port: u16,
    pub delivery_max_retries: u32,
    pub delivery_retry_delay_ms: u64,
    pub delivery_queue_capacity: usize,
    pub reconnect_initial_delay_ms: u64,
    pub reconnect_max_delay_secs: u64,
}

impl Config {
    /// Load from `.env`, an optional `config.toml` and the process environment, in increasing priority.
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenv::dotenv().ok();

        let settings = Self::with_defaults()?
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default())
            .build()?;

        Self::finish(settings)
    }

    /// Same pipeline as [`Config::load`], reading variables from `vars` instead of the process.
    pub fn from_env_map(vars: HashMap<String, String>) -> Result<Self> {
        let settings = Self::with_defaults()?
            .add_source(config::Environment::default().source(Some(vars)))
            .build()?;

        Self::finish(settings)
    }

    fn with_defaults() -> Result<ConfigBuilder<DefaultState>> {
        Ok(config::Config::builder()
            .set_default("telegram_api_url", DEFAULT_TELEGRAM_API_URL)?
            .set_default("contract_abi_path", DEFAULT_ABI_PATH)?
            .set_default("port", i64::from(DEFAULT_PORT))?
            .set_default("delivery_max_retries", 3)?
            .set_default("delivery_retry_delay_ms", 1000)?
            .set_default("delivery_queue_capacity", 1024)?
            .set_default("reconnect_initial_delay_ms", 500)?
            .set_default("reconnect_max_delay_secs", 60)?)
    }

    fn finish(settings: config::Config) -> Result<Self> {
        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject startup on absent or unusable values instead of failing at first use.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("TELEGRAM_BOT_TOKEN", &self.telegram_bot_token),
            ("TELEGRAM_CHAT_ID", &self.telegram_chat_id),
            ("CONTRACT_ADDRESS", &self.contract_address),
            ("TELEGRAM_API_URL", &self.telegram_api_url),
            ("CONTRACT_ABI_PATH", &self.contract_abi_path),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(WatcherError::InvalidConfig(format!("{} must not be empty", name)));
            }
        }

        if non_empty(&self.ws_rpc_url).is_none() && non_empty(&self.infura_project_id).is_none() {
            return Err(WatcherError::InvalidConfig(
                "either WS_RPC_URL or INFURA_PROJECT_ID must be set".to_string(),
            ));
        }

        self.contract_address()?;

        if self.port == 0 {
            return Err(WatcherError::InvalidConfig("PORT must not be 0".to_string()));
        }

        if self.delivery_queue_capacity == 0 {
            return Err(WatcherError::InvalidConfig(
                "DELIVERY_QUEUE_CAPACITY must be greater than zero".to_string(),
            ));
        }

        if Duration::from_secs(self.reconnect_max_delay_secs) < Duration::from_millis(self.reconnect_initial_delay_ms) {
            return Err(WatcherError::InvalidConfig(format!(
                "RECONNECT_MAX_DELAY_SECS ({}s) is shorter than RECONNECT_INITIAL_DELAY_MS ({}ms)",
                self.reconnect_max_delay_secs, self.reconnect_initial_delay_ms
            )));
        }

        Ok(())
    }

    pub fn ws_rpc_url(&self) -> String {
        match (non_empty(&self.ws_rpc_url), non_empty(&self.infura_project_id)) {
            (Some(url), _) => url.to_string(),
            (None, Some(project_id)) => format!("{}/{}", INFURA_WS_ENDPOINT, project_id),
            (None, None) => String::new(),
        }
    }

    pub fn contract_address(&self) -> Result<Address> {
        Address::from_str(self.contract_address.trim()).map_err(|e| WatcherError::InvalidAddress {
            address: self.contract_address.clone(),
            reason: e.to_string(),
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.delivery_max_retries,
            base_delay: Duration::from_millis(self.delivery_retry_delay_ms),
        }
    }

    /// Reconnect schedule for the log subscription. Never gives up.
    pub fn reconnect_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.reconnect_initial_delay_ms))
            .with_max_interval(Duration::from_secs(self.reconnect_max_delay_secs))
            .with_max_elapsed_time(None)
            .build()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

// Secrets stay out of logs: only whether they are set is shown.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("infura_project_id", &non_empty(&self.infura_project_id).map(|_| "<redacted>"))
            .field("ws_rpc_url", &non_empty(&self.ws_rpc_url).map(|_| "<redacted>"))
            .field("telegram_bot_token", &"<redacted>")
            .field("telegram_chat_id", &"<redacted>")
            .field("telegram_api_url", &self.telegram_api_url)
            .field("contract_address", &self.contract_address)
            .field("contract_abi_path", &self.contract_abi_path)
            .field("port", &self.port)
            .field("delivery_max_retries", &self.delivery_max_retries)
            .field("delivery_retry_delay_ms", &self.delivery_retry_delay_ms)
            .field("delivery_queue_capacity", &self.delivery_queue_capacity)
            .field("reconnect_initial_delay_ms", &self.reconnect_initial_delay_ms)
            .field("reconnect_max_delay_secs", &self.reconnect_max_delay_secs)
            .finish()
    }
}
