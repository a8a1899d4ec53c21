use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatcherError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to read contract ABI from {path}")]
    AbiRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse contract ABI from {path}")]
    AbiParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid contract address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Event decoding error: {0}")]
    Decode(String),

    #[error("RPC transport error: {0}")]
    Transport(#[from] alloy::transports::TransportError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Always built from `reqwest::Error::without_url`, the request URL carries the bot token.
    #[error("Telegram request failed: {0}")]
    Http(reqwest::Error),

    #[error("Telegram API rejected message with status {status}: {description}")]
    TelegramRejected { status: u16, description: String },

    #[error("Delivery queue closed")]
    QueueClosed,
}

impl WatcherError {
    pub fn http(err: reqwest::Error) -> Self {
        WatcherError::Http(err.without_url())
    }

    /// Whether another delivery attempt can succeed where this one failed.
    pub fn is_transient(&self) -> bool {
        match self {
            WatcherError::Http(_) => true,
            WatcherError::TelegramRejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, WatcherError>;
