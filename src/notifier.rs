use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Result, WatcherError};
use crate::types::EventRecord;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest text `sendMessage` accepts, in characters.
pub const MESSAGE_CHAR_LIMIT: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Linear backoff: attempt N waits `base_delay * N`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    description: Option<String>,
    result: Option<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub status: u16,
    pub message_id: Option<i64>,
}

/// Message text for one event: the contract address followed by the pretty-printed record.
pub fn render_message(contract_address: &str, record: &EventRecord) -> Result<String> {
    let dump = serde_json::to_string_pretty(record)?;
    Ok(format!("New event on contract {}:\n{}", contract_address, dump))
}

/// Telegram Bot API `sendMessage` client bound to one chat.
pub struct TelegramNotifier {
    client: reqwest::Client,
    send_url: String,
    chat_id: String,
    contract_address: String,
}

impl TelegramNotifier {
    pub fn new(api_url: &str, bot_token: &str, chat_id: &str, contract_address: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(WatcherError::http)?;

        Ok(Self {
            client,
            send_url: format!("{}/bot{}/sendMessage", api_url.trim_end_matches('/'), bot_token),
            chat_id: chat_id.to_string(),
            contract_address: contract_address.to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.telegram_api_url,
            &config.telegram_bot_token,
            &config.telegram_chat_id,
            &config.contract_address,
        )
    }

    /// One POST to `sendMessage`. Non-2xx and `ok: false` answers are errors.
    pub async fn send(&self, text: &str) -> Result<DeliveryReceipt> {
        let response = self
            .client
            .post(&self.send_url)
            .json(&SendMessageRequest { chat_id: &self.chat_id, text })
            .send()
            .await
            .map_err(WatcherError::http)?;

        let status = response.status();
        let body = response.text().await.map_err(WatcherError::http)?;
        let parsed: Option<TelegramResponse> = serde_json::from_str(&body).ok();

        match parsed {
            Some(reply) if status.is_success() && reply.ok => Ok(DeliveryReceipt {
                status: status.as_u16(),
                message_id: reply.result.map(|m| m.message_id),
            }),
            Some(reply) => Err(WatcherError::TelegramRejected {
                status: status.as_u16(),
                description: reply.description.unwrap_or_else(|| "no description".to_string()),
            }),
            None if status.is_success() => Ok(DeliveryReceipt { status: status.as_u16(), message_id: None }),
            None => Err(WatcherError::TelegramRejected {
                status: status.as_u16(),
                description: status.canonical_reason().unwrap_or("unexpected response").to_string(),
            }),
        }
    }

    /// Render and deliver one record, retrying transient failures.
    ///
    /// Never propagates: exhausted or permanent failures are dead-lettered to the log.
    pub async fn deliver(&self, record: &EventRecord, policy: RetryPolicy) -> Option<DeliveryReceipt> {
        let text = match render_message(&self.contract_address, record) {
            Ok(text) => text,
            Err(e) => {
                dead_letter(record, 0, None, &e);
                return None;
            }
        };
        let length = text.chars().count();
        debug!(event = record.event_name(), length, "Rendered message:\n{}", text);
        if length > MESSAGE_CHAR_LIMIT {
            warn!(
                event = record.event_name(),
                length,
                "Message is over Telegram's {} character limit and will likely be rejected",
                MESSAGE_CHAR_LIMIT
            );
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send(&text).await {
                Ok(receipt) => {
                    info!(
                        event = record.event_name(),
                        block = ?record.block_number,
                        status = receipt.status,
                        message_id = ?receipt.message_id,
                        attempt,
                        "Message sent to Telegram"
                    );
                    return Some(receipt);
                }
                Err(e) if e.is_transient() && attempt <= policy.max_retries => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        event = record.event_name(),
                        attempt,
                        "Telegram delivery failed: {}, retrying in {:?}",
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    dead_letter(record, attempt, Some(length), &e);
                    return None;
                }
            }
        }
    }
}

fn dead_letter(record: &EventRecord, attempts: u32, length: Option<usize>, err: &WatcherError) {
    error!(
        event = record.event_name(),
        block = ?record.block_number,
        tx = ?record.transaction_hash,
        log_index = ?record.log_index,
        attempts,
        length = ?length,
        "Dropping notification: {}",
        err
    );
}

/// Bounded hand-off between the log subscription and Telegram delivery.
#[derive(Clone)]
pub struct DeliveryQueue {
    tx: mpsc::Sender<EventRecord>,
}

impl DeliveryQueue {
    /// Start the worker. Each dequeued record gets its own delivery task, so a slow
    /// or failing send never holds up the next one.
    pub fn spawn(notifier: Arc<TelegramNotifier>, policy: RetryPolicy, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<EventRecord>(capacity);

        let worker = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let notifier = Arc::clone(&notifier);
                tokio::spawn(async move {
                    notifier.deliver(&record, policy).await;
                });
            }
            info!("Delivery queue closed");
        });

        (Self { tx }, worker)
    }

    /// Waits while the queue is full.
    pub async fn enqueue(&self, record: EventRecord) -> Result<()> {
        self.tx.send(record).await.map_err(|_| WatcherError::QueueClosed)
    }
}
