use std::time::Duration;

use alloy::{
    primitives::Address,
    providers::{Provider, ProviderBuilder, WsConnect},
    pubsub::{ConnectionHandle, PubSubConnect},
    rpc::types::{Filter, Log as RpcLog},
    transports::{TransportErrorKind, TransportResult},
};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures_util::StreamExt;
use tracing::{debug, error, info, warn};

use crate::abi::ContractAbi;
use crate::error::{Result, WatcherError};
use crate::event_decoder::EventDecoder;
use crate::notifier::DeliveryQueue;
use crate::types::EventRecord;

/// Position of a log in the canonical chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogPosition {
    pub block_number: u64,
    pub log_index: u64,
}

impl LogPosition {
    pub fn of(log: &RpcLog) -> Option<Self> {
        Some(Self {
            block_number: log.block_number?,
            log_index: log.log_index?,
        })
    }
}

/// Last log seen across sessions, so a reconnect can backfill what the dropped socket missed.
#[derive(Debug, Default, Clone)]
pub struct LogCursor {
    last: Option<LogPosition>,
}

impl LogCursor {
    pub fn last(&self) -> Option<LogPosition> {
        self.last
    }

    /// Block to start the backfill from, if anything was observed yet.
    pub fn resume_block(&self) -> Option<u64> {
        self.last.map(|p| p.block_number)
    }

    pub fn observe(&mut self, log: &RpcLog) {
        if log.removed {
            return;
        }
        if let Some(position) = LogPosition::of(log) {
            if self.last.is_none_or(|last| position > last) {
                self.last = Some(position);
            }
        }
    }

    /// Whether a backfilled log was not delivered before.
    pub fn is_unseen(&self, log: &RpcLog) -> bool {
        match (self.last, LogPosition::of(log)) {
            (Some(last), Some(position)) => position > last,
            _ => true,
        }
    }
}

/// WebSocket connector that never reconnects on its own.
///
/// The pubsub layer would otherwise resubscribe behind the same stream after a drop, hiding
/// the gap from [`EventSource`]. Here a dropped socket ends the stream, and the next session
/// backfills from the cursor.
struct SessionWs(WsConnect);

impl PubSubConnect for SessionWs {
    fn is_local(&self) -> bool {
        self.0.is_local()
    }

    async fn connect(&self) -> TransportResult<ConnectionHandle> {
        self.0.connect().await
    }

    async fn try_reconnect(&self) -> TransportResult<ConnectionHandle> {
        Err(TransportErrorKind::custom_str("WebSocket closed, session ends"))
    }
}

/// All-events log subscription for one contract, kept alive by a reconnect loop.
pub struct EventSource {
    ws_rpc_url: String,
    address: Address,
    decoder: EventDecoder,
    queue: DeliveryQueue,
    backoff: ExponentialBackoff,
    cursor: LogCursor,
}

impl EventSource {
    pub fn new(ws_rpc_url: String, contract: &ContractAbi, queue: DeliveryQueue, backoff: ExponentialBackoff) -> Self {
        Self {
            ws_rpc_url,
            address: contract.address,
            decoder: contract.decoder(),
            queue,
            backoff,
            cursor: LogCursor::default(),
        }
    }

    /// Runs until the delivery queue is gone. Subscription failures only lead to a reconnect.
    pub async fn run(mut self) -> Result<()> {
        loop {
            match self.run_session().await {
                Ok(()) => warn!("Log subscription stream for {} ended", self.address),
                Err(WatcherError::QueueClosed) => {
                    error!("Delivery queue closed, stopping log subscription");
                    return Err(WatcherError::QueueClosed);
                }
                Err(e) => error!("Error subscribing to contract events: {}", e),
            }

            let delay = self.backoff.next_backoff().unwrap_or(Duration::from_secs(60));
            info!(
                resume_block = ?self.cursor.resume_block(),
                "Reconnecting to node in {:?}",
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn run_session(&mut self) -> Result<()> {
        info!("Connecting to node WebSocket endpoint");
        let connect = WsConnect::new(self.ws_rpc_url.as_str()).with_max_retries(0);
        let provider = ProviderBuilder::new().connect_pubsub_with(SessionWs(connect)).await?;

        let filter = Filter::new().address(self.address);
        let sub = provider.subscribe_logs(&filter).await?;
        let mut sub_stream = sub.into_stream();
        info!("Subscribed to all events of contract {}", self.address);

        if let Some(from_block) = self.cursor.resume_block() {
            let logs = provider.get_logs(&filter.clone().from_block(from_block)).await?;
            let missed: Vec<RpcLog> = logs.into_iter().filter(|log| self.cursor.is_unseen(log)).collect();
            info!("Backfilling {} logs from block {}", missed.len(), from_block);
            for log in missed {
                self.forward(log).await?;
            }
        }
        // only a session that got this far counts as healthy
        self.backoff.reset();

        while let Some(log) = sub_stream.next().await {
            debug!(block = ?log.block_number, log_index = ?log.log_index, removed = log.removed, "Received log");
            self.forward(log).await?;
        }

        Ok(())
    }

    async fn forward(&mut self, log: RpcLog) -> Result<()> {
        let record = EventRecord::from_log(&self.decoder, &log);
        info!(
            event = record.event_name(),
            block = ?record.block_number,
            tx = ?record.transaction_hash,
            "Event received"
        );
        self.cursor.observe(&log);
        self.queue.enqueue(record).await
    }
}
