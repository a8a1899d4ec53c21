use alloy::rpc::types::Log as RpcLog;
use serde::Serialize;
use serde_json::Value;

use crate::event_decoder::EventDecoder;

/// One observed contract log, decoded when the ABI knows it.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub event: Option<String>,
    pub signature: Option<String>,
    pub address: String,
    pub block_number: Option<u64>,
    pub block_hash: Option<String>,
    pub transaction_hash: Option<String>,
    pub transaction_index: Option<u64>,
    pub log_index: Option<u64>,
    pub removed: bool,
    pub return_values: Value,
    pub raw: RawLog,
}

#[derive(Debug, Clone, Serialize)]
pub struct RawLog {
    pub data: String,
    pub topics: Vec<String>,
}

impl EventRecord {
    /// Undecodable logs still produce a record so they are forwarded raw.
    pub fn from_log(decoder: &EventDecoder, log: &RpcLog) -> Self {
        let (event, signature, return_values) = match decoder.decode_log(&log.inner) {
            Ok(parsed) => (
                Some(parsed.name.clone()),
                Some(format!("{:#x}", parsed.signature)),
                parsed.return_values(),
            ),
            Err(e) => {
                tracing::warn!(
                    block = ?log.block_number,
                    log_index = ?log.log_index,
                    "Forwarding undecoded log: {}",
                    e
                );
                (None, None, Value::Object(serde_json::Map::new()))
            }
        };

        Self {
            event,
            signature,
            address: log.address().to_checksum(None),
            block_number: log.block_number,
            block_hash: log.block_hash.map(|h| format!("{:#x}", h)),
            transaction_hash: log.transaction_hash.map(|h| format!("{:#x}", h)),
            transaction_index: log.transaction_index,
            log_index: log.log_index,
            removed: log.removed,
            return_values,
            raw: RawLog {
                data: format!("0x{}", hex::encode(&log.data().data)),
                topics: log.topics().iter().map(|t| format!("{:#x}", t)).collect(),
            },
        }
    }

    pub fn event_name(&self) -> &str {
        self.event.as_deref().unwrap_or("<unknown>")
    }
}
