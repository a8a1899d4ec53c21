use std::fs;
use std::path::Path;

use alloy::json_abi::JsonAbi;
use alloy::primitives::Address;
use serde_json::Value;

use crate::error::{Result, WatcherError};
use crate::event_decoder::EventDecoder;

#[derive(Clone, Debug)]
pub struct ContractAbi {
    pub address: Address,
    pub abi: JsonAbi,
}

impl ContractAbi {
    pub fn load(address: Address, abi_path: impl AsRef<Path>) -> Result<Self> {
        let path = abi_path.as_ref();
        let json_abi_vec = fs::read(path).map_err(|source| WatcherError::AbiRead {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_json(address, &json_abi_vec).map_err(|e| match e {
            WatcherError::AbiParse { source, .. } => WatcherError::AbiParse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    pub fn from_json(address: Address, json: &[u8]) -> Result<Self> {
        let parse_err = |source: serde_json::Error| WatcherError::AbiParse { path: "<memory>".to_string(), source };

        let raw: Value = serde_json::from_slice(json).map_err(parse_err)?;
        let abi: JsonAbi = serde_json::from_value(normalize_abi(raw)).map_err(parse_err)?;

        Ok(Self { address, abi })
    }

    pub fn decoder(&self) -> EventDecoder {
        EventDecoder::new(&self.abi)
    }

    pub fn event_names(&self) -> Vec<String> {
        self.abi.events().map(|e| e.signature()).collect()
    }
}

/// Unwrap build artifacts (`{"abi": [...]}`) and add the `anonymous` flag solc omits on older outputs.
fn normalize_abi(raw: Value) -> Value {
    let mut items = match raw {
        Value::Object(mut artifact) if artifact.get("abi").is_some_and(Value::is_array) => {
            artifact.remove("abi").unwrap_or(Value::Array(Vec::new()))
        }
        other => other,
    };

    if let Value::Array(entries) = &mut items {
        for entry in entries.iter_mut() {
            if let Value::Object(item) = entry {
                if item.get("type").and_then(Value::as_str) == Some("event") && !item.contains_key("anonymous") {
                    item.insert("anonymous".to_string(), Value::Bool(false));
                }
            }
        }
    }

    items
}
