use std::collections::HashMap;

use alloy::json_abi::{Event, EventParam, JsonAbi};
use alloy::primitives::{Bytes, Log, B256};
use alloy_dyn_abi::{DynSolType, DynSolValue};
use serde_json::{Map, Value};

use crate::error::{Result, WatcherError};

#[derive(Debug, Clone)]
pub struct ParsedEventParam {
    pub name: String,
    pub param_type: String,
    pub value: DynSolValue,
    pub indexed: bool,
}

#[derive(Debug, Clone)]
pub struct ParsedEvent {
    pub name: String,
    pub signature: B256,
    pub params: Vec<ParsedEventParam>,
}

/// Decodes raw logs of one contract into named events.
pub struct EventDecoder {
    events: HashMap<B256, Event>,
}

impl EventDecoder {
    /// Index the non-anonymous events of `abi` by selector.
    pub fn new(abi: &JsonAbi) -> Self {
        let events = abi
            .events()
            .filter(|event| !event.anonymous)
            .map(|event| (event.selector(), event.clone()))
            .collect();

        Self { events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Decode a log entry into a ParsedEvent
    pub fn decode_log(&self, log: &Log) -> Result<ParsedEvent> {
        let event_signature = log
            .topics()
            .first()
            .ok_or_else(|| WatcherError::Decode("log has no topics".to_string()))?;

        let event = self.events.get(event_signature).ok_or_else(|| {
            WatcherError::Decode(format!("event signature not found in ABI: {:#x}", event_signature))
        })?;

        decode_log_with_event(log, event)
    }
}

fn decode_log_with_event(log: &Log, event: &Event) -> Result<ParsedEvent> {
    let topics = log.topics();
    let mut topic_values = Vec::new();
    // Skip the first topic (event signature)
    let mut topic_index = 1;

    let indexed_params: Vec<&EventParam> = event.inputs.iter().filter(|p| p.indexed).collect();
    let data_params: Vec<&EventParam> = event.inputs.iter().filter(|p| !p.indexed).collect();

    for param in &indexed_params {
        let topic = topics.get(topic_index).ok_or_else(|| {
            WatcherError::Decode(format!("not enough topics for indexed parameter '{}'", param.name))
        })?;
        topic_values.push(decode_indexed_param(param, *topic)?);
        topic_index += 1;
    }

    let mut topic_values = topic_values.into_iter();
    let mut data_values = decode_data_params(&data_params, &log.data.data)?.into_iter();

    // Re-interleave in declaration order
    let mut params = Vec::with_capacity(event.inputs.len());
    for param in &event.inputs {
        let value = if param.indexed { topic_values.next() } else { data_values.next() };
        let value = value.ok_or_else(|| {
            WatcherError::Decode(format!("missing decoded value for parameter '{}'", param.name))
        })?;
        params.push(ParsedEventParam {
            name: param.name.clone(),
            param_type: param.ty.clone(),
            value,
            indexed: param.indexed,
        });
    }

    Ok(ParsedEvent {
        name: event.name.clone(),
        signature: event.selector(),
        params,
    })
}

fn decode_indexed_param(param: &EventParam, topic: B256) -> Result<DynSolValue> {
    let sol_type = resolve_type(param)?;

    // Dynamic types are stored as keccak256 hashes, the original value can't be recovered
    match &sol_type {
        DynSolType::String | DynSolType::Bytes | DynSolType::Array(_) | DynSolType::Tuple(_) => {
            Ok(DynSolValue::FixedBytes(topic, 32))
        }
        DynSolType::FixedArray(..) => Ok(DynSolValue::FixedBytes(topic, 32)),
        _ => sol_type
            .abi_decode(topic.as_slice())
            .map_err(|e| WatcherError::Decode(format!("failed to decode indexed parameter '{}': {}", param.name, e))),
    }
}

fn decode_data_params(params: &[&EventParam], data: &Bytes) -> Result<Vec<DynSolValue>> {
    if params.is_empty() {
        return Ok(Vec::new());
    }

    let param_types = params.iter().map(|p| resolve_type(p)).collect::<Result<Vec<_>>>()?;

    let decoded = DynSolType::Tuple(param_types)
        .abi_decode_params(data)
        .map_err(|e| WatcherError::Decode(format!("failed to decode log data: {}", e)))?;

    match decoded {
        DynSolValue::Tuple(values) => Ok(values),
        _ => Err(WatcherError::Decode("expected tuple from log data decoding".to_string())),
    }
}

// `ty` is just "tuple" for struct params, the components carry the real shape.
fn resolve_type(param: &EventParam) -> Result<DynSolType> {
    let ty = if param.ty.starts_with("tuple") {
        let components = param
            .components
            .iter()
            .map(|c| c.selector_type().into_owned())
            .collect::<Vec<_>>()
            .join(",");
        format!("({}){}", components, &param.ty["tuple".len()..])
    } else {
        param.ty.clone()
    };

    DynSolType::parse(&ty)
        .map_err(|e| WatcherError::Decode(format!("unsupported type '{}' for parameter '{}': {}", param.ty, param.name, e)))
}

impl ParsedEvent {
    /// Parameters as a JSON object keyed by name, or by position when the ABI leaves them unnamed.
    pub fn return_values(&self) -> Value {
        let mut values = Map::new();
        for (position, param) in self.params.iter().enumerate() {
            let key = if param.name.is_empty() { position.to_string() } else { param.name.clone() };
            values.insert(key, value_to_json(&param.value));
        }
        Value::Object(values)
    }
}

/// Convert DynSolValue to JSON Value for serialization
pub fn value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::FixedBytes(word, size) => Value::String(format!("0x{}", hex::encode(&word[..*size]))),
        DynSolValue::Bytes(bytes) => Value::String(format!("0x{}", hex::encode(bytes))),
        DynSolValue::Address(addr) => Value::String(addr.to_checksum(None)),
        DynSolValue::Function(func) => Value::String(format!("0x{}", hex::encode(func.as_slice()))),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(value_to_json).collect())
        }
        #[allow(unreachable_patterns)]
        _ => Value::String(format!("{:?}", value)),
    }
}
