use crate::core::Time;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A decoded message read from a recorded log.
///
/// The payload is an opaque shared blob; the core only inspects topic, time
/// and size metadata. Clones share the payload bytes, so handing the same
/// cached message out twice yields byte-identical content.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    /// Topic the message was published on
    pub topic: String,

    /// Name of the schema describing the payload
    pub schema_name: String,

    /// Time the message was recorded
    pub receive_time: Time,

    /// Opaque decoded payload
    pub message: Arc<[u8]>,

    /// Payload size used for cache accounting
    pub size_in_bytes: usize,
}

impl MessageEvent {
    pub fn new(topic: &str, schema_name: &str, receive_time: Time, payload: Vec<u8>) -> Self {
        let size_in_bytes = payload.len();
        Self {
            topic: topic.to_string(),
            schema_name: schema_name.to_string(),
            receive_time,
            message: payload.into(),
            size_in_bytes,
        }
    }

    /// Parse a hex payload string, tolerating spaces and a 0x prefix.
    pub fn parse_hex(hex: &str) -> anyhow::Result<Vec<u8>> {
        let hex = hex.replace(' ', "");
        let hex = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")).unwrap_or(&hex);

        if hex.len() % 2 != 0 {
            anyhow::bail!("Hex string must have even length");
        }

        (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("Failed to parse hex: {}", e))
    }
}

/// Whether a subscription wants data streamed for the current window only or
/// preloaded across the whole log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreloadType {
    #[default]
    Partial,
    Full,
}

/// What a consumer currently wants from one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribePayload {
    pub topic: String,

    /// Requested fields within the message. `None` means the whole message.
    #[serde(default)]
    pub fields: Option<Vec<String>>,

    #[serde(default)]
    pub preload_type: PreloadType,
}

impl SubscribePayload {
    pub fn topic(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            fields: None,
            preload_type: PreloadType::Partial,
        }
    }
}

/// A topic advertised by a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicInfo {
    pub name: String,
    pub schema_name: String,
}

/// Per-topic statistics gathered at initialize time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicStats {
    pub num_messages: u64,
    pub first_message_time: Option<Time>,
    pub last_message_time: Option<Time>,
}

/// Everything a source learns about a log when opening it.
///
/// Produced once by `IterableSource::initialize` and immutable thereafter.
#[derive(Debug, Clone)]
pub struct Initialization {
    pub start: Time,
    pub end: Time,
    pub topics: Vec<TopicInfo>,
    pub topic_stats: BTreeMap<String, TopicStats>,

    /// Non-fatal issues found while opening (e.g. skipped corrupt records)
    pub problems: Vec<crate::core::Problem>,
}
