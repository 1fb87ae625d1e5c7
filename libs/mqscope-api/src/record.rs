use std::fmt;

use serde::{Deserialize, Serialize};

/// Store-wide message identifier. Monotonically increasing in receipt order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn level(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }

    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

/// Optional request/response metadata carried by MQTT 5 publishes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_data: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_properties: Vec<(String, String)>,
}

/// A decoded inbound message, as handed over by the connection layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retained: bool,
    pub qos: QoS,
    /// Receipt time. `None` = stamp on ingest.
    pub ts_ms: Option<i64>,
    pub properties: Option<MessageProperties>,
}

impl IncomingMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retained: false,
            qos: QoS::AtMostOnce,
            ts_ms: None,
            properties: None,
        }
    }

    pub fn retained(mut self, retained: bool) -> Self {
        self.retained = retained;
        self
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn at(mut self, ts_ms: i64) -> Self {
        self.ts_ms = Some(ts_ms);
        self
    }

    pub fn with_properties(mut self, properties: MessageProperties) -> Self {
        self.properties = Some(properties);
        self
    }
}

/// A stored message. Immutable once constructed.
///
/// Oversized placeholders keep `payload` empty, `oversized = true` and the
/// original length in `payload_size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub topic: String,
    pub payload: Vec<u8>,
    /// Declared payload length in bytes (equal to `payload.len()` unless oversized).
    pub payload_size: u64,
    pub retained: bool,
    pub qos: QoS,
    /// Receipt timestamp in milliseconds (Unix epoch).
    pub ts_ms: i64,
    pub oversized: bool,
    pub properties: Option<MessageProperties>,
}

impl MessageRecord {
    pub fn from_incoming(id: MessageId, msg: IncomingMessage) -> Self {
        Self {
            id,
            payload_size: msg.payload.len() as u64,
            ts_ms: msg.ts_ms.unwrap_or_else(now_ms),
            topic: msg.topic,
            payload: msg.payload,
            retained: msg.retained,
            qos: msg.qos,
            oversized: false,
            properties: msg.properties,
        }
    }

    /// Placeholder standing in for a message whose payload exceeded the
    /// topic's whole byte budget.
    pub fn oversized_placeholder(&self) -> Self {
        Self {
            id: self.id,
            topic: self.topic.clone(),
            payload: Vec::new(),
            payload_size: self.payload_size,
            retained: self.retained,
            qos: self.qos,
            ts_ms: self.ts_ms,
            oversized: true,
            properties: None,
        }
    }

    /// Bytes this record is charged against its buffer's budget.
    pub fn stored_size(&self) -> u64 {
        self.payload.len() as u64
    }
}

impl Serialize for MessageRecord {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("MessageRecord", 9)?;
        s.serialize_field("id", &self.id)?;
        s.serialize_field("topic", &self.topic)?;
        // Text payloads go out as strings, everything else as a byte array.
        match std::str::from_utf8(&self.payload) {
            Ok(text) => s.serialize_field("payload", text)?,
            Err(_) => s.serialize_field("payload", &self.payload)?,
        }
        s.serialize_field("payload_size", &self.payload_size)?;
        s.serialize_field("retained", &self.retained)?;
        s.serialize_field("qos", &self.qos.level())?;
        s.serialize_field("ts_ms", &self.ts_ms)?;
        s.serialize_field("oversized", &self.oversized)?;
        s.serialize_field("properties", &self.properties)?;
        s.end()
    }
}

/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
