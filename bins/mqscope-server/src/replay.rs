//! JSON-lines message source.
//!
//! One decoded message per line:
//! `{"topic":"a/b","payload":"21.5","retained":true,"qos":1,"ts_ms":1700000000000}`.
//! `payload` is either a string or an array of bytes; everything but
//! `topic` is optional.

use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;

use mqscope_api::{IncomingMessage, MessageProperties, QoS};
use mqscope_engine::MessageStore;

#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    Text(String),
    Bytes(Vec<u8>),
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Text(String::new())
    }
}

#[derive(Deserialize)]
struct ReplayLine {
    topic: String,
    #[serde(default)]
    payload: Payload,
    #[serde(default)]
    retained: bool,
    #[serde(default)]
    qos: u8,
    ts_ms: Option<i64>,
    #[serde(default)]
    properties: Option<MessageProperties>,
}

pub fn parse_line(line: &str) -> Result<IncomingMessage, String> {
    let raw: ReplayLine = serde_json::from_str(line).map_err(|e| e.to_string())?;
    let qos = QoS::from_level(raw.qos).ok_or_else(|| format!("invalid qos {}", raw.qos))?;
    let payload = match raw.payload {
        Payload::Text(s) => s.into_bytes(),
        Payload::Bytes(b) => b,
    };

    let mut msg = IncomingMessage::new(raw.topic, payload)
        .retained(raw.retained)
        .with_qos(qos);
    if let Some(ts) = raw.ts_ms {
        msg = msg.at(ts);
    }
    if let Some(props) = raw.properties {
        msg = msg.with_properties(props);
    }
    Ok(msg)
}

/// Feed every line of `reader` into `store` until EOF or cancellation.
/// Returns the number of messages ingested.
pub async fn replay<R>(reader: R, store: &MessageStore, cancel: &CancellationToken) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut line_no = 0u64;
    let mut ingested = 0u64;

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line) {
            Ok(msg) => {
                store.ingest(msg);
                ingested += 1;
            }
            Err(e) => tracing::warn!(line = line_no, error = %e, "skipping malformed input line"),
        }
    }

    Ok(ingested)
}
