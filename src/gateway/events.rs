use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Signal codes for gateway frames.
pub mod signal {
    pub const EVENT: u8 = 0;
    pub const HELLO: u8 = 1;
    pub const PING: u8 = 2;
    pub const PONG: u8 = 3;
    pub const RESUME: u8 = 4;
    pub const INVALID_SESSION: u8 = 5;
    pub const RESUME_ACK: u8 = 6;
}

/// One frame on the stream. Every field is always written, absent ones as
/// `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayPayload {
    #[serde(rename = "s")]
    pub signal: u8,
    #[serde(rename = "d", default)]
    pub data: Option<Value>,
    #[serde(rename = "sn", default)]
    pub sequence: Option<u64>,
    #[serde(default)]
    pub extra: Option<Value>,
}

impl GatewayPayload {
    pub fn new(signal: u8) -> Self {
        Self {
            signal,
            data: None,
            sequence: None,
            extra: None,
        }
    }

    pub fn ping(last_sequence: u64) -> Self {
        Self {
            sequence: Some(last_sequence),
            ..Self::new(signal::PING)
        }
    }

    pub fn resume(last_sequence: u64) -> Self {
        Self {
            sequence: Some(last_sequence),
            ..Self::new(signal::RESUME)
        }
    }

    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// `d` of a hello frame.
#[derive(Debug, Clone, Deserialize)]
pub struct HelloData {
    pub code: i64,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// An inbound event handed to the registered handler.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub sequence: Option<u64>,
    pub data: Value,
}
