//! Frame handling for the relay protocol: no handshake, no heartbeat,
//! every text frame is one JSON event.

use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tracing::warn;

#[derive(Debug, PartialEq)]
pub enum RelayFrame {
    Event(Value),
    /// Empty frame or close frame: the server ended the session.
    Closed,
    Skip,
}

pub fn classify(message: &Message) -> RelayFrame {
    match message {
        Message::Text(text) if text.is_empty() => RelayFrame::Closed,
        Message::Binary(bytes) if bytes.is_empty() => RelayFrame::Closed,
        Message::Text(text) => decode(serde_json::from_str(text.as_str())),
        Message::Binary(bytes) => decode(serde_json::from_slice(bytes)),
        Message::Close(_) => RelayFrame::Closed,
        _ => RelayFrame::Skip,
    }
}

fn decode(result: serde_json::Result<Value>) -> RelayFrame {
    match result {
        Ok(value) => RelayFrame::Event(value),
        Err(e) => {
            warn!(error = %e, "relay frame is not JSON, ignored");
            RelayFrame::Skip
        }
    }
}
