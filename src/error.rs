use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Platform-reported failure, carrying the platform's own fields.
    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("cannot build message: {0}")]
    Build(String),

    #[error("heartbeat timed out")]
    HeartbeatTimeout,

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Socket or connection-level failure. The reconnect loop absorbs these.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::WebSocket(_) | Error::ConnectionClosed
        )
    }

    pub fn remote(code: i64, message: impl Into<String>) -> Self {
        Error::Remote {
            code,
            message: message.into(),
        }
    }
}
