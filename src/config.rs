use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_API_BASE: &str = "https://www.kookapp.cn/api/v3";

#[derive(Debug, Clone, PartialEq)]
pub enum StreamProtocol {
    /// Resolve the gateway over REST, then speak the opcode frame protocol.
    Signal,
    /// Connect to a fixed websocket URL; every text frame is an event.
    Relay { url: String },
}

impl StreamProtocol {
    /// Scheme used when none is configured explicitly.
    pub fn default_auth_scheme(&self) -> AuthScheme {
        match self {
            StreamProtocol::Signal => AuthScheme::Bot,
            StreamProtocol::Relay { .. } => AuthScheme::Bearer,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthScheme {
    Bot,
    Bearer,
}

impl AuthScheme {
    pub fn header_value(&self, token: &str) -> String {
        match self {
            AuthScheme::Bot => format!("Bot {token}"),
            AuthScheme::Bearer => format!("Bearer {token}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub appid: String,
    pub token: String,
    pub protocol: StreamProtocol,
    pub api_base: String,
    pub auth_scheme: AuthScheme,
    pub heartbeat: HeartbeatConfig,
    pub reconnect_delay: Duration,
    /// Upper bound for one REST call or websocket handshake.
    pub request_timeout: Duration,
    pub dispatch: DispatchConfig,
}

impl Config {
    pub fn new(appid: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            appid: appid.into(),
            token: token.into(),
            protocol: StreamProtocol::Signal,
            api_base: DEFAULT_API_BASE.to_string(),
            auth_scheme: AuthScheme::Bot,
            heartbeat: HeartbeatConfig::default(),
            reconnect_delay: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            dispatch: DispatchConfig::default(),
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Switch protocol and reset the auth scheme to that protocol's default.
    pub fn with_protocol(mut self, protocol: StreamProtocol) -> Self {
        self.auth_scheme = protocol.default_auth_scheme();
        self.protocol = protocol;
        self
    }

    /// Switches to the relay protocol, which authenticates with a bearer token.
    pub fn with_relay(self, url: impl Into<String>) -> Self {
        self.with_protocol(StreamProtocol::Relay { url: url.into() })
    }

    pub fn with_auth_scheme(mut self, scheme: AuthScheme) -> Self {
        self.auth_scheme = scheme;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat = HeartbeatConfig { interval, timeout };
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_dispatch(mut self, workers: usize, queue_capacity: usize) -> Self {
        self.dispatch = DispatchConfig {
            workers,
            queue_capacity,
        };
        self
    }

    pub fn authorization(&self) -> String {
        self.auth_scheme.header_value(&self.token)
    }

    pub fn from_env() -> Result<Self> {
        let appid = required_var("CHATLINK_APPID")?;
        let token = required_var("CHATLINK_TOKEN")?;

        let mut config = Config::new(appid, token);

        match std::env::var("CHATLINK_PROTOCOL")
            .unwrap_or_else(|_| "signal".to_string())
            .to_lowercase()
            .as_str()
        {
            "relay" => {
                let url = required_var("CHATLINK_RELAY_URL").map_err(|_| {
                    Error::Config("CHATLINK_RELAY_URL is required in relay mode".to_string())
                })?;
                config = config.with_relay(url);
            }
            "signal" => {}
            other => {
                return Err(Error::Config(format!(
                    "unknown protocol '{other}', expected 'signal' or 'relay'"
                )))
            }
        }

        if let Ok(base) = std::env::var("CHATLINK_API_BASE") {
            config = config.with_api_base(base);
        }

        if let Some(scheme) = auth_scheme_from_env()? {
            config.auth_scheme = scheme;
        }

        if let Some(secs) = parse_var::<u64>("CHATLINK_HEARTBEAT_INTERVAL") {
            config.heartbeat.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>("CHATLINK_HEARTBEAT_TIMEOUT") {
            config.heartbeat.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>("CHATLINK_RECONNECT_DELAY") {
            config.reconnect_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>("CHATLINK_REQUEST_TIMEOUT").filter(|s| *s > 0) {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(workers) = parse_var::<usize>("CHATLINK_DISPATCH_WORKERS").filter(|w| *w > 0)
        {
            config.dispatch.workers = workers;
        }
        if let Some(capacity) = parse_var::<usize>("CHATLINK_DISPATCH_QUEUE").filter(|c| *c > 0) {
            config.dispatch.queue_capacity = capacity;
        }

        Ok(config)
    }
}

/// Scheme named by `CHATLINK_AUTH_SCHEME`, if it is set. Takes precedence
/// over the protocol default wherever the protocol is chosen.
pub fn auth_scheme_from_env() -> Result<Option<AuthScheme>> {
    let Ok(scheme) = std::env::var("CHATLINK_AUTH_SCHEME") else {
        return Ok(None);
    };
    match scheme.to_lowercase().as_str() {
        "bot" => Ok(Some(AuthScheme::Bot)),
        "bearer" => Ok(Some(AuthScheme::Bearer)),
        _ => Err(Error::Config(format!(
            "unknown auth scheme '{scheme}', expected 'Bot' or 'Bearer'"
        ))),
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Config(format!("{name} is required")))
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
