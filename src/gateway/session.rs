use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Identifiers needed to resume a stream, plus liveness flags.
///
/// Owned by one gateway. The connection loop writes the URL, session id,
/// sequence and `alive`; the heartbeat monitor writes the ping token.
#[derive(Debug, Default)]
pub struct SessionState {
    gateway_url: ArcSwapOption<String>,
    session_id: ArcSwapOption<String>,
    last_sequence: AtomicU64,
    alive: AtomicBool,
    ping_counter: AtomicU64,
    /// Token of the oldest ping still waiting for a pong, 0 when none is.
    pending_pong: AtomicU64,
    connected_at: ArcSwapOption<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub gateway_url: Option<String>,
    pub session_id: Option<String>,
    pub last_sequence: u64,
    pub alive: bool,
    pub connected_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gateway_url(&self) -> Option<String> {
        self.gateway_url.load_full().map(|url| url.as_ref().clone())
    }

    pub fn set_gateway_url(&self, url: &str) {
        self.gateway_url.store(Some(Arc::new(url.to_string())));
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.load_full().map(|id| id.as_ref().clone())
    }

    pub fn set_session_id(&self, session_id: Option<String>) {
        self.session_id.store(session_id.map(Arc::new));
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::Acquire)
    }

    /// Adopt the sequence of an inbound frame. No ordering or dedup check.
    pub fn observe_sequence(&self, sequence: u64) {
        self.last_sequence.store(sequence, Ordering::Release);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Release);
        if alive {
            self.connected_at.store(Some(Arc::new(Utc::now())));
        }
    }

    /// Record an outgoing ping and return its token. While an earlier ping
    /// is unanswered it stays the pending one, so its deadline still fires.
    pub fn begin_ping(&self) -> u64 {
        let token = self.ping_counter.fetch_add(1, Ordering::AcqRel) + 1;
        let _ = self
            .pending_pong
            .compare_exchange(0, token, Ordering::AcqRel, Ordering::Acquire);
        token
    }

    pub fn acknowledge_pong(&self) {
        self.pending_pong.store(0, Ordering::Release);
    }

    /// True while the ping identified by `token` is the latest one and unanswered.
    pub fn pong_outstanding(&self, token: u64) -> bool {
        self.pending_pong.load(Ordering::Acquire) == token
    }

    /// Forget the gateway and sequence so the next attempt starts a fresh session.
    pub fn invalidate(&self) {
        self.gateway_url.store(None);
        self.last_sequence.store(0, Ordering::Release);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            gateway_url: self.gateway_url(),
            session_id: self.session_id(),
            last_sequence: self.last_sequence(),
            alive: self.is_alive(),
            connected_at: self.connected_at.load_full().map(|at| *at),
        }
    }
}
