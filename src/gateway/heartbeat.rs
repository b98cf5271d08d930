use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::events::GatewayPayload;
use super::session::SessionState;
use super::{CloseReason, Link};
use crate::config::HeartbeatConfig;

/// Ping every `interval` while the link is open. Each ping gets its own
/// pong watch; a watch that expires with its ping still unanswered closes
/// the link.
pub async fn run_heartbeat(
    config: HeartbeatConfig,
    session: Arc<SessionState>,
    link: Arc<Link>,
    outbound: mpsc::Sender<GatewayPayload>,
) {
    let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = link.closed() => return,
        }

        if !link.is_open() || !session.is_alive() {
            return;
        }

        // Token first, so a fast pong cannot arrive before it is recorded.
        let last_sequence = session.last_sequence();
        let token = session.begin_ping();
        if outbound.send(GatewayPayload::ping(last_sequence)).await.is_err() {
            return;
        }
        debug!(sequence = last_sequence, token, "heartbeat sent");

        tokio::spawn(watch_pong(
            config.timeout,
            token,
            Arc::clone(&session),
            Arc::clone(&link),
        ));
    }
}

async fn watch_pong(
    timeout: std::time::Duration,
    token: u64,
    session: Arc<SessionState>,
    link: Arc<Link>,
) {
    tokio::select! {
        _ = tokio::time::sleep(timeout) => {}
        _ = link.closed() => return,
    }

    if session.pong_outstanding(token) && link.is_open() {
        warn!(token, "no pong within {:?}, closing connection", timeout);
        link.close(CloseReason::HeartbeatTimeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::events::signal;
    use std::time::Duration;

    fn fast_config() -> HeartbeatConfig {
        HeartbeatConfig {
            interval: Duration::from_millis(50),
            timeout: Duration::from_millis(50),
        }
    }

    fn live_session(sequence: u64) -> Arc<SessionState> {
        let session = Arc::new(SessionState::new());
        session.set_alive(true);
        session.observe_sequence(sequence);
        session
    }

    #[tokio::test]
    async fn test_sends_ping_with_last_sequence() {
        let (tx, mut rx) = mpsc::channel(8);
        let session = live_session(7);
        let link = Arc::new(Link::new());

        let handle = tokio::spawn(run_heartbeat(
            fast_config(),
            Arc::clone(&session),
            Arc::clone(&link),
            tx,
        ));

        let ping = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ping.signal, signal::PING);
        assert_eq!(ping.sequence, Some(7));

        link.close(CloseReason::Requested);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_pong_closes_link() {
        let (tx, _rx) = mpsc::channel(8);
        let session = live_session(1);
        let link = Arc::new(Link::new());

        tokio::spawn(run_heartbeat(
            fast_config(),
            Arc::clone(&session),
            Arc::clone(&link),
            tx,
        ));

        let reason = tokio::time::timeout(Duration::from_secs(2), link.closed())
            .await
            .unwrap();
        assert_eq!(reason, CloseReason::HeartbeatTimeout);
    }

    #[tokio::test]
    async fn test_pong_keeps_link_open() {
        let (tx, mut rx) = mpsc::channel(8);
        let session = live_session(1);
        let link = Arc::new(Link::new());
        let config = HeartbeatConfig {
            interval: Duration::from_millis(50),
            timeout: Duration::from_millis(250),
        };

        tokio::spawn(run_heartbeat(
            config,
            Arc::clone(&session),
            Arc::clone(&link),
            tx,
        ));

        for _ in 0..4 {
            tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            session.acknowledge_pong();
        }

        assert!(link.is_open());
        link.close(CloseReason::Requested);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_ping_per_interval() {
        let (tx, mut rx) = mpsc::channel(8);
        let session = live_session(3);
        let link = Arc::new(Link::new());
        let config = HeartbeatConfig {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(30),
        };

        tokio::spawn(run_heartbeat(
            config,
            Arc::clone(&session),
            Arc::clone(&link),
            tx,
        ));

        let pings = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let responder = {
            let pings = Arc::clone(&pings);
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                while rx.recv().await.is_some() {
                    pings.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    session.acknowledge_pong();
                }
            })
        };

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(pings.load(std::sync::atomic::Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(76)).await;
        assert_eq!(pings.load(std::sync::atomic::Ordering::SeqCst), 3);
        assert!(link.is_open());

        link.close(CloseReason::Requested);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_exits_when_link_closes() {
        let (tx, _rx) = mpsc::channel(8);
        let session = live_session(0);
        let link = Arc::new(Link::new());
        let config = HeartbeatConfig {
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(60),
        };

        let handle = tokio::spawn(run_heartbeat(config, session, Arc::clone(&link), tx));
        link.close(CloseReason::Shutdown);

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(result.is_ok(), "heartbeat should exit once the link closes");
    }
}
