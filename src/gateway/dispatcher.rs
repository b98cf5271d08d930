use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::warn;

use super::events::InboundEvent;
use crate::config::DispatchConfig;

/// Handler for inbound events.
pub type EventHandler = Arc<dyn Fn(InboundEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as an [`EventHandler`].
pub fn event_handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(InboundEvent) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(move |event| -> BoxFuture<'static, ()> { Box::pin(f(event)) })
}

/// Feeds inbound events to a fixed pool of workers through a bounded queue.
/// Enqueueing never waits, so a slow handler cannot stall frame reading.
pub struct Dispatcher {
    tx: mpsc::Sender<InboundEvent>,
    workers: Vec<JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
}

impl Dispatcher {
    pub fn new(handler: EventHandler, config: &DispatchConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..config.workers.max(1))
            .map(|_| {
                let rx = Arc::clone(&rx);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    loop {
                        let event = rx.lock().await.recv().await;
                        match event {
                            Some(event) => handler(event).await,
                            None => break,
                        }
                    }
                })
            })
            .collect();

        Self {
            tx,
            workers,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue an event. Returns `false` if it had to be dropped.
    ///
    /// The session sequence has already advanced past a dropped event, so a
    /// resume will not replay it. Size `queue_capacity` for the handler's
    /// worst-case burst.
    pub fn dispatch(&self, event: InboundEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    sequence = ?event.sequence,
                    dropped,
                    "event queue full, event dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop accepting events and wait for queued ones to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}
