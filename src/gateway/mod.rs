pub mod dispatcher;
pub mod events;
pub mod heartbeat;
pub mod relay;
pub mod session;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::config::{Config, DispatchConfig, HeartbeatConfig, StreamProtocol};
use crate::error::{Error, Result};
use crate::transport::HttpTransport;
use dispatcher::{Dispatcher, EventHandler};
use events::{signal, GatewayPayload, HelloData, InboundEvent};
use relay::RelayFrame;
use session::SessionState;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsReader = SplitStream<WsStream>;
type WsWriter = SplitSink<WsStream, Message>;

const OUTBOUND_CAPACITY: usize = 64;
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivePhase {
    Normal,
    /// Resume frame sent, waiting for the server to acknowledge it.
    AwaitingResume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    ResolvingGateway,
    Connecting,
    Live(LivePhase),
    Closed,
    /// Terminal. Reached only through an explicit close.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Requested,
    HeartbeatTimeout,
    SessionInvalidated,
    SocketError,
    Shutdown,
}

/// Close handle for one websocket connection. The first `close` wins and
/// every waiter sees its reason.
#[derive(Debug)]
pub struct Link {
    state: watch::Sender<Option<CloseReason>>,
}

impl Default for Link {
    fn default() -> Self {
        Self::new()
    }
}

impl Link {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self { state }
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().is_none()
    }

    /// Returns `false` if the link was already closed.
    pub fn close(&self, reason: CloseReason) -> bool {
        self.state.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    pub async fn closed(&self) -> CloseReason {
        let mut rx = self.state.subscribe();
        let reason = rx.wait_for(Option::is_some).await.map(|state| *state);
        match reason {
            Ok(Some(reason)) => reason,
            _ => CloseReason::Requested,
        }
    }
}

/// What the connection loop should do after a signal frame was applied to
/// the session.
#[derive(Debug, PartialEq)]
pub enum FrameAction {
    Dispatch(InboundEvent),
    /// Handshake accepted. Carries the resume frame to send when the
    /// session has a sequence to resume from.
    Hello { resume: Option<GatewayPayload> },
    Pong,
    ResumeAck,
    Invalidated,
    Ignore,
}

/// Apply one inbound frame to the session. Any `sn` present is adopted
/// before the frame is interpreted.
pub fn apply_frame(session: &SessionState, payload: GatewayPayload) -> Result<FrameAction> {
    if let Some(sequence) = payload.sequence {
        session.observe_sequence(sequence);
    }

    match payload.signal {
        signal::EVENT => Ok(FrameAction::Dispatch(InboundEvent {
            sequence: payload.sequence,
            data: payload.data.unwrap_or(Value::Null),
        })),
        signal::HELLO => {
            let hello: HelloData = serde_json::from_value(payload.data.unwrap_or(Value::Null))?;
            if hello.code != 0 {
                return Err(Error::Gateway(format!(
                    "hello rejected with code {}",
                    hello.code
                )));
            }
            session.set_session_id(hello.session_id);

            let last_sequence = session.last_sequence();
            let resume = (last_sequence != 0).then(|| GatewayPayload::resume(last_sequence));
            Ok(FrameAction::Hello { resume })
        }
        signal::PONG => {
            session.acknowledge_pong();
            Ok(FrameAction::Pong)
        }
        signal::INVALID_SESSION => {
            session.invalidate();
            Ok(FrameAction::Invalidated)
        }
        signal::RESUME_ACK => Ok(FrameAction::ResumeAck),
        _ => Ok(FrameAction::Ignore),
    }
}

/// Owns the streaming connection for one bot: resolves the gateway,
/// connects, keeps the link alive, and reconnects after a fixed delay
/// until [`Gateway::close`] is called.
pub struct Gateway {
    appid: String,
    protocol: StreamProtocol,
    transport: HttpTransport,
    heartbeat: HeartbeatConfig,
    dispatch: DispatchConfig,
    reconnect_delay: Duration,
    session: Arc<SessionState>,
    shutdown: watch::Sender<bool>,
    state: watch::Sender<ConnectionState>,
    link: ArcSwapOption<Link>,
    attempts: AtomicU64,
    running: AtomicBool,
}

impl Gateway {
    pub fn new(config: &Config, transport: HttpTransport) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            appid: config.appid.clone(),
            protocol: config.protocol.clone(),
            transport,
            heartbeat: config.heartbeat.clone(),
            dispatch: config.dispatch.clone(),
            reconnect_delay: config.reconnect_delay,
            session: Arc::new(SessionState::new()),
            shutdown,
            state,
            link: ArcSwapOption::empty(),
            attempts: AtomicU64::new(0),
            running: AtomicBool::new(false),
        }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Number of connection attempts started so far.
    pub fn connection_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stop reconnecting and close the live connection, if any. Idempotent.
    pub fn close(&self) {
        let first = !self.shutdown.send_replace(true);
        if first {
            info!(appid = %self.appid, "closing gateway");
        }
        self.close_connection(CloseReason::Shutdown);
        self.session.set_alive(false);
        self.set_state(ConnectionState::Stopped);
    }

    /// Drop the live connection without stopping the reconnect loop.
    pub fn close_connection(&self, reason: CloseReason) -> bool {
        match self.link.load_full() {
            Some(link) => link.close(reason),
            None => false,
        }
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next || *current == ConnectionState::Stopped {
                return false;
            }
            trace!(from = ?*current, to = ?next, "connection state");
            *current = next;
            true
        });
    }

    /// Connection loop. Returns once [`Gateway::close`] has been called and
    /// queued events have been handled. A second call while a loop is
    /// running returns immediately.
    pub async fn run(&self, handler: EventHandler) {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!(appid = %self.appid, "connection loop already running");
            return;
        }

        let dispatcher = Dispatcher::new(handler, &self.dispatch);
        let mut shutdown = self.shutdown.subscribe();

        while !*shutdown.borrow() {
            let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
            match self.connect_once(&dispatcher, &mut shutdown).await {
                Ok(()) => info!(appid = %self.appid, attempt, "connection closed"),
                Err(e) => warn!(appid = %self.appid, attempt, error = %e, "connection lost"),
            }

            if *shutdown.borrow() {
                break;
            }
            self.set_state(ConnectionState::Closed);
            info!(
                appid = %self.appid,
                delay = ?self.reconnect_delay,
                "reconnecting after delay"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }

        self.set_state(ConnectionState::Stopped);
        let dropped = dispatcher.dropped();
        dispatcher.shutdown().await;
        info!(appid = %self.appid, dropped, "gateway stopped");
        self.running.store(false, Ordering::Release);
    }

    async fn connect_once(
        &self,
        dispatcher: &Dispatcher,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let ws = tokio::select! {
            opened = self.open_socket() => opened?,
            _ = shutdown.wait_for(|stop| *stop) => return Ok(()),
        };
        let (writer, mut reader) = ws.split();

        let link = Arc::new(Link::new());
        self.link.store(Some(Arc::clone(&link)));
        self.session.set_alive(true);
        self.set_state(ConnectionState::Live(LivePhase::Normal));
        info!(appid = %self.appid, "connected");

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let mut writer_handle = spawn_writer(writer, outbound_rx, Arc::clone(&link));

        let result = match &self.protocol {
            StreamProtocol::Signal => {
                self.read_signal_frames(&mut reader, &outbound_tx, &link, dispatcher, shutdown)
                    .await
            }
            StreamProtocol::Relay { .. } => {
                self.read_relay_frames(&mut reader, &link, dispatcher, shutdown)
                    .await
            }
        };

        link.close(CloseReason::Requested);
        self.session.set_alive(false);
        self.link.store(None);

        drop(outbound_tx);
        tokio::select! {
            _ = &mut writer_handle => {}
            _ = tokio::time::sleep(WRITER_FLUSH_TIMEOUT) => writer_handle.abort(),
        }

        result
    }

    /// Resolve the URL and complete the websocket handshake. Each step is
    /// bounded by the transport timeout.
    async fn open_socket(&self) -> Result<WsStream> {
        let url = match &self.protocol {
            StreamProtocol::Signal => self.resolve_gateway_url().await?,
            StreamProtocol::Relay { url } => url.clone(),
        };

        self.set_state(ConnectionState::Connecting);
        info!(appid = %self.appid, "connecting");
        let request = self.request(&url)?;
        let (ws, _) = tokio::time::timeout(self.transport.timeout(), connect_async(request))
            .await
            .map_err(|_| Error::Gateway("websocket handshake timed out".to_string()))??;
        Ok(ws)
    }

    /// The cached URL is reused until the session is invalidated.
    async fn resolve_gateway_url(&self) -> Result<String> {
        self.set_state(ConnectionState::ResolvingGateway);
        if let Some(url) = self.session.gateway_url() {
            return Ok(url);
        }

        debug!(appid = %self.appid, "requesting gateway url");
        let response = self
            .transport
            .get("/gateway/index", &[("compress", "0")])
            .await?;
        let url = response
            .as_ref()
            .and_then(|body| body.pointer("/data/url"))
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| Error::Gateway("gateway index returned no url".to_string()))?;

        self.session.set_gateway_url(url);
        Ok(url.to_string())
    }

    fn request(&self, url: &str) -> Result<Request> {
        let mut request = url.into_client_request()?;
        if matches!(self.protocol, StreamProtocol::Relay { .. }) {
            let value = HeaderValue::from_str(self.transport.authorization())
                .map_err(|e| Error::Config(format!("invalid authorization header: {e}")))?;
            request.headers_mut().insert("Authorization", value);
        }
        Ok(request)
    }

    async fn read_signal_frames(
        &self,
        reader: &mut WsReader,
        outbound: &mpsc::Sender<GatewayPayload>,
        link: &Arc<Link>,
        dispatcher: &Dispatcher,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let mut heartbeat_task: Option<JoinHandle<()>> = None;

        let result = loop {
            let message = tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break Ok(()),
                reason = link.closed() => break close_result(reason),
                message = reader.next() => message,
            };

            let text = match message {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(frame))) => {
                    info!(appid = %self.appid, ?frame, "server closed connection");
                    break Err(Error::ConnectionClosed);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => break Err(e.into()),
                None => break Err(Error::ConnectionClosed),
            };

            let payload = match GatewayPayload::decode(text.as_str()) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "undecodable frame ignored");
                    continue;
                }
            };
            trace!(signal = payload.signal, sequence = ?payload.sequence, "frame received");

            match apply_frame(&self.session, payload) {
                Ok(FrameAction::Dispatch(event)) => {
                    dispatcher.dispatch(event);
                }
                Ok(FrameAction::Hello { resume }) => {
                    if let Some(frame) = resume {
                        info!(appid = %self.appid, sequence = ?frame.sequence, "resuming session");
                        self.set_state(ConnectionState::Live(LivePhase::AwaitingResume));
                        if outbound.send(frame).await.is_err() {
                            break Err(Error::ConnectionClosed);
                        }
                    }
                    if heartbeat_task.is_none() {
                        heartbeat_task = Some(tokio::spawn(heartbeat::run_heartbeat(
                            self.heartbeat.clone(),
                            Arc::clone(&self.session),
                            Arc::clone(link),
                            outbound.clone(),
                        )));
                    }
                }
                Ok(FrameAction::Pong) => trace!("pong received"),
                Ok(FrameAction::ResumeAck) => {
                    info!(appid = %self.appid, "session resumed");
                    self.set_state(ConnectionState::Live(LivePhase::Normal));
                }
                Ok(FrameAction::Invalidated) => {
                    warn!(appid = %self.appid, "session invalidated, gateway will be re-resolved");
                    link.close(CloseReason::SessionInvalidated);
                    break Ok(());
                }
                Ok(FrameAction::Ignore) => {}
                Err(e) => break Err(e),
            }
        };

        if let Some(handle) = heartbeat_task {
            handle.abort();
        }
        result
    }

    async fn read_relay_frames(
        &self,
        reader: &mut WsReader,
        link: &Arc<Link>,
        dispatcher: &Dispatcher,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            let message = tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => return Ok(()),
                reason = link.closed() => return close_result(reason),
                message = reader.next() => message,
            };

            let message = match message {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(Error::ConnectionClosed),
            };

            match relay::classify(&message) {
                RelayFrame::Event(data) => {
                    dispatcher.dispatch(InboundEvent {
                        sequence: None,
                        data,
                    });
                }
                RelayFrame::Closed => {
                    warn!(appid = %self.appid, "server closed the relay connection");
                    return Ok(());
                }
                RelayFrame::Skip => {}
            }
        }
    }
}

fn close_result(reason: CloseReason) -> Result<()> {
    match reason {
        CloseReason::HeartbeatTimeout => Err(Error::HeartbeatTimeout),
        CloseReason::SocketError => Err(Error::ConnectionClosed),
        _ => Ok(()),
    }
}

fn spawn_writer(
    mut writer: WsWriter,
    mut outbound: mpsc::Receiver<GatewayPayload>,
    link: Arc<Link>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(payload) = outbound.recv().await {
            let text = match payload.encode() {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode frame");
                    continue;
                }
            };
            if let Err(e) = writer.send(Message::Text(text.into())).await {
                debug!(error = %e, "websocket send failed");
                link.close(CloseReason::SocketError);
                break;
            }
            trace!(signal = payload.signal, "frame sent");
        }
        let _ = writer.close().await;
    })
}
