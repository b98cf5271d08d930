#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chatlink::gateway::ConnectionState;
use chatlink::{event_handler, BotAdapter, Config, EventHandler, InboundEvent};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};

pub const TOKEN: &str = "secret";
const WAIT: Duration = Duration::from_secs(5);

/// A request the mock platform received.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub body: Value,
}

pub struct MockState {
    pub ws_url: String,
    requests: Mutex<Vec<Recorded>>,
    pub ws_connects: AtomicUsize,
    pub fail_gateway: AtomicBool,
    /// Gateway lookups are recorded but never answered.
    pub hang_gateway: AtomicBool,
    pub fail_upload: AtomicBool,
    /// `code` returned by send_message; non-zero makes it a platform error.
    pub send_code: AtomicI64,
    uploads: AtomicUsize,
    sockets: mpsc::UnboundedSender<ServerSocket>,
}

impl MockState {
    fn record(&self, path: &str, uri: &Uri, headers: &HeaderMap, body: Value) {
        let authorization = header(headers, "authorization");
        self.requests.lock().unwrap().push(Recorded {
            path: path.to_string(),
            query: uri.query().map(str::to_string),
            authorization,
            body,
        });
    }
}

/// In-process stand-in for the chat platform: REST endpoints plus a
/// websocket endpoint whose server side is handed to the test.
pub struct MockPlatform {
    pub base_url: String,
    pub ws_url: String,
    pub state: Arc<MockState>,
    sockets: mpsc::UnboundedReceiver<ServerSocket>,
}

impl MockPlatform {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        let ws_url = format!("ws://{addr}/ws");
        let state = Arc::new(MockState {
            ws_url: ws_url.clone(),
            requests: Mutex::new(Vec::new()),
            ws_connects: AtomicUsize::new(0),
            fail_gateway: AtomicBool::new(false),
            hang_gateway: AtomicBool::new(false),
            fail_upload: AtomicBool::new(false),
            send_code: AtomicI64::new(0),
            uploads: AtomicUsize::new(0),
            sockets: tx,
        });

        let app = Router::new()
            .route("/gateway/index", get(gateway_index))
            .route("/upload_file", post(upload_file))
            .route("/send_message", post(send_message))
            .route("/delete_message", post(delete_message))
            .route("/ws", get(ws_upgrade))
            .with_state(Arc::clone(&state));

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            ws_url,
            state,
            sockets: rx,
        }
    }

    /// Signal-protocol config pointed at this mock, with a short reconnect delay.
    pub fn config(&self) -> Config {
        Config::new("test-app", TOKEN)
            .with_api_base(&self.base_url)
            .with_reconnect_delay(Duration::from_millis(100))
    }

    pub fn relay_config(&self) -> Config {
        self.config().with_relay(self.ws_url.clone())
    }

    /// Wait for the next websocket connection.
    pub async fn accept(&mut self) -> ServerSocket {
        timeout(WAIT, self.sockets.recv())
            .await
            .expect("no websocket connection arrived")
            .expect("mock platform stopped")
    }

    pub fn requests(&self, path: &str) -> Vec<Recorded> {
        self.state
            .requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }

    pub fn gateway_calls(&self) -> usize {
        self.requests("/gateway/index").len()
    }
}

/// Server end of one client connection.
pub struct ServerSocket {
    ws: WebSocket,
    pub authorization: Option<String>,
}

impl ServerSocket {
    pub async fn send_frame(&mut self, frame: Value) {
        self.send_text(&frame.to_string()).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string().into()))
            .await
            .unwrap();
    }

    pub async fn hello(&mut self, session_id: &str) {
        self.send_frame(json!({ "s": 1, "d": { "code": 0, "session_id": session_id } }))
            .await;
    }

    pub async fn event(&mut self, sn: u64, data: Value) {
        self.send_frame(json!({ "s": 0, "d": data, "sn": sn })).await;
    }

    pub async fn recv_frame(&mut self) -> Value {
        self.try_recv_frame(WAIT)
            .await
            .expect("expected a frame from the client")
    }

    /// Next JSON text frame, or `None` if nothing arrives within `wait` or
    /// the client goes away.
    pub async fn try_recv_frame(&mut self, wait: Duration) -> Option<Value> {
        let deadline = Instant::now() + wait;
        loop {
            let next = timeout_at(deadline, self.ws.recv()).await.ok()??;
            match next {
                Ok(Message::Text(text)) => return serde_json::from_str(text.as_str()).ok(),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    /// Wait until the client closes the connection, skipping its frames.
    pub async fn wait_closed(&mut self) {
        let deadline = Instant::now() + WAIT;
        loop {
            match timeout_at(deadline, self.ws.recv()).await {
                Err(_) => panic!("client did not close the connection"),
                Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return,
                Ok(Some(Ok(_))) => continue,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.send(Message::Close(None)).await;
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn gateway_index(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Json<Value> {
    state.record("/gateway/index", &uri, &headers, Value::Null);
    if state.hang_gateway.load(Ordering::SeqCst) {
        return std::future::pending().await;
    }
    if state.fail_gateway.load(Ordering::SeqCst) {
        return Json(json!({ "code": 40100, "message": "gateway unavailable" }));
    }
    Json(json!({ "code": 0, "message": "", "data": { "url": state.ws_url } }))
}

async fn upload_file(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.record("/upload_file", &uri, &headers, body);
    if state.fail_upload.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "code": 500, "message": "storage offline" })),
        )
            .into_response();
    }
    let n = state.uploads.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({ "code": 0, "data": { "file_id": format!("file-{n}") } })).into_response()
}

async fn send_message(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.record("/send_message", &uri, &headers, body);
    let code = state.send_code.load(Ordering::SeqCst);
    if code != 0 {
        return Json(json!({ "code": code, "message": "rejected" }));
    }
    Json(json!({ "code": 0, "data": { "message_id": "m-1" } }))
}

async fn delete_message(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.record("/delete_message", &uri, &headers, body);
    Json(json!({ "code": 0 }))
}

async fn ws_upgrade(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    state.ws_connects.fetch_add(1, Ordering::SeqCst);
    let authorization = header(&headers, "authorization");
    ws.on_upgrade(move |socket| async move {
        let _ = state.sockets.send(ServerSocket {
            ws: socket,
            authorization,
        });
    })
}

/// Handler that forwards every event to the returned receiver.
pub fn collecting_handler() -> (EventHandler, mpsc::UnboundedReceiver<InboundEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = event_handler(move |event: InboundEvent| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(event);
        }
    });
    (handler, rx)
}

pub fn spawn_adapter(adapter: &BotAdapter, handler: EventHandler) -> JoinHandle<()> {
    let adapter = adapter.clone();
    tokio::spawn(async move { adapter.connect(handler).await })
}

pub async fn next_event(events: &mut mpsc::UnboundedReceiver<InboundEvent>) -> InboundEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("no event dispatched")
        .expect("handler dropped")
}

pub async fn wait_state(adapter: &BotAdapter, target: ConnectionState) {
    let mut rx = adapter.gateway().subscribe_state();
    timeout(WAIT, async {
        let _ = rx.wait_for(|state| *state == target).await;
    })
    .await
    .unwrap_or_else(|_| panic!("state never became {target:?}"));
}

pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !check() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Close the adapter and wait for its connection loop to return.
pub async fn shutdown(adapter: &BotAdapter, runner: JoinHandle<()>) {
    adapter.close();
    timeout(WAIT, runner)
        .await
        .expect("connection loop did not stop")
        .unwrap();
}
