//! In-process stand-in for a React Native packager: plain HTTP file routes,
//! `/status`, and the `/debugger-proxy` WebSocket.
#![allow(dead_code)]

use axum::Router;
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub enum ProxyFrame {
    Text(String),
    Close(String),
}

/// One debugger-side socket accepted by the mock proxy.
pub struct ProxyConnection {
    pub query: HashMap<String, String>,
    pub to_bridge: mpsc::UnboundedSender<ProxyFrame>,
    pub from_bridge: mpsc::UnboundedReceiver<String>,
}

impl ProxyConnection {
    pub fn send(&self, text: impl Into<String>) {
        self.to_bridge
            .send(ProxyFrame::Text(text.into()))
            .expect("proxy connection gone");
    }

    pub fn close(&self, reason: impl Into<String>) {
        self.to_bridge
            .send(ProxyFrame::Close(reason.into()))
            .expect("proxy connection gone");
    }

    /// Next frame from the bridge, parsed as JSON.
    pub async fn recv_json(&mut self) -> serde_json::Value {
        let text = tokio::time::timeout(Duration::from_secs(5), self.from_bridge.recv())
            .await
            .expect("timed out waiting for bridge frame")
            .expect("bridge socket closed");
        serde_json::from_str(&text).expect("bridge sent json")
    }

    /// Asserts the bridge sends nothing for `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(text)) = tokio::time::timeout(window, self.from_bridge.recv()).await {
            panic!("unexpected frame from bridge: {text}");
        }
    }
}

#[derive(Default)]
struct PackagerState {
    connections: Mutex<Option<mpsc::UnboundedSender<ProxyConnection>>>,
    reject_with: Mutex<Option<String>>,
    files: Mutex<HashMap<String, String>>,
    hits: Mutex<Vec<String>>,
}

pub struct MockPackager {
    pub addr: SocketAddr,
    state: Arc<PackagerState>,
    pub connections: mpsc::UnboundedReceiver<ProxyConnection>,
}

impl MockPackager {
    pub async fn start() -> Self {
        let (connections_tx, connections) = mpsc::unbounded_channel();
        let state = Arc::new(PackagerState::default());
        *state.connections.lock() = Some(connections_tx);
        state.files.lock().insert(
            "/status".to_owned(),
            rn_bridge::packager::STATUS_RUNNING.to_owned(),
        );

        let app = Router::new()
            .route("/debugger-proxy", get(proxy))
            .fallback(serve_file)
            .with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock packager");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            addr,
            state,
            connections,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.addr.port())
    }

    pub fn serve(&self, path: &str, body: impl Into<String>) {
        self.state.files.lock().insert(path.to_owned(), body.into());
    }

    /// Every new socket is closed right away with `reason`.
    pub fn reject_with(&self, reason: &str) {
        *self.state.reject_with.lock() = Some(reason.to_owned());
    }

    pub fn hits(&self, path: &str) -> usize {
        self.state.hits.lock().iter().filter(|hit| *hit == path).count()
    }

    pub async fn next_connection(&mut self) -> ProxyConnection {
        tokio::time::timeout(Duration::from_secs(5), self.connections.recv())
            .await
            .expect("timed out waiting for the bridge to connect")
            .expect("mock packager stopped")
    }

    pub async fn expect_no_connection(&mut self, window: Duration) {
        if let Ok(Some(connection)) = tokio::time::timeout(window, self.connections.recv()).await {
            panic!("unexpected connection: {:?}", connection.query);
        }
    }
}

async fn serve_file(State(state): State<Arc<PackagerState>>, uri: Uri) -> Response {
    let path = uri.path().to_owned();
    state.hits.lock().push(path.clone());
    let body = state.files.lock().get(&path).cloned();
    match body {
        Some(body) => body.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn proxy(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<Arc<PackagerState>>,
) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, query, state))
}

async fn serve_socket(socket: WebSocket, query: HashMap<String, String>, state: Arc<PackagerState>) {
    let (to_bridge, mut outgoing) = mpsc::unbounded_channel();
    let (incoming, from_bridge) = mpsc::unbounded_channel();
    let registry = state.connections.lock().clone();
    if let Some(registry) = registry {
        let _ = registry.send(ProxyConnection {
            query,
            to_bridge: to_bridge.clone(),
            from_bridge,
        });
    }
    let reject = state.reject_with.lock().clone();
    if let Some(reason) = reject {
        let _ = to_bridge.send(ProxyFrame::Close(reason));
    }
    drop(to_bridge);

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            frame = outgoing.recv() => match frame {
                Some(ProxyFrame::Text(text)) => {
                    if sink.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(ProxyFrame::Close(reason)) => {
                    let _ = sink
                        .send(WsMessage::Close(Some(CloseFrame {
                            code: close_code::NORMAL,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
                None => break,
            },
            message = stream.next() => match message {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = incoming.send(text);
                }
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Polls `check` until it holds or `within` elapses.
pub async fn eventually<F>(within: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn within<T>(limit: Duration, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(limit, future)
        .await
        .expect("operation timed out")
}
