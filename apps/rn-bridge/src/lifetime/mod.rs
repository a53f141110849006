//! Keeps one logical connection to the running app alive across packager
//! reconnects, and maps the app's lifecycle messages onto sandbox
//! lifetimes.

mod slot;

pub use slot::LifetimeSlot;

use crate::bootstrap::{BootstrapPreparer, PackagerBootstrap};
use crate::config::AttachConfig;
use crate::error::{AttachError, SandboxError};
use crate::packager::{HttpPackagerProbe, PackagerProbe};
use crate::sandbox::{AppSender, SandboxSettings, SandboxWorkerFactory, WorkerFactory};
use crate::scripts::{AppScriptSource, ScriptFetcher};
use crate::telemetry::LogLimiter;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use packager_protocol::{
    ANOTHER_DEBUGGER_CONNECTED, AppMessage, DISCONNECTED, PREPARE_JS_RUNTIME, Reply,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};

const SOCKET_OPENED: &str = "onSocketOpened";
const SOCKET_CLOSED: &str = "onSocketClose";
const RECONNECT_FAILED: &str = "onReconnectFailed";

/// First-attempt failures are always reported; retry failures share one
/// line per log window, since retries come every few hundred milliseconds.
fn should_report_connect_failure(limiter: &mut LogLimiter, retry_attempt: bool) -> bool {
    !retry_attempt || limiter.allow(RECONNECT_FAILED)
}

#[derive(Debug)]
pub enum LifecycleEvent {
    /// A new lifetime finished loading and the app got its reply.
    Connected {
        inspector_port: u16,
        pid: Option<u32>,
    },
    /// The packager socket closed.
    Disconnected,
    /// A failure the manager cannot retry its way out of.
    Error(AttachError),
}

/// The manager's pluggable edges.
#[derive(Clone)]
pub struct Collaborators {
    pub probe: Arc<dyn PackagerProbe>,
    pub bootstrap: Arc<dyn BootstrapPreparer>,
    pub workers: Arc<dyn WorkerFactory>,
}

impl Collaborators {
    /// HTTP probe, packager-backed bootstrap, node sandboxes.
    pub fn from_config(config: &AttachConfig) -> Self {
        let fetcher = ScriptFetcher::new(config);
        let settings = SandboxSettings::from_config(config, fetcher.debugger_worker_path());
        let scripts: Arc<dyn AppScriptSource> = Arc::new(fetcher.clone());
        Self {
            probe: Arc::new(HttpPackagerProbe::new(&config.timings)),
            bootstrap: Arc::new(PackagerBootstrap::new(fetcher, config.project_root.clone())),
            workers: Arc::new(SandboxWorkerFactory::new(settings, scripts)),
        }
    }
}

pub struct LifetimeManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: AttachConfig,
    collaborators: Collaborators,
    events: mpsc::UnboundedSender<LifecycleEvent>,
    outbox: AppSender,
    state: Mutex<State>,
    limiter: Mutex<LogLimiter>,
}

struct State {
    stopped: bool,
    socket_generation: u64,
    socket: Option<SocketHandle>,
    lifetime: LifetimeSlot,
    relay: Option<JoinHandle<()>>,
    outbox_rx: Option<mpsc::UnboundedReceiver<Value>>,
    reconnect: Option<JoinHandle<()>>,
}

struct SocketHandle {
    generation: u64,
    outbound: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
}

impl LifetimeManager {
    pub fn new(
        config: AttachConfig,
        collaborators: Collaborators,
    ) -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let limiter = LogLimiter::new(config.timings.log_window);
        let inner = Inner {
            config,
            collaborators,
            events,
            outbox,
            state: Mutex::new(State {
                stopped: false,
                socket_generation: 0,
                socket: None,
                lifetime: LifetimeSlot::default(),
                relay: None,
                outbox_rx: Some(outbox_rx),
                reconnect: None,
            }),
            limiter: Mutex::new(limiter),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            events_rx,
        )
    }

    pub fn with_defaults(config: AttachConfig) -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let collaborators = Collaborators::from_config(&config);
        Self::new(config, collaborators)
    }

    pub fn config(&self) -> &AttachConfig {
        &self.inner.config
    }

    /// Probes the packager, prepares the worker script (skipped when
    /// `retry_attempt`) and opens the debugger-proxy socket. Resolves once
    /// the socket failed or the grace period passed without a failure.
    pub async fn start(&self, retry_attempt: bool) -> Result<(), AttachError> {
        Arc::clone(&self.inner).start_boxed(retry_attempt).await
    }

    /// Closes the socket and stops the current lifetime. Nothing reconnects
    /// afterwards. Idempotent.
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.state.lock().stopped
    }

    pub fn has_lifetime(&self) -> bool {
        self.inner.state.lock().lifetime.current().is_some()
    }
}

impl Drop for LifetimeManager {
    fn drop(&mut self) {
        self.inner.stop();
    }
}

impl Inner {
    fn start_boxed(self: Arc<Self>, retry_attempt: bool) -> BoxFuture<'static, Result<(), AttachError>> {
        async move { self.start_attempt(retry_attempt).await }.boxed()
    }

    async fn start_attempt(self: &Arc<Self>, retry_attempt: bool) -> Result<(), AttachError> {
        if self.state.lock().stopped {
            debug!(target: "rn_bridge::proxy", "manager stopped, not connecting");
            return Ok(());
        }
        self.ensure_relay();

        self.collaborators
            .probe
            .ensure_reachable(&self.config.endpoint)
            .await?;
        if !retry_attempt {
            let script = self.collaborators.bootstrap.prepare().await?;
            debug!(target: "rn_bridge::proxy", script = %script.display(), "debugger worker ready");
        }
        self.connect_socket(retry_attempt).await
    }

    fn ensure_relay(self: &Arc<Self>) {
        let mut state = self.state.lock();
        let Some(mut outbox_rx) = state.outbox_rx.take() else {
            return;
        };
        let inner = Arc::downgrade(self);
        state.relay = Some(tokio::spawn(async move {
            while let Some(frame) = outbox_rx.recv().await {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.send_to_packager(&frame);
            }
        }));
    }

    async fn connect_socket(self: &Arc<Self>, retry_attempt: bool) -> Result<(), AttachError> {
        let url = self.config.endpoint.proxy_url(&self.config.client_name);
        let (failed_tx, failed_rx) = oneshot::channel();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state.lock();
            if state.stopped {
                return Ok(());
            }
            state.socket_generation += 1;
            let generation = state.socket_generation;
            if let Some(previous) = state.socket.take() {
                previous.task.abort();
            }
            let task = tokio::spawn(Arc::clone(self).drive_socket(
                generation,
                url.clone(),
                retry_attempt,
                outbound_rx,
                failed_tx,
            ));
            state.socket = Some(SocketHandle {
                generation,
                outbound,
                task,
            });
        }
        debug!(target: "rn_bridge::proxy", url = %url, "connecting to debugger-proxy");

        tokio::select! {
            failure = failed_rx => match failure {
                Ok(err) => Err(err),
                Err(_) => Ok(()),
            },
            _ = tokio::time::sleep(self.config.timings.connect_grace) => Ok(()),
        }
    }

    async fn drive_socket(
        self: Arc<Self>,
        generation: u64,
        url: String,
        retry_attempt: bool,
        mut outbound_rx: mpsc::UnboundedReceiver<Message>,
        failed: oneshot::Sender<AttachError>,
    ) {
        let mut failed = Some(failed);
        let stream = match connect_async(url.as_str()).await {
            Ok((stream, _)) => stream,
            Err(err) => {
                let report = should_report_connect_failure(&mut self.limiter.lock(), retry_attempt);
                if !report {
                    debug!(target: "rn_bridge::proxy", url = %url, error = %err, "debugger-proxy connection failed");
                } else if retry_attempt {
                    error!(
                        target: "rn_bridge::proxy",
                        url = %url,
                        error = %err,
                        "Reconnection to the proxy (Packager) failed. Please check the output window for Packager errors, if any. \
                         If failure persists, please restart the React Native debugger."
                    );
                } else {
                    warn!(target: "rn_bridge::proxy", url = %url, error = %err, "debugger-proxy connection failed");
                }
                self.report_failure(&mut failed, AttachError::Socket(err));
                self.on_socket_closed(generation, false, None, &mut failed);
                return;
            }
        };
        if self.limiter.lock().allow(SOCKET_OPENED) {
            info!(target: "rn_bridge::proxy", url = %url, "Connected to the Proxy (Packager) for the React Native application");
        }

        let (mut sink, mut source) = stream.split();
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(err) = sink.send(message).await {
                    warn!(target: "rn_bridge::proxy", error = %err, "failed to send to debugger-proxy");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let mut close_reason = None;
        while let Some(frame) = source.next().await {
            match frame {
                Ok(Message::Text(text)) => self.handle_app_message(&text),
                Ok(Message::Close(frame)) => {
                    close_reason = frame.map(|frame| frame.reason.into_owned());
                    break;
                }
                Ok(Message::Binary(bytes)) => {
                    debug!(target: "rn_bridge::proxy", len = bytes.len(), "ignoring binary frame");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(target: "rn_bridge::proxy", error = %err, "debugger-proxy socket error");
                    break;
                }
            }
        }
        writer.abort();
        self.on_socket_closed(generation, true, close_reason, &mut failed);
    }

    /// Hands `err` to the `start` call still waiting on this socket, or
    /// reports it out of band once that call has returned.
    fn report_failure(&self, failed: &mut Option<oneshot::Sender<AttachError>>, err: AttachError) {
        let err = match failed.take() {
            Some(tx) => match tx.send(err) {
                Ok(()) => return,
                Err(err) => err,
            },
            None => err,
        };
        if err.is_user_actionable() {
            error!(target: "rn_bridge::proxy", error = %err, "attach failed");
            self.emit(LifecycleEvent::Error(err));
        } else {
            debug!(target: "rn_bridge::proxy", error = %err, "socket failure after start returned");
        }
    }

    fn on_socket_closed(
        self: &Arc<Self>,
        generation: u64,
        was_open: bool,
        reason: Option<String>,
        failed: &mut Option<oneshot::Sender<AttachError>>,
    ) {
        {
            let mut state = self.state.lock();
            if state.stopped || state.socket_generation != generation {
                return;
            }
            if state
                .socket
                .as_ref()
                .is_some_and(|socket| socket.generation == generation)
            {
                state.socket = None;
            }
        }
        if was_open {
            self.emit(LifecycleEvent::Disconnected);
        }

        if reason.as_deref() == Some(ANOTHER_DEBUGGER_CONNECTED) {
            self.report_failure(failed, AttachError::AnotherDebuggerConnected);
            return;
        }

        if self.limiter.lock().allow(SOCKET_CLOSED) {
            info!(
                target: "rn_bridge::proxy",
                reason = reason.as_deref().unwrap_or_default(),
                "Disconnected from the Proxy (Packager) to the React Native application. Retrying reconnection soon..."
            );
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let delay = self.config.timings.reconnect_delay;
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = Arc::clone(&inner).start_boxed(true).await {
                inner.on_retry_failed(err);
            }
        });
        let mut state = self.state.lock();
        if state.stopped {
            handle.abort();
            return;
        }
        // The previous handle is either finished or is the task calling us.
        state.reconnect = Some(handle);
    }

    fn on_retry_failed(&self, err: AttachError) {
        match err {
            AttachError::Socket(err) => {
                debug!(target: "rn_bridge::proxy", error = %err, "reconnection attempt failed, retrying");
            }
            err if err.is_user_actionable() => {
                error!(target: "rn_bridge::proxy", error = %err, "reconnection failed");
                self.emit(LifecycleEvent::Error(err));
            }
            err => {
                error!(target: "rn_bridge::proxy", error = %err, "reconnection failed");
            }
        }
    }

    fn handle_app_message(self: &Arc<Self>, text: &str) {
        let message: AppMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(err) => {
                error!(
                    target: "rn_bridge::proxy",
                    error = %err,
                    payload = text,
                    "Failed to parse message from the React Native application"
                );
                return;
            }
        };

        match message.method() {
            Some(PREPARE_JS_RUNTIME) => self.prepare_runtime(message),
            Some(DISCONNECTED) => {
                if self.state.lock().lifetime.kill() {
                    info!(target: "rn_bridge::proxy", "app disconnected, lifetime stopped");
                }
            }
            Some(method) => {
                let worker = self.state.lock().lifetime.current();
                match worker {
                    Some(worker) => {
                        trace!(target: "rn_bridge::proxy", method, "forwarding to sandbox");
                        worker.post_message(message);
                    }
                    None => {
                        debug!(target: "rn_bridge::proxy", method, "no lifetime, dropping app message");
                    }
                }
            }
            None => {
                debug!(target: "rn_bridge::proxy", payload = text, "ignoring message without method");
            }
        }
    }

    fn prepare_runtime(self: &Arc<Self>, request: AppMessage) {
        let (generation, worker) = {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            let workers = Arc::clone(&self.collaborators.workers);
            let outbox = self.outbox.clone();
            state.lifetime.replace_with(|| workers.create(outbox))
        };
        info!(target: "rn_bridge::proxy", generation, "preparing JS runtime");

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            match worker.start().await {
                Ok(started) => {
                    inner.send_to_packager(&Reply::to(request.id.as_ref()));
                    info!(
                        target: "rn_bridge::proxy",
                        generation,
                        inspector_port = started.inspector_port,
                        "JS runtime ready"
                    );
                    inner.emit(LifecycleEvent::Connected {
                        inspector_port: started.inspector_port,
                        pid: started.pid,
                    });
                }
                Err(SandboxError::Stopped) => {
                    debug!(target: "rn_bridge::proxy", generation, "lifetime stopped before it was ready");
                }
                Err(err) => {
                    error!(target: "rn_bridge::proxy", generation, error = %err, "failed to start the JS runtime");
                    let still_current = inner.state.lock().lifetime.is_current(generation);
                    if still_current {
                        inner.emit(LifecycleEvent::Error(AttachError::Sandbox(err)));
                    }
                }
            }
        });
    }

    fn send_to_packager<T: Serialize>(&self, payload: &T) {
        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(err) => {
                error!(target: "rn_bridge::proxy", error = %err, "Failed to stringify message for the packager");
                return;
            }
        };
        let state = self.state.lock();
        let Some(socket) = state.socket.as_ref() else {
            warn!(target: "rn_bridge::proxy", "no packager connection, dropping outgoing message");
            return;
        };
        if socket.outbound.send(Message::Text(text)).is_err() {
            warn!(target: "rn_bridge::proxy", "packager socket closing, dropping outgoing message");
        }
    }

    fn emit(&self, event: LifecycleEvent) {
        if self.events.send(event).is_err() {
            trace!(target: "rn_bridge::proxy", "no lifecycle listener");
        }
    }

    fn stop(&self) {
        let (socket, relay, reconnect) = {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.lifetime.kill();
            (state.socket.take(), state.relay.take(), state.reconnect.take())
        };
        if let Some(socket) = socket {
            let _ = socket.outbound.send(Message::Close(None));
            socket.task.abort();
        }
        if let Some(relay) = relay {
            relay.abort();
        }
        if let Some(reconnect) = reconnect {
            reconnect.abort();
        }
        info!(target: "rn_bridge::proxy", "lifetime manager stopped");
    }
}
