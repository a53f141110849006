//! Runs the patched debugger worker in an isolated `node` process.
//!
//! Each [`SandboxWorker`] owns one child process for one app lifetime. The
//! worker's `postMessage` frames come back over stdout and are pushed into
//! the outbox the lifetime manager relays to the packager. App messages go
//! the other way as JSON lines on stdin, held back until the worker has
//! loaded.

pub mod io;

use crate::config::AttachConfig;
use crate::error::SandboxError;
use crate::scripts::AppScriptSource;
use async_trait::async_trait;
use packager_protocol::AppMessage;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::BufReader;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where a worker pushes the messages its sandbox posts.
pub type AppSender = mpsc::UnboundedSender<Value>;

const INSPECTOR_HOST: &str = "127.0.0.1";
const INSPECTOR_PORT_RANGE: std::ops::Range<u16> = 3000..43000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStarted {
    pub inspector_port: u16,
    pub pid: Option<u32>,
}

/// One debuggee lifetime as seen by the lifetime manager.
#[async_trait]
pub trait DebuggeeWorker: Send + Sync {
    /// Spawns the sandbox and resolves once the worker script has loaded.
    async fn start(&self) -> Result<WorkerStarted, SandboxError>;
    /// Idempotent. Messages posted afterwards are dropped.
    fn stop(&self);
    /// Queues `message` for the sandbox. Safe to call before `start`.
    fn post_message(&self, message: AppMessage);
}

pub trait WorkerFactory: Send + Sync {
    fn create(&self, outbox: AppSender) -> Arc<dyn DebuggeeWorker>;
}

#[derive(Debug, Clone)]
pub struct SandboxSettings {
    pub node_binary: String,
    pub script_path: PathBuf,
    pub inspector_port: Option<u16>,
    pub load_timeout: Duration,
}

impl SandboxSettings {
    pub fn from_config(config: &AttachConfig, script_path: PathBuf) -> Self {
        Self {
            node_binary: config.node_binary.clone(),
            script_path,
            inspector_port: config.inspector_port,
            load_timeout: config.timings.worker_load_timeout,
        }
    }

    fn command(&self, inspector_port: u16) -> Command {
        let mut command = Command::new(&self.node_binary);
        command
            .arg(format!("--inspect={INSPECTOR_HOST}:{inspector_port}"))
            .arg(&self.script_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

pub fn random_inspector_port() -> u16 {
    rand::thread_rng().gen_range(INSPECTOR_PORT_RANGE)
}

struct SandboxProcess {
    child: Child,
    tasks: Vec<JoinHandle<()>>,
}

pub struct SandboxWorker {
    settings: Arc<SandboxSettings>,
    scripts: Arc<dyn AppScriptSource>,
    outbox: AppSender,
    inbox_tx: mpsc::UnboundedSender<AppMessage>,
    inbox_rx: Mutex<Option<mpsc::UnboundedReceiver<AppMessage>>>,
    process: Mutex<Option<SandboxProcess>>,
    stopped: AtomicBool,
}

impl SandboxWorker {
    pub fn new(
        settings: Arc<SandboxSettings>,
        scripts: Arc<dyn AppScriptSource>,
        outbox: AppSender,
    ) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            settings,
            scripts,
            outbox,
            inbox_tx,
            inbox_rx: Mutex::new(Some(inbox_rx)),
            process: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.process.lock().is_some()
    }

    fn spawn_process(&self) -> Result<(WorkerStarted, watch::Receiver<bool>), SandboxError> {
        let inbox = self
            .inbox_rx
            .lock()
            .take()
            .ok_or(SandboxError::AlreadyStarted)?;
        let inspector_port = self
            .settings
            .inspector_port
            .unwrap_or_else(random_inspector_port);

        let mut child =
            self.settings
                .command(inspector_port)
                .spawn()
                .map_err(|source| SandboxError::Spawn {
                    binary: self.settings.node_binary.clone(),
                    source,
                })?;
        let pid = child.id();
        let stdin = child.stdin.take().ok_or(SandboxError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(SandboxError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(SandboxError::MissingPipe("stderr"))?;

        let (loaded_tx, loaded_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(io::pump_stdout(
                BufReader::new(stdout),
                self.outbox.clone(),
                loaded_tx,
            )),
            tokio::spawn(io::forward_console(BufReader::new(stderr), "stderr")),
            tokio::spawn(io::pump_inbox(
                inbox,
                stdin,
                loaded_rx.clone(),
                Arc::clone(&self.scripts),
            )),
        ];

        let mut process = SandboxProcess { child, tasks };
        let mut slot = self.process.lock();
        if self.stopped.load(Ordering::SeqCst) {
            kill(&mut process);
            return Err(SandboxError::Stopped);
        }
        *slot = Some(process);
        drop(slot);

        info!(
            target: "rn_bridge::sandbox",
            pid = pid.unwrap_or_default(),
            inspector_port,
            script = %self.settings.script_path.display(),
            "sandbox process spawned"
        );
        Ok((WorkerStarted { inspector_port, pid }, loaded_rx))
    }
}

fn kill(process: &mut SandboxProcess) {
    if let Err(err) = process.child.start_kill() {
        debug!(target: "rn_bridge::sandbox", error = %err, "sandbox process already gone");
    }
    for task in process.tasks.drain(..) {
        task.abort();
    }
}

#[async_trait]
impl DebuggeeWorker for SandboxWorker {
    async fn start(&self) -> Result<WorkerStarted, SandboxError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SandboxError::Stopped);
        }
        let (started, mut loaded) = self.spawn_process()?;

        let outcome = tokio::time::timeout(self.settings.load_timeout, async {
            loaded.wait_for(|ready| *ready).await.is_ok()
        })
        .await;
        match outcome {
            Ok(true) => {
                debug!(target: "rn_bridge::sandbox", pid = started.pid.unwrap_or_default(), "sandbox ready");
                Ok(started)
            }
            Ok(false) => {
                let stopped = self.stopped.load(Ordering::SeqCst);
                self.stop();
                Err(if stopped {
                    SandboxError::Stopped
                } else {
                    SandboxError::ExitedBeforeLoad
                })
            }
            Err(_) => {
                warn!(
                    target: "rn_bridge::sandbox",
                    timeout_secs = self.settings.load_timeout.as_secs(),
                    "debugger worker never reported loaded"
                );
                self.stop();
                Err(SandboxError::LoadTimeout(self.settings.load_timeout))
            }
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.inbox_rx.lock().take();
        if let Some(mut process) = self.process.lock().take() {
            let pid = process.child.id();
            kill(&mut process);
            info!(target: "rn_bridge::sandbox", pid = pid.unwrap_or_default(), "sandbox process stopped");
        }
    }

    fn post_message(&self, message: AppMessage) {
        if self.inbox_tx.send(message).is_err() {
            debug!(target: "rn_bridge::sandbox", "sandbox stopped, dropping app message");
        }
    }
}

impl Drop for SandboxWorker {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.get_mut().take() {
            kill(&mut process);
        }
    }
}

/// Builds node-backed workers that all run the same patched script.
pub struct SandboxWorkerFactory {
    settings: Arc<SandboxSettings>,
    scripts: Arc<dyn AppScriptSource>,
}

impl SandboxWorkerFactory {
    pub fn new(settings: SandboxSettings, scripts: Arc<dyn AppScriptSource>) -> Self {
        Self {
            settings: Arc::new(settings),
            scripts,
        }
    }
}

impl WorkerFactory for SandboxWorkerFactory {
    fn create(&self, outbox: AppSender) -> Arc<dyn DebuggeeWorker> {
        Arc::new(SandboxWorker::new(
            Arc::clone(&self.settings),
            Arc::clone(&self.scripts),
            outbox,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::scripts::DownloadedScript;

    struct NoScripts;

    #[async_trait]
    impl AppScriptSource for NoScripts {
        async fn fetch_app_script(&self, url: &str) -> Result<DownloadedScript, FetchError> {
            Ok(DownloadedScript {
                contents: String::new(),
                filepath: PathBuf::from(url),
            })
        }
    }

    fn worker(node_binary: &str) -> (SandboxWorker, mpsc::UnboundedReceiver<Value>) {
        let settings = SandboxSettings {
            node_binary: node_binary.to_owned(),
            script_path: PathBuf::from("/nonexistent/debuggerWorker.js"),
            inspector_port: Some(9229),
            load_timeout: Duration::from_secs(5),
        };
        let (outbox, frames) = mpsc::unbounded_channel();
        (
            SandboxWorker::new(Arc::new(settings), Arc::new(NoScripts), outbox),
            frames,
        )
    }

    #[test]
    fn random_ports_stay_in_range() {
        for _ in 0..200 {
            let port = random_inspector_port();
            assert!((3000..43000).contains(&port));
        }
    }

    #[test]
    fn command_passes_inspector_flag_and_script() {
        let settings = SandboxSettings {
            node_binary: "node".into(),
            script_path: PathBuf::from("/storage/debuggerWorker.js"),
            inspector_port: None,
            load_timeout: Duration::from_secs(1),
        };
        let command = settings.command(31337);
        let args: Vec<_> = command.as_std().get_args().collect();
        assert_eq!(args, ["--inspect=127.0.0.1:31337", "/storage/debuggerWorker.js"]);
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn missing_binary_is_a_spawn_error() {
        let (worker, _frames) = worker("rn-bridge-definitely-not-node");
        let err = worker.start().await.unwrap_err();
        assert!(matches!(err, SandboxError::Spawn { .. }), "{err}");
        assert!(!worker.is_running());
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn stop_before_start_prevents_spawn() {
        let (worker, _frames) = worker("node");
        worker.stop();
        worker.stop();
        assert!(matches!(worker.start().await, Err(SandboxError::Stopped)));
        worker.post_message(AppMessage::with_method("ignored"));
    }
}
