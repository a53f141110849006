//! Stdio plumbing between the host and the sandbox process.

use super::AppSender;
use crate::error::FetchError;
use crate::scripts::AppScriptSource;
use packager_protocol::{AppMessage, SandboxEnvelope, EXECUTE_APPLICATION_SCRIPT};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Marks stdout lines that carry a `postMessage` frame rather than console
/// output.
pub const FRAME_PREFIX: char = '\u{1e}';

#[derive(Debug, Clone, PartialEq)]
pub enum SandboxLine {
    /// The load sentinel.
    Loaded,
    Frame(Value),
    Console(String),
}

pub fn classify_line(line: &str) -> Result<SandboxLine, serde_json::Error> {
    let Some(payload) = line.strip_prefix(FRAME_PREFIX) else {
        return Ok(SandboxLine::Console(line.to_owned()));
    };
    let value: Value = serde_json::from_str(payload)?;
    if value.get("workerLoaded") == Some(&Value::Bool(true)) {
        return Ok(SandboxLine::Loaded);
    }
    Ok(SandboxLine::Frame(value))
}

/// Reads one line, decoding invalid UTF-8 lossily so raw bytes written by
/// the app can't stall the pipe. `None` at EOF.
async fn next_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(buf);
    Ok(Some(line.trim_end_matches(['\n', '\r']).to_owned()))
}

/// Reads the sandbox's stdout: frames go to `outbox` in arrival order, the
/// sentinel flips `loaded`, everything else is app console output.
pub async fn pump_stdout<R>(mut reader: R, outbox: AppSender, loaded: watch::Sender<bool>)
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let line = match next_line(&mut reader, &mut buf).await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(target: "rn_bridge::sandbox", error = %err, "failed to read sandbox stdout");
                break;
            }
        };
        if line.is_empty() {
            continue;
        }
        match classify_line(&line) {
            Ok(SandboxLine::Loaded) => {
                debug!(target: "rn_bridge::sandbox", "debugger worker loaded");
                loaded.send_replace(true);
            }
            Ok(SandboxLine::Frame(frame)) => {
                if outbox.send(frame).is_err() {
                    debug!(target: "rn_bridge::sandbox", "outbox closed, dropping sandbox frame");
                }
            }
            Ok(SandboxLine::Console(text)) => {
                info!(target: "rn_bridge::app_console", stream = "stdout", "{text}");
            }
            Err(err) => {
                warn!(target: "rn_bridge::sandbox", error = %err, "unparsable sandbox frame");
            }
        }
    }
}

pub async fn forward_console<R>(mut reader: R, stream: &'static str)
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        match next_line(&mut reader, &mut buf).await {
            Ok(Some(line)) if line.is_empty() => {}
            Ok(Some(line)) => info!(target: "rn_bridge::app_console", stream = stream, "{line}"),
            Ok(None) => break,
            Err(err) => {
                warn!(target: "rn_bridge::sandbox", stream = stream, error = %err, "failed to read sandbox output");
                break;
            }
        }
    }
}

/// Delivers queued app messages once the worker has loaded, one at a time.
/// Bundle downloads happen inline so nothing overtakes the script it needs.
pub async fn pump_inbox<W>(
    mut inbox: mpsc::UnboundedReceiver<AppMessage>,
    mut writer: W,
    mut loaded: watch::Receiver<bool>,
    scripts: Arc<dyn AppScriptSource>,
) where
    W: AsyncWrite + Unpin,
{
    if loaded.wait_for(|ready| *ready).await.is_err() {
        debug!(target: "rn_bridge::sandbox", "sandbox gone before load, dropping queued messages");
        return;
    }

    while let Some(message) = inbox.recv().await {
        let method = message.method.clone();
        let message = match prepare_for_sandbox(message, scripts.as_ref()).await {
            Ok(message) => message,
            Err(err) => {
                error!(
                    target: "rn_bridge::sandbox",
                    method = method.as_deref().unwrap_or_default(),
                    error = %err,
                    "failed to prepare message for the sandbox, debugging won't work until the app reloads"
                );
                continue;
            }
        };
        let mut line = match serde_json::to_string(&SandboxEnvelope { data: message }) {
            Ok(line) => line,
            Err(err) => {
                error!(target: "rn_bridge::sandbox", error = %err, "failed to encode message for the sandbox");
                continue;
            }
        };
        line.push('\n');
        if let Err(err) = write_line(&mut writer, &line).await {
            warn!(target: "rn_bridge::sandbox", error = %err, "sandbox stdin closed");
            break;
        }
    }
}

async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// `executeApplicationScript` carries a packager URL; the sandbox gets the
/// path of the downloaded copy instead. Other messages pass through.
pub async fn prepare_for_sandbox(
    mut message: AppMessage,
    scripts: &dyn AppScriptSource,
) -> Result<AppMessage, FetchError> {
    if !message.is(EXECUTE_APPLICATION_SCRIPT) {
        return Ok(message);
    }
    if let Some(url) = message.url.as_deref() {
        let downloaded = scripts.fetch_app_script(url).await?;
        message.url = Some(downloaded.filepath.to_string_lossy().into_owned());
    }
    Ok(message)
}
