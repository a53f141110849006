//! Wire types for the React Native packager's debugger-proxy endpoint.
//! Kept apart from the bridge runtime so tooling can depend on the message
//! shapes without pulling in tokio, reqwest or process management.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sent by the app when it wants a fresh JS runtime. Must be answered with a
/// [`Reply`] carrying the same id.
pub const PREPARE_JS_RUNTIME: &str = "prepareJSRuntime";
/// Sent by the proxy when the app side of the connection went away.
pub const DISCONNECTED: &str = "$disconnected";
/// Asks the sandbox to load a bundle; its `url` is rewritten to a local path.
pub const EXECUTE_APPLICATION_SCRIPT: &str = "executeApplicationScript";
/// Pseudo-methods handled by the sandbox preamble instead of the app.
pub const RELOAD_APP: &str = "vscode_reloadApp";
pub const SHOW_DEV_MENU: &str = "vscode_showDevMenu";

/// Close reason the packager uses when a second debugger tries to attach.
pub const ANOTHER_DEBUGGER_CONNECTED: &str = "Another debugger is already connected";

pub const DEFAULT_CLIENT_NAME: &str = "vscode";

/// Control/data message exchanged between the app and the debugger worker.
///
/// Only `method`, `url` and `id` are interpreted; every other field is
/// carried through untouched in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AppMessage {
    pub fn with_method(method: impl Into<String>) -> Self {
        Self {
            method: Some(method.into()),
            ..Self::default()
        }
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn is(&self, method: &str) -> bool {
        self.method() == Some(method)
    }
}

/// Answer to `prepareJSRuntime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    #[serde(rename = "replyID")]
    pub reply_id: Option<i64>,
}

impl Reply {
    /// Builds the reply for a request id, accepting both numeric and string
    /// ids the way the packager's JS clients do (`parseInt(id, 10)`).
    pub fn to(id: Option<&Value>) -> Self {
        Self {
            reply_id: id.and_then(numeric_id),
        }
    }
}

/// Envelope the sandbox expects on its inbound channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxEnvelope {
    pub data: AppMessage,
}

pub fn numeric_id(id: &Value) -> Option<i64> {
    match id {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|v| v.is_finite()).map(|v| v.trunc() as i64)),
        Value::String(text) => parse_leading_int(text),
        _ => None,
    }
}

fn parse_leading_int(text: &str) -> Option<i64> {
    let trimmed = text.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    let value: i64 = digits[..end].parse().ok()?;
    Some(if negative { -value } else { value })
}

/// `ws://{address}:{port}/debugger-proxy?role=debugger&name={client}`
pub fn debugger_proxy_url(address: &str, port: u16, client_name: &str) -> String {
    format!("ws://{address}:{port}/debugger-proxy?role=debugger&name={client_name}")
}
