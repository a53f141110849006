use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures while pulling scripts and source maps from the packager.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("invalid script url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("source map is not valid json: {0}")]
    SourceMap(#[from] serde_json::Error),
}

/// Failures of a single sandbox lifetime.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to spawn sandbox process '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },
    #[error("sandbox {0} pipe unavailable")]
    MissingPipe(&'static str),
    #[error("sandbox process exited before the debugger worker finished loading")]
    ExitedBeforeLoad,
    #[error("timed out after {}s waiting for the debugger worker to load", .0.as_secs())]
    LoadTimeout(Duration),
    #[error("sandbox was stopped")]
    Stopped,
    #[error("sandbox was already started")]
    AlreadyStarted,
}

/// Everything `LifetimeManager::start` can fail with, plus the errors it
/// reports asynchronously through `LifecycleEvent::Error`.
#[derive(Debug, Error)]
pub enum AttachError {
    #[error(
        "Cannot attach to packager. Are you sure there is a packager and it is running in the port {port}? \
         If your packager is configured to run in another port make sure to pass it with --port or RN_BRIDGE_PACKAGER_PORT."
    )]
    PackagerUnreachable { port: u16 },
    #[error(
        "Another debugger is already connected to packager. Please close it before trying to debug with rn-bridge."
    )]
    AnotherDebuggerConnected,
    #[error("failed to prepare the debugger worker: {0}")]
    Bootstrap(#[from] FetchError),
    #[error("debugger-proxy socket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed to prepare the JavaScript runtime: {0}")]
    Sandbox(#[from] SandboxError),
}

impl AttachError {
    /// Errors the user has to act on; everything else is retried or only
    /// logged.
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            AttachError::PackagerUnreachable { .. } | AttachError::AnotherDebuggerConnected
        )
    }
}

/// Top-level failures of the `rn-bridge` binary.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Attach(#[from] AttachError),
    #[error("logging initialization failed: {0}")]
    Logging(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_packager_names_the_port() {
        let err = AttachError::PackagerUnreachable { port: 19001 };
        assert!(err.to_string().contains("running in the port 19001"));
        assert!(err.is_user_actionable());
    }

    #[test]
    fn sandbox_failures_are_not_user_actionable() {
        let err = AttachError::from(SandboxError::ExitedBeforeLoad);
        assert!(!err.is_user_actionable());
        assert!(AttachError::AnotherDebuggerConnected.is_user_actionable());
    }
}
