use packager_protocol::{debugger_proxy_url, DEFAULT_CLIENT_NAME};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PACKAGER_ADDRESS: &str = "localhost";
pub const DEFAULT_PACKAGER_PORT: u16 = 8081;

/// Address of the packager's debugger-proxy. Fixed for the lifetime of a
/// manager; attaching elsewhere means building a new manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachEndpoint {
    pub address: String,
    pub port: u16,
}

impl AttachEndpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    pub fn http_base(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }

    pub fn proxy_url(&self, client_name: &str) -> String {
        debugger_proxy_url(&self.address, self.port, client_name)
    }
}

impl Default for AttachEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_PACKAGER_ADDRESS, DEFAULT_PACKAGER_PORT)
    }
}

/// Maps source paths from the machine running the packager onto this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRoots {
    pub remote: String,
    pub local: String,
}

#[derive(Debug, Clone)]
pub struct Timings {
    /// How long `start` waits for the socket to fail before reporting success.
    pub connect_grace: Duration,
    /// Fixed pause between a socket close and the next attempt.
    pub reconnect_delay: Duration,
    /// Window for de-duplicating connection notices.
    pub log_window: Duration,
    /// Upper bound for the sandbox to emit its load sentinel.
    pub worker_load_timeout: Duration,
    pub probe_attempts: u32,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            connect_grace: Duration::from_millis(300),
            reconnect_delay: Duration::from_millis(100),
            log_window: Duration::from_secs(10),
            worker_load_timeout: Duration::from_secs(30),
            probe_attempts: 3,
            probe_interval: Duration::from_millis(500),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

/// Fully resolved attach request.
#[derive(Debug, Clone)]
pub struct AttachConfig {
    pub endpoint: AttachEndpoint,
    pub project_root: PathBuf,
    pub sources_storage: PathBuf,
    pub source_roots: Option<SourceRoots>,
    pub node_binary: String,
    pub inspector_port: Option<u16>,
    pub client_name: String,
    pub timings: Timings,
}

impl AttachConfig {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        Self {
            endpoint: AttachEndpoint::default(),
            sources_storage: default_sources_storage(&project_root),
            project_root,
            source_roots: None,
            node_binary: "node".to_owned(),
            inspector_port: None,
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
            timings: Timings::default(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: AttachEndpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_sources_storage(mut self, path: impl Into<PathBuf>) -> Self {
        self.sources_storage = path.into();
        self
    }

    /// Both roots must be present for remapping to apply.
    pub fn with_source_roots(mut self, remote: Option<String>, local: Option<String>) -> Self {
        self.source_roots = match (remote, local) {
            (Some(remote), Some(local)) => Some(SourceRoots { remote, local }),
            _ => None,
        };
        self
    }
}

pub fn default_sources_storage(project_root: &Path) -> PathBuf {
    project_root.join(".vscode").join(".react")
}
