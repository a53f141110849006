//! Downloads scripts from the packager into the sources storage directory.

pub mod source_map;

use crate::config::{AttachConfig, AttachEndpoint, SourceRoots};
use crate::error::FetchError;
use crate::packager::fetch_text;
use crate::project::ProjectInfo;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use url::Url;

pub const DEBUGGER_WORKER_FILENAME: &str = "debuggerWorker.js";

/// A script persisted to local storage. `filepath` is derived from the
/// remote URL's last path segment, so re-downloading the same URL
/// overwrites the same file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedScript {
    pub contents: String,
    pub filepath: PathBuf,
}

/// Where the sandbox gets application bundles from.
#[async_trait]
pub trait AppScriptSource: Send + Sync {
    async fn fetch_app_script(&self, url: &str) -> Result<DownloadedScript, FetchError>;
}

#[derive(Debug, Clone)]
pub struct ScriptFetcher {
    endpoint: AttachEndpoint,
    storage: PathBuf,
    project_root: PathBuf,
    source_roots: Option<SourceRoots>,
    http: reqwest::Client,
}

impl ScriptFetcher {
    pub fn new(config: &AttachConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            storage: config.sources_storage.clone(),
            project_root: config.project_root.clone(),
            source_roots: config.source_roots.clone(),
            http: reqwest::Client::new(),
        }
    }

    pub fn storage(&self) -> &Path {
        &self.storage
    }

    pub fn debugger_worker_path(&self) -> PathBuf {
        self.storage.join(DEBUGGER_WORKER_FILENAME)
    }

    pub fn debugger_worker_url(&self, project: &ProjectInfo) -> String {
        format!(
            "{}/{}{}",
            self.endpoint.http_base(),
            project.debugger_worker_prefix(),
            DEBUGGER_WORKER_FILENAME
        )
    }

    /// Downloads the packager's debugger worker and stores it unmodified.
    pub async fn fetch_debugger_worker(&self) -> Result<DownloadedScript, FetchError> {
        let project = ProjectInfo::load(&self.project_root);
        let url = self.debugger_worker_url(&project);
        debug!(
            target: "rn_bridge::scripts",
            url = %url,
            path = %self.debugger_worker_path().display(),
            "downloading debugger worker"
        );
        let contents = fetch_text(&self.http, &url).await?;
        let filepath = self.persist(DEBUGGER_WORKER_FILENAME, &contents).await?;
        Ok(DownloadedScript { contents, filepath })
    }

    /// Bundle URLs that name `localhost` are pointed at the configured
    /// packager, since the app bakes in its own default host and port.
    pub fn resolve_script_url(&self, raw: &str) -> Result<Url, FetchError> {
        let mut url = Url::parse(raw).map_err(|source| FetchError::InvalidUrl {
            url: raw.to_owned(),
            source,
        })?;
        if url.host_str() == Some("localhost") {
            url.set_host(Some(&self.endpoint.address))
                .map_err(|source| FetchError::InvalidUrl {
                    url: raw.to_owned(),
                    source,
                })?;
            // Only fails for cannot-be-a-base URLs, which have no host to rewrite.
            let _ = url.set_port(Some(self.endpoint.port));
        }
        Ok(url)
    }

    async fn persist(&self, file_name: &str, contents: &str) -> Result<PathBuf, FetchError> {
        let to_io = |path: &Path, source| FetchError::Io {
            path: path.to_path_buf(),
            source,
        };
        tokio::fs::create_dir_all(&self.storage)
            .await
            .map_err(|source| to_io(&self.storage, source))?;
        let path = self.storage.join(file_name);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|source| to_io(&path, source))?;
        Ok(path)
    }

    async fn persist_source_map(
        &self,
        map_url: &Url,
        script_file_name: &str,
    ) -> Result<String, FetchError> {
        let body = fetch_text(&self.http, map_url.as_str()).await?;
        let rewritten =
            source_map::rewrite_source_map(&body, script_file_name, self.source_roots.as_ref())?;
        let map_file_name = file_name_for(map_url, "bundle.map");
        self.persist(&map_file_name, &rewritten).await?;
        Ok(map_file_name)
    }
}

#[async_trait]
impl AppScriptSource for ScriptFetcher {
    /// Downloads a bundle (and its source map when one is referenced) and
    /// stores both under deterministic names.
    async fn fetch_app_script(&self, raw_url: &str) -> Result<DownloadedScript, FetchError> {
        let script_url = self.resolve_script_url(raw_url)?;
        let mut body = fetch_text(&self.http, script_url.as_str()).await?;

        let project = ProjectInfo::load(&self.project_root);
        if project.has_broken_metro() && !source_map::has_source_map_comment(&body) {
            let map_url = script_url.as_str().replacen("bundle", "map", 1);
            body = source_map::append_source_map_url(body, &map_url);
        }

        let script_file_name = file_name_for(&script_url, "bundle.js");
        if let Some(map_url) = source_map::find_source_map_url(&script_url, &body) {
            let map_file_name = self.persist_source_map(&map_url, &script_file_name).await?;
            body = source_map::update_script_paths(&body, &map_file_name);
        }

        let filepath = self.persist(&script_file_name, &body).await?;
        info!(
            target: "rn_bridge::scripts",
            url = %script_url,
            path = %filepath.display(),
            "script downloaded"
        );
        Ok(DownloadedScript {
            contents: body,
            filepath,
        })
    }
}

/// Last non-empty path segment of `url`, or `fallback` for bare hosts.
pub fn file_name_for(url: &Url, fallback: &str) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_owned)
        .unwrap_or_else(|| fallback.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(address: &str, port: u16) -> ScriptFetcher {
        let config = AttachConfig::new("/work/app")
            .with_endpoint(AttachEndpoint::new(address, port))
            .with_sources_storage("/work/app/.vscode/.react");
        ScriptFetcher::new(&config)
    }

    #[test]
    fn localhost_urls_follow_configured_packager() {
        let fetcher = fetcher("1.2.3.4", 1337);
        let url = fetcher
            .resolve_script_url("http://localhost:8081/index.bundle?platform=android&dev=true")
            .unwrap();
        assert_eq!(url.as_str(), "http://1.2.3.4:1337/index.bundle?platform=android&dev=true");
    }

    #[test]
    fn non_localhost_urls_are_untouched() {
        let fetcher = fetcher("localhost", 19001);
        let url = fetcher
            .resolve_script_url("http://192.168.1.20:8081/index.bundle")
            .unwrap();
        assert_eq!(url.as_str(), "http://192.168.1.20:8081/index.bundle");
    }

    #[test]
    fn invalid_urls_are_reported() {
        let err = fetcher("localhost", 8081).resolve_script_url("not a url").unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
    }

    #[test]
    fn worker_url_uses_project_layout() {
        let fetcher = fetcher("localhost", 8081);
        let modern = ProjectInfo {
            uses_haul: false,
            react_native_version: Some("0.59.0".into()),
        };
        let legacy = ProjectInfo {
            uses_haul: false,
            react_native_version: Some("0.44.0".into()),
        };
        assert_eq!(
            fetcher.debugger_worker_url(&modern),
            "http://localhost:8081/debugger-ui/debuggerWorker.js"
        );
        assert_eq!(
            fetcher.debugger_worker_url(&legacy),
            "http://localhost:8081/debuggerWorker.js"
        );
    }

    #[test]
    fn file_names_come_from_last_segment() {
        let url = Url::parse("http://h:1/nested/index.ios.bundle?platform=ios").unwrap();
        assert_eq!(file_name_for(&url, "x"), "index.ios.bundle");
        let bare = Url::parse("http://h:1/").unwrap();
        assert_eq!(file_name_for(&bare, "bundle.js"), "bundle.js");
    }
}
