//! Turns the packager's debugger worker into a script a plain `node`
//! process can run.
//!
//! The worker is written for a browser WebWorker (or the app's own JS
//! engine), so it expects `self`, `postMessage`, `onmessage` and
//! `importScripts`. The preamble installs those on top of the sandbox's
//! stdio channel before any packager code runs, and the trailing sentinel
//! tells the host the worker finished loading. Segment order matters.

use crate::error::FetchError;
use crate::project::ProjectInfo;
use crate::scripts::ScriptFetcher;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

pub const PREAMBLE_VERSION: u32 = 1;
pub const WORKER_PREAMBLE: &str = include_str!("js/preamble.js");
pub const FETCH_STUB: &str = include_str!("js/fetch_stub.js");
pub const WORKER_DONE: &str = include_str!("js/done.js");

/// `preamble, [fetch stub], worker, sentinel`, newline separated. The fetch
/// stub is only included for Haul projects.
pub fn assemble_worker_script(raw_worker: &str, uses_haul: bool) -> String {
    let mut segments = vec![WORKER_PREAMBLE];
    if uses_haul {
        segments.push(FETCH_STUB);
    }
    segments.push(raw_worker);
    segments.push(WORKER_DONE);
    segments.join("\n")
}

/// Produces the patched worker script the sandbox runs. Called once per
/// manager start, skipped on reconnects.
#[async_trait]
pub trait BootstrapPreparer: Send + Sync {
    async fn prepare(&self) -> Result<PathBuf, FetchError>;
}

pub struct PackagerBootstrap {
    fetcher: ScriptFetcher,
    project_root: PathBuf,
}

impl PackagerBootstrap {
    pub fn new(fetcher: ScriptFetcher, project_root: PathBuf) -> Self {
        Self {
            fetcher,
            project_root,
        }
    }
}

#[async_trait]
impl BootstrapPreparer for PackagerBootstrap {
    async fn prepare(&self) -> Result<PathBuf, FetchError> {
        let downloaded = self.fetcher.fetch_debugger_worker().await?;
        let project = ProjectInfo::load(&self.project_root);
        let patched = assemble_worker_script(&downloaded.contents, project.uses_haul);
        tokio::fs::write(&downloaded.filepath, patched)
            .await
            .map_err(|source| FetchError::Io {
                path: downloaded.filepath.clone(),
                source,
            })?;
        info!(
            target: "rn_bridge::scripts",
            path = %downloaded.filepath.display(),
            haul = project.uses_haul,
            preamble_version = PREAMBLE_VERSION,
            "debugger worker patched"
        );
        Ok(downloaded.filepath)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "onmessage = function (message) { postMessage(message.data); };";

    #[test]
    fn metro_projects_get_no_fetch_stub() {
        let script = assemble_worker_script(RAW, false);
        assert_eq!(script, format!("{WORKER_PREAMBLE}\n{RAW}\n{WORKER_DONE}"));
        assert!(!script.contains("self.fetch"));
    }

    #[test]
    fn haul_projects_get_fetch_stub_before_worker() {
        let script = assemble_worker_script(RAW, true);
        assert_eq!(
            script,
            format!("{WORKER_PREAMBLE}\n{FETCH_STUB}\n{RAW}\n{WORKER_DONE}")
        );
        let stub_at = script.find("self.fetch").expect("stub present");
        let worker_at = script.find(RAW).expect("worker present");
        assert!(stub_at < worker_at);
    }

    #[test]
    fn sentinel_runs_last_and_shims_first() {
        let script = assemble_worker_script(RAW, false);
        let shim_at = script.find("var importScripts").expect("importScripts shim");
        let worker_at = script.find(RAW).unwrap();
        let done_at = script.rfind("workerLoaded").unwrap();
        assert!(shim_at < worker_at && worker_at < done_at);
        assert!(script.trim_end().ends_with("postMessage({ workerLoaded: true });"));
    }

    #[test]
    fn preamble_intercepts_dev_menu_pseudo_methods() {
        assert!(WORKER_PREAMBLE.contains(packager_protocol::RELOAD_APP));
        assert!(WORKER_PREAMBLE.contains(packager_protocol::SHOW_DEV_MENU));
        assert!(WORKER_PREAMBLE.contains("\\u001e"));
    }
}
