//! What the bridge needs to know about the React Native project on disk.

use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Releases whose Metro bundler drops the `sourceMappingURL` comment.
pub const BROKEN_METRO_VERSIONS: &[&str] = &["0.54.0", "0.54.1", "0.54.2", "0.54.3", "0.54.4"];

const DEBUGGER_UI_SINCE: (u64, u64, u64) = (0, 50, 0);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectInfo {
    pub uses_haul: bool,
    pub react_native_version: Option<String>,
}

impl ProjectInfo {
    /// Reads `package.json` and the installed react-native package. Missing
    /// or unreadable files yield the defaults rather than an error.
    pub fn load(project_root: &Path) -> Self {
        let manifest = read_json(&project_root.join("package.json"));
        let uses_haul = manifest.as_ref().is_some_and(declares_haul);
        let installed = read_json(
            &project_root
                .join("node_modules")
                .join("react-native")
                .join("package.json"),
        );
        let react_native_version = installed
            .as_ref()
            .and_then(|pkg| pkg.get("version"))
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| manifest.as_ref().and_then(declared_react_native));
        Self {
            uses_haul,
            react_native_version,
        }
    }

    /// Path segment in front of `debuggerWorker.js`. Custom builds that don't
    /// carry a plain version are assumed to serve the newer location.
    pub fn debugger_worker_prefix(&self) -> &'static str {
        match self.react_native_version.as_deref().and_then(parse_version) {
            None => "debugger-ui/",
            Some(version) if version >= DEBUGGER_UI_SINCE && !self.uses_haul => "debugger-ui/",
            Some(_) => "",
        }
    }

    pub fn has_broken_metro(&self) -> bool {
        self.react_native_version
            .as_deref()
            .is_some_and(|version| BROKEN_METRO_VERSIONS.contains(&version))
    }
}

fn read_json(path: &Path) -> Option<Value> {
    let text = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "ignoring unparsable package manifest");
            None
        }
    }
}

fn declares_haul(manifest: &Value) -> bool {
    manifest
        .get("devDependencies")
        .is_some_and(|deps| deps.get("haul").is_some() || deps.get("@haul-bundler/cli").is_some())
}

fn declared_react_native(manifest: &Value) -> Option<String> {
    manifest
        .get("dependencies")?
        .get("react-native")?
        .as_str()
        .map(|spec| spec.trim_start_matches(['^', '~', '=']).to_owned())
}

/// Accepts `major.minor.patch` with an optional `-pre`/`+build` suffix.
pub fn parse_version(raw: &str) -> Option<(u64, u64, u64)> {
    let core = raw.split(['-', '+']).next()?;
    let mut parts = core.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}
