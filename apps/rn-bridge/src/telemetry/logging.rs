//! Subscriber setup. Bridge diagnostics and the debugged app's console
//! output share one writer but are filtered separately.

use clap::ValueEnum;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Target the sandbox's stdout/stderr lines are logged under.
pub const APP_CONSOLE_TARGET: &str = "rn_bridge::app_console";

/// Dependencies whose trace output drowns the bridge's own.
const NOISY_DEPENDENCIES: &[&str] = &[
    "hyper",
    "hyper_util",
    "tokio_tungstenite",
    "tungstenite",
    "reqwest",
    "rustls",
    "mio",
];

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Whether `console.log` output from the app reaches the log.
#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum AppConsole {
    /// Shown at every bridge log level, `error` included.
    #[default]
    Show,
    Hide,
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub file: Option<PathBuf>,
    pub app_console: AppConsole,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    OpenFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to install log subscriber: {0}")]
    Install(String),
}

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber. Later calls are no-ops.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if GUARD.get().is_some() {
        return Ok(());
    }

    let (writer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::OpenFile {
                    path: path.clone(),
                    source,
                })?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let trace_deps = super::env_truthy("RN_BRIDGE_TRACE_DEPS").unwrap_or(false);
    let filter = std::env::var("RN_BRIDGE_LOG_FILTER")
        .unwrap_or_else(|_| filter_directives(config, trace_deps).join(","));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&filter))
        .with_target(config.level >= LogLevel::Debug)
        .with_thread_ids(config.level >= LogLevel::Trace)
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| InitError::Install(err.to_string()))?;

    let _ = GUARD.set(guard);
    tracing::debug!(target: "rn_bridge::telemetry", filter = %filter, "logging initialized");
    Ok(())
}

fn filter_directives(config: &LogConfig, trace_deps: bool) -> Vec<String> {
    let level = config.level;
    let mut directives = match level {
        LogLevel::Debug | LogLevel::Trace => {
            vec!["info".to_owned(), format!("rn_bridge={}", level.directive())]
        }
        _ => vec![level.directive().to_owned()],
    };
    directives.push(match config.app_console {
        AppConsole::Show => format!("{APP_CONSOLE_TARGET}=info"),
        AppConsole::Hide => format!("{APP_CONSOLE_TARGET}=off"),
    });
    if level == LogLevel::Trace && !trace_deps {
        directives.extend(NOISY_DEPENDENCIES.iter().map(|dep| format!("{dep}=info")));
    }
    directives
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(level: LogLevel, app_console: AppConsole) -> LogConfig {
        LogConfig {
            level,
            file: None,
            app_console,
        }
    }

    #[test]
    fn app_console_stays_visible_when_bridge_is_quiet() {
        assert_eq!(
            filter_directives(&config(LogLevel::Error, AppConsole::Show), false),
            vec!["error", "rn_bridge::app_console=info"]
        );
    }

    #[test]
    fn app_console_can_be_hidden() {
        assert_eq!(
            filter_directives(&config(LogLevel::Debug, AppConsole::Hide), false),
            vec!["info", "rn_bridge=debug", "rn_bridge::app_console=off"]
        );
    }

    #[test]
    fn trace_clamps_dependencies_unless_asked() {
        let clamped = filter_directives(&config(LogLevel::Trace, AppConsole::Show), false);
        assert_eq!(&clamped[..2], ["info", "rn_bridge=trace"]);
        assert!(clamped.contains(&"tungstenite=info".to_owned()));
        assert!(clamped.contains(&"reqwest=info".to_owned()));

        let full = filter_directives(&config(LogLevel::Trace, AppConsole::Show), true);
        assert!(!full.iter().any(|directive| directive.starts_with("reqwest")));
    }
}
