use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{AttachConfig, AttachEndpoint, DEFAULT_PACKAGER_ADDRESS, DEFAULT_PACKAGER_PORT};
use crate::telemetry::logging::{AppConsole, LogConfig, LogLevel};
use packager_protocol::DEFAULT_CLIENT_NAME;

#[derive(Parser, Debug)]
#[command(
    name = "rn-bridge",
    about = "Attach a Node inspector to a React Native app through its packager",
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), "-", env!("BUILD_TIMESTAMP"))
)]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to the packager's debugger-proxy and run app lifetimes in a
    /// local node sandbox until interrupted
    Attach(AttachArgs),
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "RN_BRIDGE_LOG_LEVEL",
        default_value_t = LogLevel::Info,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "RN_BRIDGE_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,

    #[arg(
        long = "app-console",
        value_enum,
        global = true,
        env = "RN_BRIDGE_APP_CONSOLE",
        default_value_t = AppConsole::Show,
        help = "Show or hide console output from the debugged app"
    )]
    pub app_console: AppConsole,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
            app_console: self.app_console,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct AttachArgs {
    #[arg(
        long,
        env = "RN_BRIDGE_PACKAGER_ADDRESS",
        default_value = DEFAULT_PACKAGER_ADDRESS,
        help = "Host the packager is listening on"
    )]
    pub address: String,

    #[arg(
        long,
        short = 'p',
        env = "RN_BRIDGE_PACKAGER_PORT",
        default_value_t = DEFAULT_PACKAGER_PORT,
        help = "Port the packager is listening on"
    )]
    pub port: u16,

    #[arg(
        long = "project-root",
        value_name = "DIR",
        env = "RN_BRIDGE_PROJECT_ROOT",
        default_value = ".",
        help = "Root of the React Native project"
    )]
    pub project_root: PathBuf,

    #[arg(
        long = "sources-storage",
        value_name = "DIR",
        env = "RN_BRIDGE_SOURCES_STORAGE",
        help = "Where downloaded scripts are kept (defaults to <project>/.vscode/.react)"
    )]
    pub sources_storage: Option<PathBuf>,

    #[arg(
        long = "remote-root",
        value_name = "PATH",
        env = "RN_BRIDGE_REMOTE_ROOT",
        requires = "local_root",
        help = "Project root on the machine running the packager"
    )]
    pub remote_root: Option<String>,

    #[arg(
        long = "local-root",
        value_name = "PATH",
        env = "RN_BRIDGE_LOCAL_ROOT",
        requires = "remote_root",
        help = "Local path that --remote-root maps onto"
    )]
    pub local_root: Option<String>,

    #[arg(
        long = "node",
        value_name = "PATH",
        env = "RN_BRIDGE_NODE",
        default_value = "node",
        help = "Node binary used for the sandbox"
    )]
    pub node_binary: String,

    #[arg(
        long = "inspector-port",
        value_name = "PORT",
        env = "RN_BRIDGE_INSPECTOR_PORT",
        help = "Pin the sandbox inspector port instead of picking one at random"
    )]
    pub inspector_port: Option<u16>,

    #[arg(
        long = "client-name",
        env = "RN_BRIDGE_CLIENT_NAME",
        default_value = DEFAULT_CLIENT_NAME,
        help = "Name announced to the debugger-proxy"
    )]
    pub client_name: String,
}

impl AttachArgs {
    pub fn into_config(self) -> AttachConfig {
        let mut config = AttachConfig::new(self.project_root)
            .with_endpoint(AttachEndpoint::new(self.address, self.port))
            .with_source_roots(self.remote_root, self.local_root);
        if let Some(storage) = self.sources_storage {
            config = config.with_sources_storage(storage);
        }
        config.node_binary = self.node_binary;
        config.inspector_port = self.inspector_port;
        config.client_name = self.client_name;
        config
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_defaults() {
        let cli = Cli::try_parse_from(["rn-bridge", "attach", "--project-root", "/work/app"]).unwrap();
        let Command::Attach(args) = cli.command;
        let config = args.into_config();
        assert_eq!(config.endpoint, AttachEndpoint::new("localhost", 8081));
        assert_eq!(config.sources_storage, PathBuf::from("/work/app/.vscode/.react"));
        assert_eq!(config.node_binary, "node");
        assert_eq!(config.client_name, "vscode");
        assert!(config.inspector_port.is_none());
        assert!(config.source_roots.is_none());
    }

    #[test]
    fn attach_overrides() {
        let cli = Cli::try_parse_from([
            "rn-bridge",
            "--log-level",
            "debug",
            "--app-console",
            "hide",
            "attach",
            "--address",
            "10.0.0.2",
            "-p",
            "19001",
            "--project-root",
            "/work/app",
            "--sources-storage",
            "/tmp/rn",
            "--remote-root",
            "/remote/app",
            "--local-root",
            "/work/app",
            "--inspector-port",
            "9339",
        ])
        .unwrap();
        assert_eq!(cli.logging.level, LogLevel::Debug);
        assert_eq!(cli.logging.to_config().app_console, AppConsole::Hide);
        let Command::Attach(args) = cli.command;
        let config = args.into_config();
        assert_eq!(config.endpoint, AttachEndpoint::new("10.0.0.2", 19001));
        assert_eq!(config.sources_storage, PathBuf::from("/tmp/rn"));
        assert_eq!(config.inspector_port, Some(9339));
        assert_eq!(config.source_roots.map(|roots| roots.local), Some("/work/app".to_owned()));
    }

    #[test]
    fn source_roots_come_in_pairs() {
        let err = Cli::try_parse_from(["rn-bridge", "attach", "--remote-root", "/remote"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
