use crate::cli::{AttachArgs, Cli, Command};
use crate::error::CliError;
use crate::lifetime::{LifecycleEvent, LifetimeManager};
use crate::telemetry::logging;
use tracing::{info, warn};

pub async fn run(cli: Cli) -> Result<(), CliError> {
    logging::init(&cli.logging.to_config()).map_err(|err| CliError::Logging(err.to_string()))?;

    match cli.command {
        Command::Attach(args) => attach(args).await,
    }
}

async fn attach(args: AttachArgs) -> Result<(), CliError> {
    let config = args.into_config();
    tokio::fs::create_dir_all(&config.sources_storage).await?;
    info!(
        target: "rn_bridge::app",
        packager = %config.endpoint.http_base(),
        project = %config.project_root.display(),
        storage = %config.sources_storage.display(),
        "attaching to packager"
    );

    let (manager, mut events) = LifetimeManager::with_defaults(config);
    manager.start(false).await?;
    println!(
        "Attached to the packager at {}. Waiting for the app to start a JS runtime...",
        manager.config().endpoint.http_base()
    );

    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(LifecycleEvent::Connected { inspector_port, pid }) => {
                    println!("JS runtime ready, inspector listening on 127.0.0.1:{inspector_port}");
                    info!(target: "rn_bridge::app", inspector_port, pid = pid.unwrap_or_default(), "lifetime connected");
                }
                Some(LifecycleEvent::Disconnected) => {
                    info!(target: "rn_bridge::app", "packager connection lost");
                }
                Some(LifecycleEvent::Error(err)) if err.is_user_actionable() => break Err(err.into()),
                Some(LifecycleEvent::Error(err)) => {
                    warn!(target: "rn_bridge::app", error = %err, "lifetime error");
                }
                None => break Ok(()),
            },
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!(target: "rn_bridge::app", error = %err, "failed to listen for ctrl-c");
                }
                info!(target: "rn_bridge::app", "interrupted, detaching");
                break Ok(());
            }
        }
    };

    manager.stop();
    outcome
}
