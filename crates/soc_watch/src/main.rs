use anyhow::Context;
use clap::Parser;
use soc_watch::config::{self, CliArgs, WatchConfig};
use soc_watch::runner::{self, Watcher};
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file = config::load_env_file(None);
    let args = CliArgs::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // stdout is reserved for console notifications
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(path) = &env_file {
        debug!(path = %path.display(), "Loaded environment file");
    }

    let config = WatchConfig::from_args(&args).context("Invalid configuration")?;
    let mut watcher = Watcher::from_config(&config)
        .await
        .context("Failed to start watcher")?;

    if args.once {
        if let Err(e) = watcher.poll_once().await {
            error!(error = %e, "Poll failed");
            return Err(e.into());
        }
        return Ok(());
    }

    watcher.run(runner::ctrl_c_stop()).await;

    info!("Stopped");
    Ok(())
}
