use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use procvisor::{Controller, LogWriter, Manifest, Subscribe};

#[derive(Parser)]
#[command(name = "procvisor")]
#[command(version)]
#[command(about = "Dependency-aware process supervisor for multi-process containers", long_about = None)]
struct Cli {
    /// Service manifest (.toml or .json)
    #[arg(short, long)]
    config: PathBuf,

    /// Log filter, used when RUST_LOG is unset
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Human-oriented log output
    #[arg(long)]
    dev_logging: bool,
}

fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if cli.dev_logging {
        builder.pretty().init();
    } else {
        builder.with_ansi(false).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let manifest = Manifest::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    info!(
        config = %cli.config.display(),
        services = manifest.services.len(),
        "manifest loaded"
    );

    let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter)];
    let controller = Controller::builder(manifest.supervisor)
        .with_subscribers(subscribers)
        .build();

    if let Err(err) = controller.run(manifest.services).await {
        error!(label = err.as_label(), "{}", err.as_message());
        return Err(err.into());
    }
    info!("shutdown complete");
    Ok(())
}
