use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod config;

#[derive(Parser)]
#[command(name = "link", about = "Keeps routing documents in sync with instance events")]
struct Cli {
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the event worker.
    Worker,
    /// Remove routing documents that have no entries left.
    PruneEmpty {
        /// Only list the documents that would be removed.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Logging(#[from] shared::logging::LoggingError),
    #[error(transparent)]
    Metrics(#[from] shared::metrics::MetricsError),
    #[error(transparent)]
    Server(#[from] navi::ServerError),
    #[error(transparent)]
    Store(#[from] navi::store::StoreError),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("link: {err}");
            tracing::error!(error = %err, "exiting");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = config::Config::from_file(&cli.config)?;

    let _sentry = shared::logging::init(&config.common.logging)?;
    if let Some(metrics) = &config.common.metrics {
        shared::metrics::install(metrics)?;
    }

    match cli.command {
        CliCommand::Worker => {
            tracing::info!("starting link worker");
            navi::run(config.worker).await?;
        }
        CliCommand::PruneEmpty { dry_run } => {
            let store = navi::open_store(&config.worker.store)?;
            let publisher = navi::build_publisher(&config.worker.publisher);
            let pruned =
                navi::maintenance::prune_empty(store.as_ref(), publisher.as_ref(), dry_run).await?;

            for routing_key in &pruned {
                match dry_run {
                    true => println!("would remove {routing_key}"),
                    false => println!("removed {routing_key}"),
                }
            }
            tracing::info!(count = pruned.len(), dry_run, "prune finished");
        }
    }

    Ok(())
}
