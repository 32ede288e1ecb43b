use std::io;
use std::process;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use dtlartifact::azure::AzureClientFactory;
use dtlartifact::cli::{self, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse_args()?;

    if let Some(log_level) = args.command.log_level() {
        dtlartifact::init_logging(log_level)?;
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; cancelling");
            on_interrupt.cancel();
        }
    });

    let factory = Arc::new(AzureClientFactory::new());
    let result = match &args.command {
        Commands::Apply(opts) => dtlartifact::run_apply(opts, factory, cancel).await,
        Commands::Validate(opts) => dtlartifact::run_validate(opts, factory),
        Commands::Completions(opts) => dtlartifact::run_completions(opts, &mut io::stdout()),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        process::exit(1);
    }

    Ok(())
}
