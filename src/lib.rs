pub mod azure;
pub mod cli;
pub mod communicator;
pub mod config;
pub mod dtl;
pub mod error;
pub mod provisioners;
pub mod template;
pub mod ui;

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::CommandFactory;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{FmtSubscriber, filter::LevelFilter};

use crate::azure::ClientFactory;
use crate::communicator::NullCommunicator;
use crate::config::HostSettings;
use crate::provisioners::Provisioner;
use crate::provisioners::dtl_artifact::ArtifactProvisioner;
use crate::ui::ConsoleUi;

pub fn init_logging(log_level: cli::LogLevel) -> Result<()> {
    let filter = match log_level {
        cli::LogLevel::Trace => LevelFilter::TRACE,
        cli::LogLevel::Debug => LevelFilter::DEBUG,
        cli::LogLevel::Info => LevelFilter::INFO,
        cli::LogLevel::Warn => LevelFilter::WARN,
        cli::LogLevel::Error => LevelFilter::ERROR,
    };

    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_max_level(filter)
            .with_writer(std::io::stderr)
            .finish(),
    )
    .context("failed to set global default tracing subscriber")
}

fn host_settings(common: &cli::CommonArgs) -> HostSettings {
    HostSettings {
        build_name: common.build_name.clone(),
        builder_type: Some(env!("CARGO_PKG_NAME").to_string()),
        user_variables: common.vars.iter().cloned().collect(),
        ..HostSettings::default()
    }
}

/// Loads and resolves the configuration files named on the command line.
fn prepare(common: &cli::CommonArgs, factory: Arc<dyn ClientFactory>) -> Result<ArtifactProvisioner> {
    let fragments = common
        .file
        .iter()
        .map(|path| {
            config::load_fragment(path)
                .with_context(|| format!("failed to load configuration from {}", path))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut provisioner = ArtifactProvisioner::new(factory);
    provisioner
        .prepare(&fragments, &host_settings(common))
        .context("configuration validation failed")?;
    Ok(provisioner)
}

pub async fn run_apply(
    opts: &cli::ApplyArgs,
    factory: Arc<dyn ClientFactory>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut provisioner = prepare(&opts.common, factory)?;

    if opts.dry_run {
        let request = provisioner.dry_run().context("dry run failed")?;
        let json = serde_json::to_string_pretty(&request)
            .context("failed to serialize applyArtifacts request")?;
        println!("{}", json);
        return Ok(());
    }

    let ui = ConsoleUi::stdout(env!("CARGO_PKG_NAME"));
    provisioner
        .provision(&cancel, &ui, Arc::new(NullCommunicator), &BTreeMap::new())
        .await
        .context("failed to apply artifacts")?;

    info!("provisioning completed successfully");
    Ok(())
}

pub fn run_validate(opts: &cli::ValidateArgs, factory: Arc<dyn ClientFactory>) -> Result<()> {
    let provisioner = prepare(&opts.common, factory)?;
    if let Some(config) = provisioner.config() {
        let options = config.client.auth_options()?;
        options.validate().context("authentication settings are invalid")?;
        info!("validation successful:\n{:#?}", config);
    }
    Ok(())
}

/// Writes the completion script for `opts.shell` to `out`.
pub fn run_completions(opts: &cli::CompletionsArgs, out: &mut dyn Write) -> Result<()> {
    let mut command = cli::Cli::command();
    let name = command.get_name().to_string();
    clap_complete::generate(opts.shell, &mut command, name, out);
    Ok(())
}
