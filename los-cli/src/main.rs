//! Command-line entry point for the LOS reporting pipeline.
//!
//! One invocation performs one end-to-end run. An empty tagged-request set
//! on the broker is a benign outcome and exits 0; any pipeline failure
//! exits non-zero so the invoking scheduler observes it.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use los_config::Config;
use los_core::broker::{BrokerClient, BrokerSettings};
use los_core::compute::{DEFAULT_INTERPRETER, RscriptRunner, RscriptSettings};
use los_core::remote::{EncryptedStore, RemoteFileStore, SftpSettings, SftpStore};
use los_core::status::StatusStore;
use los_core::{Outcome, Pipeline, PipelineSettings};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "los-pipeline")]
#[command(about = "Pull tagged broker results, compute the LOS report, publish it via SFTP")]
struct Cli {
    /// Path to the TOML configuration file
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match run(&cli).await {
        Ok(Outcome::Published(name)) => {
            info!(file = name, "pipeline run finished");
            ExitCode::SUCCESS
        }
        Ok(Outcome::NoRequests) => {
            warn!("no matching broker requests; nothing was published");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("pipeline run failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<Outcome> {
    let config = Config::load(&cli.config).context("configuration could not be loaded")?;
    let mut pipeline = build_pipeline(&config)?;
    Ok(pipeline.run().await?)
}

fn build_pipeline(config: &Config) -> anyhow::Result<Pipeline> {
    let broker = BrokerClient::new(BrokerSettings {
        base_url: config.broker.url.clone(),
        api_key: config.broker.api_key.clone(),
        timeout: Duration::from_secs(10),
    })?;

    let computation = RscriptRunner::new(RscriptSettings {
        interpreter: DEFAULT_INTERPRETER.to_string(),
        script_path: config.rscript.script_path.clone(),
        los_max: config.rscript.los_max,
        error_max: config.rscript.error_max,
        clinic_nums: config.rscript.clinic_numbers()?,
    });

    let sftp: Arc<dyn RemoteFileStore> = Arc::new(SftpStore::new(SftpSettings {
        host: config.sftp.host.clone(),
        port: config.sftp.port,
        username: config.sftp.username.clone(),
        password: config.sftp.password.clone(),
        timeout: Duration::from_secs(config.sftp.timeout_secs),
        folder: config.sftp.folder.clone(),
    }));
    let store: Arc<dyn RemoteFileStore> = match &config.pipeline.encryption_key {
        Some(key) => Arc::new(EncryptedStore::new(sftp, key)?),
        None => sftp,
    };

    let status = config
        .pipeline
        .status_file
        .as_deref()
        .map(StatusStore::load)
        .transpose()
        .context("status file could not be loaded")?;

    Ok(Pipeline::new(
        Arc::new(broker),
        Arc::new(computation),
        store,
        status,
        PipelineSettings {
            tag: config.requests.tag.clone(),
            working_dir: config.pipeline.working_dir.clone(),
            zip_result: config.pipeline.zip_result,
        },
    ))
}
