mod app;

use crate::app::{App, Command};
use anyhow::{Context, Result};
use clap::Parser;
use sage_om_client::{
    ComBackend, ConnectionFactory, FolderService, InteropGenerator, JsonSettingsStore,
    MachineProtector, RetryPolicy, SageService, SageVersionDetector, SecretProtector,
    SettingsStore,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Sage 100 Objets Métiers connection tool. Prints JSON on stdout.
#[derive(Debug, Parser)]
#[command(name = "sage-om", version, about)]
struct Cli {
    /// Settings file holding the SageConfig and SageFolders sections
    #[arg(long, env = "SAGE_OM_SETTINGS", default_value = "appsettings.json")]
    settings: PathBuf,

    /// Directory for the daily rolling log
    #[arg(long, env = "SAGE_OM_LOG_DIR", default_value = "logs")]
    log_dir: PathBuf,

    /// Retries for transient native failures
    #[arg(long, env = "SAGE_OM_RETRIES", default_value_t = 3)]
    retries: u32,

    #[command(subcommand)]
    command: Command,
}

fn init_logging(log_dir: &Path) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, "sage-om.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(filter),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(EnvFilter::new("warn")),
        )
        .init();

    guard
}

fn build_app(cli: &Cli) -> Result<App> {
    let settings: Arc<dyn SettingsStore> = Arc::new(
        JsonSettingsStore::open(&cli.settings)
            .with_context(|| format!("cannot open settings {}", cli.settings.display()))?,
    );
    let protector: Arc<dyn SecretProtector> =
        Arc::new(MachineProtector::new().context("cannot initialize the secret protector")?);
    let interop = Arc::new(InteropGenerator::default());

    let factory = ConnectionFactory::new(
        Arc::clone(&settings),
        Arc::clone(&protector),
        interop.clone(),
        Arc::new(ComBackend),
    );
    let service = SageService::new(factory, RetryPolicy::exponential(cli.retries));

    Ok(App::new(
        Arc::new(service),
        FolderService::new(settings, Arc::clone(&protector)),
        protector,
        interop,
        SageVersionDetector::default(),
    ))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let _guard = init_logging(&cli.log_dir);

    tracing::info!(settings = %cli.settings.display(), "Starting sage-om");

    let app = build_app(&cli)?;
    let report = match app.execute(cli.command).await {
        Ok(report) => report,
        Err(err) => {
            tracing::error!(error = ?err, "Command failed");
            return Err(err);
        }
    };

    println!("{}", serde_json::to_string_pretty(&report.body)?);
    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
