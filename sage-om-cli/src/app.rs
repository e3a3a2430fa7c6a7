use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use sage_om_client::{
    ConnectionConfig, FileConfig, FolderConfig, FolderService, HealthStatus, InteropGenerator,
    MaeFileInfo, SageApi, SageError, SageVersionDetector, SecretProtector, ServiceResult,
    TiersQuery,
};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Open and close the configured company
    Ping,
    /// Health report for the configured company
    Health,
    /// Open and close an explicit company
    Test(ConnectionArgs),
    /// Third-party accounts
    #[command(subcommand)]
    Tiers(TiersCommand),
    /// Typed binding acquisition
    #[command(subcommand)]
    Interop(InteropCommand),
    /// Installed component version
    Version,
    /// Stored company folders
    #[command(subcommand)]
    Folders(FoldersCommand),
    /// Protect a secret for storage in the settings file
    Protect { value: String },
}

#[derive(Debug, Args)]
pub struct ConnectionArgs {
    /// Company ledger file (.mae)
    #[arg(long)]
    pub mae: Option<String>,
    #[arg(long)]
    pub server: Option<String>,
    #[arg(long)]
    pub database: Option<String>,
    #[arg(long)]
    pub user: Option<String>,
    #[arg(long, env = "SAGE_OM_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

impl ConnectionArgs {
    fn into_config(self) -> ConnectionConfig {
        ConnectionConfig {
            mae_path: self.mae,
            company_server: self.server,
            company_database_name: self.database,
            user_name: self.user,
            password: self.password,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum TiersCommand {
    List {
        /// client, fournisseur, salarie, autre or all
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        active: bool,
        #[arg(long, default_value_t = 0)]
        skip: i64,
        #[arg(long, default_value_t = sage_om_client::DEFAULT_TAKE)]
        take: i64,
    },
    Get { number: String },
}

#[derive(Debug, Subcommand)]
pub enum InteropCommand {
    Status,
    Generate,
    Invalidate,
}

#[derive(Debug, Subcommand)]
pub enum FoldersCommand {
    List {
        /// Decrypt stored secrets
        #[arg(long)]
        reveal: bool,
    },
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        mae: PathBuf,
        #[arg(long)]
        user: Option<String>,
        #[arg(long, env = "SAGE_OM_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        #[arg(long)]
        activate: bool,
    },
    Activate { id: String },
    Remove { id: String },
    ParseMae { path: PathBuf },
}

/// JSON body plus whether the command achieved what was asked.
#[derive(Debug)]
pub struct Report {
    pub body: Value,
    pub success: bool,
}

impl Report {
    fn new(body: Value, success: bool) -> Self {
        Self { body, success }
    }

    fn ok(body: Value) -> Self {
        Self::new(body, true)
    }

    /// Same body as an unsuccessful `ping`.
    fn service_error(operation: &str, err: &SageError) -> Result<Self> {
        tracing::error!(operation, error = %err, "Sage operation failed");
        let result = ServiceResult::failure(format!("Error: {err}"));
        Ok(Self::new(serde_json::to_value(&result)?, false))
    }
}

pub struct App {
    api: Arc<dyn SageApi>,
    folders: FolderService,
    protector: Arc<dyn SecretProtector>,
    interop: Arc<InteropGenerator>,
    detector: SageVersionDetector,
}

impl App {
    pub fn new(
        api: Arc<dyn SageApi>,
        folders: FolderService,
        protector: Arc<dyn SecretProtector>,
        interop: Arc<InteropGenerator>,
        detector: SageVersionDetector,
    ) -> Self {
        Self {
            api,
            folders,
            protector,
            interop,
            detector,
        }
    }

    pub async fn execute(&self, command: Command) -> Result<Report> {
        tracing::debug!(?command, "Executing command");
        match command {
            Command::Ping => {
                let result = self.api.ping().await;
                Ok(Report::new(serde_json::to_value(&result)?, result.success))
            }
            Command::Health => {
                let report = self.api.health().await;
                let healthy = report.status != HealthStatus::Unhealthy;
                Ok(Report::new(serde_json::to_value(&report)?, healthy))
            }
            Command::Test(args) => {
                let result = self.api.test_connection(args.into_config()).await;
                Ok(Report::new(serde_json::to_value(&result)?, result.success))
            }
            Command::Tiers(command) => self.run_tiers(command).await,
            Command::Interop(command) => self.run_interop(command).await,
            Command::Version => {
                let info = self.detector.detect();
                let mut body = serde_json::to_value(&info)?;
                body["display"] = Value::String(info.to_string());
                Ok(Report::new(body, info.is_available()))
            }
            Command::Folders(command) => self.run_folders(command),
            Command::Protect { value } => {
                let protected = self.protector.encrypt(&value)?;
                Ok(Report::ok(json!({ "protected": protected })))
            }
        }
    }

    async fn run_tiers(&self, command: TiersCommand) -> Result<Report> {
        match command {
            TiersCommand::List {
                kind,
                active,
                skip,
                take,
            } => {
                let query = TiersQuery {
                    kind,
                    active_only: active,
                    skip,
                    take,
                };
                match self.api.list_tiers(query).await {
                    Ok(list) => Ok(Report::ok(serde_json::to_value(&list)?)),
                    Err(e) => Report::service_error("tiers.list", &e),
                }
            }
            TiersCommand::Get { number } => match self.api.get_tiers(number.clone()).await {
                Ok(Some(tiers)) => Ok(Report::ok(serde_json::to_value(&tiers)?)),
                Ok(None) => Ok(Report::new(
                    json!({ "success": false, "message": format!("Tiers {number} not found") }),
                    false,
                )),
                Err(e) => Report::service_error("tiers.get", &e),
            },
        }
    }

    async fn run_interop(&self, command: InteropCommand) -> Result<Report> {
        match command {
            InteropCommand::Status => Ok(Report::ok(serde_json::to_value(self.interop.status())?)),
            InteropCommand::Generate => {
                let interop = Arc::clone(&self.interop);
                let result = tokio::task::spawn_blocking(move || interop.generate_or_get())
                    .await
                    .context("binding generation task failed")?;
                Ok(Report::new(serde_json::to_value(&result)?, result.success))
            }
            InteropCommand::Invalidate => {
                self.interop.invalidate();
                Ok(Report::ok(json!({ "success": true, "message": "Interop cache cleared" })))
            }
        }
    }

    fn run_folders(&self, command: FoldersCommand) -> Result<Report> {
        match command {
            FoldersCommand::List { reveal } => {
                let folders = if reveal {
                    self.folders.list_revealed()?
                } else {
                    self.folders.list()?
                };
                Ok(Report::ok(serde_json::to_value(&folders)?))
            }
            FoldersCommand::Add {
                name,
                mae,
                user,
                password,
                activate,
            } => {
                let hints = match MaeFileInfo::parse(&mae) {
                    Ok(info) => Some(info),
                    Err(e) => {
                        tracing::warn!(path = %mae.display(), error = %e, "Could not read .mae file");
                        None
                    }
                };
                let folder = FolderConfig {
                    active: activate,
                    mae: Some(FileConfig {
                        path: Some(mae.display().to_string()),
                        user,
                        password,
                    }),
                    company_server: hints
                        .as_ref()
                        .map(|h| h.company_server.clone())
                        .filter(|s| !s.is_empty()),
                    company_database: hints.map(|h| h.company_database),
                    ..FolderConfig::new(name)
                };
                let id = self.folders.save(folder)?;
                Ok(Report::ok(json!({ "id": id })))
            }
            FoldersCommand::Activate { id } => {
                let found = self.folders.activate(&id)?;
                let message = if found {
                    format!("Folder {id} is active")
                } else {
                    format!("Folder {id} not found; no folder is active")
                };
                Ok(Report::new(json!({ "success": found, "message": message }), found))
            }
            FoldersCommand::Remove { id } => {
                let removed = self.folders.remove(&id)?;
                Ok(Report::new(json!({ "success": removed, "id": id }), removed))
            }
            FoldersCommand::ParseMae { path } => {
                let info = MaeFileInfo::parse(&path)
                    .with_context(|| format!("cannot read {}", path.display()))?;
                Ok(Report::ok(serde_json::to_value(&info)?))
            }
        }
    }
}
