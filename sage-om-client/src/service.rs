//! Service operations used by front ends: connectivity checks, third-party
//! account (tiers) reads and folder management.
//!
//! Every native call runs inside [`StaRunner`] on a connection opened and
//! disposed within that single unit of work.

use crate::config::{ConnectionConfig, FolderConfig, FoldersConfig};
use crate::errors::{SageError, SageResult};
use crate::factory::ConnectionFactory;
use crate::native::{ComBackend, NativeBackend, NativeObject, NativeValue};
use crate::protector::SecretProtector;
use crate::retry::RetryPolicy;
use crate::settings::{SAGE_FOLDERS_SECTION, SettingsStore, load_section};
use crate::sta_runner::StaRunner;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::Instrument;

#[cfg(any(test, feature = "test-support"))]
use mockall::automock;

/// Default page size.
pub const DEFAULT_TAKE: i64 = 50;
/// Largest accepted page size.
pub const MAX_TAKE: i64 = 200;
/// Upper bound of the account-number range scanned by type queries.
const NUMBER_RANGE_END: &str = "ZZZZZZZZZZZZ";

/// Success flag plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceResult {
    pub success: bool,
    pub message: String,
}

impl ServiceResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// A third-party account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tiers {
    /// `CT_Num`.
    pub number: String,
    /// `CT_Intitule`.
    pub name: Option<String>,
}

/// One page of accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TiersList {
    pub items: Vec<Tiers>,
    pub total: i64,
}

/// Listing filter and window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TiersQuery {
    /// `client`, `fournisseur`, `salarie`, `autre` or `all`.
    pub kind: Option<String>,
    pub active_only: bool,
    pub skip: i64,
    pub take: i64,
}

/// Which collection a [`TiersQuery`] reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiersSelection {
    Active,
    Kind(i64),
    All,
}

impl TiersQuery {
    pub fn selection(&self) -> TiersSelection {
        if self.active_only {
            return TiersSelection::Active;
        }
        match self.kind.as_deref().map(str::trim) {
            None | Some("") => TiersSelection::All,
            Some(k) if k.eq_ignore_ascii_case("all") => TiersSelection::All,
            Some(k) => TiersSelection::Kind(tiers_type_code(k)),
        }
    }

    /// Clamped `(skip, take)`.
    pub fn window(&self) -> (i64, i64) {
        let take = match self.take {
            t if t <= 0 => DEFAULT_TAKE,
            t => t.min(MAX_TAKE),
        };
        (self.skip.max(0), take)
    }
}

/// Native account type code; unknown kinds read as customers.
pub fn tiers_type_code(kind: &str) -> i64 {
    match kind.trim().to_lowercase().as_str() {
        "fournisseur" => 1,
        "salarie" | "salarié" => 2,
        "autre" => 3,
        _ => 0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Operations exposed to front ends.
#[cfg_attr(any(test, feature = "test-support"), automock)]
#[async_trait]
pub trait SageApi: Send + Sync {
    /// Opens and closes the configured company.
    async fn ping(&self) -> ServiceResult;

    /// Opens and closes an explicit configuration.
    async fn test_connection(&self, config: ConnectionConfig) -> ServiceResult;

    /// # Errors
    /// Settings, connection or native failures, after retries.
    async fn list_tiers(&self, query: TiersQuery) -> SageResult<TiersList>;

    /// `None` when no account has this number.
    ///
    /// # Errors
    /// Settings, connection or native failures, after retries.
    async fn get_tiers(&self, number: String) -> SageResult<Option<Tiers>>;

    async fn health(&self) -> HealthReport;
}

/// [`SageApi`] over a [`ConnectionFactory`].
pub struct SageService<B: NativeBackend + 'static = ComBackend> {
    factory: ConnectionFactory<B>,
    retry: RetryPolicy,
}

impl<B: NativeBackend + 'static> SageService<B> {
    pub fn new(factory: ConnectionFactory<B>, retry: RetryPolicy) -> Self {
        Self { factory, retry }
    }

    /// Opens `config` on a fresh STA thread and reports `IsOpen`.
    async fn probe(&self, operation: &str, config: ConnectionConfig, success: &str) -> ServiceResult {
        let outcome = self
            .retry
            .execute(operation, || {
                let factory = self.factory.clone();
                let config = config.clone();
                StaRunner::run(move || {
                    let mut conn = factory.create_with(config);
                    conn.open()?;
                    Ok(conn.is_open())
                })
            })
            .await;

        match outcome {
            Ok(true) => ServiceResult::ok(success),
            Ok(false) => ServiceResult::failure("Open() did not report IsOpen=true"),
            Err(e) => {
                tracing::error!(operation, error = %e, "Sage connection check failed");
                ServiceResult::failure(format!("Error: {e}"))
            }
        }
    }

    /// Like `ping` but keeps configuration failures apart from connection
    /// failures.
    async fn ping_checked(&self) -> SageResult<ServiceResult> {
        let config = self.factory.resolve_config()?;
        Ok(self.probe("ping", config, "Company database opened (ping)").await)
    }

    /// Runs `work` against an open session of the configured company.
    async fn with_session<T, F>(&self, operation: &'static str, work: F) -> SageResult<T>
    where
        T: Send + 'static,
        F: Fn(&mut dyn NativeObject) -> SageResult<T> + Clone + Send + Sync + 'static,
    {
        self.retry
            .execute(operation, || {
                let factory = self.factory.clone();
                let work = work.clone();
                StaRunner::run(move || {
                    let mut conn = factory.create()?;
                    conn.open()?;
                    let result = work(conn.instance()?);
                    if let Err(e) = &result {
                        tracing::error!(operation, error = %e, "Sage operation failed");
                    }
                    result
                })
            })
            .await
    }
}

#[async_trait]
impl<B: NativeBackend + 'static> SageApi for SageService<B> {
    async fn ping(&self) -> ServiceResult {
        match self
            .ping_checked()
            .instrument(tracing::info_span!("sage.ping"))
            .await
        {
            Ok(result) => result,
            Err(e) => ServiceResult::failure(format!("Error: {e}")),
        }
    }

    async fn test_connection(&self, config: ConnectionConfig) -> ServiceResult {
        if let Err(e) = config.validate() {
            return ServiceResult::failure(e.to_string());
        }
        self.probe("test_connection", config, "Connected to the Sage company")
            .instrument(tracing::info_span!("sage.test_connection"))
            .await
    }

    async fn list_tiers(&self, query: TiersQuery) -> SageResult<TiersList> {
        tracing::debug!(?query, "Listing tiers");
        self.with_session("tiers.list", move |session| read_tiers_page(session, &query))
            .instrument(tracing::info_span!("sage.tiers.list"))
            .await
    }

    async fn get_tiers(&self, number: String) -> SageResult<Option<Tiers>> {
        tracing::debug!(number = %number, "Reading tiers");
        self.with_session("tiers.get", move |session| read_tiers_by_number(session, &number))
            .instrument(tracing::info_span!("sage.tiers.get"))
            .await
    }

    async fn health(&self) -> HealthReport {
        let (status, message) = match self
            .ping_checked()
            .instrument(tracing::info_span!("sage.health"))
            .await
        {
            Ok(r) if r.success => (HealthStatus::Healthy, r.message),
            Ok(r) => (HealthStatus::Degraded, r.message),
            Err(e) => (HealthStatus::Unhealthy, e.to_string()),
        };
        HealthReport {
            status,
            message,
            timestamp: Utc::now(),
        }
    }
}

fn tiers_factory(session: &mut dyn NativeObject) -> SageResult<Box<dyn NativeObject>> {
    session.get_field("FactoryTiers")?.into_object()
}

fn read_tiers(record: &dyn NativeObject) -> SageResult<Tiers> {
    Ok(Tiers {
        number: record.get_field("CT_Num")?.as_text().unwrap_or_default(),
        name: record.get_field("CT_Intitule")?.as_text(),
    })
}

/// Reads one page from the collection selected by `query`.
pub fn read_tiers_page(session: &mut dyn NativeObject, query: &TiersQuery) -> SageResult<TiersList> {
    let mut factory = tiers_factory(session)?;
    let collection = match query.selection() {
        TiersSelection::Active => factory.invoke("QueryActifOrderNumero", Vec::new())?,
        TiersSelection::Kind(code) => factory.invoke(
            "QueryTypeNumeroOrderNumero",
            vec![NativeValue::Int(code), "".into(), NUMBER_RANGE_END.into()],
        )?,
        TiersSelection::All => factory.get_field("ListOrderNumero")?,
    };
    let mut collection = collection.into_object()?;

    let total = collection.get_field("Count")?.as_int()?;
    let (skip, take) = query.window();
    // Native collections are 1-based.
    let first = skip.saturating_add(1);
    let last = skip.saturating_add(take).min(total);

    let mut items = Vec::new();
    for index in first..=last {
        let record = collection
            .invoke("Item", vec![NativeValue::Int(index)])?
            .into_object()?;
        items.push(read_tiers(record.as_ref())?);
    }
    Ok(TiersList { items, total })
}

pub fn read_tiers_by_number(session: &mut dyn NativeObject, number: &str) -> SageResult<Option<Tiers>> {
    let mut factory = tiers_factory(session)?;
    if !factory.invoke("ExistNumero", vec![number.into()])?.as_bool()? {
        return Ok(None);
    }
    let record = factory.invoke("ReadNumero", vec![number.into()])?.into_object()?;
    read_tiers(record.as_ref()).map(Some)
}

/// Folder management backed by the settings store. Each mutation is
/// persisted with a single patch.
pub struct FolderService {
    settings: Arc<dyn SettingsStore>,
    protector: Arc<dyn SecretProtector>,
}

impl FolderService {
    pub fn new(settings: Arc<dyn SettingsStore>, protector: Arc<dyn SecretProtector>) -> Self {
        Self { settings, protector }
    }

    /// Folders as stored, secrets protected.
    pub fn list(&self) -> SageResult<FoldersConfig> {
        load_section(self.settings.as_ref(), SAGE_FOLDERS_SECTION)
    }

    /// Folders with secrets decrypted for editing.
    pub fn list_revealed(&self) -> SageResult<FoldersConfig> {
        let mut folders = self.list()?;
        folders.reveal_secrets(self.protector.as_ref());
        Ok(folders)
    }

    /// Inserts or replaces a folder, protecting its secrets. Returns its id.
    pub fn save(&self, folder: FolderConfig) -> SageResult<String> {
        let mut folders = self.list()?;
        let id = folders.upsert(folder);
        folders.protect_secrets(self.protector.as_ref())?;
        self.persist(&folders)?;
        tracing::info!(folder_id = %id, "Folder saved");
        Ok(id)
    }

    pub fn remove(&self, id: &str) -> SageResult<bool> {
        let mut folders = self.list()?;
        let removed = folders.remove(id);
        if removed {
            self.persist(&folders)?;
            tracing::info!(folder_id = %id, "Folder removed");
        }
        Ok(removed)
    }

    /// Makes `id` the only active folder. An unknown id leaves none active.
    pub fn activate(&self, id: &str) -> SageResult<bool> {
        let mut folders = self.list()?;
        let found = folders.activate(id);
        self.persist(&folders)?;
        if found {
            tracing::info!(folder_id = %id, "Folder activated");
        } else {
            tracing::warn!(folder_id = %id, "Unknown folder; no folder is active");
        }
        Ok(found)
    }

    fn persist(&self, folders: &FoldersConfig) -> SageResult<()> {
        let value = serde_json::to_value(folders)
            .map_err(|e| SageError::Settings(format!("cannot serialize folders: {e}")))?;
        let mut patch = serde_json::Map::new();
        patch.insert(SAGE_FOLDERS_SECTION.to_owned(), value);
        self.settings.save_patch(patch)
    }
}
