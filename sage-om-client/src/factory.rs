//! Resolves which stored configuration to use and builds connections.

use crate::config::{ConnectionConfig, FoldersConfig};
use crate::connection::HybridConnection;
use crate::errors::SageResult;
use crate::interop::{InteropGenerator, InteropProvider};
use crate::native::{ComBackend, NativeBackend};
use crate::protector::SecretProtector;
use crate::settings::{SAGE_CONFIG_SECTION, SAGE_FOLDERS_SECTION, SettingsStore, load_section};
use std::sync::Arc;

/// Builds [`HybridConnection`]s from the settings store.
///
/// Configuration is re-read on every call so edits apply to the next
/// connection without a restart.
pub struct ConnectionFactory<B: NativeBackend = ComBackend> {
    settings: Arc<dyn SettingsStore>,
    protector: Arc<dyn SecretProtector>,
    interop: Arc<dyn InteropProvider>,
    backend: Arc<B>,
}

impl<B: NativeBackend> Clone for ConnectionFactory<B> {
    fn clone(&self) -> Self {
        Self {
            settings: Arc::clone(&self.settings),
            protector: Arc::clone(&self.protector),
            interop: Arc::clone(&self.interop),
            backend: Arc::clone(&self.backend),
        }
    }
}

impl ConnectionFactory<ComBackend> {
    /// Factory over the COM backend and the process-wide interop generator.
    pub fn with_defaults(settings: Arc<dyn SettingsStore>, protector: Arc<dyn SecretProtector>) -> Self {
        Self::new(
            settings,
            protector,
            Arc::new(InteropGenerator::default()),
            Arc::new(ComBackend),
        )
    }
}

impl<B: NativeBackend> ConnectionFactory<B> {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        protector: Arc<dyn SecretProtector>,
        interop: Arc<dyn InteropProvider>,
        backend: Arc<B>,
    ) -> Self {
        Self {
            settings,
            protector,
            interop,
            backend,
        }
    }

    /// The single active folder's ledger file when exactly one folder is
    /// active, otherwise the legacy section.
    pub fn resolve_config(&self) -> SageResult<ConnectionConfig> {
        let folders: FoldersConfig = load_section(self.settings.as_ref(), SAGE_FOLDERS_SECTION)?;
        if let Some(folder) = folders.active() {
            tracing::info!(folder_id = %folder.id, folder_name = %folder.name, "Using active folder");
            return Ok(folder.connection_config());
        }
        tracing::info!("No single active folder; using {SAGE_CONFIG_SECTION}");
        load_section(self.settings.as_ref(), SAGE_CONFIG_SECTION)
    }

    /// Connection for the currently configured company. Not opened.
    pub fn create(&self) -> SageResult<HybridConnection<B>> {
        Ok(self.create_with(self.resolve_config()?))
    }

    /// Connection for an explicit configuration. Not opened.
    pub fn create_with(&self, config: ConnectionConfig) -> HybridConnection<B> {
        HybridConnection::new(
            config,
            Arc::clone(&self.protector),
            Arc::clone(&self.interop),
            Arc::clone(&self.backend),
        )
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    pub fn protector(&self) -> &Arc<dyn SecretProtector> {
        &self.protector
    }
}
