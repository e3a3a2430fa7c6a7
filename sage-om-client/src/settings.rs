//! Settings store: sectioned JSON document on disk.

use crate::errors::{SageError, SageResult};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

#[cfg(any(test, feature = "test-support"))]
use mockall::automock;

/// Legacy single connection section.
pub const SAGE_CONFIG_SECTION: &str = "SageConfig";

/// Multi-folder section.
pub const SAGE_FOLDERS_SECTION: &str = "SageFolders";

/// Serializes every read-modify-write of settings files in this process.
static SETTINGS_LOCK: Mutex<()> = Mutex::new(());

/// Read and patch access to sectioned settings.
#[cfg_attr(any(test, feature = "test-support"), automock)]
pub trait SettingsStore: Send + Sync {
    /// Raw value of a top-level section, `None` when absent.
    fn section(&self, key: &str) -> SageResult<Option<Value>>;

    /// Replaces each given top-level section, leaving the others untouched.
    fn save_patch(&self, patch: Map<String, Value>) -> SageResult<()>;
}

/// Deserializes a section, falling back to `T::default()` when absent or
/// null.
pub fn load_section<T>(store: &dyn SettingsStore, key: &str) -> SageResult<T>
where
    T: DeserializeOwned + Default,
{
    match store.section(key)? {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value)
            .map_err(|e| SageError::Settings(format!("section {key}: {e}"))),
    }
}

/// [`SettingsStore`] over a JSON file.
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    /// Opens `path`, creating it as `{}` when missing.
    pub fn open(path: impl Into<PathBuf>) -> SageResult<Self> {
        let path = path.into();
        let _guard = SETTINGS_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, "{}")?;
            tracing::info!(path = %path.display(), "Settings file initialized");
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> SageResult<Map<String, Value>> {
        let text = std::fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&text)? {
            Value::Object(map) => Ok(map),
            other => Err(SageError::Settings(format!(
                "{} must contain a JSON object, found {}",
                self.path.display(),
                type_name(&other)
            ))),
        }
    }

    fn write_document(&self, document: &Map<String, Value>) -> SageResult<()> {
        let text = serde_json::to_string_pretty(document)?;
        let staging = self.path.with_extension("json.tmp");
        std::fs::write(&staging, text)?;
        std::fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl SettingsStore for JsonSettingsStore {
    fn section(&self, key: &str) -> SageResult<Option<Value>> {
        let _guard = SETTINGS_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_document()?.remove(key))
    }

    fn save_patch(&self, patch: Map<String, Value>) -> SageResult<()> {
        let _guard = SETTINGS_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        let mut document = self.read_document()?;
        let keys: Vec<_> = patch.keys().cloned().collect();
        document.extend(patch);
        self.write_document(&document)?;
        tracing::debug!(path = %self.path.display(), sections = ?keys, "Settings patched");
        Ok(())
    }
}
