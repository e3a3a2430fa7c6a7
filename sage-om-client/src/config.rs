//! Connection and folder configuration as stored in the settings file.

use crate::errors::{SageError, SageResult};
use crate::protector::SecretProtector;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

const MAX_SERVER_LEN: usize = 255;
const MAX_DATABASE_LEN: usize = 128;
const MAX_USER_LEN: usize = 50;
const MAX_SECRET_LEN: usize = 500;

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Parameters addressing one accounting data store.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ConnectionConfig {
    #[serde(rename = "MAEPath", skip_serializing_if = "Option::is_none")]
    pub mae_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_database_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Plain or protected secret.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("mae_path", &self.mae_path)
            .field("company_server", &self.company_server)
            .field("company_database_name", &self.company_database_name)
            .field("user_name", &self.user_name)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Resolved addressing mode of a [`ConnectionConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address<'a> {
    /// Local `.mae` company file.
    File(&'a str),
    /// SQL-hosted company.
    Server { server: &'a str, database: &'a str },
}

impl ConnectionConfig {
    pub fn from_file(path: impl Into<String>) -> Self {
        Self {
            mae_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn from_server(server: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            company_server: Some(server.into()),
            company_database_name: Some(database.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user_name = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// The file path wins when set; otherwise both server and database are
    /// required.
    pub fn address(&self) -> SageResult<Address<'_>> {
        if let Some(path) = present(self.mae_path.as_deref()) {
            return Ok(Address::File(path));
        }
        match (
            present(self.company_server.as_deref()),
            present(self.company_database_name.as_deref()),
        ) {
            (Some(server), Some(database)) => Ok(Address::Server { server, database }),
            _ => Err(SageError::IncompleteConfig),
        }
    }

    /// Checks every rule and reports all violations at once.
    pub fn validate(&self) -> SageResult<()> {
        let mut problems = Vec::new();

        if self.address().is_err() {
            problems.push("either a .mae path or a SQL server with a database name is required".to_owned());
        }
        if let Some(path) = present(self.mae_path.as_deref()) {
            if !path.to_ascii_lowercase().ends_with(".mae") {
                problems.push("the MAE path must point to a .mae file".to_owned());
            }
        }
        if let Some(server) = present(self.company_server.as_deref()) {
            if server.chars().count() > MAX_SERVER_LEN {
                problems.push("the server name is too long".to_owned());
            }
            match present(self.company_database_name.as_deref()) {
                None => problems.push("a database name is required when a server is set".to_owned()),
                Some(db) if db.chars().count() > MAX_DATABASE_LEN => {
                    problems.push("the database name is too long".to_owned());
                }
                Some(_) => {}
            }
        }
        if present(self.user_name.as_deref()).is_some_and(|u| u.chars().count() > MAX_USER_LEN) {
            problems.push("the user name is too long".to_owned());
        }
        if present(self.password.as_deref()).is_some_and(|p| p.chars().count() > MAX_SECRET_LEN) {
            problems.push("the password is too long (or its protection is corrupt)".to_owned());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(SageError::Validation(problems))
        }
    }
}

/// One company file of a folder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// A named set of company files: ledger (`mae`), commercial (`gcm`),
/// fixed assets (`imo`) and payment means (`mdp`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FolderConfig {
    pub id: String,
    pub name: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mae: Option<FileConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gcm: Option<FileConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imo: Option<FileConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mdp: Option<FileConfig>,
    /// SQL server read from the `.mae` file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_database: Option<String>,
}

impl FolderConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Connection parameters for the folder's ledger file.
    pub fn connection_config(&self) -> ConnectionConfig {
        let mae = self.mae.clone().unwrap_or_default();
        ConnectionConfig {
            mae_path: mae.path,
            company_server: self.company_server.clone(),
            company_database_name: self.company_database.clone(),
            user_name: mae.user,
            password: mae.password,
        }
    }

    fn files_mut(&mut self) -> impl Iterator<Item = &mut FileConfig> {
        [&mut self.mae, &mut self.gcm, &mut self.imo, &mut self.mdp]
            .into_iter()
            .filter_map(Option::as_mut)
    }
}

/// Every stored folder. At most one is active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FoldersConfig {
    pub folders: Vec<FolderConfig>,
}

impl FoldersConfig {
    /// The active folder, only when exactly one is flagged.
    pub fn active(&self) -> Option<&FolderConfig> {
        let mut active = self.folders.iter().filter(|f| f.active);
        match (active.next(), active.next()) {
            (Some(folder), None) => Some(folder),
            _ => None,
        }
    }

    pub fn get(&self, id: &str) -> Option<&FolderConfig> {
        self.folders.iter().find(|f| f.id == id)
    }

    /// Flags `id` active and every other folder inactive. Returns whether
    /// `id` exists; when it does not, no folder is left active.
    pub fn activate(&mut self, id: &str) -> bool {
        let mut found = false;
        for folder in &mut self.folders {
            folder.active = folder.id == id;
            found |= folder.active;
        }
        found
    }

    /// Inserts or replaces by id and returns the stored id.
    pub fn upsert(&mut self, mut folder: FolderConfig) -> String {
        if folder.id.trim().is_empty() {
            folder.id = uuid::Uuid::new_v4().to_string();
        }
        if folder.active {
            for other in &mut self.folders {
                other.active = false;
            }
        }
        let id = folder.id.clone();
        match self.folders.iter_mut().find(|f| f.id == id) {
            Some(existing) => *existing = folder,
            None => self.folders.push(folder),
        }
        id
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.folders.len();
        self.folders.retain(|f| f.id != id);
        self.folders.len() != before
    }

    /// Encrypts every plain sub-config secret.
    pub fn protect_secrets(&mut self, protector: &dyn SecretProtector) -> SageResult<()> {
        for folder in &mut self.folders {
            for file in folder.files_mut() {
                if let Some(secret) = file.password.as_deref() {
                    file.password = Some(protector.encrypt(secret)?);
                }
            }
        }
        Ok(())
    }

    /// Decrypts sub-config secrets for display. Secrets that cannot be
    /// recovered on this machine are cleared.
    pub fn reveal_secrets(&mut self, protector: &dyn SecretProtector) {
        for folder in &mut self.folders {
            let folder_id = folder.id.clone();
            for file in folder.files_mut() {
                let Some(secret) = file.password.as_deref() else {
                    continue;
                };
                if !protector.is_protected(secret) {
                    continue;
                }
                file.password = match protector.decrypt(secret) {
                    Ok(plain) => Some(plain),
                    Err(e) => {
                        tracing::warn!(folder_id = %folder_id, error = %e, "Unreadable folder secret cleared");
                        None
                    }
                };
            }
        }
    }
}

/// SQL connection hints stored in a `.mae` company file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaeFileInfo {
    pub company_server: String,
    /// The file stem.
    pub company_database: String,
    pub creator: String,
    pub kind: String,
}

impl MaeFileInfo {
    pub fn parse(path: &Path) -> SageResult<Self> {
        let contents = std::fs::read(path)?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::parse_str(&stem, &String::from_utf8_lossy(&contents)))
    }

    /// Parses INI-style `Key=Value` lines; later occurrences win.
    pub fn parse_str(database: &str, contents: &str) -> Self {
        let mut info = Self {
            company_database: database.to_owned(),
            ..Self::default()
        };
        for line in contents.lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            let value = value.trim().to_owned();
            match key.trim().to_ascii_lowercase().as_str() {
                "serveursql" => info.company_server = value,
                "createur" => info.creator = value,
                "type" => info.kind = value,
                _ => {}
            }
        }
        info
    }
}
