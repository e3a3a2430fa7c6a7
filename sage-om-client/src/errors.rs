use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Sage Objets Métiers operations.
pub type SageResult<T> = Result<T, SageError>;

/// Centralized error enum for component acquisition and connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SageError {
    /// The native component binary is not present at any probed location.
    #[error("{binary} not found (probed: {})", display_paths(.probed))]
    ComponentNotFound {
        binary: String,
        probed: Vec<PathBuf>,
    },

    /// The external binding generator is not installed.
    #[error("{tool} not found, install the Windows SDK (probed: {})", display_paths(.probed))]
    ToolNotFound { tool: String, probed: Vec<PathBuf> },

    /// The binding output directory cannot be written to.
    #[error("Insufficient permissions on {}: run as an elevated user", .0.display())]
    PermissionDenied(PathBuf),

    /// The external generator exited unsuccessfully or produced nothing.
    #[error("Binding generation failed: {0}")]
    Generation(String),

    /// A generated binding exists but could not be loaded or instantiated.
    #[error("Binding load failed: {0}")]
    BindingLoad(String),

    /// Neither a local file path nor a (server, database) pair is configured.
    #[error("Incomplete configuration: a MAE path or (company server + database name) is required")]
    IncompleteConfig,

    /// One or more configuration rules were violated.
    #[error("Invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// The native `Open()` returned without reporting an open session.
    #[error("Open failed: {0}")]
    OpenFailed(String),

    /// Every binding strategy was tried and none produced an open session.
    /// Carries the strategy failure that decides whether a retry is worth it.
    #[error("No available binding strategy succeeded in opening the Sage session: {0}")]
    NoStrategySucceeded(#[source] Box<SageError>),

    /// A protected secret could not be decrypted.
    #[error("Credential decryption failed: {0}")]
    Credential(String),

    /// Failure raised by the native component itself.
    #[error("Native error 0x{code:08X}: {message}{}", hint_suffix(.code))]
    Native { code: u32, message: String },

    /// Operation attempted in an invalid state (e.g. session not opened).
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A bounded wait elapsed.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Settings store read or write failure.
    #[error("Settings error: {0}")]
    Settings(String),

    /// Underlying filesystem or process I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Feature not available on this platform.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Catch-all for unexpected internal failures.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SageError {
    /// Whether the failure is eligible for retry: native-level errors,
    /// invalid-operation errors and timeouts. An exhausted open is transient
    /// when its underlying strategy failure is.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Native { .. } | Self::InvalidOperation(_) | Self::Timeout(_) => true,
            Self::NoStrategySucceeded(cause) => cause.is_transient(),
            _ => false,
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn hint_suffix(code: &u32) -> String {
    friendly_hresult_hint(*code).map_or_else(String::new, |hint| format!(" ({hint})"))
}

#[cfg(windows)]
impl From<windows::core::Error> for SageError {
    #[allow(clippy::cast_sign_loss)]
    fn from(err: windows::core::Error) -> Self {
        Self::Native {
            code: err.code().0 as u32,
            message: err.message(),
        }
    }
}

impl From<anyhow::Error> for SageError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for SageError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("Async task join failed: {err}"))
    }
}

impl From<serde_json::Error> for SageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Settings(err.to_string())
    }
}

/// Helper to format an HRESULT with its friendly hint.
pub fn format_hresult(code: u32) -> String {
    let hex = format!("0x{code:08X}");
    match friendly_hresult_hint(code) {
        Some(hint) => format!("{hex}: {hint}"),
        None => hex,
    }
}

/// Maps known COM error codes to actionable operator hints.
pub fn friendly_hresult_hint(code: u32) -> Option<&'static str> {
    match code {
        0x8004_0154 => Some("Class not registered: Objets Métiers is not installed or not registered"),
        0x800401F3 => Some("Invalid class string: the ProgID is unknown on this machine"),
        0x8008_0005 => Some("Server process failed to start"),
        0x8007_0005 => Some("Access denied: check DCOM permissions and file ACLs"),
        0x8001_0106 => Some("COM already initialized with a different apartment model"),
        0x8001_010E => Some("Object called from the wrong thread (apartment affinity violated)"),
        0x8002_0006 => Some("Unknown member name on the dispatch interface"),
        0x8002_0009 => Some("The component raised an exception, see message"),
        0x8002_802B => Some("Type library element not found"),
        0x8002_9C4A => Some("Type library could not be loaded"),
        0x8000_4003 => Some("Invalid pointer (E_POINTER)"),
        _ => None,
    }
}

/// Maps a [`SageError`] to a friendly COM hint if it carries an HRESULT.
pub fn friendly_com_hint(error: &SageError) -> Option<&'static str> {
    match error {
        SageError::Native { code, .. } => friendly_hresult_hint(*code),
        _ => None,
    }
}
