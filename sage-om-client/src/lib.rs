//! # sage-om-client
//!
//! Acquisition and connection layer for the Sage 100 Objets Métiers
//! automation component.
//!
//! - Locates the installed component and reads its version.
//! - Generates (once per component version) a typed binding with the SDK
//!   type-library importer, and reuses it afterwards.
//! - Opens company sessions through the typed binding, falling back to
//!   runtime identifier probing.
//! - Runs every session on a dedicated STA thread ([`StaRunner`]).
//! - Retries transient failures ([`RetryPolicy`]).
//! - Protects stored secrets with a machine-bound key.
//!
//! ## Features
//! - `test-support`: Enables the `Mock*` seams via `mockall`

mod apartment;
mod config;
mod connection;
mod errors;
mod factory;
mod interop;
mod native;
mod protector;
mod retry;
mod service;
mod settings;
mod sta_runner;
mod version;

// Stable public API
pub use apartment::{ApartmentGuard, is_pinned};
pub use config::{Address, ConnectionConfig, FileConfig, FolderConfig, FoldersConfig, MaeFileInfo};
pub use connection::{BASE_IDENTIFIER, BindingStrategy, HybridConnection, known_identifiers};
pub use errors::{SageError, SageResult, format_hresult, friendly_com_hint, friendly_hresult_hint};
pub use factory::ConnectionFactory;
pub use interop::{
    DEFAULT_GENERATOR_TIMEOUT, GENERATOR_BINARY, GenerationResult, InteropCache, InteropGenerator,
    InteropProvider, InteropSettings, InteropStatus, default_generator_locations,
};
pub use native::{
    BindingModule, ComBackend, ExportedType, NativeBackend, NativeObject, NativeValue, TypeKind,
    set_path,
};
pub use protector::{
    LEGACY_PROTECTED_PREFIX, MachineProtector, PROTECTED_PREFIX, SecretProtector, is_protected,
};
pub use retry::{RetryEvent, RetryObserver, RetryPolicy, TracingRetryObserver};
pub use service::{
    DEFAULT_TAKE, FolderService, HealthReport, HealthStatus, MAX_TAKE, SageApi, SageService,
    ServiceResult, Tiers, TiersList, TiersQuery, TiersSelection, read_tiers_by_number,
    read_tiers_page, tiers_type_code,
};
pub use settings::{
    JsonSettingsStore, SAGE_CONFIG_SECTION, SAGE_FOLDERS_SECTION, SettingsStore, load_section,
};
pub use sta_runner::StaRunner;
pub use version::{
    COMPONENT_BINARY, FileVersionInfo, FileVersionProbe, SageVersionDetector, SageVersionInfo,
    VersionProbe, default_component_locations, sanitize_version,
};

// Platform secret protectors
#[cfg(windows)]
pub use protector::DpapiProtector;
#[cfg(not(windows))]
pub use protector::MachineKeyProtector;

// Test support re-exports
#[cfg(feature = "test-support")]
pub use interop::MockInteropProvider;
#[cfg(feature = "test-support")]
pub use native::MockNativeBackend;
#[cfg(feature = "test-support")]
pub use protector::MockSecretProtector;
#[cfg(feature = "test-support")]
pub use service::MockSageApi;
#[cfg(feature = "test-support")]
pub use settings::MockSettingsStore;
#[cfg(feature = "test-support")]
pub use version::MockVersionProbe;
