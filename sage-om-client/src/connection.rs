//! Hybrid connection to the Objets Métiers accounting session.
//!
//! `open()` tries the typed binding first and falls back to probing the
//! known registration identifiers. The session object is bound to the
//! thread that created it: a [`HybridConnection`] is neither `Send` nor
//! `Sync` and must be created, used and dropped inside
//! [`StaRunner::run`](crate::StaRunner::run).

use crate::apartment;
use crate::config::{Address, ConnectionConfig};
use crate::errors::{SageError, SageResult};
use crate::interop::InteropProvider;
use crate::native::{
    BindingModule, ComBackend, ExportedType, NativeBackend, NativeObject, TypeKind, set_path,
};
use crate::protector::SecretProtector;
use std::sync::Arc;

/// Registration identifier of the accounting application object.
pub const BASE_IDENTIFIER: &str = "Objets100c.BSCPTAApplication100c";

const SESSION_CLASS: &str = "BSCPTAApplication100cClass";
const SESSION_INTERFACE: &str = "BSCPTAApplication100c";
const SESSION_STEM: &str = "BSCPTAApplication";

/// Identifiers probed in order: the base name, then the numerically
/// suffixed variants registered by different releases.
pub fn known_identifiers() -> Vec<String> {
    std::iter::once(BASE_IDENTIFIER.to_owned())
        .chain((1..=8).map(|n| format!("{BASE_IDENTIFIER}.{n}")))
        .collect()
}

/// How the current session was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingStrategy {
    TypedBinding,
    IdentifierProbe,
}

/// Concrete session class exported by a binding, by naming convention.
fn find_session_class(types: &[ExportedType]) -> Option<&ExportedType> {
    types.iter().filter(|t| t.kind == TypeKind::Class).find(|t| {
        t.name.eq_ignore_ascii_case(SESSION_CLASS)
            || (t.name.contains(SESSION_STEM) && t.name.ends_with("Class"))
    })
}

fn find_session_interface(types: &[ExportedType]) -> Option<&ExportedType> {
    types.iter().find(|t| {
        t.name.eq_ignore_ascii_case(SESSION_INTERFACE)
            || (t.kind == TypeKind::Interface
                && t.name.contains(SESSION_STEM)
                && !t.name.starts_with('I'))
    })
}

/// Session handle over the native component.
pub struct HybridConnection<B: NativeBackend = ComBackend> {
    config: ConnectionConfig,
    protector: Arc<dyn SecretProtector>,
    interop: Arc<dyn InteropProvider>,
    backend: Arc<B>,
    session: Option<Box<dyn NativeObject>>,
    strategy: Option<BindingStrategy>,
}

impl<B: NativeBackend> HybridConnection<B> {
    pub fn new(
        config: ConnectionConfig,
        protector: Arc<dyn SecretProtector>,
        interop: Arc<dyn InteropProvider>,
        backend: Arc<B>,
    ) -> Self {
        Self {
            config,
            protector,
            interop,
            backend,
            session: None,
            strategy: None,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Opens the session. A no-op when already open.
    ///
    /// # Errors
    /// - [`SageError::IncompleteConfig`] before anything is attempted when no
    ///   addressing mode is populated.
    /// - [`SageError::InvalidOperation`] when called off an STA runner thread.
    /// - [`SageError::Credential`] when the stored secret cannot be decrypted.
    /// - [`SageError::NoStrategySucceeded`] when both strategies failed,
    ///   wrapping a transient strategy failure in preference to the last one.
    pub fn open(&mut self) -> SageResult<()> {
        self.config.address()?;
        if !apartment::is_pinned() {
            return Err(SageError::InvalidOperation(
                "Sage sessions must be opened on an STA runner thread".into(),
            ));
        }
        if self.is_open() {
            return Ok(());
        }
        self.close();

        let _span = tracing::info_span!("sage.open").entered();
        tracing::info!("Opening Sage session");

        let typed_error = match self.open_typed() {
            Ok(session) => {
                self.adopt(session, BindingStrategy::TypedBinding);
                return Ok(());
            }
            Err(e @ SageError::Credential(_)) => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "Typed binding strategy failed; probing identifiers");
                e
            }
        };

        match self.open_by_identifier() {
            Ok(session) => {
                self.adopt(session, BindingStrategy::IdentifierProbe);
                Ok(())
            }
            Err(e @ SageError::Credential(_)) => Err(e),
            Err(e) => {
                tracing::error!(error = %e, "Identifier probe strategy failed");
                let cause = if typed_error.is_transient() && !e.is_transient() {
                    typed_error
                } else {
                    e
                };
                Err(SageError::NoStrategySucceeded(Box::new(cause)))
            }
        }
    }

    fn adopt(&mut self, session: Box<dyn NativeObject>, strategy: BindingStrategy) {
        tracing::info!(?strategy, "Sage session opened");
        self.session = Some(session);
        self.strategy = Some(strategy);
    }

    fn open_typed(&self) -> SageResult<Box<dyn NativeObject>> {
        let generated = self.interop.generate_or_get();
        let Some(library) = generated.type_library() else {
            return Err(SageError::Generation(generated.message));
        };
        tracing::debug!(
            type_library = %library.display(),
            version = generated.component_version.as_deref().unwrap_or("unknown"),
            "Loading typed binding"
        );

        let module = self.backend.load_binding(library)?;
        let session = self.instantiate_from(module.as_ref())?;
        self.start(session)
    }

    /// Prefers the binding's concrete class; an interface alone cannot be
    /// instantiated, so a live object is resolved through the identifiers.
    fn instantiate_from(&self, module: &dyn BindingModule) -> SageResult<Box<dyn NativeObject>> {
        let types = module.exported_types();

        if let Some(class) = find_session_class(&types) {
            match module.instantiate(class) {
                Ok(session) => {
                    tracing::debug!(class = %class.name, "Session created from binding class");
                    return Ok(session);
                }
                Err(e) => tracing::warn!(class = %class.name, error = %e, "Binding class not instantiable"),
            }
        }

        if let Some(interface) = find_session_interface(&types) {
            tracing::debug!(interface = %interface.name, "Resolving live object for binding interface");
            return self.create_registered();
        }

        let names: Vec<_> = types.iter().map(|t| t.name.as_str()).collect();
        tracing::error!(types = ?names, "No session type in binding");
        Err(SageError::BindingLoad(format!(
            "no {SESSION_STEM} type among {} exported types",
            types.len()
        )))
    }

    fn open_by_identifier(&self) -> SageResult<Box<dyn NativeObject>> {
        let session = self.create_registered()?;
        self.start(session)
    }

    /// Instantiates the first registered identifier; later ones are not
    /// tried once one resolves.
    fn create_registered(&self) -> SageResult<Box<dyn NativeObject>> {
        for identifier in known_identifiers() {
            if self.backend.is_registered(&identifier) {
                tracing::debug!(identifier = %identifier, "Sage identifier resolved");
                return self.backend.create_instance(&identifier);
            }
            tracing::trace!(identifier = %identifier, "Sage identifier not registered");
        }
        Err(SageError::OpenFailed(format!(
            "no registered identifier among {BASE_IDENTIFIER} and its numbered variants"
        )))
    }

    /// Configures, opens and checks a freshly created session.
    fn start(&self, mut session: Box<dyn NativeObject>) -> SageResult<Box<dyn NativeObject>> {
        self.configure(session.as_mut())?;
        session.open()?;
        if session.is_open()? {
            Ok(session)
        } else {
            Err(SageError::OpenFailed("Open() returned but IsOpen is false".into()))
        }
    }

    fn configure(&self, session: &mut dyn NativeObject) -> SageResult<()> {
        match self.config.address()? {
            Address::File(path) => {
                tracing::debug!(mae_path = path, "Addressing company file");
                session.set_field("Name", path.into())?;
            }
            Address::Server { server, database } => {
                tracing::debug!(server, database, "Addressing SQL company");
                session.set_field("CompanyServer", server.into())?;
                session.set_field("CompanyDatabaseName", database.into())?;
            }
        }

        let user = self.config.user_name.clone().unwrap_or_default();
        set_path(session, "Loggable.UserName", user.into())?;
        let secret = self.reveal_secret()?;
        set_path(session, "Loggable.UserPwd", secret.into())
    }

    fn reveal_secret(&self) -> SageResult<String> {
        let Some(secret) = self.config.password.as_deref() else {
            return Ok(String::new());
        };
        if !self.protector.is_protected(secret) {
            return Ok(secret.to_owned());
        }
        self.protector.decrypt(secret).map_err(|e| match e {
            SageError::Credential(_) => e,
            other => SageError::Credential(other.to_string()),
        })
    }

    /// Closes and releases the session. Close failures are logged, never
    /// returned. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.strategy = None;
        let Some(mut session) = self.session.take() else {
            return;
        };
        match session.is_open() {
            Ok(true) => match session.close() {
                Ok(()) => tracing::debug!("Sage session closed"),
                Err(e) => tracing::warn!(error = %e, "Error while closing Sage session"),
            },
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "Could not query Sage session state on close"),
        }
    }

    pub fn is_open(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.is_open().unwrap_or(false))
    }

    pub fn strategy(&self) -> Option<BindingStrategy> {
        self.strategy
    }

    /// The raw session object.
    ///
    /// # Errors
    /// [`SageError::InvalidOperation`] before a successful `open()`.
    pub fn instance(&mut self) -> SageResult<&mut dyn NativeObject> {
        match self.session.as_deref_mut() {
            Some(session) => Ok(session),
            None => Err(SageError::InvalidOperation("Sage connection is not open".into())),
        }
    }
}

impl<B: NativeBackend> Drop for HybridConnection<B> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apartment::ApartmentGuard;
    use crate::interop::{GenerationResult, MockInteropProvider};
    use crate::native::{MockNativeBackend, NativeValue};
    use crate::protector::MockSecretProtector;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct SessionState {
        fields: HashMap<String, String>,
        open: bool,
        opens: usize,
        closes: usize,
        refuse_open: bool,
        busy_opens: usize,
    }

    /// Session whose state outlives the boxed object.
    struct FakeSession(Arc<Mutex<SessionState>>);

    struct FakeLoggable(Arc<Mutex<SessionState>>);

    impl NativeObject for FakeLoggable {
        fn set_field(&mut self, name: &str, value: NativeValue) -> SageResult<()> {
            let mut state = self.0.lock().unwrap();
            state
                .fields
                .insert(format!("Loggable.{name}"), value.as_text().unwrap_or_default());
            Ok(())
        }

        fn get_field(&self, name: &str) -> SageResult<NativeValue> {
            Err(SageError::InvalidOperation(format!("no member {name}")))
        }

        fn invoke(&mut self, method: &str, _args: Vec<NativeValue>) -> SageResult<NativeValue> {
            Err(SageError::InvalidOperation(format!("no method {method}")))
        }
    }

    impl NativeObject for FakeSession {
        fn set_field(&mut self, name: &str, value: NativeValue) -> SageResult<()> {
            let mut state = self.0.lock().unwrap();
            state.fields.insert(name.into(), value.as_text().unwrap_or_default());
            Ok(())
        }

        fn get_field(&self, name: &str) -> SageResult<NativeValue> {
            match name {
                "Loggable" => Ok(NativeValue::Object(Box::new(FakeLoggable(self.0.clone())))),
                "IsOpen" => Ok(NativeValue::Bool(self.0.lock().unwrap().open)),
                other => Err(SageError::InvalidOperation(format!("no member {other}"))),
            }
        }

        fn invoke(&mut self, method: &str, _args: Vec<NativeValue>) -> SageResult<NativeValue> {
            let mut state = self.0.lock().unwrap();
            match method {
                "Open" => {
                    state.opens += 1;
                    if state.busy_opens > 0 {
                        state.busy_opens -= 1;
                        return Err(SageError::Native {
                            code: 0x8001_010A,
                            message: "The message filter indicated that the application is busy".into(),
                        });
                    }
                    state.open = !state.refuse_open;
                    Ok(NativeValue::Empty)
                }
                "Close" => {
                    state.closes += 1;
                    state.open = false;
                    Ok(NativeValue::Empty)
                }
                other => Err(SageError::InvalidOperation(format!("no method {other}"))),
            }
        }
    }

    struct FakeModule {
        types: Vec<ExportedType>,
        state: Arc<Mutex<SessionState>>,
    }

    impl BindingModule for FakeModule {
        fn exported_types(&self) -> Vec<ExportedType> {
            self.types.clone()
        }

        fn instantiate(&self, class: &ExportedType) -> SageResult<Box<dyn NativeObject>> {
            assert_eq!(class.kind, TypeKind::Class);
            Ok(Box::new(FakeSession(self.state.clone())))
        }
    }

    fn no_binding() -> Arc<MockInteropProvider> {
        let mut interop = MockInteropProvider::new();
        interop.expect_generate_or_get().returning(|| GenerationResult {
            success: false,
            message: "objets100c.dll not found".into(),
            interop_path: None,
            component_path: None,
            component_version: None,
        });
        Arc::new(interop)
    }

    const COMPONENT: &str = r"C:\Program Files (x86)\Common Files\Sage\Objets Métiers\objets100c.dll";

    fn binding_at(path: &'static str) -> Arc<MockInteropProvider> {
        let mut interop = MockInteropProvider::new();
        interop.expect_generate_or_get().returning(move || GenerationResult {
            success: true,
            message: "cached".into(),
            interop_path: Some(PathBuf::from(path)),
            component_path: Some(PathBuf::from(COMPONENT)),
            component_version: Some("12.0.1.0".into()),
        });
        Arc::new(interop)
    }

    fn plain_protector() -> Arc<MockSecretProtector> {
        let mut protector = MockSecretProtector::new();
        protector
            .expect_is_protected()
            .returning(|s| s.starts_with("ENC:"));
        protector
            .expect_decrypt()
            .returning(|s| Ok(s.trim_start_matches("ENC:").to_owned()));
        Arc::new(protector)
    }

    /// Backend registering only `registered` and serving sessions backed by
    /// `state`.
    fn probe_backend(registered: &'static str, state: Arc<Mutex<SessionState>>) -> MockNativeBackend {
        let mut backend = MockNativeBackend::new();
        backend
            .expect_load_binding()
            .returning(|p| Err(SageError::BindingLoad(p.display().to_string())));
        backend
            .expect_is_registered()
            .returning(move |id| id == registered);
        backend
            .expect_create_instance()
            .returning(move |_| Ok(Box::new(FakeSession(state.clone()))));
        backend
    }

    #[test]
    fn incomplete_config_fails_before_any_attempt() {
        let mut interop = MockInteropProvider::new();
        interop.expect_generate_or_get().never();
        let mut backend = MockNativeBackend::new();
        backend.expect_is_registered().never();

        let _sta = ApartmentGuard::enter().unwrap();
        let mut conn = HybridConnection::new(
            ConnectionConfig::default(),
            plain_protector(),
            Arc::new(interop),
            Arc::new(backend),
        );
        assert!(matches!(conn.open(), Err(SageError::IncompleteConfig)));
        assert!(!conn.is_open());
    }

    #[test]
    fn refuses_to_open_off_runner_thread() {
        let state = Arc::new(Mutex::new(SessionState::default()));
        let mut conn = HybridConnection::new(
            ConnectionConfig::from_file("BIJOU.mae"),
            plain_protector(),
            no_binding(),
            Arc::new(probe_backend(BASE_IDENTIFIER, state)),
        );
        assert!(matches!(conn.open(), Err(SageError::InvalidOperation(_))));
    }

    #[test]
    fn falls_back_to_identifier_probe() {
        let _sta = ApartmentGuard::enter().unwrap();
        let state = Arc::new(Mutex::new(SessionState::default()));
        let mut conn = HybridConnection::new(
            ConnectionConfig::from_server("SQL01", "BIJOU").with_credentials("<Administrateur>", "ENC:pwd"),
            plain_protector(),
            no_binding(),
            Arc::new(probe_backend("Objets100c.BSCPTAApplication100c.6", state.clone())),
        );

        conn.open().unwrap();
        assert!(conn.is_open());
        assert_eq!(conn.strategy(), Some(BindingStrategy::IdentifierProbe));

        let fields = state.lock().unwrap().fields.clone();
        assert_eq!(fields["CompanyServer"], "SQL01");
        assert_eq!(fields["CompanyDatabaseName"], "BIJOU");
        assert_eq!(fields["Loggable.UserName"], "<Administrateur>");
        assert_eq!(fields["Loggable.UserPwd"], "pwd");
        assert!(!fields.contains_key("Name"));

        conn.close();
        assert!(!conn.is_open());
        conn.close();
        assert_eq!(state.lock().unwrap().closes, 1);
        assert!(conn.instance().is_err());
    }

    #[test]
    fn typed_binding_class_is_preferred() {
        let _sta = ApartmentGuard::enter().unwrap();
        let state = Arc::new(Mutex::new(SessionState::default()));
        let module_state = state.clone();

        let mut backend = MockNativeBackend::new();
        backend
            .expect_load_binding()
            .withf(|path| path == std::path::Path::new(COMPONENT))
            .times(1)
            .returning(move |_| {
                Ok(Box::new(FakeModule {
                    types: vec![
                        ExportedType::new("IBSCPTAApplication3", TypeKind::Interface),
                        ExportedType::new("BSCPTAApplication100cClass", TypeKind::Class),
                    ],
                    state: module_state.clone(),
                }))
            });
        backend.expect_is_registered().never();
        backend.expect_create_instance().never();

        let mut conn = HybridConnection::new(
            ConnectionConfig::from_file(r"C:\data\BIJOU.mae"),
            plain_protector(),
            binding_at("Objets100cLib_12_0_1_0.dll"),
            Arc::new(backend),
        );
        conn.open().unwrap();
        assert_eq!(conn.strategy(), Some(BindingStrategy::TypedBinding));
        assert_eq!(state.lock().unwrap().fields["Name"], r"C:\data\BIJOU.mae");
        assert_eq!(state.lock().unwrap().fields["Loggable.UserPwd"], "");
        assert!(conn.instance().is_ok());
    }

    #[test]
    fn binding_without_component_is_not_loaded() {
        let _sta = ApartmentGuard::enter().unwrap();
        let state = Arc::new(Mutex::new(SessionState::default()));
        let mut interop = MockInteropProvider::new();
        interop.expect_generate_or_get().returning(|| GenerationResult {
            success: true,
            message: "cached".into(),
            interop_path: Some(PathBuf::from("Objets100cLib_12_0_1_0.dll")),
            component_path: None,
            component_version: Some("12.0.1.0".into()),
        });
        let mut backend = MockNativeBackend::new();
        backend.expect_load_binding().never();
        backend
            .expect_is_registered()
            .returning(|id| id == BASE_IDENTIFIER);
        backend
            .expect_create_instance()
            .returning(move |_| Ok(Box::new(FakeSession(state.clone()))));

        let mut conn = HybridConnection::new(
            ConnectionConfig::from_file("BIJOU.mae"),
            plain_protector(),
            Arc::new(interop),
            Arc::new(backend),
        );
        conn.open().unwrap();
        assert_eq!(conn.strategy(), Some(BindingStrategy::IdentifierProbe));
    }

    #[test]
    fn binding_interface_resolves_through_identifiers() {
        let _sta = ApartmentGuard::enter().unwrap();
        let state = Arc::new(Mutex::new(SessionState::default()));

        let mut backend = MockNativeBackend::new();
        let unused = Arc::new(Mutex::new(SessionState::default()));
        backend.expect_load_binding().returning(move |_| {
            Ok(Box::new(FakeModule {
                types: vec![ExportedType::new("BSCPTAApplication100c", TypeKind::Interface)],
                state: unused.clone(),
            }))
        });
        backend
            .expect_is_registered()
            .returning(|id| id == BASE_IDENTIFIER);
        let session_state = state.clone();
        backend
            .expect_create_instance()
            .times(1)
            .returning(move |_| Ok(Box::new(FakeSession(session_state.clone()))));

        let mut conn = HybridConnection::new(
            ConnectionConfig::from_file("BIJOU.mae"),
            plain_protector(),
            binding_at("Objets100cLib_unknown.dll"),
            Arc::new(backend),
        );
        conn.open().unwrap();
        assert_eq!(conn.strategy(), Some(BindingStrategy::TypedBinding));
        assert_eq!(state.lock().unwrap().opens, 1);
    }

    #[test]
    fn open_reporting_closed_exhausts_strategies() {
        let _sta = ApartmentGuard::enter().unwrap();
        let state = Arc::new(Mutex::new(SessionState {
            refuse_open: true,
            ..SessionState::default()
        }));
        let mut conn = HybridConnection::new(
            ConnectionConfig::from_file("BIJOU.mae"),
            plain_protector(),
            no_binding(),
            Arc::new(probe_backend(BASE_IDENTIFIER, state)),
        );
        let err = conn.open().unwrap_err();
        assert!(matches!(err, SageError::NoStrategySucceeded(_)));
        assert!(!err.is_transient());
        assert!(conn.instance().is_err());
    }

    #[test]
    fn nothing_registered_exhausts_strategies() {
        let _sta = ApartmentGuard::enter().unwrap();
        let state = Arc::new(Mutex::new(SessionState::default()));
        let mut conn = HybridConnection::new(
            ConnectionConfig::from_file("BIJOU.mae"),
            plain_protector(),
            no_binding(),
            Arc::new(probe_backend("Other.Application", state)),
        );
        assert!(matches!(conn.open(), Err(SageError::NoStrategySucceeded(_))));
    }

    #[test]
    fn busy_server_on_open_is_transient() {
        let _sta = ApartmentGuard::enter().unwrap();
        let state = Arc::new(Mutex::new(SessionState {
            busy_opens: 1,
            ..SessionState::default()
        }));
        let mut conn = HybridConnection::new(
            ConnectionConfig::from_file("BIJOU.mae"),
            plain_protector(),
            no_binding(),
            Arc::new(probe_backend(BASE_IDENTIFIER, state.clone())),
        );

        let err = conn.open().unwrap_err();
        assert!(matches!(&err, SageError::NoStrategySucceeded(cause) if matches!(**cause, SageError::Native { .. })));
        assert!(err.is_transient());
        assert!(!conn.is_open());

        conn.open().unwrap();
        assert_eq!(conn.strategy(), Some(BindingStrategy::IdentifierProbe));
        assert_eq!(state.lock().unwrap().opens, 2);
    }

    #[test]
    fn credential_failure_aborts_open() {
        let _sta = ApartmentGuard::enter().unwrap();
        let state = Arc::new(Mutex::new(SessionState::default()));
        let mut protector = MockSecretProtector::new();
        protector.expect_is_protected().returning(|_| true);
        protector
            .expect_decrypt()
            .times(1)
            .returning(|_| Err(SageError::Credential("bad key".into())));

        let mut conn = HybridConnection::new(
            ConnectionConfig::from_file("BIJOU.mae").with_credentials("u", "ENC:zzz"),
            Arc::new(protector),
            no_binding(),
            Arc::new(probe_backend(BASE_IDENTIFIER, state.clone())),
        );
        assert!(matches!(conn.open(), Err(SageError::Credential(_))));
        assert_eq!(state.lock().unwrap().opens, 0);
    }

    #[test]
    fn drop_closes_open_session() {
        let _sta = ApartmentGuard::enter().unwrap();
        let state = Arc::new(Mutex::new(SessionState::default()));
        {
            let mut conn = HybridConnection::new(
                ConnectionConfig::from_file("BIJOU.mae"),
                plain_protector(),
                no_binding(),
                Arc::new(probe_backend(BASE_IDENTIFIER, state.clone())),
            );
            conn.open().unwrap();
        }
        let state = state.lock().unwrap();
        assert_eq!(state.closes, 1);
        assert!(!state.open);
    }

    #[test]
    fn identifier_list_and_conventions() {
        let ids = known_identifiers();
        assert_eq!(ids.len(), 9);
        assert_eq!(ids[0], BASE_IDENTIFIER);
        assert_eq!(ids[8], "Objets100c.BSCPTAApplication100c.8");

        let types = vec![
            ExportedType::new("IBSCPTAApplication100c", TypeKind::Interface),
            ExportedType::new("BSCPTAApplication100cSqlClass", TypeKind::Class),
        ];
        assert_eq!(find_session_class(&types).unwrap().name, "BSCPTAApplication100cSqlClass");
        assert!(find_session_interface(&types).is_none());
    }
}
