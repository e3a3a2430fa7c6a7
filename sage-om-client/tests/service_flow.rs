mod common;

use common::{Company, CompanyBackend, NoInterop, ReversingProtector, Row};
use sage_om_client::{
    ConnectionConfig, ConnectionFactory, FileConfig, FolderConfig, FolderService, HealthStatus,
    JsonSettingsStore, RetryPolicy, SAGE_CONFIG_SECTION, SageApi, SageError, SageService,
    SettingsStore, TiersQuery,
};
use std::sync::Arc;

fn rows() -> Vec<Row> {
    vec![
        Row::new("CARAT", "Carat SA", 0, true),
        Row::new("BIJOU", "Bijouterie", 0, false),
        Row::new("FOURN01", "Fournisseur un", 1, true),
        Row::new("SAL001", "", 2, true),
        Row::new("ZAZA", "Zaza", 0, true),
    ]
}

struct Fixture {
    _dir: tempfile::TempDir,
    settings: Arc<JsonSettingsStore>,
    company: Company,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(JsonSettingsStore::open(dir.path().join("appsettings.json")).unwrap());
        Self {
            _dir: dir,
            settings,
            company: Company::with_rows(rows()),
        }
    }

    fn with_legacy_config(self) -> Self {
        let mut patch = serde_json::Map::new();
        patch.insert(
            SAGE_CONFIG_SECTION.into(),
            serde_json::to_value(
                ConnectionConfig::from_file(r"C:\Sage\BIJOU.mae").with_credentials("<Administrateur>", "ENC:terces"),
            )
            .unwrap(),
        );
        self.settings.save_patch(patch).unwrap();
        self
    }

    fn service_with(&self, backend: CompanyBackend, retry: RetryPolicy) -> SageService<CompanyBackend> {
        let factory = ConnectionFactory::new(
            self.settings.clone(),
            Arc::new(ReversingProtector),
            Arc::new(NoInterop),
            Arc::new(backend),
        );
        SageService::new(factory, retry)
    }

    fn service(&self) -> SageService<CompanyBackend> {
        self.service_with(CompanyBackend::new(self.company.clone()), RetryPolicy::none())
    }

    fn folders(&self) -> FolderService {
        FolderService::new(self.settings.clone(), Arc::new(ReversingProtector))
    }
}

fn numbers(list: &sage_om_client::TiersList) -> Vec<&str> {
    list.items.iter().map(|t| t.number.as_str()).collect()
}

#[tokio::test]
async fn ping_opens_configured_company_on_runner_thread() {
    let fixture = Fixture::new().with_legacy_config();
    let result = fixture.service().ping().await;
    assert!(result.success, "{}", result.message);

    let state = fixture.company.state();
    assert_eq!(state.fields["Name"], r"C:\Sage\BIJOU.mae");
    assert_eq!(state.fields["Loggable.UserName"], "<Administrateur>");
    assert_eq!(state.fields["Loggable.UserPwd"], "secret");
    assert_eq!((state.opens, state.closes), (1, 1));
    assert!(!state.open);
    assert!(state.threads[0].as_deref().unwrap().starts_with("sage-sta-"));
}

#[tokio::test]
async fn tiers_pages_are_one_based_and_clamped() {
    let fixture = Fixture::new().with_legacy_config();
    let service = fixture.service();

    let all = service.list_tiers(TiersQuery::default()).await.unwrap();
    assert_eq!(all.total, 5);
    assert_eq!(numbers(&all), ["BIJOU", "CARAT", "FOURN01", "SAL001", "ZAZA"]);

    let page = service
        .list_tiers(TiersQuery { skip: 1, take: 2, ..TiersQuery::default() })
        .await
        .unwrap();
    assert_eq!(numbers(&page), ["CARAT", "FOURN01"]);
    assert_eq!(page.total, 5);

    let past_end = service
        .list_tiers(TiersQuery { skip: 10, take: 5, ..TiersQuery::default() })
        .await
        .unwrap();
    assert!(past_end.items.is_empty());
    assert_eq!(past_end.total, 5);
}

#[tokio::test]
async fn tiers_filters_select_native_queries() {
    let fixture = Fixture::new().with_legacy_config();
    let service = fixture.service();

    let customers = service
        .list_tiers(TiersQuery { kind: Some("client".into()), ..TiersQuery::default() })
        .await
        .unwrap();
    assert_eq!(numbers(&customers), ["BIJOU", "CARAT", "ZAZA"]);

    let active = service
        .list_tiers(TiersQuery { kind: Some("client".into()), active_only: true, ..TiersQuery::default() })
        .await
        .unwrap();
    assert_eq!(numbers(&active), ["CARAT", "FOURN01", "SAL001", "ZAZA"]);

    let employees = service
        .list_tiers(TiersQuery { kind: Some("salarie".into()), ..TiersQuery::default() })
        .await
        .unwrap();
    assert_eq!(employees.items.len(), 1);
    assert_eq!(employees.items[0].name, None);
}

#[tokio::test]
async fn get_tiers_by_number() {
    let fixture = Fixture::new().with_legacy_config();
    let service = fixture.service();

    let found = service.get_tiers("FOURN01".into()).await.unwrap().unwrap();
    assert_eq!(found.name.as_deref(), Some("Fournisseur un"));
    assert_eq!(service.get_tiers("NOPE".into()).await.unwrap(), None);
}

#[tokio::test]
async fn transient_read_failure_is_retried_on_a_fresh_connection() {
    let fixture = Fixture::new().with_legacy_config();
    fixture.company.state().failing_reads = 1;
    let service = fixture.service_with(
        CompanyBackend::new(fixture.company.clone()),
        RetryPolicy::immediate(2),
    );

    let list = service.list_tiers(TiersQuery::default()).await.unwrap();
    assert_eq!(list.total, 5);

    let state = fixture.company.state();
    assert_eq!((state.opens, state.closes), (2, 2));
    assert_eq!(state.threads.len(), 2);
    assert_ne!(state.threads[0], state.threads[1]);
}

#[tokio::test]
async fn retries_run_out() {
    let fixture = Fixture::new().with_legacy_config();
    fixture.company.state().failing_reads = 10;
    let service = fixture.service_with(
        CompanyBackend::new(fixture.company.clone()),
        RetryPolicy::immediate(1),
    );

    let err = service.list_tiers(TiersQuery::default()).await.unwrap_err();
    assert!(matches!(err, SageError::Native { code: 0x8001_010A, .. }));
    assert_eq!(fixture.company.state().failing_reads, 8);
}

#[tokio::test]
async fn busy_server_at_open_is_retried() {
    let fixture = Fixture::new().with_legacy_config();
    fixture.company.state().failing_opens = 1;
    let service = fixture.service_with(
        CompanyBackend::new(fixture.company.clone()),
        RetryPolicy::immediate(2),
    );

    let result = service.ping().await;
    assert!(result.success, "{}", result.message);

    let state = fixture.company.state();
    assert_eq!((state.opens, state.closes), (2, 1));
    assert_eq!(state.failing_opens, 0);
}

#[tokio::test]
async fn open_failures_outlasting_retries_are_reported() {
    let fixture = Fixture::new().with_legacy_config();
    fixture.company.state().failing_opens = 10;
    let service = fixture.service_with(
        CompanyBackend::new(fixture.company.clone()),
        RetryPolicy::immediate(1),
    );

    let err = service.list_tiers(TiersQuery::default()).await.unwrap_err();
    assert!(matches!(err, SageError::NoStrategySucceeded(_)));
    assert!(err.is_transient());
    assert_eq!(fixture.company.state().opens, 2);
}

#[tokio::test]
async fn health_reflects_configuration_and_connectivity() {
    let fixture = Fixture::new().with_legacy_config();
    assert_eq!(fixture.service().health().await.status, HealthStatus::Healthy);

    let unreachable = fixture.service_with(
        CompanyBackend::unregistered(fixture.company.clone()),
        RetryPolicy::none(),
    );
    let report = unreachable.health().await;
    assert_eq!(report.status, HealthStatus::Degraded);
    assert!(report.message.starts_with("Error: "));

    std::fs::write(fixture.settings.path(), "not json").unwrap();
    assert_eq!(fixture.service().health().await.status, HealthStatus::Unhealthy);
    assert!(!fixture.service().ping().await.success);
}

#[tokio::test]
async fn unconfigured_service_reports_incomplete_configuration() {
    let fixture = Fixture::new();
    let result = fixture.service().ping().await;
    assert!(!result.success);
    assert!(result.message.contains("Incomplete configuration"), "{}", result.message);
    assert_eq!(fixture.company.state().opens, 0);
}

#[tokio::test]
async fn test_connection_validates_before_connecting() {
    let fixture = Fixture::new();
    let service = fixture.service();

    let invalid = service.test_connection(ConnectionConfig::default()).await;
    assert!(!invalid.success);
    assert_eq!(fixture.company.state().opens, 0);

    let ok = service
        .test_connection(ConnectionConfig::from_server("SQL01", "BIJOU").with_credentials("<Administrateur>", ""))
        .await;
    assert!(ok.success, "{}", ok.message);
    let state = fixture.company.state();
    assert_eq!(state.fields["CompanyServer"], "SQL01");
    assert_eq!(state.fields["CompanyDatabaseName"], "BIJOU");
}

#[tokio::test]
async fn activated_folder_drives_the_next_connection() {
    let fixture = Fixture::new().with_legacy_config();
    let folders = fixture.folders();

    let folder = |name: &str, password: &str| FolderConfig {
        mae: Some(FileConfig {
            path: Some(format!(r"C:\Sage\{name}.mae")),
            user: Some("<Administrateur>".into()),
            password: Some(password.into()),
        }),
        ..FolderConfig::new(name)
    };
    let carat = folders.save(folder("CARAT", "pw1")).unwrap();
    folders.save(folder("ZAZA", "pw2")).unwrap();

    let stored = folders.list().unwrap();
    assert_eq!(stored.folders.len(), 2);
    assert_eq!(
        stored.get(&carat).unwrap().mae.as_ref().unwrap().password.as_deref(),
        Some("ENC:1wp")
    );
    assert!(stored.active().is_none());
    let revealed = folders.list_revealed().unwrap();
    assert_eq!(
        revealed.get(&carat).unwrap().mae.as_ref().unwrap().password.as_deref(),
        Some("pw1")
    );

    assert!(folders.activate(&carat).unwrap());
    assert!(fixture.service().ping().await.success);
    {
        let state = fixture.company.state();
        assert_eq!(state.fields["Name"], r"C:\Sage\CARAT.mae");
        assert_eq!(state.fields["Loggable.UserPwd"], "pw1");
    }

    assert!(!folders.activate("unknown").unwrap());
    assert!(folders.list().unwrap().active().is_none());
    assert!(fixture.service().ping().await.success);
    assert_eq!(fixture.company.state().fields["Name"], r"C:\Sage\BIJOU.mae");

    assert!(folders.remove(&carat).unwrap());
    assert_eq!(folders.list().unwrap().folders.len(), 1);
}
