// End-to-end wizard flows against in-memory stores: ordering and dependency
// laws, staging durability across failed commits, and full install runs.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use setup_wizard::install::MemoryStore;
use setup_wizard::{
    CheckStatus, EventBus, EventListener, InstallEvent, InstallOptions, InstallStatus,
    InstallationManager, MemorySessionStore, PermanentStore, RunContext, SchemaDefinition,
    SchemaIntrospector, SecretProtector, SetupError, SetupWizard, StageFormHandler,
    StepDescriptor, StepLifecycle, StepRegistry, StorageLinkConfig, SubmitOutcome, WizardConfig,
};

fn schema_definition() -> SchemaDefinition {
    SchemaDefinition::from_json_str(
        r#"{
            "tables": [
                {"name": "instance_settings", "columns": [
                    {"name": "entry_key"},
                    {"name": "document"},
                    {"name": "updated_at", "type": "timestamptz"}
                ]},
                {"name": "users", "columns": [
                    {"name": "id", "type": "bigint"},
                    {"name": "email"}
                ]}
            ]
        }"#,
    )
    .unwrap()
}

fn test_config(dir: &tempfile::TempDir) -> WizardConfig {
    WizardConfig {
        data_dir: dir.path().to_path_buf(),
        ..WizardConfig::default()
    }
}

async fn test_context(dir: &tempfile::TempDir) -> RunContext {
    let config = test_config(dir);
    let session = Arc::new(MemorySessionStore::new());
    let secrets = Arc::new(SecretProtector::new(config.master_key_path()));
    RunContext::open(session, secrets).await.unwrap()
}

/// welcome(1), requirements(2), license(5), account(10, depends on license)
fn standard_registry() -> StepRegistry {
    let mut registry = StepRegistry::new();
    registry.register(StepDescriptor::new("welcome", 1)).unwrap();
    registry
        .register(StepDescriptor::new("requirements", 2))
        .unwrap();
    registry.register(StepDescriptor::new("license", 5)).unwrap();
    registry
        .register(
            StepDescriptor::new("account", 10)
                .depends_on("license")
                .rule("email", "required|email|unique:users,email")
                .unwrap(),
        )
        .unwrap();
    registry
}

struct Recorder {
    seen: Mutex<Vec<String>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        })
    }

    fn events(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl EventListener for Recorder {
    fn on_event(&self, event: &InstallEvent) -> anyhow::Result<()> {
        let label = match event {
            InstallEvent::StepStarted { step_id, .. } => format!("started:{}", step_id),
            InstallEvent::StepCompleted { step_id, .. } => format!("completed:{}", step_id),
            InstallEvent::StepFailed { step_id, .. } => format!("failed:{}", step_id),
            InstallEvent::InstallationStarted { .. } => "installation_started".to_string(),
            InstallEvent::InstallationCompleted { .. } => "installation_completed".to_string(),
        };
        self.seen.lock().unwrap().push(label);
        Ok(())
    }
}

/// Permanent store whose migration fails until the underlying fault is
/// "fixed", for retry semantics.
struct FlakyStore {
    inner: MemoryStore,
    fail_migration: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        FlakyStore {
            inner: MemoryStore::new(schema_definition()),
            fail_migration: AtomicBool::new(true),
        }
    }

    fn fix(&self) {
        self.fail_migration.store(false, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl PermanentStore for FlakyStore {
    async fn run_schema_migration(&self, reset: bool) -> anyhow::Result<Vec<String>> {
        if self.fail_migration.load(Ordering::SeqCst) {
            anyhow::bail!("connection refused by database host");
        }
        self.inner.run_schema_migration(reset).await
    }

    async fn rollback_last_migration(&self) -> anyhow::Result<bool> {
        self.inner.rollback_last_migration().await
    }

    async fn run_seed(&self) -> anyhow::Result<()> {
        self.inner.run_seed().await
    }

    async fn upsert_row(&self, table: &str, key: &str, document: &Value) -> anyhow::Result<()> {
        self.inner.upsert_row(table, key, document).await
    }

    async fn table_exists(&self, table: &str) -> anyhow::Result<bool> {
        self.inner.table_exists(table).await
    }
}

// Scenario A: ordering plus dependency gating.

#[tokio::test]
async fn scenario_a_active_sequence_order_and_dependency_gate() {
    let dir = tempfile::tempdir().unwrap();
    let registry = standard_registry();
    let ctx = test_context(&dir).await;

    let snapshot = ctx.staged().snapshot().await.unwrap();
    let ids: Vec<String> = registry
        .active_sequence(&snapshot)
        .iter()
        .map(|d| d.id().to_string())
        .collect();
    assert_eq!(ids, vec!["welcome", "requirements", "license", "account"]);

    // Submit account before license has completed.
    let mut ctx = ctx;
    let events = EventBus::new();
    let mut lifecycle = StepLifecycle::new(
        registry.resolve("account").unwrap(),
        registry.handler("account").unwrap(),
        Duration::from_secs(5),
    );
    lifecycle.mount(&ctx, &events).await.unwrap();

    let outcome = lifecycle
        .submit(&mut ctx, &events, json!({"email": "a@b.com"}))
        .await
        .unwrap();

    let SubmitOutcome::Invalid(result) = outcome else {
        panic!("account must not execute before license");
    };
    assert!(result.field_errors("account")[0].contains("license"));

    // Zero staged writes for the gated step.
    assert!(ctx
        .staged()
        .namespace_document("account")
        .await
        .unwrap()
        .is_empty());
}

// Scenario B: store-dependent rules are stripped, the rest still apply.

#[tokio::test]
async fn scenario_b_unique_rule_stripped_without_store() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = test_context(&dir).await;
    let events = EventBus::new();

    let descriptor = StepDescriptor::new("account", 10)
        .rule("email", "required|email|unique:users,email")
        .unwrap();

    let mut lifecycle = StepLifecycle::new(
        Arc::new(descriptor.clone()),
        Arc::new(StageFormHandler),
        Duration::from_secs(5),
    );
    lifecycle.mount(&ctx, &events).await.unwrap();

    let outcome = lifecycle
        .submit(&mut ctx, &events, json!({"email": "not-an-email"}))
        .await
        .unwrap();
    let SubmitOutcome::Invalid(result) = outcome else {
        panic!("invalid email must fail");
    };
    assert!(!result.field_errors("email").is_empty());
    assert!(
        result.skipped_rules().iter().any(|s| s.rule == "unique"),
        "stripping must be recorded, not silent"
    );

    let outcome = lifecycle
        .submit(&mut ctx, &events, json!({"email": "a@b.com"}))
        .await
        .unwrap();
    assert!(
        matches!(outcome, SubmitOutcome::Completed),
        "valid email must pass regardless of uniqueness"
    );
}

// Scenario C: failed migration leaves every staged namespace readable.

#[tokio::test]
async fn scenario_c_failed_migration_preserves_staged_data() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let registry = standard_registry();
    let mut ctx = test_context(&dir).await;
    let events = EventBus::new();

    ctx.staged()
        .put("welcome", "locale", json!("en"))
        .await
        .unwrap();
    ctx.staged()
        .put("account", "email", json!("a@b.com"))
        .await
        .unwrap();

    let store = Arc::new(FlakyStore::new());
    let manager = InstallationManager::new(config, store);
    let introspector = SchemaIntrospector::new(schema_definition());

    let result = manager
        .execute(
            &mut ctx,
            &registry,
            &introspector,
            &events,
            &InstallOptions {
                run_schema_migration: true,
                ..InstallOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(result.status, InstallStatus::Error);
    assert!(result.committed_steps.is_empty());
    assert!(result
        .output
        .iter()
        .any(|line| line.contains("connection refused")));

    // All previously staged namespaces remain readable afterward.
    assert_eq!(
        ctx.staged()
            .get("welcome", "locale", json!(null))
            .await
            .unwrap(),
        json!("en")
    );
    assert_eq!(
        ctx.staged()
            .get("account", "email", json!(null))
            .await
            .unwrap(),
        json!("a@b.com")
    );
    assert!(!ctx.state().finalized);
}

// Scenario D: once the fault is fixed, a retry over the same staged data
// commits the full sequence.

#[tokio::test]
async fn scenario_d_retry_after_fixed_fault_commits_everything() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let registry = standard_registry();
    let mut ctx = test_context(&dir).await;
    let events = EventBus::new();

    for (ns, key, value) in [
        ("welcome", "locale", json!("en")),
        ("license", "key", json!("ABC-123")),
        ("account", "email", json!("a@b.com")),
    ] {
        ctx.staged().put(ns, key, value).await.unwrap();
    }

    let store = Arc::new(FlakyStore::new());
    let manager = InstallationManager::new(config, store.clone());
    let introspector = SchemaIntrospector::new(schema_definition());
    let opts = InstallOptions {
        run_schema_migration: true,
        ..InstallOptions::default()
    };

    let first = manager
        .execute(&mut ctx, &registry, &introspector, &events, &opts)
        .await
        .unwrap();
    assert_eq!(first.status, InstallStatus::Error);

    store.fix();

    let second = manager
        .execute(&mut ctx, &registry, &introspector, &events, &opts)
        .await
        .unwrap();
    assert_eq!(second.status, InstallStatus::Success);
    assert_eq!(
        second.committed_steps,
        vec!["welcome", "requirements", "license", "account"]
    );

    // Staged data was reconciled under "<namespace>:<key>" identities.
    let rows = store.inner.rows("instance_settings").await.unwrap();
    assert_eq!(rows["welcome:locale"], json!("en"));
    assert_eq!(rows["account:email"], json!("a@b.com"));

    // Commit cleared the staging area and finalized the run.
    assert!(ctx.staged().namespaces().await.unwrap().is_empty());
    assert!(ctx.state().finalized);
}

// Full wizard run: enter -> steps in order -> commit -> marker gate.

#[tokio::test]
async fn full_run_through_wizard_then_reentry_refused() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let recorder = Recorder::new();

    let ctx = test_context(&dir).await;
    let mut wizard = SetupWizard::new(config.clone(), standard_registry(), ctx).unwrap();
    wizard.subscribe(recorder.clone());

    wizard.enter().await.unwrap();
    assert_eq!(wizard.current_step_id(), Some("welcome"));

    for (expected, form) in [
        ("welcome", json!({"locale": "en"})),
        ("requirements", json!({})),
        ("license", json!({"key": "ABC-123"})),
        ("account", json!({"email": "a@b.com"})),
    ] {
        assert_eq!(wizard.current_step_id(), Some(expected));
        let outcome = wizard.submit(form).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Completed));
    }

    assert!(wizard.is_ready_to_commit());

    let store = Arc::new(MemoryStore::new(schema_definition()));
    let introspector = SchemaIntrospector::new(schema_definition());
    let result = wizard
        .install(
            store.clone(),
            &introspector,
            &InstallOptions {
                run_schema_migration: true,
                run_seed: true,
                ..InstallOptions::default()
            },
        )
        .await
        .unwrap();

    assert!(result.succeeded());
    assert!(store.seeded().await);
    assert!(config.completion_marker_path().exists());

    // Synchronous, in-order event delivery across the whole run.
    let events = recorder.events();
    assert_eq!(events[0], "installation_started");
    assert_eq!(
        events[1..],
        [
            "started:welcome",
            "completed:welcome",
            "started:requirements",
            "completed:requirements",
            "started:license",
            "completed:license",
            "started:account",
            "completed:account",
            "installation_completed",
        ]
    );

    // Re-entry is refused once finalized...
    let ctx = test_context(&dir).await;
    let mut again = SetupWizard::new(config.clone(), standard_registry(), ctx).unwrap();
    assert!(matches!(
        again.enter().await.unwrap_err(),
        SetupError::AlreadyFinalized
    ));

    // ...unless the development override is set.
    let ctx = test_context(&dir).await;
    let dev_config = WizardConfig {
        dev_override: true,
        ..config
    };
    let mut dev = SetupWizard::new(dev_config, standard_registry(), ctx).unwrap();
    assert!(dev.enter().await.is_ok());
}

#[tokio::test]
async fn hidden_step_is_skipped_without_blocking_others() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = StepRegistry::new();
    registry.register(StepDescriptor::new("welcome", 1)).unwrap();
    registry
        .register(
            StepDescriptor::new("mail", 7)
                .display_when(|snapshot| snapshot.has("welcome", "wants_mail")),
        )
        .unwrap();
    registry.register(StepDescriptor::new("account", 10)).unwrap();

    let ctx = test_context(&dir).await;
    let mut wizard = SetupWizard::new(test_config(&dir), registry, ctx).unwrap();
    wizard.enter().await.unwrap();

    // Navigating back re-mounts the same step without side effects.
    wizard.mount_current().await.unwrap();

    wizard.submit(json!({"locale": "en"})).await.unwrap();
    // "mail" stays hidden: the sequence advances straight to account.
    assert_eq!(wizard.current_step_id(), Some("account"));

    wizard.submit(json!({})).await.unwrap();
    assert!(wizard.is_ready_to_commit());
    assert_eq!(
        wizard.context().state().completed_steps,
        vec!["welcome", "account"]
    );
}

#[tokio::test]
async fn validation_failure_keeps_wizard_on_same_step() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = StepRegistry::new();
    registry
        .register(
            StepDescriptor::new("account", 1)
                .rule("email", "required|email")
                .unwrap(),
        )
        .unwrap();

    let ctx = test_context(&dir).await;
    let mut wizard = SetupWizard::new(test_config(&dir), registry, ctx).unwrap();
    wizard.enter().await.unwrap();

    let outcome = wizard.submit(json!({"email": "nope"})).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Invalid(_)));
    assert_eq!(wizard.current_step_id(), Some("account"));

    let outcome = wizard.submit(json!({"email": "a@b.com"})).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Completed));
    assert!(wizard.is_ready_to_commit());
}

#[tokio::test]
async fn generated_secret_is_staged_encrypted_and_committed() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let registry = standard_registry();
    let mut ctx = test_context(&dir).await;
    let events = EventBus::new();

    let store = Arc::new(MemoryStore::new(schema_definition()));
    let manager = InstallationManager::new(config, store.clone());

    let secret = manager.generate_secret(&ctx).await.unwrap();
    assert!(secret.starts_with("base64:"));

    // Readable through the staging API...
    assert_eq!(
        ctx.staged().get("app", "secret", json!(null)).await.unwrap(),
        json!(secret)
    );

    let introspector = SchemaIntrospector::new(schema_definition());
    let result = manager
        .execute(
            &mut ctx,
            &registry,
            &introspector,
            &events,
            &InstallOptions {
                run_schema_migration: true,
                ..InstallOptions::default()
            },
        )
        .await
        .unwrap();
    assert!(result.succeeded());

    // ...and reconciled in plaintext under its logical identity.
    let rows = store.rows("instance_settings").await.unwrap();
    assert_eq!(rows["app:secret"], json!(secret));
}

#[tokio::test]
async fn storage_link_created_on_commit() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("storage");
    let link = dir.path().join("public").join("storage");
    std::fs::create_dir_all(&target).unwrap();

    let mut config = test_config(&dir);
    config.storage_link = Some(StorageLinkConfig {
        target: target.clone(),
        link: link.clone(),
    });

    let registry = standard_registry();
    let mut ctx = test_context(&dir).await;
    let events = EventBus::new();
    let store = Arc::new(MemoryStore::new(schema_definition()));
    let manager = InstallationManager::new(config, store);
    let introspector = SchemaIntrospector::new(schema_definition());

    let result = manager
        .execute(
            &mut ctx,
            &registry,
            &introspector,
            &events,
            &InstallOptions {
                run_schema_migration: true,
                create_storage_link: true,
                ..InstallOptions::default()
            },
        )
        .await
        .unwrap();

    assert!(result.succeeded());
    let meta = std::fs::symlink_metadata(&link).unwrap();
    assert!(meta.file_type().is_symlink());
    assert_eq!(std::fs::read_link(&link).unwrap(), target);
}

#[tokio::test]
async fn double_finalize_is_a_state_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);
    let registry = standard_registry();
    let mut ctx = test_context(&dir).await;
    let events = EventBus::new();

    let store = Arc::new(MemoryStore::new(schema_definition()));
    let manager = InstallationManager::new(config, store);
    let introspector = SchemaIntrospector::new(schema_definition());
    let opts = InstallOptions {
        run_schema_migration: true,
        ..InstallOptions::default()
    };

    let first = manager
        .execute(&mut ctx, &registry, &introspector, &events, &opts)
        .await
        .unwrap();
    assert!(first.succeeded());

    let err = manager
        .execute(&mut ctx, &registry, &introspector, &events, &opts)
        .await
        .unwrap_err();
    assert!(matches!(err, SetupError::AlreadyFinalized));
}

#[tokio::test]
async fn rollback_reverts_most_recent_migration_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new(schema_definition()));
    let manager = InstallationManager::new(test_config(&dir), store.clone());

    store.run_schema_migration(false).await.unwrap();
    assert_eq!(store.applied_migrations().await.len(), 2);

    assert!(manager.rollback().await.unwrap());
    assert_eq!(store.applied_migrations().await.len(), 1);

    // Staged data is never touched by rollback; nothing else reverts.
    assert!(manager.rollback().await.unwrap());
    assert!(!manager.rollback().await.unwrap());
}

#[tokio::test]
async fn requirement_report_feeds_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.minimum_runtime_version = Some("8.1".to_string());

    let ctx = test_context(&dir).await;
    let wizard = SetupWizard::new(config, standard_registry(), ctx).unwrap();

    let report = wizard.check_requirements("8.2");
    assert!(report.passed());
    assert_eq!(report.checks[0].status, CheckStatus::Pass);

    assert!(!wizard.check_requirements("7.4").passed());
}
