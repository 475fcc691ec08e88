// Installation manager
//
// The commit phase: the one place where staged data crosses into permanent
// storage. Failure before or during the write phase leaves staged data
// untouched so the caller can retry; the manager itself never retries.

use log::{debug, info, warn};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use crate::config::WizardConfig;
use crate::context::RunContext;
use crate::errors::SetupError;
use crate::events::{EventBus, InstallEvent};
use crate::models::InstallationResult;
use crate::registry::StepRegistry;
use crate::schema::SchemaIntrospector;
use crate::security::generate_app_secret;
use super::permanent::PermanentStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    pub run_schema_migration: bool,
    pub run_seed: bool,
    pub create_storage_link: bool,
    pub reset_schema: bool,
}

pub struct InstallationManager {
    config: WizardConfig,
    store: Arc<dyn PermanentStore>,
}

impl InstallationManager {
    pub fn new(config: WizardConfig, store: Arc<dyn PermanentStore>) -> Self {
        InstallationManager { config, store }
    }

    /// Run the commit. Recoverable failures (migration, writes, seeding)
    /// come back as an error-status result with staged data intact; only
    /// state misuse (re-finalizing without the override) is an `Err`.
    pub async fn execute(
        &self,
        ctx: &mut RunContext,
        registry: &StepRegistry,
        introspector: &SchemaIntrospector,
        events: &EventBus,
        opts: &InstallOptions,
    ) -> Result<InstallationResult, SetupError> {
        if ctx.state().finalized && !self.config.dev_override {
            return Err(SetupError::AlreadyFinalized);
        }

        let started = Instant::now();
        let mut output: Vec<String> = Vec::new();
        let mut committed: Vec<String> = Vec::new();

        info!(
            "[PHASE: commit] [STEP: execute] Starting commit (run_id={})",
            ctx.run_id()
        );

        // (1) Invalidate cached configuration. Best-effort: a stale cache is
        // a warning, not a reason to abort the install.
        if let Some(cache) = &self.config.config_cache_file {
            match std::fs::remove_file(cache) {
                Ok(()) => output.push("configuration cache invalidated".to_string()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(
                        "[PHASE: commit] [STEP: invalidate_cache] Failed to remove {:?}: {}",
                        cache, e
                    );
                    output.push(format!("could not invalidate configuration cache: {}", e));
                }
            }
        }

        // (2) Schema migration.
        if opts.run_schema_migration {
            match self.store.run_schema_migration(opts.reset_schema).await {
                Ok(applied) => {
                    output.push(format!("applied {} migration(s)", applied.len()));
                    for name in applied {
                        output.push(format!("migrated: {}", name));
                    }
                }
                Err(e) => {
                    return Ok(self.abort("schema migration", &e, output, committed));
                }
            }
        }

        // (3) Staged -> permanent. Upserts keyed by "<namespace>:<key>" so a
        // full retry after a failure is idempotent.
        let snapshot = match ctx.staged().snapshot().await {
            Ok(s) => s,
            Err(e) => return Ok(self.abort("staged data read", &e, output, committed)),
        };

        let table = &self.config.settings_table;
        if !introspector.has_table(table) {
            let e = anyhow::anyhow!("schema definition does not declare table '{}'", table);
            return Ok(self.abort("schema check", &e, output, committed));
        }
        let missing = introspector.missing_columns(table, &["entry_key", "document"]);
        if !missing.is_empty() {
            let e = anyhow::anyhow!(
                "table '{}' is missing required column(s): {}",
                table,
                missing.join(", ")
            );
            return Ok(self.abort("schema check", &e, output, committed));
        }
        match self.store.table_exists(table).await {
            Ok(true) => {}
            Ok(false) => {
                let e = anyhow::anyhow!("migration did not create table '{}'", table);
                return Ok(self.abort("schema check", &e, output, committed));
            }
            Err(e) => return Ok(self.abort("schema check", &e, output, committed)),
        }

        let sequence = registry.active_sequence(&snapshot);
        let sequence_ids: BTreeSet<&str> = sequence.iter().map(|d| d.id()).collect();

        for descriptor in &sequence {
            let step_id = descriptor.id();
            if let Some(doc) = snapshot.namespace(step_id) {
                for (key, value) in doc {
                    let row_key = format!("{}:{}", step_id, key);
                    if let Err(e) = self.store.upsert_row(table, &row_key, value).await {
                        return Ok(self.abort("permanent-storage write", &e, output, committed));
                    }
                }
                output.push(format!("committed namespace '{}'", step_id));
            }
            committed.push(step_id.to_string());
        }

        // Namespaces staged outside the step sequence (e.g. the generated
        // application secret) follow in sorted order.
        for namespace in snapshot.namespaces() {
            if sequence_ids.contains(namespace) {
                continue;
            }
            let Some(doc) = snapshot.namespace(namespace) else {
                continue;
            };
            for (key, value) in doc {
                let row_key = format!("{}:{}", namespace, key);
                if let Err(e) = self.store.upsert_row(table, &row_key, value).await {
                    return Ok(self.abort("permanent-storage write", &e, output, committed));
                }
            }
            output.push(format!("committed namespace '{}'", namespace));
        }

        // (4) Optional seed data and storage link.
        if opts.run_seed {
            if let Err(e) = self.store.run_seed().await {
                return Ok(self.abort("seed", &e, output, committed));
            }
            output.push("seed data applied".to_string());
        }

        if opts.create_storage_link {
            if let Err(e) = self.create_storage_link().await {
                return Ok(self.abort("storage link", &e, output, committed));
            }
        }

        // (5) Finalize: clear staged data, mark the run, write the marker.
        if let Err(e) = ctx.staged().clear_all().await {
            return Ok(self.abort("finalize", &e, output, committed));
        }

        ctx.state_mut().finalized = true;
        ctx.state_mut().current_step = None;
        if let Err(e) = ctx.persist_state().await {
            return Ok(self.abort("finalize", &e, output, committed));
        }

        if let Err(e) = self.write_completion_marker(ctx.run_id()).await {
            return Ok(self.abort("finalize", &e, output, committed));
        }
        output.push("completion marker written".to_string());

        let duration_seconds = started.elapsed().as_secs_f64();
        info!(
            "[PHASE: commit] [STEP: execute] Installation completed ({} step(s), {:.2}s)",
            committed.len(),
            duration_seconds
        );

        events.emit(&InstallEvent::InstallationCompleted {
            run_id: ctx.run_id().to_string(),
            completed_steps: committed.clone(),
            duration_seconds,
        });

        Ok(InstallationResult::success(
            "installation completed",
            output,
            committed,
        ))
    }

    /// Revert the most recently applied schema migration. Staged data is
    /// untouched; this is operator-triggered recovery, not automatic retry.
    pub async fn rollback(&self) -> anyhow::Result<bool> {
        info!("[PHASE: commit] [STEP: rollback] Rolling back last migration");
        let reverted = self.store.rollback_last_migration().await?;
        if !reverted {
            info!("[PHASE: commit] [STEP: rollback] Nothing to roll back");
        }
        Ok(reverted)
    }

    /// Produce and stage a fresh application secret. Each call rotates the
    /// secret, so invoke at most once per install run.
    pub async fn generate_secret(&self, ctx: &RunContext) -> Result<String, SetupError> {
        let secret = generate_app_secret().map_err(SetupError::session)?;
        ctx.staged()
            .put("app", "secret", json!(secret))
            .await
            .map_err(SetupError::session)?;

        debug!(
            "[PHASE: commit] [STEP: generate_secret] Staged application secret ({})",
            crate::logging::mask_sensitive(&secret)
        );
        Ok(secret)
    }

    fn abort(
        &self,
        stage: &str,
        cause: &anyhow::Error,
        mut output: Vec<String>,
        committed: Vec<String>,
    ) -> InstallationResult {
        let err = SetupError::Commit {
            stage: stage.to_string(),
            message: format!("{:#}", cause),
        };
        warn!("[PHASE: commit] [STEP: execute] {}", err);
        output.push(err.to_string());
        InstallationResult::error(err.to_string(), output, committed)
    }

    async fn create_storage_link(&self) -> anyhow::Result<()> {
        let Some(link_config) = &self.config.storage_link else {
            return Ok(());
        };

        if tokio::fs::try_exists(&link_config.link).await.unwrap_or(false) {
            info!(
                "[PHASE: commit] [STEP: storage_link] Link already exists: {:?}",
                link_config.link
            );
            return Ok(());
        }

        if let Some(parent) = link_config.link.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        #[cfg(unix)]
        tokio::fs::symlink(&link_config.target, &link_config.link).await?;
        #[cfg(windows)]
        tokio::fs::symlink_dir(&link_config.target, &link_config.link).await?;

        info!(
            "[PHASE: commit] [STEP: storage_link] Linked {:?} -> {:?}",
            link_config.link, link_config.target
        );
        Ok(())
    }

    async fn write_completion_marker(&self, run_id: &str) -> anyhow::Result<()> {
        let marker = self.config.completion_marker_path();
        if let Some(parent) = marker.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let body = serde_json::to_vec_pretty(&json!({
            "runId": run_id,
            "finalizedAt": chrono::Utc::now().to_rfc3339(),
        }))?;

        tokio::fs::write(&marker, body).await?;
        Ok(())
    }
}
