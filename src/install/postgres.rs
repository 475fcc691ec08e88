// PostgreSQL permanent store
//
// Implements the permanent-storage primitives against a PostgreSQL pool:
// manifest-driven migrations recorded in an applied-migrations ledger,
// identifier-validated upserts into the settings tables, and
// information_schema-based existence checks.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;
use regex::Regex;
use serde_json::Value;
use sqlx::{Pool, Postgres};
use std::collections::HashSet;
use std::path::PathBuf;

use super::migrations::{load_manifest, read_migration_sql, MigrationEntry};
use super::permanent::PermanentStore;

pub struct PostgresStore {
    pool: Pool<Postgres>,
    schema: String,
    manifest_path: PathBuf,
    migrations_dir: PathBuf,
    seed_file: Option<PathBuf>,
}

impl PostgresStore {
    pub fn new(
        pool: Pool<Postgres>,
        schema: impl Into<String>,
        manifest_path: PathBuf,
        migrations_dir: PathBuf,
    ) -> Result<Self> {
        let schema = schema.into();
        validate_identifier(&schema)?;

        info!(
            "[PHASE: database] [STEP: store_init] PostgreSQL store targeting schema '{}'",
            schema
        );

        Ok(PostgresStore {
            pool,
            schema,
            manifest_path,
            migrations_dir,
            seed_file: None,
        })
    }

    pub fn with_seed_file(mut self, path: PathBuf) -> Self {
        self.seed_file = Some(path);
        self
    }

    async fn ensure_ledger(&self) -> Result<()> {
        sqlx::raw_sql(&format!(
            r#"
            CREATE SCHEMA IF NOT EXISTS {schema};
            CREATE TABLE IF NOT EXISTS {schema}.applied_migrations (
                migration_name TEXT PRIMARY KEY,
                checksum TEXT,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT (CURRENT_TIMESTAMP AT TIME ZONE 'UTC')
            );
            "#,
            schema = self.schema
        ))
        .execute(&self.pool)
        .await
        .with_context(|| "Failed to ensure applied_migrations ledger")?;
        Ok(())
    }

    async fn applied_names(&self) -> Result<HashSet<String>> {
        let names: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT migration_name FROM {}.applied_migrations",
            self.schema
        ))
        .fetch_all(&self.pool)
        .await
        .with_context(|| "Failed to query applied migration names")?;

        Ok(names.into_iter().collect())
    }

    async fn apply_migration(&self, entry: &MigrationEntry) -> Result<()> {
        info!(
            "[PHASE: database] [STEP: apply_migration] Applying {}",
            entry.name
        );

        let sql = read_migration_sql(&self.migrations_dir, entry).await?;

        sqlx::raw_sql(&sql)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to apply migration '{}'", entry.name))?;

        sqlx::query(&format!(
            "INSERT INTO {}.applied_migrations (migration_name, checksum) VALUES ($1, $2)",
            self.schema
        ))
        .bind(&entry.name)
        .bind(&entry.checksum)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to record migration '{}'", entry.name))?;

        Ok(())
    }
}

#[async_trait]
impl PermanentStore for PostgresStore {
    async fn run_schema_migration(&self, reset: bool) -> Result<Vec<String>> {
        if reset {
            info!(
                "[PHASE: database] [STEP: reset_schema] Dropping schema '{}'",
                self.schema
            );
            sqlx::raw_sql(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema))
                .execute(&self.pool)
                .await
                .with_context(|| "Failed to drop schema for reset")?;
        }

        self.ensure_ledger().await?;

        let manifest = load_manifest(&self.manifest_path).await?;
        let already_applied = self.applied_names().await?;

        let mut applied = Vec::new();
        for entry in &manifest.migrations {
            if already_applied.contains(&entry.name) {
                continue;
            }
            self.apply_migration(entry).await?;
            applied.push(entry.name.clone());
        }

        info!(
            "[PHASE: database] [STEP: run_schema_migration] Applied {} migration(s)",
            applied.len()
        );
        Ok(applied)
    }

    async fn rollback_last_migration(&self) -> Result<bool> {
        self.ensure_ledger().await?;

        let last: Option<String> = sqlx::query_scalar(&format!(
            "SELECT migration_name FROM {}.applied_migrations \
             ORDER BY applied_at DESC, migration_name DESC LIMIT 1",
            self.schema
        ))
        .fetch_optional(&self.pool)
        .await
        .with_context(|| "Failed to find last applied migration")?;

        let Some(name) = last else {
            return Ok(false);
        };

        let manifest = load_manifest(&self.manifest_path).await?;
        let entry = manifest
            .migrations
            .iter()
            .find(|m| m.name == name)
            .with_context(|| format!("Migration '{}' is applied but not in the manifest", name))?;

        let down_path = self.migrations_dir.join(down_file_name(&entry.file));
        let sql = tokio::fs::read_to_string(&down_path)
            .await
            .with_context(|| format!("No down migration for '{}': {:?}", name, down_path))?;

        info!(
            "[PHASE: database] [STEP: rollback] Reverting {}",
            name
        );

        sqlx::raw_sql(&sql)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to revert migration '{}'", name))?;

        sqlx::query(&format!(
            "DELETE FROM {}.applied_migrations WHERE migration_name = $1",
            self.schema
        ))
        .bind(&name)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to unrecord migration '{}'", name))?;

        Ok(true)
    }

    async fn run_seed(&self) -> Result<()> {
        let Some(seed_file) = &self.seed_file else {
            info!("[PHASE: database] [STEP: run_seed] No seed file configured, skipping");
            return Ok(());
        };

        let sql = tokio::fs::read_to_string(seed_file)
            .await
            .with_context(|| format!("Failed to read seed file: {:?}", seed_file))?;

        sqlx::raw_sql(&sql)
            .execute(&self.pool)
            .await
            .with_context(|| "Failed to run seed data")?;
        Ok(())
    }

    async fn upsert_row(&self, table: &str, key: &str, document: &Value) -> Result<()> {
        validate_identifier(table)?;

        let body = serde_json::to_string(document)
            .with_context(|| format!("Failed to serialize document for '{}'", key))?;

        sqlx::query(&format!(
            r#"
            INSERT INTO {schema}.{table} (entry_key, document, updated_at)
            VALUES ($1, $2, (CURRENT_TIMESTAMP AT TIME ZONE 'UTC'))
            ON CONFLICT (entry_key) DO UPDATE
            SET document = EXCLUDED.document,
                updated_at = (CURRENT_TIMESTAMP AT TIME ZONE 'UTC')
            "#,
            schema = self.schema,
            table = table
        ))
        .bind(key)
        .bind(body)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert '{}' into {}.{}", key, self.schema, table))?;

        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM information_schema.tables
                WHERE table_schema = $1
                  AND table_name = $2
            )
            "#,
        )
        .bind(&self.schema)
        .bind(table)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("Failed to check existence of table '{}'", table))?;

        Ok(exists)
    }
}

/// Only plain identifiers may be interpolated into SQL; values always bind.
fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 63 {
        anyhow::bail!("identifier must be 1-63 characters: '{name}'");
    }

    let re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")
        .map_err(|e| anyhow::anyhow!("Internal error: failed to compile identifier regex: {e}"))?;
    if !re.is_match(name) {
        anyhow::bail!("identifier contains invalid characters: '{name}'");
    }

    Ok(())
}

fn down_file_name(file: &str) -> String {
    match file.strip_suffix(".sql") {
        Some(stem) => format!("{stem}.down.sql"),
        None => format!("{file}.down"),
    }
}
