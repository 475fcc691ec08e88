// Permanent storage seam
//
// The commit phase reaches permanent storage only through these primitives;
// no ad-hoc queries. Writes are upserts keyed by logical identity so a full
// retry after a failed commit is idempotent.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use crate::schema::SchemaDefinition;

#[async_trait]
pub trait PermanentStore: Send + Sync {
    /// Apply pending schema migrations; `reset` rebuilds from scratch first.
    /// Returns the names of migrations applied by this call.
    async fn run_schema_migration(&self, reset: bool) -> Result<Vec<String>>;

    /// Revert the most recently applied migration. Returns false when there
    /// is nothing to roll back.
    async fn rollback_last_migration(&self) -> Result<bool>;

    async fn run_seed(&self) -> Result<()>;

    /// Upsert keyed by `key` within `table`.
    async fn upsert_row(&self, table: &str, key: &str, document: &Value) -> Result<()>;

    async fn table_exists(&self, table: &str) -> Result<bool>;
}

/// In-memory permanent store driven by a declarative schema definition.
/// Used by tests and headless dry runs; migration creates one table per
/// declared table.
pub struct MemoryStore {
    definition: SchemaDefinition,
    inner: Mutex<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    applied: Vec<String>,
    tables: BTreeMap<String, BTreeMap<String, Value>>,
    seeded: bool,
}

impl MemoryStore {
    pub fn new(definition: SchemaDefinition) -> Self {
        MemoryStore {
            definition,
            inner: Mutex::new(MemoryStoreInner::default()),
        }
    }

    /// Test/introspection helper: a copy of one table's rows.
    pub async fn rows(&self, table: &str) -> Option<BTreeMap<String, Value>> {
        self.inner.lock().await.tables.get(table).cloned()
    }

    pub async fn seeded(&self) -> bool {
        self.inner.lock().await.seeded
    }

    pub async fn applied_migrations(&self) -> Vec<String> {
        self.inner.lock().await.applied.clone()
    }
}

#[async_trait]
impl PermanentStore for MemoryStore {
    async fn run_schema_migration(&self, reset: bool) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().await;

        if reset {
            inner.tables.clear();
            inner.applied.clear();
            inner.seeded = false;
        }

        let mut applied = Vec::new();
        for table in &self.definition.tables {
            let name = format!("create_{}", table.name);
            if inner.applied.iter().any(|a| a == &name) {
                continue;
            }
            inner.tables.entry(table.name.clone()).or_default();
            inner.applied.push(name.clone());
            applied.push(name);
        }

        Ok(applied)
    }

    async fn rollback_last_migration(&self) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(last) = inner.applied.pop() else {
            return Ok(false);
        };

        if let Some(table) = last.strip_prefix("create_") {
            let table = table.to_string();
            inner.tables.remove(&table);
        }
        Ok(true)
    }

    async fn run_seed(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.tables.is_empty() {
            anyhow::bail!("cannot seed before schema migration");
        }
        inner.seeded = true;
        Ok(())
    }

    async fn upsert_row(&self, table: &str, key: &str, document: &Value) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(rows) = inner.tables.get_mut(table) else {
            anyhow::bail!("relation '{table}' does not exist");
        };
        rows.insert(key.to_string(), document.clone());
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(self.inner.lock().await.tables.contains_key(table))
    }
}
