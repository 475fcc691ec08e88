// Session-like persistence
//
// The staging area and run state live in a key/value store scoped to the
// current install run. The trait is the seam: production uses the file-backed
// store, tests use the in-memory one.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Upsert; never fails for well-formed keys short of a backend fault.
    async fn put(&self, key: &str, value: Value) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// All keys starting with `prefix`, sorted.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    async fn remove(&self, key: &str) -> Result<()>;

    async fn remove_prefix(&self, prefix: &str) -> Result<()>;
}

/// In-memory session store. No durability; intended for tests and headless
/// dry runs.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(&self, key: &str, value: Value) -> Result<()> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }
}
