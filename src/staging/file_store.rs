// File-backed session store
//
// One JSON document on disk, rewritten atomically (temp file + rename) on
// every mutation. Writes are retried with backoff because the file may be
// transiently locked (AV scanners, indexers).

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use super::session::SessionStore;

pub struct FileSessionStore {
    path: PathBuf,
    cache: Mutex<Option<BTreeMap<String, Value>>>,
}

impl FileSessionStore {
    pub fn new(path: PathBuf) -> Self {
        FileSessionStore {
            path,
            cache: Mutex::new(None),
        }
    }

    async fn load(&self, cache: &mut Option<BTreeMap<String, Value>>) -> Result<()> {
        if cache.is_some() {
            return Ok(());
        }

        let entries = if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            let raw = tokio::fs::read_to_string(&self.path)
                .await
                .with_context(|| format!("Failed to read session file: {:?}", self.path))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Session file is not valid JSON: {:?}", self.path))?
        } else {
            BTreeMap::new()
        };

        *cache = Some(entries);
        Ok(())
    }

    async fn flush(&self, entries: &BTreeMap<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create session directory: {:?}", parent))?;
        }

        let body = serde_json::to_vec_pretty(entries).context("Failed to serialize session")?;
        let tmp = self.path.with_extension("json.tmp");

        let write_action = || async {
            tokio::fs::write(&tmp, &body)
                .await
                .with_context(|| format!("Failed to write session temp file: {:?}", tmp))?;
            tokio::fs::rename(&tmp, &self.path)
                .await
                .with_context(|| format!("Failed to move session file into place: {:?}", self.path))?;
            Ok::<(), anyhow::Error>(())
        };

        let retry_strategy = ExponentialBackoff::from_millis(50)
            .factor(2)
            .max_delay(std::time::Duration::from_millis(750))
            .take(3)
            .map(jitter);

        RetryIf::spawn(retry_strategy, write_action, |e: &anyhow::Error| {
            is_transient_io_error(e)
        })
        .await
    }
}

fn is_transient_io_error(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("used by another process")
        || msg.contains("access is denied")
        || msg.contains("sharing violation")
        || msg.contains("resource temporarily unavailable")
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn put(&self, key: &str, value: Value) -> Result<()> {
        let mut cache = self.cache.lock().await;
        self.load(&mut cache).await?;
        let entries = cache.get_or_insert_with(BTreeMap::new);
        entries.insert(key.to_string(), value);
        self.flush(entries).await
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut cache = self.cache.lock().await;
        self.load(&mut cache).await?;
        Ok(cache.as_ref().and_then(|e| e.get(key).cloned()))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut cache = self.cache.lock().await;
        self.load(&mut cache).await?;
        Ok(cache
            .as_ref()
            .map(|e| {
                e.keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut cache = self.cache.lock().await;
        self.load(&mut cache).await?;
        let entries = cache.get_or_insert_with(BTreeMap::new);
        entries.remove(key);
        self.flush(entries).await
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<()> {
        let mut cache = self.cache.lock().await;
        self.load(&mut cache).await?;
        let entries = cache.get_or_insert_with(BTreeMap::new);
        entries.retain(|k, _| !k.starts_with(prefix));
        self.flush(entries).await
    }
}
