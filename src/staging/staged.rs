// Staged data store
//
// The single source of truth for configuration captured before permanent
// storage exists. Entries live in the session store under a reserved prefix,
// one JSON document per namespace, so unrelated session state is never
// touched by a clear. Secret-bearing keys are encrypted at rest.

use anyhow::{Context, Result};
use log::debug;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::security::SecretProtector;
use super::session::SessionStore;

/// Reserved session-key prefix; nothing outside this module writes under it.
pub const STAGED_PREFIX: &str = "setup.staged.";

#[derive(Clone)]
pub struct StagedDataStore {
    session: Arc<dyn SessionStore>,
    secrets: Arc<SecretProtector>,
}

impl StagedDataStore {
    pub fn new(session: Arc<dyn SessionStore>, secrets: Arc<SecretProtector>) -> Self {
        StagedDataStore { session, secrets }
    }

    fn namespace_key(namespace: &str) -> Result<String> {
        if namespace.is_empty() || namespace.contains('.') {
            anyhow::bail!("staged namespace must be non-empty and dot-free: '{namespace}'");
        }
        Ok(format!("{STAGED_PREFIX}{namespace}"))
    }

    /// Upsert one entry. Re-executing a step overwrites its previous output.
    pub async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<()> {
        debug!(
            "[PHASE: staging] [STEP: put] Staging {}.{}",
            namespace, key
        );

        let session_key = Self::namespace_key(namespace)?;
        let mut doc = self.raw_document(&session_key).await?;

        let stored = if is_secret_staged_key(key) {
            match &value {
                Value::String(s) => Value::String(self.secrets.encrypt(s).await?),
                other => other.clone(),
            }
        } else {
            value
        };

        doc.insert(key.to_string(), stored);
        self.session.put(&session_key, Value::Object(doc)).await
    }

    /// Read one entry, falling back to `default` when absent. `key` may be a
    /// dotted path descending into a nested staged document.
    pub async fn get(&self, namespace: &str, key: &str, default: Value) -> Result<Value> {
        let session_key = Self::namespace_key(namespace)?;
        let doc = self.raw_document(&session_key).await?;

        match lookup_path(&doc, key) {
            Some(value) => self.reveal(value.clone()).await,
            None => Ok(default),
        }
    }

    pub async fn has(&self, namespace: &str, key: &str) -> Result<bool> {
        let session_key = Self::namespace_key(namespace)?;
        let doc = self.raw_document(&session_key).await?;
        Ok(lookup_path(&doc, key).is_some())
    }

    pub async fn clear_namespace(&self, namespace: &str) -> Result<()> {
        let session_key = Self::namespace_key(namespace)?;
        self.session.remove(&session_key).await
    }

    /// Remove every staged entry under the reserved prefix. Used by the
    /// commit phase after success, or by an explicit reset.
    pub async fn clear_all(&self) -> Result<()> {
        self.session.remove_prefix(STAGED_PREFIX).await
    }

    /// Namespaces with at least one staged entry, sorted.
    pub async fn namespaces(&self) -> Result<Vec<String>> {
        let keys = self.session.keys(STAGED_PREFIX).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(STAGED_PREFIX).map(str::to_string))
            .collect())
    }

    /// One namespace's entries with secrets revealed, for the commit phase.
    pub async fn namespace_document(&self, namespace: &str) -> Result<Map<String, Value>> {
        let session_key = Self::namespace_key(namespace)?;
        let doc = self.raw_document(&session_key).await?;

        let mut out = Map::new();
        for (k, v) in doc {
            out.insert(k, self.reveal(v).await?);
        }
        Ok(out)
    }

    /// Immutable copy of everything staged, for display-predicate evaluation.
    /// Predicates see a stable view; mutation during iteration is impossible.
    pub async fn snapshot(&self) -> Result<StagedSnapshot> {
        let mut namespaces = BTreeMap::new();
        for ns in self.namespaces().await? {
            namespaces.insert(ns.clone(), self.namespace_document(&ns).await?);
        }
        Ok(StagedSnapshot { namespaces })
    }

    async fn raw_document(&self, session_key: &str) -> Result<Map<String, Value>> {
        match self.session.get(session_key).await? {
            Some(Value::Object(map)) => Ok(map),
            Some(other) => anyhow::bail!(
                "staged entry '{session_key}' is not an object: {other}"
            ),
            None => Ok(Map::new()),
        }
    }

    async fn reveal(&self, value: Value) -> Result<Value> {
        match value {
            Value::String(s) if self.secrets.is_encrypted(&s) => {
                let plain = self
                    .secrets
                    .decrypt(&s)
                    .await
                    .context("Failed to decrypt staged secret")?;
                Ok(Value::String(plain))
            }
            other => Ok(other),
        }
    }
}

/// Point-in-time copy of the staging area: namespace -> entries.
#[derive(Debug, Clone, Default)]
pub struct StagedSnapshot {
    namespaces: BTreeMap<String, Map<String, Value>>,
}

impl StagedSnapshot {
    pub fn get(&self, namespace: &str, key: &str) -> Option<&Value> {
        self.namespaces
            .get(namespace)
            .and_then(|doc| lookup_path(doc, key))
    }

    pub fn has(&self, namespace: &str, key: &str) -> bool {
        self.get(namespace, key).is_some()
    }

    pub fn namespace(&self, namespace: &str) -> Option<&Map<String, Value>> {
        self.namespaces.get(namespace)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }
}

/// Resolve `key` in `doc`: an exact top-level hit wins, otherwise the key is
/// treated as a dotted path into nested objects.
pub(crate) fn lookup_path<'a>(doc: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    if let Some(v) = doc.get(key) {
        return Some(v);
    }

    let mut segments = key.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;

    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Staged keys whose string values are encrypted before they reach the
/// session store.
fn is_secret_staged_key(key: &str) -> bool {
    let k = key.to_ascii_lowercase();
    k == "password"
        || k.ends_with("_password")
        || k == "secret"
        || k.ends_with("_secret")
        || k.ends_with("connection_string")
        || k.ends_with("api_key")
}
