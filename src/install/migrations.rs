// Migration manifest
//
// Schema migrations are declared in a JSON manifest with deterministic
// ordering and per-file SHA-256 checksums, so the same migration set applies
// identically on every target and a tampered file is refused.

use anyhow::{Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct MigrationManifest {
    #[serde(default)]
    pub migrations: Vec<MigrationEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MigrationEntry {
    pub name: String,
    pub file: String,
    pub order: u32,
    #[serde(default)]
    pub checksum: Option<String>,
}

/// Load and order the manifest. Ties on `order` are stabilized by name so
/// execution order never depends on file layout.
pub async fn load_manifest(manifest_path: &Path) -> Result<MigrationManifest> {
    let content = tokio::fs::read_to_string(manifest_path)
        .await
        .with_context(|| format!("Failed to read migration manifest: {:?}", manifest_path))?;

    let mut manifest: MigrationManifest = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse migration manifest: {:?}", manifest_path))?;

    manifest
        .migrations
        .sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));

    if manifest.migrations.is_empty() {
        anyhow::bail!("No migrations found in manifest: {:?}", manifest_path);
    }

    Ok(manifest)
}

/// Read one migration's SQL, verifying its checksum when the manifest
/// declares one.
pub async fn read_migration_sql(migrations_dir: &Path, entry: &MigrationEntry) -> Result<String> {
    let path = migrations_dir.join(&entry.file);
    let sql = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read migration file: {:?}", path))?;

    if let Some(expected) = &entry.checksum {
        let actual = sha256_hex(sql.as_bytes());
        if !actual.eq_ignore_ascii_case(expected) {
            anyhow::bail!(
                "Checksum mismatch for migration '{}': expected {}, got {}",
                entry.name,
                expected,
                actual
            );
        }
    }

    Ok(sql)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
