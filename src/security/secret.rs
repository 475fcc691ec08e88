// Secret handling (encryption-at-rest)
//
// Staged values that carry credentials are encrypted before they touch the
// session store:
// - Deterministic "is encrypted?" detection via a prefix
// - Authenticated encryption using AES-256-GCM
// - Lazy, file-backed master key under the wizard data directory
//
// Also home of the application-secret generator used by the commit phase.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{Context, Result};
use base64::Engine;
use ring::rand::{SecureRandom, SystemRandom};
use std::path::PathBuf;
use tokio::sync::OnceCell;

const ENC_PREFIX: &str = "ENCv1:";
const KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;

#[derive(Debug)]
pub struct SecretProtector {
    key_path: PathBuf,
    key: OnceCell<[u8; KEY_BYTES]>,
}

impl SecretProtector {
    pub fn new(key_path: PathBuf) -> Self {
        SecretProtector {
            key_path,
            key: OnceCell::new(),
        }
    }

    pub fn is_encrypted(&self, value: &str) -> bool {
        value.starts_with(ENC_PREFIX)
    }

    pub async fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(ENC_PREFIX.to_string());
        }

        let key = *self.master_key().await?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| anyhow::anyhow!("Internal error: invalid AES-256 key length"))?;

        let mut nonce_bytes = [0u8; NONCE_BYTES];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .map_err(|_| anyhow::anyhow!("Failed to generate nonce"))?;

        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| anyhow::anyhow!("Secret encryption failed"))?;

        // Store nonce || ciphertext (ciphertext includes the GCM tag)
        let mut blob = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);

        Ok(format!(
            "{}{}",
            ENC_PREFIX,
            base64::engine::general_purpose::STANDARD.encode(blob)
        ))
    }

    pub async fn decrypt(&self, value: &str) -> Result<String> {
        if !self.is_encrypted(value) {
            // Backward compatibility: treat as plaintext
            return Ok(value.to_string());
        }

        let encoded = value.trim_start_matches(ENC_PREFIX);
        if encoded.is_empty() {
            return Ok(String::new());
        }

        let blob = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .context("Failed to base64-decode encrypted secret")?;

        if blob.len() < NONCE_BYTES {
            anyhow::bail!("Encrypted secret blob is too short");
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_BYTES);
        let nonce = Nonce::from_slice(nonce_bytes);

        let key = *self.master_key().await?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| anyhow::anyhow!("Internal error: invalid AES-256 key length"))?;

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| anyhow::anyhow!("Secret decryption failed"))?;

        String::from_utf8(plaintext).context("Decrypted secret is not valid UTF-8")
    }

    async fn master_key(&self) -> Result<&[u8; KEY_BYTES]> {
        self.key
            .get_or_try_init(|| async {
                if tokio::fs::try_exists(&self.key_path).await.unwrap_or(false) {
                    return self.read_key_file().await;
                }
                self.create_key_file().await
            })
            .await
    }

    async fn read_key_file(&self) -> Result<[u8; KEY_BYTES]> {
        let encoded = tokio::fs::read(&self.key_path)
            .await
            .with_context(|| format!("Failed to read master key file: {:?}", self.key_path))?;

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .context("Failed to decode master key file (base64)")?;

        if decoded.len() != KEY_BYTES {
            anyhow::bail!("Master key file has invalid length (expected {KEY_BYTES} bytes)");
        }

        let mut key = [0u8; KEY_BYTES];
        key.copy_from_slice(&decoded);
        Ok(key)
    }

    async fn create_key_file(&self) -> Result<[u8; KEY_BYTES]> {
        if let Some(parent) = self.key_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create master key directory: {:?}", parent))?;
        }

        let mut key = [0u8; KEY_BYTES];
        SystemRandom::new()
            .fill(&mut key)
            .map_err(|_| anyhow::anyhow!("Failed to generate master key"))?;

        let encoded = base64::engine::general_purpose::STANDARD.encode(key);

        // Create-new so a concurrent writer wins cleanly; if the file already
        // exists we keep our in-memory key for this run and reload next start.
        let mut opts = tokio::fs::OpenOptions::new();
        opts.write(true).create_new(true);
        match opts.open(&self.key_path).await {
            Ok(mut file) => {
                use tokio::io::AsyncWriteExt;
                file.write_all(encoded.as_bytes())
                    .await
                    .with_context(|| format!("Failed to write master key: {:?}", self.key_path))?;
                file.flush().await.context("Failed to flush master key")?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to create master key file: {:?}", self.key_path)
                });
            }
        }

        Ok(key)
    }
}

/// Produce a fresh 256-bit application secret in the `base64:` envelope the
/// application expects. Each call rotates; callers invoke at most once per
/// install run.
pub fn generate_app_secret() -> Result<String> {
    let mut bytes = [0u8; KEY_BYTES];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| anyhow::anyhow!("Failed to generate application secret"))?;

    Ok(format!(
        "base64:{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protector(dir: &tempfile::TempDir) -> SecretProtector {
        SecretProtector::new(dir.path().join("secrets").join("master_key.b64"))
    }

    #[tokio::test]
    async fn test_encrypt_decrypt_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let secrets = protector(&dir);

        let encrypted = secrets.encrypt("hunter2").await.unwrap();
        assert!(secrets.is_encrypted(&encrypted));
        assert!(!encrypted.contains("hunter2"));

        assert_eq!(secrets.decrypt(&encrypted).await.unwrap(), "hunter2");
    }

    #[tokio::test]
    async fn test_key_survives_new_protector() {
        let dir = tempfile::tempdir().unwrap();

        let encrypted = protector(&dir).encrypt("s3cret").await.unwrap();
        // A fresh protector over the same key file must decrypt.
        assert_eq!(protector(&dir).decrypt(&encrypted).await.unwrap(), "s3cret");
    }

    #[tokio::test]
    async fn test_plaintext_passes_through_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        let secrets = protector(&dir);
        assert_eq!(secrets.decrypt("not encrypted").await.unwrap(), "not encrypted");
    }

    #[test]
    fn test_generated_secret_shape() {
        let a = generate_app_secret().unwrap();
        let b = generate_app_secret().unwrap();

        assert!(a.starts_with("base64:"));
        assert_ne!(a, b, "each call must rotate the secret");

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(a.trim_start_matches("base64:"))
            .unwrap();
        assert_eq!(decoded.len(), 32);
    }
}
