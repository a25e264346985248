//! Optional encryption decorator for uploads.
//!
//! Wraps any [`RemoteFileStore`] and AES-256-GCM-encrypts each file before
//! it leaves the machine. The ciphertext is written next to the plaintext
//! as `<name>.enc` with the random 96-bit nonce prepended, uploaded, and
//! removed again regardless of the upload outcome.

use std::path::Path;
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use tracing::warn;

use super::{RemoteError, RemoteFileStore};

const NONCE_LEN: usize = 12;

pub struct EncryptedStore {
    inner: Arc<dyn RemoteFileStore>,
    key: [u8; 32],
}

impl std::fmt::Debug for EncryptedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedStore").finish_non_exhaustive()
    }
}

impl EncryptedStore {
    /// Wrap `inner` with a base64-encoded 32-byte key.
    pub fn new(inner: Arc<dyn RemoteFileStore>, key_base64: &str) -> Result<Self, RemoteError> {
        let decoded = BASE64
            .decode(key_base64.trim())
            .map_err(|err| RemoteError::Encryption(format!("invalid key encoding: {err}")))?;
        let key: [u8; 32] = decoded.try_into().map_err(|_| {
            RemoteError::Encryption("encryption key must decode to exactly 32 bytes".to_string())
        })?;
        Ok(Self { inner, key })
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, RemoteError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| RemoteError::Encryption("encryption failed".to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);
        Ok(payload)
    }
}

#[async_trait]
impl RemoteFileStore for EncryptedStore {
    async fn list(&self) -> Result<Vec<String>, RemoteError> {
        self.inner.list().await
    }

    async fn upload(&self, local: &Path) -> Result<(), RemoteError> {
        if !local.is_file() {
            return Err(RemoteError::MissingLocalFile(local.to_path_buf()));
        }
        let file_name = local
            .file_name()
            .ok_or_else(|| RemoteError::MissingLocalFile(local.to_path_buf()))?
            .to_string_lossy();

        let plaintext = tokio::fs::read(local).await?;
        let payload = self.encrypt(&plaintext)?;
        let encrypted_path = local.with_file_name(format!("{file_name}.enc"));
        tokio::fs::write(&encrypted_path, &payload).await?;

        let outcome = self.inner.upload(&encrypted_path).await;
        if let Err(err) = tokio::fs::remove_file(&encrypted_path).await {
            warn!(
                path = %encrypted_path.display(),
                error = %err,
                "could not remove temporary ciphertext"
            );
        }
        outcome
    }

    async fn delete(&self, name: &str) -> Result<(), RemoteError> {
        self.inner.delete(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Captures uploads (name and bytes) at the moment they happen, since
    /// the decorator deletes its temporary ciphertext afterwards.
    #[derive(Default)]
    struct CapturingStore {
        uploads: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl RemoteFileStore for CapturingStore {
        async fn list(&self) -> Result<Vec<String>, RemoteError> {
            Ok(Vec::new())
        }

        async fn upload(&self, local: &Path) -> Result<(), RemoteError> {
            let name = local.file_name().unwrap().to_string_lossy().into_owned();
            let bytes = std::fs::read(local)?;
            self.uploads.lock().unwrap().push((name, bytes));
            Ok(())
        }

        async fn delete(&self, _name: &str) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    fn test_key() -> String {
        BASE64.encode([7u8; 32])
    }

    #[tokio::test]
    async fn test_upload_sends_decryptable_ciphertext() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("report.zip");
        std::fs::write(&local, b"confidential case data").unwrap();

        let capturing = Arc::new(CapturingStore::default());
        let store = EncryptedStore::new(capturing.clone(), &test_key()).unwrap();
        store.upload(&local).await.unwrap();

        let uploads = capturing.uploads.lock().unwrap();
        let (name, payload) = &uploads[0];
        assert_eq!(name, "report.zip.enc");
        assert_ne!(payload.as_slice(), b"confidential case data");

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&[7u8; 32]));
        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .unwrap();
        assert_eq!(plaintext, b"confidential case data");
    }

    #[tokio::test]
    async fn test_upload_removes_temporary_ciphertext() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("report.zip");
        std::fs::write(&local, b"data").unwrap();

        let store =
            EncryptedStore::new(Arc::new(CapturingStore::default()), &test_key()).unwrap();
        store.upload(&local).await.unwrap();

        assert!(local.exists(), "plaintext stays for the caller to clean up");
        assert!(!dir.path().join("report.zip.enc").exists());
    }

    #[tokio::test]
    async fn test_rejects_short_key() {
        let key = BASE64.encode([1u8; 16]);
        let result = EncryptedStore::new(Arc::new(CapturingStore::default()), &key);
        assert!(matches!(result, Err(RemoteError::Encryption(_))));
    }

    #[tokio::test]
    async fn test_upload_requires_local_file() {
        let store =
            EncryptedStore::new(Arc::new(CapturingStore::default()), &test_key()).unwrap();
        let err = store.upload(&PathBuf::from("/nonexistent/file")).await;
        assert!(matches!(err, Err(RemoteError::MissingLocalFile(_))));
    }
}
