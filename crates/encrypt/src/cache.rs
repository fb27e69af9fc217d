//! The get-or-regenerate protocol for encrypted artifacts.

use crate::{check_header, has_encrypted_header, EncryptError, EncryptResult, Encryptor};
use geochart_layout::{ensure_within, Namespace, StorageLayout};
use geochart_types::DatapackTitle;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Serves encrypted datapack payloads, regenerating the cached artifact
/// whenever it is absent or fails the header check.
///
/// This is the only writer of the `encrypted/` tree. Regeneration is
/// serialised per `(namespace, title)` key so a reader can never observe
/// a half-written artifact from a concurrent writer.
pub struct EncryptionCache {
    layout: StorageLayout,
    encryptor: Arc<dyn Encryptor>,
    keys: Mutex<HashMap<(Namespace, DatapackTitle), Arc<tokio::sync::Mutex<()>>>>,
}

impl EncryptionCache {
    pub fn new(layout: StorageLayout, encryptor: Arc<dyn Encryptor>) -> Self {
        Self {
            layout,
            encryptor,
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the encrypted bytes for a datapack payload, producing and
    /// caching them on first request.
    ///
    /// Checked in order, each a potential early return:
    /// 1. a cached artifact passing the header check;
    /// 2. the plaintext itself, when it already carries the header
    ///    (uploaded pre-encrypted — nothing is written);
    /// 3. a freshly produced artifact, re-validated before it is served.
    ///
    /// Stale artifacts failing the header check are deleted on sight.
    ///
    /// # Errors
    ///
    /// - `PlaintextNotFound` if the payload file is missing
    /// - `InvalidOutput` if a fresh artifact still fails the header check
    /// - `ProcessFailed` if the encryptor cannot run or writes nothing
    pub async fn get_or_encrypt(
        &self,
        namespace: &Namespace,
        title: &DatapackTitle,
        stored_file_name: &str,
    ) -> EncryptResult<Vec<u8>> {
        let _key = self.acquire(namespace, title).await;

        let namespace_root = self.layout.namespace_root(namespace);
        let encrypted_dir = self.layout.encrypted_dir(namespace, title);
        let artifact = encrypted_dir.join(stored_file_name);
        let plaintext = self
            .layout
            .datapack_dir(namespace, title)
            .join(stored_file_name);
        if !ensure_within(&namespace_root, &artifact)
            || !ensure_within(&namespace_root, &plaintext)
        {
            return Err(EncryptError::Traversal);
        }

        if let Some(bytes) = self.read_valid_artifact(&artifact).await? {
            return Ok(bytes);
        }

        let plaintext_bytes = match tokio::fs::read(&plaintext).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EncryptError::PlaintextNotFound(format!(
                    "{namespace}/{title}"
                )));
            }
            Err(e) => return Err(EncryptError::Io(e)),
        };
        if has_encrypted_header(&plaintext_bytes) {
            return Ok(plaintext_bytes);
        }

        tokio::fs::create_dir_all(&encrypted_dir).await?;
        self.encryptor.encrypt(&plaintext, &encrypted_dir).await?;

        match tokio::fs::read(&artifact).await {
            Ok(bytes) if has_encrypted_header(&bytes) => Ok(bytes),
            Ok(_) => {
                tokio::fs::remove_file(&artifact).await?;
                Err(EncryptError::InvalidOutput(format!("{namespace}/{title}")))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(EncryptError::ProcessFailed(format!(
                    "encryptor produced no artifact for {namespace}/{title}"
                )))
            }
            Err(e) => Err(EncryptError::Io(e)),
        }
    }

    /// Reads a cached artifact if it exists and passes the header check;
    /// deletes it if it exists but fails.
    async fn read_valid_artifact(&self, artifact: &Path) -> EncryptResult<Option<Vec<u8>>> {
        match check_header(artifact).await {
            Ok(true) => Ok(Some(tokio::fs::read(artifact).await?)),
            Ok(false) => {
                tracing::warn!(
                    "deleting stale encrypted artifact {}",
                    artifact.display()
                );
                tokio::fs::remove_file(artifact).await?;
                Ok(None)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EncryptError::Io(e)),
        }
    }

    async fn acquire(
        &self,
        namespace: &Namespace,
        title: &DatapackTitle,
    ) -> tokio::sync::OwnedMutexGuard<()> {
        let slot = {
            let mut keys = self.keys.lock().expect("encryption key map poisoned");
            Arc::clone(
                keys.entry((namespace.clone(), title.clone()))
                    .or_default(),
            )
        };
        slot.lock_owned().await
    }
}
