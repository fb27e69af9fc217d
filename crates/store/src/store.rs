//! The datapack store service: fetch, list, download, delete, edit, scan,
//! and retention sweep.

use crate::{
    DatapackIndex, DatapackKey, DatapackMetadata, DatapackMetadataPatch, RetentionLedger,
    SlotLocks, StoreError, StoreResult, COVER_IMAGE_BASENAME, COVER_IMAGE_EXTENSIONS,
    RETENTION_FILENAME, SIDECAR_FILENAME, STAGE_PREFIX,
};
use chrono::{DateTime, Utc};
use geochart_layout::{ensure_within, Namespace, StorageLayout, ENCRYPTED_DIR_NAME};
use geochart_types::DatapackTitle;
use std::path::{Path, PathBuf};

/// Filesystem-backed datapack storage addressed by `(namespace, title)`.
///
/// Owns the in-memory index, the per-slot write locks, and the retention
/// ledger. Shared process-wide behind an `Arc`; all methods take `&self`.
#[derive(Debug)]
pub struct DatapackStore {
    pub(crate) layout: StorageLayout,
    pub(crate) index: DatapackIndex,
    pub(crate) locks: SlotLocks,
    pub(crate) retention: RetentionLedger,
}

impl DatapackStore {
    /// Creates a store over `layout` with an empty index. Call
    /// [`Self::load_existing`] at startup to populate it.
    pub fn new(layout: StorageLayout) -> Self {
        let retention = RetentionLedger::new(layout.data_root().join(RETENTION_FILENAME));
        Self {
            layout,
            index: DatapackIndex::new(),
            locks: SlotLocks::new(),
            retention,
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn index(&self) -> &DatapackIndex {
        &self.index
    }

    /// Scans the data root and loads every readable sidecar into the
    /// index. Unreadable or inconsistent entries are logged and skipped so
    /// one corrupt directory cannot keep the service from starting.
    ///
    /// Returns the number of datapacks loaded.
    pub async fn load_existing(&self) -> StoreResult<usize> {
        let mut loaded = 0;

        for root in [
            self.layout.namespace_root(&Namespace::Official),
            self.layout.namespace_root(&Namespace::Temp),
        ] {
            loaded += self.scan_namespace_root(&root).await;
        }
        for container in [self.layout.users_root(), self.layout.workshops_root()] {
            let mut entries = match tokio::fs::read_dir(&container).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                    loaded += self.scan_namespace_root(&entry.path()).await;
                }
            }
        }

        Ok(loaded)
    }

    async fn scan_namespace_root(&self, root: &Path) -> usize {
        let mut loaded = 0;
        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(_) => return 0,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name == ENCRYPTED_DIR_NAME || name.starts_with(STAGE_PREFIX) {
                continue;
            }
            if !entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let dir = entry.path();
            match self.load_sidecar(&dir).await {
                Ok(metadata) => {
                    self.index.insert(metadata);
                    loaded += 1;
                }
                Err(e) => {
                    tracing::warn!("skipping unreadable datapack at {}: {}", dir.display(), e);
                }
            }
        }
        loaded
    }

    /// Reads and validates the sidecar of a datapack directory, checking
    /// that the record agrees with its location on disk.
    async fn load_sidecar(&self, dir: &Path) -> StoreResult<DatapackMetadata> {
        let (namespace, title) = self
            .layout
            .parse_datapack_dir(dir)
            .ok_or_else(|| StoreError::Integrity(format!("unrecognised path {}", dir.display())))?;
        let bytes = tokio::fs::read(dir.join(SIDECAR_FILENAME)).await?;
        let metadata: DatapackMetadata = serde_json::from_slice(&bytes)?;
        metadata.assert_owned_by(&namespace)?;
        if metadata.title != title {
            return Err(StoreError::Integrity(format!(
                "sidecar title '{}' does not match directory '{}'",
                metadata.title, title
            )));
        }
        Ok(metadata)
    }

    /// Fetches a datapack's metadata from the index.
    pub fn fetch(&self, namespace: &Namespace, title: &DatapackTitle) -> StoreResult<DatapackMetadata> {
        let key = DatapackKey::new(namespace.clone(), title.clone());
        self.index
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    /// Lists every datapack owned by `namespace`.
    pub fn list(&self, namespace: &Namespace) -> Vec<DatapackMetadata> {
        self.index.list_namespace(namespace)
    }

    /// Returns the payload path for a known datapack, verified to stay
    /// inside its namespace root.
    pub fn payload_path(&self, metadata: &DatapackMetadata) -> StoreResult<PathBuf> {
        let root = self.layout.namespace_root(&metadata.uuid);
        let path = self
            .layout
            .datapack_dir(&metadata.uuid, &metadata.title)
            .join(&metadata.stored_file_name);
        if !ensure_within(&root, &path) {
            return Err(StoreError::Traversal);
        }
        Ok(path)
    }

    /// Reads a datapack's payload bytes.
    pub async fn read_payload(
        &self,
        namespace: &Namespace,
        title: &DatapackTitle,
    ) -> StoreResult<Vec<u8>> {
        let metadata = self.fetch(namespace, title)?;
        let path = self.payload_path(&metadata)?;
        read_expected(&path).await
    }

    /// Reads a datapack's cover image, probing the known extensions when
    /// the sidecar does not name one.
    pub async fn read_cover_image(
        &self,
        namespace: &Namespace,
        title: &DatapackTitle,
    ) -> StoreResult<Vec<u8>> {
        let metadata = self.fetch(namespace, title)?;
        let dir = self.layout.datapack_dir(namespace, title);
        if let Some(name) = &metadata.datapack_image {
            return read_expected(&dir.join(name)).await;
        }
        for ext in COVER_IMAGE_EXTENSIONS {
            let candidate = dir.join(format!("{COVER_IMAGE_BASENAME}.{ext}"));
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                return read_expected(&candidate).await;
            }
        }
        Err(StoreError::NotFound(format!(
            "no cover image for {namespace}/{title}"
        )))
    }

    /// Deletes a datapack: its directory, its encrypted artifacts, its
    /// index entry, and its retention record.
    pub async fn delete_datapack(
        &self,
        namespace: &Namespace,
        title: &DatapackTitle,
    ) -> StoreResult<()> {
        let key = DatapackKey::new(namespace.clone(), title.clone());
        let _slot = self.locks.acquire(&key).await;

        self.fetch(namespace, title)?;
        let dir = self.layout.datapack_dir(namespace, title);
        let root = self.layout.namespace_root(namespace);
        if !ensure_within(&root, &dir) {
            return Err(StoreError::Traversal);
        }

        remove_dir_if_present(&dir).await?;
        remove_dir_if_present(&self.layout.encrypted_dir(namespace, title)).await?;

        self.index.remove(&key);
        if namespace.is_user() {
            if let Err(e) = self.retention.deregister(&dir).await {
                tracing::warn!("failed to deregister {} from retention: {}", dir.display(), e);
            }
        }
        Ok(())
    }

    /// Deletes every datapack a namespace owns, including its whole root.
    ///
    /// Returns the number of index entries removed.
    pub async fn delete_all_datapacks(&self, namespace: &Namespace) -> StoreResult<usize> {
        let root = self.layout.namespace_root(namespace);
        remove_dir_if_present(&root).await?;
        let removed = self.index.remove_namespace(namespace);
        if namespace.is_user() {
            if let Err(e) = self.retention.deregister_under(&root).await {
                tracing::warn!(
                    "failed to deregister {} from retention: {}",
                    root.display(),
                    e
                );
            }
        }
        Ok(removed)
    }

    /// Applies a partial metadata edit. A changed title renames the
    /// datapack directory; the previous state is restored if the sidecar
    /// rewrite fails.
    pub async fn edit_metadata(
        &self,
        namespace: &Namespace,
        title: &DatapackTitle,
        patch: &DatapackMetadataPatch,
    ) -> StoreResult<DatapackMetadata> {
        let key = DatapackKey::new(namespace.clone(), title.clone());
        let _slot = self.locks.acquire(&key).await;

        let mut metadata = self.fetch(namespace, title)?;
        patch.apply_fields(&mut metadata);

        match &patch.title {
            Some(new_title) if new_title != title => {
                self.rename_datapack(namespace, &key, metadata, new_title)
                    .await
            }
            _ => {
                let dir = self.layout.datapack_dir(namespace, title);
                self.write_sidecar(&dir, &metadata).await?;
                self.index.insert(metadata.clone());
                if namespace.is_user() {
                    if let Err(e) = self.retention.touch(&dir).await {
                        tracing::warn!("failed to touch retention for {}: {}", dir.display(), e);
                    }
                }
                Ok(metadata)
            }
        }
    }

    async fn rename_datapack(
        &self,
        namespace: &Namespace,
        old_key: &DatapackKey,
        mut metadata: DatapackMetadata,
        new_title: &DatapackTitle,
    ) -> StoreResult<DatapackMetadata> {
        let new_key = DatapackKey::new(namespace.clone(), new_title.clone());
        let new_dir = self.layout.datapack_dir(namespace, new_title);
        if self.index.contains(&new_key) || tokio::fs::try_exists(&new_dir).await.unwrap_or(false)
        {
            return Err(StoreError::Conflict(new_key.to_string()));
        }

        let old_dir = self.layout.datapack_dir(namespace, &old_key.title);
        let root = self.layout.namespace_root(namespace);
        if !ensure_within(&root, &new_dir) {
            return Err(StoreError::Traversal);
        }

        tokio::fs::rename(&old_dir, &new_dir).await?;
        metadata.title = new_title.clone();
        if let Err(e) = self.write_sidecar(&new_dir, &metadata).await {
            if let Err(restore) = tokio::fs::rename(&new_dir, &old_dir).await {
                tracing::error!(
                    "failed to restore {} after aborted rename: {}",
                    old_dir.display(),
                    restore
                );
            }
            return Err(e);
        }

        // the encrypted artifact is keyed by the old title; drop the stale
        // cache rather than carrying it across
        remove_dir_if_present(&self.layout.encrypted_dir(namespace, &old_key.title)).await?;

        self.index.remove(old_key);
        self.index.insert(metadata.clone());
        if namespace.is_user() {
            if let Err(e) = self.retention.change_key(&old_dir, &new_dir).await {
                tracing::warn!(
                    "failed to re-key retention entry {}: {}",
                    old_dir.display(),
                    e
                );
            }
        }
        Ok(metadata)
    }

    /// Rewrites a datapack directory's metadata sidecar.
    pub(crate) async fn write_sidecar(
        &self,
        dir: &Path,
        metadata: &DatapackMetadata,
    ) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(metadata)?;
        tokio::fs::write(dir.join(SIDECAR_FILENAME), json).await?;
        Ok(())
    }

    /// Deletes user datapacks whose retention entry is older than the
    /// sunset interval as of `now`. Returns the number swept.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> StoreResult<usize> {
        let mut swept = 0;
        for dir in self.retention.expired(now).await? {
            match self.layout.parse_datapack_dir(&dir) {
                Some((namespace, title)) => {
                    match self.delete_datapack(&namespace, &title).await {
                        Ok(()) => swept += 1,
                        Err(StoreError::NotFound(_)) => {
                            remove_dir_if_present(&dir).await?;
                            self.retention.deregister(&dir).await?;
                        }
                        Err(e) => {
                            tracing::warn!(
                                "retention sweep failed for {}: {}",
                                dir.display(),
                                e
                            );
                        }
                    }
                }
                None => {
                    tracing::warn!(
                        "dropping retention entry outside the data root: {}",
                        dir.display()
                    );
                    self.retention.deregister(&dir).await?;
                }
            }
        }
        Ok(swept)
    }
}

/// Reads a file, mapping a missing file to `NotFound`.
async fn read_expected(path: &Path) -> StoreResult<Vec<u8>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
        )),
        Err(e) => Err(StoreError::Io(e)),
    }
}

async fn remove_dir_if_present(dir: &Path) -> StoreResult<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::Io(e)),
    }
}
