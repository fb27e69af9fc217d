//! Datapack directory setup: staged build, single-rename commit, rollback.

use crate::store::DatapackStore;
use crate::{
    DatapackMetadata, StoreError, StoreResult, COVER_IMAGE_BASENAME, SIDECAR_FILENAME,
    STAGE_PREFIX,
};
use geochart_layout::{ensure_within, Namespace, PDF_FILES_DIR_NAME};
use std::path::{Path, PathBuf};

/// The materialised parts of an accepted upload, as handed over by the
/// ingestion pipeline (or re-derived from an existing directory during
/// promotion).
#[derive(Debug, Clone)]
pub struct NewDatapackFiles {
    /// Path of the payload file to move or copy in
    pub payload: PathBuf,
    /// Optional cover image; stored as `datapack-image.<ext>`
    pub cover_image: Option<PathBuf>,
    /// PDF attachments as `(stored name, source path)` pairs
    pub pdfs: Vec<(String, PathBuf)>,
}

impl NewDatapackFiles {
    pub fn payload_only(payload: impl Into<PathBuf>) -> Self {
        Self {
            payload: payload.into(),
            cover_image: None,
            pdfs: Vec::new(),
        }
    }
}

/// A staging directory that removes itself unless the commit rename
/// succeeds.
///
/// Everything written during setup lands in here first; the final step is
/// a single rename onto the target path, after which the guard is
/// disarmed. Every other exit path (error or panic) drops the guard and
/// the partial state with it.
pub(crate) struct StageDir {
    path: PathBuf,
    armed: bool,
}

impl StageDir {
    pub(crate) async fn create(parent: &Path) -> StoreResult<Self> {
        tokio::fs::create_dir_all(parent).await?;
        let path = parent.join(format!("{STAGE_PREFIX}{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::create_dir(&path).await?;
        Ok(Self { path, armed: true })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StageDir {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        "failed to remove staging directory {}: {}",
                        self.path.display(),
                        e
                    );
                }
            }
        }
    }
}

impl DatapackStore {
    /// Builds the on-disk directory for a datapack and registers it in the
    /// index.
    ///
    /// The directory is assembled in a staging location under the
    /// namespace root and committed with one rename, so a failure at any
    /// step leaves no partial datapack behind. With `is_update` the
    /// existing directory is swapped out and removed after the new one is
    /// in place. With `preserve_sources` the input files are copied rather
    /// than moved (promotion reuses another namespace's payload in place).
    ///
    /// # Errors
    ///
    /// - `Conflict` if the slot is occupied and this is not an update
    /// - `Integrity` if the metadata's ownership fields disagree with
    ///   `namespace` or `storedFileName` is not a bare file name
    /// - `Traversal` if a derived path escapes the namespace root
    /// - `Io` / `Serialization` for filesystem and sidecar failures
    pub async fn setup_datapack_directory(
        &self,
        namespace: &Namespace,
        files: NewDatapackFiles,
        mut metadata: DatapackMetadata,
        is_update: bool,
        preserve_sources: bool,
    ) -> StoreResult<DatapackMetadata> {
        metadata.assert_owned_by(namespace)?;
        let stored_name = bare_file_name(&metadata.stored_file_name)?;

        let key = metadata.key();
        let _slot = self.locks.acquire(&key).await;

        let namespace_root = self.layout.namespace_root(namespace);
        let target = self.layout.datapack_dir(namespace, &metadata.title);
        if !ensure_within(&namespace_root, &target) {
            return Err(StoreError::Traversal);
        }

        let target_exists = tokio::fs::try_exists(&target).await.unwrap_or(false);
        if !is_update && (target_exists || self.index.contains(&key)) {
            return Err(StoreError::Conflict(key.to_string()));
        }

        let stage = StageDir::create(&namespace_root).await?;

        transfer(&files.payload, &stage.path().join(&stored_name), preserve_sources).await?;

        if let Some(image) = &files.cover_image {
            let image_name = cover_image_name(image);
            transfer(image, &stage.path().join(&image_name), preserve_sources).await?;
            metadata.datapack_image = Some(image_name);
        }

        if !files.pdfs.is_empty() {
            let pdf_dir = stage.path().join(PDF_FILES_DIR_NAME);
            tokio::fs::create_dir(&pdf_dir).await?;
            for (name, source) in &files.pdfs {
                let name = bare_file_name(name)?;
                transfer(source, &pdf_dir.join(name), preserve_sources).await?;
            }
        }
        metadata.has_files = !files.pdfs.is_empty();

        let sidecar = serde_json::to_vec_pretty(&metadata)?;
        tokio::fs::write(stage.path().join(SIDECAR_FILENAME), sidecar).await?;

        self.commit_stage(stage, &target, is_update && target_exists)
            .await?;

        self.index.insert(metadata.clone());

        if namespace.is_user() {
            if let Err(setup_error) = self.retention.register(&target, &stored_name).await {
                self.index.remove(&key);
                if let Err(cleanup_error) = tokio::fs::remove_dir_all(&target).await {
                    return Err(StoreError::CleanupAfterSetupFailed {
                        path: target,
                        setup_error: Box::new(setup_error),
                        cleanup_error,
                    });
                }
                return Err(setup_error);
            }
        }

        Ok(metadata)
    }

    /// Renames the stage onto `target`, swapping out the previous
    /// directory first when replacing.
    async fn commit_stage(
        &self,
        stage: StageDir,
        target: &Path,
        replace_existing: bool,
    ) -> StoreResult<()> {
        let displaced = if replace_existing {
            let parent = target.parent().expect("datapack dir has a parent");
            let displaced =
                parent.join(format!("{STAGE_PREFIX}old-{}", uuid::Uuid::new_v4().simple()));
            tokio::fs::rename(target, &displaced).await?;
            Some(displaced)
        } else {
            None
        };

        if let Err(e) = tokio::fs::rename(stage.path(), target).await {
            if let Some(displaced) = &displaced {
                if let Err(restore) = tokio::fs::rename(displaced, target).await {
                    tracing::error!(
                        "failed to restore {} after aborted swap: {}",
                        target.display(),
                        restore
                    );
                }
            }
            return Err(StoreError::Io(e));
        }
        stage.disarm();

        if let Some(displaced) = displaced {
            if let Err(e) = tokio::fs::remove_dir_all(&displaced).await {
                tracing::warn!(
                    "failed to remove displaced directory {}: {}",
                    displaced.display(),
                    e
                );
            }
        }
        Ok(())
    }
}

/// Rejects any file name that is not a single path component.
fn bare_file_name(name: &str) -> StoreResult<String> {
    let path = Path::new(name);
    match path.file_name() {
        Some(base) if base == path.as_os_str() && !name.contains('\\') => {
            Ok(name.to_owned())
        }
        _ => Err(StoreError::Integrity(format!(
            "'{name}' is not a bare file name"
        ))),
    }
}

/// Names a cover image `datapack-image.<ext>` after its source extension.
fn cover_image_name(source: &Path) -> String {
    match source.extension().and_then(|ext| ext.to_str()) {
        Some(ext) => format!("{COVER_IMAGE_BASENAME}.{ext}"),
        None => COVER_IMAGE_BASENAME.to_owned(),
    }
}

/// Moves a file into place, or copies it when the source must survive.
/// Rename is tried first; a cross-device rename falls back to copy +
/// remove.
async fn transfer(source: &Path, dest: &Path, preserve_source: bool) -> StoreResult<()> {
    if preserve_source {
        tokio::fs::copy(source, dest).await?;
        return Ok(());
    }
    if tokio::fs::rename(source, dest).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(source, dest).await?;
    tokio::fs::remove_file(source).await?;
    Ok(())
}
