//! Priority edits and cross-namespace promotion.

use crate::store::DatapackStore;
use crate::{
    DatapackKey, DatapackMetadata, DatapackType, NewDatapackFiles, StoreError, StoreResult,
    COVER_IMAGE_BASENAME, COVER_IMAGE_EXTENSIONS,
};
use geochart_layout::{Namespace, PDF_FILES_DIR_NAME};
use geochart_types::DatapackTitle;
use std::path::PathBuf;

/// One item of a batch priority update.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityChangeRequest {
    /// Owning namespace in wire form
    pub uuid: Namespace,
    pub title: DatapackTitle,
    pub priority: i32,
}

/// Outcome of a batch priority update.
///
/// Every requested item lands in exactly one of the two lists, so callers
/// can distinguish full success, full failure, and partial success.
#[derive(Debug, Default, serde::Serialize)]
pub struct PriorityBatchOutcome {
    #[serde(rename = "completedRequests")]
    pub completed: Vec<PriorityChangeRequest>,
    #[serde(rename = "failedRequests")]
    pub failed: Vec<PriorityChangeRequest>,
}

impl PriorityBatchOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn all_failed(&self) -> bool {
        self.completed.is_empty() && !self.failed.is_empty()
    }
}

impl DatapackStore {
    /// Sets a datapack's priority, rewriting its sidecar.
    pub async fn update_priority(
        &self,
        namespace: &Namespace,
        title: &DatapackTitle,
        priority: i32,
    ) -> StoreResult<()> {
        let key = DatapackKey::new(namespace.clone(), title.clone());
        let _slot = self.locks.acquire(&key).await;

        let mut metadata = self.fetch(namespace, title)?;
        metadata.priority = priority;
        let dir = self.layout.datapack_dir(namespace, title);
        self.write_sidecar(&dir, &metadata).await?;
        self.index.insert(metadata);
        Ok(())
    }

    /// Applies a batch of priority updates, attempting every item
    /// independently and in order. Failures are logged and recorded; they
    /// never abort the rest of the batch.
    pub async fn update_priorities(
        &self,
        tasks: Vec<PriorityChangeRequest>,
    ) -> PriorityBatchOutcome {
        let mut outcome = PriorityBatchOutcome::default();
        for task in tasks {
            match self
                .update_priority(&task.uuid, &task.title, task.priority)
                .await
            {
                Ok(()) => outcome.completed.push(task),
                Err(e) => {
                    tracing::error!(
                        "priority update failed for {}/{}: {}",
                        task.uuid,
                        task.title,
                        e
                    );
                    outcome.failed.push(task);
                }
            }
        }
        outcome
    }

    /// Promotes an official datapack into a workshop namespace.
    ///
    /// The official payload, cover image, and attachments are copied into
    /// the workshop slot with ownership fields rewritten (`uuid` to the
    /// workshop, `type` to `workshop`, `isPublic` forced true). The
    /// official directory is left untouched.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no official datapack has this title
    /// - `Conflict` if the workshop already holds one
    /// - `Integrity` if directory setup completed without producing an
    ///   index entry (a setup contract violation)
    pub async fn promote_official_to_workshop(
        &self,
        title: &DatapackTitle,
        workshop_id: u32,
    ) -> StoreResult<DatapackMetadata> {
        let official = self.fetch(&Namespace::Official, title)?;
        let target_namespace = Namespace::Workshop(workshop_id);
        let target_key = DatapackKey::new(target_namespace.clone(), title.clone());

        let target_dir = self.layout.datapack_dir(&target_namespace, title);
        if self.index.contains(&target_key)
            || tokio::fs::try_exists(&target_dir).await.unwrap_or(false)
        {
            return Err(StoreError::Conflict(target_key.to_string()));
        }

        let files = self.collect_datapack_files(&official).await?;

        let mut promoted = official;
        promoted.uuid = target_namespace.clone();
        promoted.kind = DatapackType::Workshop;
        promoted.is_public = true;
        promoted.datapack_image = None; // re-derived from the copied file

        let promoted = self
            .setup_datapack_directory(&target_namespace, files, promoted, false, true)
            .await?;

        if !self.index.contains(&target_key) {
            return Err(StoreError::Integrity(format!(
                "promoted datapack {target_key} missing from index after setup"
            )));
        }
        Ok(promoted)
    }

    /// Gathers the existing on-disk files of a datapack for re-setup in
    /// another namespace.
    async fn collect_datapack_files(
        &self,
        metadata: &DatapackMetadata,
    ) -> StoreResult<NewDatapackFiles> {
        let dir = self.layout.datapack_dir(&metadata.uuid, &metadata.title);
        let payload = self.payload_path(metadata)?;

        let mut cover_image: Option<PathBuf> = None;
        if let Some(name) = &metadata.datapack_image {
            let candidate = dir.join(name);
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                cover_image = Some(candidate);
            }
        }
        if cover_image.is_none() {
            for ext in COVER_IMAGE_EXTENSIONS {
                let candidate = dir.join(format!("{COVER_IMAGE_BASENAME}.{ext}"));
                if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                    cover_image = Some(candidate);
                    break;
                }
            }
        }

        let mut pdfs = Vec::new();
        let pdf_dir = dir.join(PDF_FILES_DIR_NAME);
        if let Ok(mut entries) = tokio::fs::read_dir(&pdf_dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                    if let Some(name) = entry.file_name().to_str() {
                        pdfs.push((name.to_owned(), entry.path()));
                    }
                }
            }
            pdfs.sort();
        }

        Ok(NewDatapackFiles {
            payload,
            cover_image,
            pdfs,
        })
    }
}
