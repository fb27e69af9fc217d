//! Datapack storage core.
//!
//! This crate owns everything between a validated upload and the bytes on
//! disk: the metadata sidecar model, the process-wide datapack index, the
//! per-slot write locks, directory setup with staged commit and rollback,
//! metadata edits, priority updates, cross-namespace promotion, and the
//! upload-retention ledger.
//!
//! ## Storage model
//!
//! One directory per `(namespace, title)` pair, fully determined by the
//! [`geochart_layout::StorageLayout`]:
//!
//! ```text
//! <namespace root>/<title>/
//! ├── <storedFileName>        # the datapack payload
//! ├── datapack.json           # metadata sidecar
//! ├── datapack-image.<ext>    # optional cover image
//! └── files/                  # optional PDF attachments
//! ```
//!
//! Writes are staged into a hidden directory under the namespace root and
//! committed with a single rename, so a failure at any point before the
//! commit leaves no partial datapack visible. The in-memory index is only
//! updated after the filesystem mutation succeeds.

mod index;
mod locks;
mod metadata;
mod priority;
mod retention;
mod setup;
mod store;
mod workshop;

pub use index::DatapackIndex;
pub use locks::SlotLocks;
pub use metadata::{DatapackKey, DatapackMetadata, DatapackMetadataPatch, DatapackType};
pub use priority::{PriorityBatchOutcome, PriorityChangeRequest};
pub use retention::{RetentionLedger, SUNSET_DAYS};
pub use setup::NewDatapackFiles;
pub use store::DatapackStore;
pub use workshop::{StaticWorkshopRegistry, WorkshopRegistry};

/// Metadata sidecar filename within a datapack directory.
pub const SIDECAR_FILENAME: &str = "datapack.json";

/// Base name of the cover image file within a datapack directory.
pub const COVER_IMAGE_BASENAME: &str = "datapack-image";

/// Extensions probed when looking up a datapack cover image.
pub const COVER_IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpeg", "jpg", "gif"];

/// Name of the upload-retention ledger at the data root.
pub const RETENTION_FILENAME: &str = "file-retention.json";

/// Prefix of staging directories created during directory setup. Directory
/// scans skip entries carrying this prefix.
pub const STAGE_PREFIX: &str = ".stage-";

/// Errors produced by the storage core.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("datapack not found: {0}")]
    NotFound(String),
    #[error("datapack already exists: {0}")]
    Conflict(String),
    #[error("directory traversal detected")]
    Traversal,
    #[error("integrity violation: {0}")]
    Integrity(String),
    #[error("invalid title: {0}")]
    Title(#[from] geochart_types::TitleError),
    #[error("invalid namespace: {0}")]
    Namespace(#[from] geochart_layout::NamespaceError),
    #[error("failed to serialize datapack metadata: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(
        "setup failed and cleanup also failed (path: {path}): setup={setup_error}; cleanup={cleanup_error}",
        path = path.display()
    )]
    CleanupAfterSetupFailed {
        path: std::path::PathBuf,
        #[source]
        setup_error: Box<StoreError>,
        cleanup_error: std::io::Error,
    },
}

/// Result type for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
