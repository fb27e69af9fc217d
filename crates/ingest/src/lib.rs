//! Multipart upload ingestion.
//!
//! Turns a streamed multipart request into validated temp files plus a
//! metadata draft, in a single pass: the transport cannot be re-read, so
//! every part is classified, checked against its allow-list, and either
//! streamed to a temp file or collected as a metadata field as it
//! arrives. Any failure drains the rest of the stream and deletes every
//! temp file written so far — a rejected upload leaves nothing behind.

mod fields;
mod pipeline;

pub use fields::{build_metadata, requested_namespace};
pub use pipeline::{derive_stored_file_name, IngestedUpload, UploadPipeline};

/// Multipart field carrying the datapack payload.
pub const DATAPACK_FIELD: &str = "datapack";

/// Multipart field carrying the optional cover image.
pub const COVER_IMAGE_FIELD: &str = "datapack-image";

/// Repeated multipart field carrying PDF attachments.
pub const PDF_FILES_FIELD: &str = "pdfFiles[]";

/// Extensions accepted for the datapack payload.
pub const DATAPACK_EXTENSIONS: [&str; 4] = ["dpk", "txt", "map", "mdpk"];

/// Extensions accepted for the cover image.
pub const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

/// Field limits applied to the metadata draft.
pub const MAX_DESCRIPTION_LENGTH: usize = 400;
pub const MAX_AUTHORED_BY_LENGTH: usize = 200;
pub const MAX_NOTES_LENGTH: usize = 200;
pub const MAX_CONTACT_LENGTH: usize = 100;
pub const MAX_TAGS_ALLOWED: usize = 30;
pub const MAX_TAG_LENGTH: usize = 20;
pub const MAX_REFERENCES_ALLOWED: usize = 30;
pub const MAX_REFERENCE_LENGTH: usize = 100;

/// Errors produced while ingesting an upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// No `datapack` file part arrived
    #[error("Missing file")]
    MissingFile,
    /// The `datapack` file part had zero bytes
    #[error("File is empty")]
    EmptyFile,
    /// The upload exceeded the configured size cap
    #[error("File is too large")]
    TooLarge,
    /// A file part failed its allow-list check; the message names the part
    #[error("{0}")]
    InvalidFileType(&'static str),
    /// A metadata field was missing or malformed
    #[error("{0}")]
    InvalidField(String),
    /// A derived temp path escaped the upload root
    #[error("Directory traversal detected")]
    Traversal,
    /// The multipart stream itself was malformed or aborted
    #[error("Failed to process multipart parts: {0}")]
    Multipart(String),
    /// A temp file could not be written
    #[error("Failed to save file")]
    Io(#[from] std::io::Error),
}

/// Result type for ingestion operations.
pub type UploadResult<T> = std::result::Result<T, UploadError>;
