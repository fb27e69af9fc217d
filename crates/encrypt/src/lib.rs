//! Encrypted datapack delivery.
//!
//! Protected downloads are served from a per-namespace `encrypted/` cache
//! that is derived lazily from the plaintext payload by an external
//! encryption executable. The cache is pure: deleting any part of the
//! `encrypted/` tree at any time is safe, and nothing in this crate ever
//! mutates the plaintext tree.
//!
//! Trust in an artifact comes from one place only: the fixed ASCII header
//! at the start of the file. Artifacts that fail the header check are
//! deleted and regenerated; they are never served.

mod cache;
mod encryptor;
mod header;

pub use cache::EncryptionCache;
pub use encryptor::{Encryptor, JavaEncryptor, DEFAULT_ENCRYPT_TIMEOUT};
pub use header::{check_header, has_encrypted_header, ENCRYPTED_HEADER};

/// Errors produced by encrypted delivery.
#[derive(Debug, thiserror::Error)]
pub enum EncryptError {
    /// The plaintext payload does not exist
    #[error("datapack payload not found: {0}")]
    PlaintextNotFound(String),
    /// A derived path escaped its namespace root
    #[error("directory traversal detected")]
    Traversal,
    /// The encryptor ran but its artifact failed the header check
    #[error("encryptor produced an invalid artifact for {0}")]
    InvalidOutput(String),
    /// The encryptor could not be run, timed out, or produced no artifact
    #[error("encryption process failed: {0}")]
    ProcessFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for encrypted delivery operations.
pub type EncryptResult<T> = std::result::Result<T, EncryptError>;
