//! Directory layout authority for datapack storage.
//!
//! Datapacks are stored under disjoint per-owner roots derived from a
//! [`Namespace`]. Path derivation is deterministic and purely computational:
//! nothing in this crate touches the filesystem.
//!
//! ## Storage layout
//!
//! ```text
//! <data_root>/
//! ├── users/
//! │   └── <uuid>/                  # one root per user
//! │       ├── <title>/             # one directory per datapack
//! │       └── encrypted/<title>/   # cached encrypted artifacts
//! ├── official/
//! ├── workshops/
//! │   └── workshop-<id>/
//! └── temp/
//! ```
//!
//! The `encrypted/` tree is a sibling of the plaintext datapack directories,
//! never nested inside one, so the encryption step can never re-encrypt its
//! own output. Titles are validated by [`geochart_types::DatapackTitle`]
//! before they ever reach this crate, and callers that resolve derived paths
//! against the real filesystem confirm containment with [`ensure_within`].

mod namespace;
mod storage;

pub use namespace::{Namespace, NamespaceError};
pub use storage::{ensure_within, StorageLayout, ENCRYPTED_DIR_NAME, PDF_FILES_DIR_NAME};
