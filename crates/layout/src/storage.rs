//! Pure path derivation for the datapack storage tree.

use crate::Namespace;
use geochart_types::DatapackTitle;
use std::path::{Component, Path, PathBuf};

/// Directory holding cached encrypted artifacts within a namespace root.
pub const ENCRYPTED_DIR_NAME: &str = "encrypted";

/// Subdirectory of a datapack directory holding PDF attachments.
pub const PDF_FILES_DIR_NAME: &str = "files";

const USERS_DIR_NAME: &str = "users";
const OFFICIAL_DIR_NAME: &str = "official";
const WORKSHOPS_DIR_NAME: &str = "workshops";
const TEMP_DIR_NAME: &str = "temp";

/// Maps namespaces and titles to their on-disk locations.
///
/// Constructed once at startup from the configured data root and shared
/// by every component that derives a storage path. All methods are pure;
/// directory creation happens at the call sites that need it.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    data_root: PathBuf,
}

impl StorageLayout {
    /// Creates a layout rooted at `data_root`.
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    /// Returns the configured data root.
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// Returns the directory containing every user namespace root.
    pub fn users_root(&self) -> PathBuf {
        self.data_root.join(USERS_DIR_NAME)
    }

    /// Returns the directory containing every workshop namespace root.
    pub fn workshops_root(&self) -> PathBuf {
        self.data_root.join(WORKSHOPS_DIR_NAME)
    }

    /// Returns the storage root for a namespace.
    ///
    /// User roots are grouped under `users/`, workshops under `workshops/`,
    /// keeping the four ownership kinds disjoint by construction.
    pub fn namespace_root(&self, namespace: &Namespace) -> PathBuf {
        match namespace {
            Namespace::User(uuid) => self
                .data_root
                .join(USERS_DIR_NAME)
                .join(uuid.hyphenated().to_string()),
            Namespace::Official => self.data_root.join(OFFICIAL_DIR_NAME),
            Namespace::Workshop(id) => self
                .data_root
                .join(WORKSHOPS_DIR_NAME)
                .join(format!("workshop-{id}")),
            Namespace::Temp => self.data_root.join(TEMP_DIR_NAME),
        }
    }

    /// Returns the plaintext directory for a datapack.
    pub fn datapack_dir(&self, namespace: &Namespace, title: &DatapackTitle) -> PathBuf {
        self.namespace_root(namespace).join(title.as_str())
    }

    /// Returns the encrypted-artifact directory for a datapack.
    ///
    /// Always a sibling of the plaintext datapack directories under the
    /// namespace root; the reserved-title rule keeps a datapack from ever
    /// claiming the `encrypted/` name.
    pub fn encrypted_dir(&self, namespace: &Namespace, title: &DatapackTitle) -> PathBuf {
        self.namespace_root(namespace)
            .join(ENCRYPTED_DIR_NAME)
            .join(title.as_str())
    }

    /// Returns the PDF attachment directory within a datapack directory.
    pub fn pdf_files_dir(&self, namespace: &Namespace, title: &DatapackTitle) -> PathBuf {
        self.datapack_dir(namespace, title).join(PDF_FILES_DIR_NAME)
    }

    /// Inverts [`Self::datapack_dir`]: recovers `(namespace, title)` from a
    /// plaintext datapack directory path.
    ///
    /// Returns `None` for paths outside the data root, internal
    /// directories such as `encrypted/`, and anything whose components do
    /// not parse back into a valid namespace and title.
    pub fn parse_datapack_dir(
        &self,
        dir: &Path,
    ) -> Option<(Namespace, DatapackTitle)> {
        let rel = dir.strip_prefix(&self.data_root).ok()?;
        let components: Option<Vec<&str>> = rel
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect();
        let components = components?;
        let (namespace, title) = match components.as_slice() {
            [USERS_DIR_NAME, user_id, title] => {
                (Namespace::User(uuid::Uuid::parse_str(user_id).ok()?), *title)
            }
            [OFFICIAL_DIR_NAME, title] => (Namespace::Official, *title),
            [WORKSHOPS_DIR_NAME, workshop, title] => {
                match Namespace::parse(workshop).ok()? {
                    ns @ Namespace::Workshop(_) => (ns, *title),
                    _ => return None,
                }
            }
            [TEMP_DIR_NAME, title] => (Namespace::Temp, *title),
            _ => return None,
        };
        Some((namespace, DatapackTitle::new(title).ok()?))
    }
}

/// Verifies that `candidate` stays within `root` after lexical
/// normalisation.
///
/// Resolves `.` and `..` components without touching the filesystem, then
/// requires the normalised candidate to have the normalised root as a
/// prefix. Client-influenced paths must pass this check before any I/O
/// call uses them.
pub fn ensure_within(root: &Path, candidate: &Path) -> bool {
    let root = normalize(root);
    let candidate = normalize(candidate);
    candidate.starts_with(&root)
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn layout() -> StorageLayout {
        StorageLayout::new("/srv/geochart/data")
    }

    fn title(s: &str) -> DatapackTitle {
        DatapackTitle::new(s).unwrap()
    }

    #[test]
    fn test_namespace_roots_disjoint() {
        let layout = layout();
        let user = Namespace::User(Uuid::nil());
        let roots = [
            layout.namespace_root(&user),
            layout.namespace_root(&Namespace::Official),
            layout.namespace_root(&Namespace::Workshop(7)),
            layout.namespace_root(&Namespace::Temp),
        ];
        for (i, a) in roots.iter().enumerate() {
            for b in roots.iter().skip(i + 1) {
                assert_ne!(a, b);
                assert!(!a.starts_with(b) && !b.starts_with(a));
            }
        }
    }

    #[test]
    fn test_datapack_dir_under_namespace_root() {
        let layout = layout();
        let ns = Namespace::Workshop(7);
        let dir = layout.datapack_dir(&ns, &title("Cambrian"));
        assert_eq!(
            dir,
            PathBuf::from("/srv/geochart/data/workshops/workshop-7/Cambrian")
        );
        assert!(dir.starts_with(layout.namespace_root(&ns)));
    }

    #[test]
    fn test_encrypted_dir_is_sibling_of_plaintext() {
        let layout = layout();
        let ns = Namespace::Official;
        let plain = layout.datapack_dir(&ns, &title("Cambrian"));
        let enc = layout.encrypted_dir(&ns, &title("Cambrian"));
        assert_eq!(
            enc,
            PathBuf::from("/srv/geochart/data/official/encrypted/Cambrian")
        );
        assert!(!enc.starts_with(&plain));
        assert!(!plain.starts_with(&enc));
    }

    #[test]
    fn test_same_title_different_namespaces_do_not_collide() {
        let layout = layout();
        let a = layout.datapack_dir(&Namespace::Official, &title("Cambrian"));
        let b = layout.datapack_dir(&Namespace::Workshop(7), &title("Cambrian"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_ensure_within_accepts_children() {
        let root = Path::new("/srv/data/users/abc");
        assert!(ensure_within(root, &root.join("Permian Basin")));
        assert!(ensure_within(root, &root.join("a").join("b")));
        assert!(ensure_within(root, root));
    }

    #[test]
    fn test_parse_datapack_dir_round_trip() {
        let layout = layout();
        for ns in [
            Namespace::User(Uuid::nil()),
            Namespace::Official,
            Namespace::Workshop(7),
            Namespace::Temp,
        ] {
            let dir = layout.datapack_dir(&ns, &title("Cambrian"));
            let (parsed_ns, parsed_title) = layout.parse_datapack_dir(&dir).unwrap();
            assert_eq!(parsed_ns, ns);
            assert_eq!(parsed_title, title("Cambrian"));
        }
    }

    #[test]
    fn test_parse_datapack_dir_rejects_internal_paths() {
        let layout = layout();
        let enc = layout.encrypted_dir(&Namespace::Official, &title("Cambrian"));
        assert!(layout.parse_datapack_dir(&enc).is_none());
        assert!(layout
            .parse_datapack_dir(Path::new("/elsewhere/official/Cambrian"))
            .is_none());
        assert!(layout
            .parse_datapack_dir(&layout.namespace_root(&Namespace::Official))
            .is_none());
    }

    #[test]
    fn test_ensure_within_rejects_escape() {
        let root = Path::new("/srv/data/users/abc");
        assert!(!ensure_within(root, Path::new("/srv/data/users/other")));
        assert!(!ensure_within(root, &root.join("..").join("other")));
        assert!(!ensure_within(root, Path::new("/etc/passwd")));
        // sibling with the root as a string prefix must not pass
        assert!(!ensure_within(root, Path::new("/srv/data/users/abcdef")));
    }
}
