//! Single-pass multipart consumption.

use crate::{
    UploadError, UploadResult, COVER_IMAGE_FIELD, DATAPACK_EXTENSIONS, DATAPACK_FIELD,
    IMAGE_EXTENSIONS, PDF_FILES_FIELD,
};
use axum::extract::multipart::{Field, Multipart, MultipartError};
use chrono::{DateTime, Utc};
use geochart_layout::{ensure_within, Namespace, StorageLayout};
use geochart_store::NewDatapackFiles;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Everything materialised from one multipart upload request.
#[derive(Debug)]
pub struct IngestedUpload {
    /// Temp file holding the streamed payload
    pub payload_path: PathBuf,
    /// Client-supplied payload file name
    pub original_file_name: String,
    /// Server-assigned, collision-free payload name
    pub stored_file_name: String,
    /// Bytes streamed for the payload
    pub payload_bytes: u64,
    /// Temp file holding the cover image, if one was sent
    pub cover_image_path: Option<PathBuf>,
    /// PDF attachments as `(file name, temp path)` pairs
    pub pdfs: Vec<(String, PathBuf)>,
    /// Every non-file field, by name
    pub fields: HashMap<String, String>,
}

impl IngestedUpload {
    /// Converts the temp files into directory-setup inputs.
    pub fn datapack_files(&self) -> NewDatapackFiles {
        NewDatapackFiles {
            payload: self.payload_path.clone(),
            cover_image: self.cover_image_path.clone(),
            pdfs: self.pdfs.clone(),
        }
    }

    /// Deletes every temp file. Used when a later stage rejects the
    /// upload after ingestion succeeded.
    pub async fn discard(self) {
        let mut paths = vec![self.payload_path];
        paths.extend(self.cover_image_path);
        paths.extend(self.pdfs.into_iter().map(|(_, path)| path));
        remove_all(&paths).await;
    }
}

/// Streams multipart parts to temp files under the uploader's namespace
/// root, enforcing the per-field allow-lists and the request size cap.
#[derive(Debug, Clone)]
pub struct UploadPipeline {
    layout: StorageLayout,
    max_upload_bytes: u64,
}

/// Partial state while the stream is being consumed. Every temp path is
/// recorded in `temp_files` before its first byte is written, so a
/// failure at any point — including mid-stream — can delete everything.
#[derive(Debug, Default)]
struct Draft {
    payload: Option<(String, PathBuf, u64)>,
    cover_image: Option<PathBuf>,
    pdfs: Vec<(String, PathBuf)>,
    fields: HashMap<String, String>,
    streamed: u64,
    temp_files: Vec<PathBuf>,
}

impl UploadPipeline {
    pub fn new(layout: StorageLayout, max_upload_bytes: u64) -> Self {
        Self {
            layout,
            max_upload_bytes,
        }
    }

    /// Consumes the whole multipart stream for one upload request.
    ///
    /// On success the payload (and any cover image / PDFs) sit in temp
    /// files under the namespace root, ready for directory setup. On any
    /// failure the remainder of the stream is drained, every temp file is
    /// deleted, and the first error is returned.
    pub async fn process(
        &self,
        namespace: &Namespace,
        mut multipart: Multipart,
    ) -> UploadResult<IngestedUpload> {
        let mut draft = Draft::default();
        if let Err(e) = self.consume(namespace, &mut multipart, &mut draft).await {
            drain(&mut multipart).await;
            remove_all(&draft.temp_files).await;
            return Err(e);
        }

        let Some((original_file_name, payload_path, payload_bytes)) = draft.payload.take() else {
            remove_all(&draft.temp_files).await;
            return Err(UploadError::MissingFile);
        };
        if payload_bytes == 0 {
            remove_all(&draft.temp_files).await;
            return Err(UploadError::EmptyFile);
        }

        let stored_file_name = derive_stored_file_name(&original_file_name, Utc::now());
        Ok(IngestedUpload {
            payload_path,
            original_file_name,
            stored_file_name,
            payload_bytes,
            cover_image_path: draft.cover_image,
            pdfs: draft.pdfs,
            fields: draft.fields,
        })
    }

    async fn consume(
        &self,
        namespace: &Namespace,
        multipart: &mut Multipart,
        draft: &mut Draft,
    ) -> UploadResult<()> {
        while let Some(mut field) = multipart
            .next_field()
            .await
            .map_err(map_multipart_error)?
        {
            let Some(name) = field.name().map(ToOwned::to_owned) else {
                continue;
            };
            match name.as_str() {
                DATAPACK_FIELD => {
                    if draft.payload.is_some() {
                        return Err(UploadError::InvalidField(
                            "Multiple datapack files in one upload".into(),
                        ));
                    }
                    let file_name = require_file_name(&field)?;
                    if !has_extension(&file_name, &DATAPACK_EXTENSIONS) {
                        return Err(UploadError::InvalidFileType(
                            "Invalid file type for datapack file",
                        ));
                    }
                    let dest = self.temp_path(namespace, &file_name).await?;
                    draft.temp_files.push(dest.clone());
                    let bytes = self
                        .stream_to_temp(&mut field, &dest, &mut draft.streamed)
                        .await?;
                    draft.payload = Some((file_name, dest, bytes));
                }
                COVER_IMAGE_FIELD => {
                    let file_name = require_file_name(&field)?;
                    let is_image_mime = field
                        .content_type()
                        .map(|ct| ct.starts_with("image/"))
                        .unwrap_or(true);
                    if !has_extension(&file_name, &IMAGE_EXTENSIONS) || !is_image_mime {
                        return Err(UploadError::InvalidFileType(
                            "Invalid file type for datapack image",
                        ));
                    }
                    let dest = self.temp_path(namespace, &file_name).await?;
                    draft.temp_files.push(dest.clone());
                    self.stream_to_temp(&mut field, &dest, &mut draft.streamed)
                        .await?;
                    draft.cover_image = Some(dest);
                }
                PDF_FILES_FIELD => {
                    let file_name = require_file_name(&field)?;
                    let is_pdf_mime = field
                        .content_type()
                        .map(|ct| ct == "application/pdf")
                        .unwrap_or(true);
                    if !has_extension(&file_name, &["pdf"]) || !is_pdf_mime {
                        return Err(UploadError::InvalidFileType(
                            "Invalid file type for datapack pdf file",
                        ));
                    }
                    let dest = self.temp_path(namespace, &file_name).await?;
                    draft.temp_files.push(dest.clone());
                    self.stream_to_temp(&mut field, &dest, &mut draft.streamed)
                        .await?;
                    draft.pdfs.push((file_name, dest));
                }
                _ => {
                    let value = field.text().await.map_err(map_multipart_error)?;
                    draft.fields.insert(name, value);
                }
            }
        }
        Ok(())
    }

    /// Derives a hidden temp path for a client-named file, confined to
    /// the namespace root.
    async fn temp_path(&self, namespace: &Namespace, file_name: &str) -> UploadResult<PathBuf> {
        let root = self.layout.namespace_root(namespace);
        tokio::fs::create_dir_all(&root).await?;
        let path = root.join(format!(
            ".upload-{}-{file_name}",
            uuid::Uuid::new_v4().simple()
        ));
        if !ensure_within(&root, &path) {
            return Err(UploadError::Traversal);
        }
        Ok(path)
    }

    async fn stream_to_temp(
        &self,
        field: &mut Field<'_>,
        dest: &Path,
        streamed: &mut u64,
    ) -> UploadResult<u64> {
        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        loop {
            let chunk = match field.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => return Err(map_multipart_error(e)),
            };
            written += chunk.len() as u64;
            *streamed += chunk.len() as u64;
            if *streamed > self.max_upload_bytes {
                return Err(UploadError::TooLarge);
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(written)
    }
}

/// Derives the server-assigned payload name: the sanitised stem of the
/// original name qualified by a short content-independent hash, keeping
/// the original extension.
pub fn derive_stored_file_name(original: &str, now: DateTime<Utc>) -> String {
    let path = Path::new(original);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("datapack");
    let stem: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(original.as_bytes());
    hasher.update(now.timestamp_micros().to_le_bytes());
    let tag = hex::encode(&hasher.finalize()[..4]);

    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}-{tag}.{ext}"),
        None => format!("{stem}-{tag}"),
    }
}

/// Extracts the client file name of a file part, reduced to its final
/// path component.
fn require_file_name(field: &Field<'_>) -> UploadResult<String> {
    let raw = field
        .file_name()
        .ok_or_else(|| UploadError::InvalidField("Expected a file part".into()))?;
    Path::new(raw)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty() && *n != ".." && !n.contains('\\'))
        .map(ToOwned::to_owned)
        .ok_or_else(|| UploadError::InvalidField(format!("Invalid file name '{raw}'")))
}

fn has_extension(file_name: &str, allowed: &[&str]) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            allowed.iter().any(|a| *a == ext)
        })
        .unwrap_or(false)
}

fn map_multipart_error(e: MultipartError) -> UploadError {
    if e.status() == axum::http::StatusCode::PAYLOAD_TOO_LARGE {
        UploadError::TooLarge
    } else {
        UploadError::Multipart(e.body_text())
    }
}

/// Consumes whatever is left of a stream after a failure, so the
/// connection is left in a consistent state.
async fn drain(multipart: &mut Multipart) {
    while let Ok(Some(mut field)) = multipart.next_field().await {
        while let Ok(Some(_)) = field.chunk().await {}
    }
}

async fn remove_all(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("failed to remove temp file {}: {}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::FromRequest;
    use axum::http::Request;
    use tempfile::TempDir;

    const BOUNDARY: &str = "geochart-test-boundary";

    enum Part {
        File {
            name: &'static str,
            file_name: &'static str,
            content_type: &'static str,
            bytes: Vec<u8>,
        },
        Text {
            name: &'static str,
            value: &'static str,
        },
    }

    fn file(name: &'static str, file_name: &'static str, content_type: &'static str, bytes: &[u8]) -> Part {
        Part::File {
            name,
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        }
    }

    async fn multipart_of(parts: Vec<Part>) -> Multipart {
        let mut body: Vec<u8> = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::File {
                    name,
                    file_name,
                    content_type,
                    bytes,
                } => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                             Content-Type: {content_type}\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(&bytes);
                    body.extend_from_slice(b"\r\n");
                }
                Part::Text { name, value } => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n")
                            .as_bytes(),
                    );
                    body.extend_from_slice(value.as_bytes());
                    body.extend_from_slice(b"\r\n");
                }
            }
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        let request = Request::builder()
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        Multipart::from_request(request, &()).await.unwrap()
    }

    fn pipeline(temp: &TempDir) -> UploadPipeline {
        UploadPipeline::new(StorageLayout::new(temp.path()), 1024 * 1024)
    }

    fn namespace() -> Namespace {
        Namespace::User(uuid::Uuid::new_v4())
    }

    fn count_files_under(root: &Path) -> usize {
        if !root.exists() {
            return 0;
        }
        walkdir(root)
    }

    fn walkdir(dir: &Path) -> usize {
        let mut count = 0;
        for entry in std::fs::read_dir(dir).unwrap() {
            let entry = entry.unwrap();
            if entry.file_type().unwrap().is_dir() {
                count += walkdir(&entry.path());
            } else {
                count += 1;
            }
        }
        count
    }

    #[tokio::test]
    async fn test_full_upload_with_image_pdfs_and_fields() {
        let temp = TempDir::new().unwrap();
        let ns = namespace();
        let multipart = multipart_of(vec![
            file(DATAPACK_FIELD, "chart.dpk", "application/octet-stream", b"datapack bytes"),
            file(COVER_IMAGE_FIELD, "cover.png", "image/png", b"\x89PNG data"),
            file(PDF_FILES_FIELD, "poster.pdf", "application/pdf", b"%PDF-1.4"),
            file(PDF_FILES_FIELD, "notes.pdf", "application/pdf", b"%PDF-1.5"),
            Part::Text {
                name: "title",
                value: "Permian Basin",
            },
            Part::Text {
                name: "priority",
                value: "1",
            },
        ])
        .await;

        let upload = pipeline(&temp).process(&ns, multipart).await.unwrap();

        assert_eq!(upload.original_file_name, "chart.dpk");
        assert_eq!(upload.payload_bytes, 14);
        assert!(upload.stored_file_name.starts_with("chart-"));
        assert!(upload.stored_file_name.ends_with(".dpk"));
        assert_ne!(upload.stored_file_name, upload.original_file_name);
        assert_eq!(
            tokio::fs::read(&upload.payload_path).await.unwrap(),
            b"datapack bytes"
        );
        assert!(upload.cover_image_path.is_some());
        assert_eq!(upload.pdfs.len(), 2);
        assert_eq!(upload.pdfs[0].0, "poster.pdf");
        assert_eq!(upload.fields.get("title").unwrap(), "Permian Basin");
        assert_eq!(upload.fields.get("priority").unwrap(), "1");
    }

    #[tokio::test]
    async fn test_wrong_datapack_extension_rejected_and_cleaned() {
        let temp = TempDir::new().unwrap();
        let ns = namespace();
        let multipart = multipart_of(vec![file(
            DATAPACK_FIELD,
            "chart.exe",
            "application/octet-stream",
            b"nope",
        )])
        .await;

        let err = pipeline(&temp).process(&ns, multipart).await.unwrap_err();
        assert!(matches!(
            err,
            UploadError::InvalidFileType("Invalid file type for datapack file")
        ));
        assert_eq!(count_files_under(temp.path()), 0);
    }

    #[tokio::test]
    async fn test_wrong_pdf_type_rejected_after_payload_cleans_temp() {
        let temp = TempDir::new().unwrap();
        let ns = namespace();
        let multipart = multipart_of(vec![
            file(DATAPACK_FIELD, "chart.dpk", "application/octet-stream", b"data"),
            file(PDF_FILES_FIELD, "notes.txt", "text/plain", b"not a pdf"),
        ])
        .await;

        let err = pipeline(&temp).process(&ns, multipart).await.unwrap_err();
        assert!(matches!(
            err,
            UploadError::InvalidFileType("Invalid file type for datapack pdf file")
        ));
        // the already-streamed payload temp file was deleted
        assert_eq!(count_files_under(temp.path()), 0);
    }

    #[tokio::test]
    async fn test_wrong_image_type_rejected() {
        let temp = TempDir::new().unwrap();
        let ns = namespace();
        let multipart = multipart_of(vec![
            file(DATAPACK_FIELD, "chart.dpk", "application/octet-stream", b"data"),
            file(COVER_IMAGE_FIELD, "cover.txt", "text/plain", b"not an image"),
        ])
        .await;

        let err = pipeline(&temp).process(&ns, multipart).await.unwrap_err();
        assert!(matches!(
            err,
            UploadError::InvalidFileType("Invalid file type for datapack image")
        ));
        assert_eq!(count_files_under(temp.path()), 0);
    }

    #[tokio::test]
    async fn test_missing_datapack_part() {
        let temp = TempDir::new().unwrap();
        let multipart = multipart_of(vec![Part::Text {
            name: "title",
            value: "Permian Basin",
        }])
        .await;

        let err = pipeline(&temp)
            .process(&namespace(), multipart)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::MissingFile));
    }

    #[tokio::test]
    async fn test_empty_payload_rejected() {
        let temp = TempDir::new().unwrap();
        let multipart = multipart_of(vec![file(
            DATAPACK_FIELD,
            "chart.dpk",
            "application/octet-stream",
            b"",
        )])
        .await;

        let err = pipeline(&temp)
            .process(&namespace(), multipart)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::EmptyFile));
        assert_eq!(count_files_under(temp.path()), 0);
    }

    #[tokio::test]
    async fn test_size_cap_enforced_mid_stream() {
        let temp = TempDir::new().unwrap();
        let pipeline = UploadPipeline::new(StorageLayout::new(temp.path()), 16);
        let multipart = multipart_of(vec![file(
            DATAPACK_FIELD,
            "chart.dpk",
            "application/octet-stream",
            &[0u8; 64],
        )])
        .await;

        let err = pipeline
            .process(&namespace(), multipart)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::TooLarge));
        assert_eq!(count_files_under(temp.path()), 0);
    }

    #[tokio::test]
    async fn test_traversal_file_name_is_reduced_to_basename() {
        let temp = TempDir::new().unwrap();
        let ns = namespace();
        let multipart = multipart_of(vec![file(
            DATAPACK_FIELD,
            "../../escape.dpk",
            "application/octet-stream",
            b"data",
        )])
        .await;

        let upload = pipeline(&temp).process(&ns, multipart).await.unwrap();
        // the temp file landed inside the namespace root, nowhere else
        let root = StorageLayout::new(temp.path()).namespace_root(&ns);
        assert!(upload.payload_path.starts_with(&root));
        assert_eq!(upload.original_file_name, "escape.dpk");
    }

    #[tokio::test]
    async fn test_discard_removes_all_temp_files() {
        let temp = TempDir::new().unwrap();
        let ns = namespace();
        let multipart = multipart_of(vec![
            file(DATAPACK_FIELD, "chart.dpk", "application/octet-stream", b"data"),
            file(COVER_IMAGE_FIELD, "cover.png", "image/png", b"\x89PNG"),
        ])
        .await;

        let upload = pipeline(&temp).process(&ns, multipart).await.unwrap();
        upload.discard().await;
        assert_eq!(count_files_under(temp.path()), 0);
    }

    #[test]
    fn test_derive_stored_file_name_is_collision_resistant() {
        let now = Utc::now();
        let a = derive_stored_file_name("chart.dpk", now);
        let b = derive_stored_file_name("chart.dpk", now + chrono::Duration::microseconds(1));
        assert_ne!(a, b);
        assert!(a.starts_with("chart-"));
        assert!(a.ends_with(".dpk"));

        let odd = derive_stored_file_name("my chart (v2).txt", now);
        assert!(odd.ends_with(".txt"));
        assert!(!odd.contains(' '));
        assert!(!odd.contains('('));
    }
}
