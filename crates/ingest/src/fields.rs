//! Metadata draft validation.
//!
//! The non-file multipart fields become a [`DatapackMetadata`] record
//! through the ladder of checks below. Every rejection happens before
//! any datapack directory is created.

use crate::{
    IngestedUpload, UploadError, UploadResult, MAX_AUTHORED_BY_LENGTH, MAX_CONTACT_LENGTH,
    MAX_DESCRIPTION_LENGTH, MAX_NOTES_LENGTH, MAX_REFERENCES_ALLOWED, MAX_REFERENCE_LENGTH,
    MAX_TAGS_ALLOWED, MAX_TAG_LENGTH,
};
use geochart_layout::Namespace;
use geochart_store::{DatapackMetadata, DatapackType};
use geochart_types::{format_size, DatapackTitle};

/// Resolves the namespace an upload is destined for: the `uuid` field
/// when present (an admin uploading into `official` or a workshop),
/// otherwise the authenticated uploader's own namespace.
pub fn requested_namespace(
    upload: &IngestedUpload,
    authenticated: &Namespace,
) -> UploadResult<Namespace> {
    match upload.fields.get("uuid") {
        Some(raw) => {
            Namespace::parse(raw).map_err(|e| UploadError::InvalidField(e.to_string()))
        }
        None => Ok(authenticated.clone()),
    }
}

/// Validates the metadata fields of an ingested upload and builds the
/// record to be written as the sidecar.
///
/// # Errors
///
/// `InvalidField` with a client-facing message for the first failed
/// check; nothing is mutated on disk either way.
pub fn build_metadata(
    namespace: &Namespace,
    upload: &IngestedUpload,
) -> UploadResult<DatapackMetadata> {
    let fields = &upload.fields;
    let missing = ["title", "description", "authoredBy", "tags", "references", "priority"]
        .iter()
        .any(|name| !fields.contains_key(*name));
    if missing {
        return Err(UploadError::InvalidField(
            "Missing required fields [title, description, authoredBy, tags, references, priority]"
                .into(),
        ));
    }

    let title = DatapackTitle::new(&fields["title"])
        .map_err(|e| UploadError::InvalidField(e.to_string()))?;

    let tags: Vec<String> = parse_string_array(&fields["tags"])?;
    let references: Vec<String> = parse_string_array(&fields["references"])?;
    if tags.len() > MAX_TAGS_ALLOWED {
        return Err(UploadError::InvalidField(format!(
            "Max tags allowed is {MAX_TAGS_ALLOWED}"
        )));
    }
    if tags.iter().any(|tag| tag.len() > MAX_TAG_LENGTH) {
        return Err(UploadError::InvalidField(format!(
            "Max tag length is {MAX_TAG_LENGTH}"
        )));
    }
    if references.len() > MAX_REFERENCES_ALLOWED {
        return Err(UploadError::InvalidField(format!(
            "Max references allowed is {MAX_REFERENCES_ALLOWED}"
        )));
    }
    if references.iter().any(|r| r.len() > MAX_REFERENCE_LENGTH) {
        return Err(UploadError::InvalidField(format!(
            "Max reference length is {MAX_REFERENCE_LENGTH}"
        )));
    }

    let description = fields["description"].clone();
    if description.len() > MAX_DESCRIPTION_LENGTH {
        return Err(UploadError::InvalidField(format!(
            "Max description length is {MAX_DESCRIPTION_LENGTH}"
        )));
    }
    let authored_by = fields["authoredBy"].clone();
    if authored_by.len() > MAX_AUTHORED_BY_LENGTH {
        return Err(UploadError::InvalidField(format!(
            "Max authored by length is {MAX_AUTHORED_BY_LENGTH}"
        )));
    }

    let priority: i32 = fields["priority"]
        .parse()
        .map_err(|_| UploadError::InvalidField("Priority must be a number".into()))?;

    let notes = optional_bounded(fields.get("notes"), MAX_NOTES_LENGTH, "notes")?;
    let contact = optional_bounded(fields.get("contact"), MAX_CONTACT_LENGTH, "contact")?;

    let date = match fields.get("date").filter(|d| !d.is_empty()) {
        Some(raw) => {
            if !is_valid_date(raw) {
                return Err(UploadError::InvalidField(
                    "Date must be a valid date string".into(),
                ));
            }
            Some(raw.clone())
        }
        None => None,
    };

    let is_public = fields
        .get("isPublic")
        .map(|v| v == "true")
        .unwrap_or(false);

    Ok(DatapackMetadata {
        title,
        original_file_name: upload.original_file_name.clone(),
        stored_file_name: upload.stored_file_name.clone(),
        description,
        authored_by,
        tags,
        references,
        contact,
        notes,
        date,
        size: format_size(upload.payload_bytes),
        is_public,
        priority,
        kind: DatapackType::for_namespace(namespace),
        uuid: namespace.clone(),
        has_files: !upload.pdfs.is_empty(),
        datapack_image: None,
    })
}

fn parse_string_array(raw: &str) -> UploadResult<Vec<String>> {
    serde_json::from_str(raw).map_err(|_| {
        UploadError::InvalidField("References and tags must be valid arrays".into())
    })
}

fn optional_bounded(
    value: Option<&String>,
    max: usize,
    name: &str,
) -> UploadResult<Option<String>> {
    match value.filter(|v| !v.is_empty()) {
        Some(v) if v.len() > max => Err(UploadError::InvalidField(format!(
            "Max {name} length is {max}"
        ))),
        Some(v) => Ok(Some(v.clone())),
        None => Ok(None),
    }
}

fn is_valid_date(raw: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(raw).is_ok()
        || chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn upload_with(fields: &[(&str, &str)]) -> IngestedUpload {
        IngestedUpload {
            payload_path: PathBuf::from("/tmp/.upload-x-chart.dpk"),
            original_file_name: "chart.dpk".into(),
            stored_file_name: "chart-ab12cd34.dpk".into(),
            payload_bytes: 4 * 1024 * 1024,
            cover_image_path: None,
            pdfs: Vec::new(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn valid_fields() -> Vec<(&'static str, &'static str)> {
        vec![
            ("title", "Permian Basin"),
            ("description", "Permian strata of the basin"),
            ("authoredBy", "J. Geologist"),
            ("tags", r#"["permian","basin"]"#),
            ("references", r#"["Smith 2020"]"#),
            ("priority", "1"),
        ]
    }

    #[test]
    fn test_valid_draft_builds_metadata() {
        let upload = upload_with(&valid_fields());
        let ns = Namespace::Official;
        let metadata = build_metadata(&ns, &upload).unwrap();

        assert_eq!(metadata.title.as_str(), "Permian Basin");
        assert_eq!(metadata.tags, vec!["permian", "basin"]);
        assert_eq!(metadata.size, "4MB");
        assert_eq!(metadata.priority, 1);
        assert_eq!(metadata.kind, DatapackType::Official);
        assert_eq!(metadata.uuid, Namespace::Official);
        assert!(!metadata.is_public);
        assert!(!metadata.has_files);
    }

    #[test]
    fn test_missing_required_field() {
        let mut fields = valid_fields();
        fields.retain(|(name, _)| *name != "description");
        let err = build_metadata(&Namespace::Official, &upload_with(&fields)).unwrap_err();
        assert!(matches!(err, UploadError::InvalidField(msg) if msg.contains("Missing required fields")));
    }

    #[test]
    fn test_malformed_tags_array() {
        let mut fields = valid_fields();
        fields.iter_mut().find(|(n, _)| *n == "tags").unwrap().1 = "permian,basin";
        let err = build_metadata(&Namespace::Official, &upload_with(&fields)).unwrap_err();
        assert!(
            matches!(err, UploadError::InvalidField(msg) if msg == "References and tags must be valid arrays")
        );
    }

    #[test]
    fn test_too_many_tags() {
        let tags = format!(
            "[{}]",
            (0..=MAX_TAGS_ALLOWED)
                .map(|i| format!("\"t{i}\""))
                .collect::<Vec<_>>()
                .join(",")
        );
        let mut fields = valid_fields();
        let tags_static: &'static str = Box::leak(tags.into_boxed_str());
        fields.iter_mut().find(|(n, _)| *n == "tags").unwrap().1 = tags_static;
        let err = build_metadata(&Namespace::Official, &upload_with(&fields)).unwrap_err();
        assert!(matches!(err, UploadError::InvalidField(msg) if msg.contains("Max tags allowed")));
    }

    #[test]
    fn test_non_numeric_priority() {
        let mut fields = valid_fields();
        fields.iter_mut().find(|(n, _)| *n == "priority").unwrap().1 = "high";
        let err = build_metadata(&Namespace::Official, &upload_with(&fields)).unwrap_err();
        assert!(matches!(err, UploadError::InvalidField(msg) if msg == "Priority must be a number"));
    }

    #[test]
    fn test_invalid_date() {
        let mut fields = valid_fields();
        fields.push(("date", "not a date"));
        let err = build_metadata(&Namespace::Official, &upload_with(&fields)).unwrap_err();
        assert!(
            matches!(err, UploadError::InvalidField(msg) if msg == "Date must be a valid date string")
        );

        let mut fields = valid_fields();
        fields.push(("date", "2026-08-01"));
        assert!(build_metadata(&Namespace::Official, &upload_with(&fields)).is_ok());
    }

    #[test]
    fn test_unsafe_title_rejected() {
        let mut fields = valid_fields();
        fields.iter_mut().find(|(n, _)| *n == "title").unwrap().1 = "../escape";
        let err = build_metadata(&Namespace::Official, &upload_with(&fields)).unwrap_err();
        assert!(matches!(err, UploadError::InvalidField(_)));
    }

    #[test]
    fn test_is_public_parsing() {
        let mut fields = valid_fields();
        fields.push(("isPublic", "true"));
        let metadata = build_metadata(&Namespace::Official, &upload_with(&fields)).unwrap();
        assert!(metadata.is_public);
    }

    #[test]
    fn test_requested_namespace_defaults_to_authenticated() {
        let upload = upload_with(&valid_fields());
        let me = Namespace::User(uuid::Uuid::new_v4());
        assert_eq!(requested_namespace(&upload, &me).unwrap(), me);

        let mut fields = valid_fields();
        fields.push(("uuid", "official"));
        let upload = upload_with(&fields);
        assert_eq!(
            requested_namespace(&upload, &me).unwrap(),
            Namespace::Official
        );

        let mut fields = valid_fields();
        fields.push(("uuid", "not a namespace"));
        let upload = upload_with(&fields);
        assert!(requested_namespace(&upload, &me).is_err());
    }

    #[test]
    fn test_optional_field_limits() {
        let long_notes: &'static str =
            Box::leak("n".repeat(MAX_NOTES_LENGTH + 1).into_boxed_str());
        let mut fields = valid_fields();
        fields.push(("notes", long_notes));
        let err = build_metadata(&Namespace::Official, &upload_with(&fields)).unwrap_err();
        assert!(matches!(err, UploadError::InvalidField(msg) if msg.contains("Max notes length")));
    }

    #[test]
    fn test_empty_optional_fields_become_none() {
        let mut fields = valid_fields();
        fields.push(("notes", ""));
        fields.push(("date", ""));
        let metadata = build_metadata(&Namespace::Official, &upload_with(&fields)).unwrap();
        assert!(metadata.notes.is_none());
        assert!(metadata.date.is_none());
    }
}
