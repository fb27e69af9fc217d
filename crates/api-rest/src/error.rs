//! Error → HTTP response mapping.
//!
//! Every error response carries a short machine-checkable reason string;
//! internal detail is logged server-side and never echoed to the client.

use axum::http::StatusCode;
use axum::Json;
use geochart_encrypt::EncryptError;
use geochart_ingest::UploadError;
use geochart_store::StoreError;

/// The JSON body of every error response.
#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

pub type ErrorResponse = (StatusCode, Json<ErrorBody>);

pub fn response(status: StatusCode, message: impl Into<String>) -> ErrorResponse {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

/// Maps a storage error onto a status code and client-facing reason.
pub fn store_error(e: &StoreError) -> ErrorResponse {
    match e {
        StoreError::InvalidInput(msg) => response(StatusCode::BAD_REQUEST, msg.clone()),
        StoreError::Title(err) => response(StatusCode::BAD_REQUEST, err.to_string()),
        StoreError::Namespace(err) => response(StatusCode::BAD_REQUEST, err.to_string()),
        StoreError::NotFound(_) => response(
            StatusCode::NOT_FOUND,
            "Datapack does not exist or cannot be found",
        ),
        StoreError::Conflict(_) => response(
            StatusCode::CONFLICT,
            "Datapack with the same title already exists",
        ),
        StoreError::Traversal => {
            response(StatusCode::FORBIDDEN, "Directory traversal detected")
        }
        StoreError::Integrity(msg) => {
            tracing::error!("storage integrity violation: {msg}");
            response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
        StoreError::Serialization(err) => {
            tracing::error!("sidecar serialization error: {err}");
            response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
        StoreError::Io(err) => {
            tracing::error!("storage I/O error: {err}");
            response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
        StoreError::CleanupAfterSetupFailed { .. } => {
            tracing::error!("datapack setup failed and cleanup failed: {e}");
            response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

/// Maps an ingestion error onto a status code and client-facing reason.
pub fn upload_error(e: &UploadError) -> ErrorResponse {
    match e {
        UploadError::MissingFile | UploadError::EmptyFile => {
            response(StatusCode::BAD_REQUEST, e.to_string())
        }
        UploadError::InvalidField(msg) => response(StatusCode::BAD_REQUEST, msg.clone()),
        UploadError::TooLarge => response(StatusCode::PAYLOAD_TOO_LARGE, e.to_string()),
        UploadError::InvalidFileType(msg) => {
            response(StatusCode::UNSUPPORTED_MEDIA_TYPE, *msg)
        }
        UploadError::Traversal => {
            response(StatusCode::FORBIDDEN, "Directory traversal detected")
        }
        UploadError::Multipart(msg) => {
            tracing::warn!("malformed multipart stream: {msg}");
            response(StatusCode::BAD_REQUEST, "Failed to process multipart parts")
        }
        UploadError::Io(err) => {
            tracing::error!("upload I/O error: {err}");
            response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save file")
        }
    }
}

/// Maps an encrypted-delivery error onto a status code and client-facing
/// reason.
pub fn encrypt_error(e: &EncryptError) -> ErrorResponse {
    match e {
        EncryptError::PlaintextNotFound(_) => response(
            StatusCode::NOT_FOUND,
            "Datapack does not exist or cannot be found",
        ),
        EncryptError::Traversal => {
            response(StatusCode::FORBIDDEN, "Directory traversal detected")
        }
        EncryptError::InvalidOutput(what) => {
            tracing::error!("encryptor produced an invalid artifact for {what}");
            response(
                StatusCode::UNPROCESSABLE_ENTITY,
                "Encryption produced an invalid artifact",
            )
        }
        EncryptError::ProcessFailed(msg) => {
            tracing::error!("encryption process failed: {msg}");
            response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encrypt datapack")
        }
        EncryptError::Io(err) => {
            tracing::error!("encrypted delivery I/O error: {err}");
            response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}
