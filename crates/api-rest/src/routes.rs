//! Route handlers and router assembly.

use crate::auth::AuthContext;
use crate::config::ServiceConfig;
use crate::error::{self, ErrorBody, ErrorResponse};
use axum::extract::{DefaultBodyLimit, Multipart, Path as AxumPath, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use geochart_encrypt::{EncryptionCache, JavaEncryptor};
use geochart_ingest::{build_metadata, requested_namespace, UploadPipeline};
use geochart_layout::{Namespace, StorageLayout};
use geochart_store::{
    DatapackMetadata, DatapackMetadataPatch, DatapackStore, PriorityChangeRequest,
    StaticWorkshopRegistry, WorkshopRegistry,
};
use geochart_types::DatapackTitle;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Application state shared across request handlers.
#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<ServiceConfig>,
    pub store: Arc<DatapackStore>,
    pub pipeline: Arc<UploadPipeline>,
    pub cache: Arc<EncryptionCache>,
    pub workshops: Arc<dyn WorkshopRegistry>,
}

impl AppState {
    /// Wires the production services over the configured data root.
    pub fn initialise(cfg: Arc<ServiceConfig>) -> Self {
        let layout = StorageLayout::new(&cfg.data_dir);
        let encryptor = Arc::new(JavaEncryptor::new(
            &cfg.encryption_jar,
            cfg.encrypt_timeout,
        ));
        Self {
            store: Arc::new(DatapackStore::new(layout.clone())),
            pipeline: Arc::new(UploadPipeline::new(layout.clone(), cfg.max_upload_bytes)),
            cache: Arc::new(EncryptionCache::new(layout, encryptor)),
            workshops: Arc::new(StaticWorkshopRegistry::new(
                cfg.active_workshops.iter().copied(),
            )),
            cfg,
        }
    }
}

/// Generic success body.
#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct MessageRes {
    pub message: String,
}

fn message(text: impl Into<String>) -> Json<MessageRes> {
    Json(MessageRes {
        message: text.into(),
    })
}

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, serde::Deserialize)]
pub struct NamespaceQuery {
    /// Target namespace override (admin, or public reads)
    pub uuid: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
pub struct DownloadQuery {
    pub uuid: Option<String>,
    /// Request the protected (encrypted) form
    pub encrypted: Option<bool>,
}

#[derive(Debug, serde::Deserialize)]
pub struct PriorityTasksReq {
    pub tasks: Vec<PriorityChangeRequest>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoteReq {
    pub workshop_id: u32,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        upload_datapack,
        list_datapacks,
        fetch_datapack,
        download_datapack,
        fetch_datapack_image,
        edit_datapack,
        delete_datapack,
        admin_edit_priorities,
        admin_promote_to_workshop,
    ),
    components(schemas(MessageRes, HealthRes, ErrorBody))
)]
struct ApiDoc;

/// Assembles the service router.
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.cfg.max_upload_bytes as usize + 1024 * 1024;
    Router::new()
        .route("/health", get(health))
        .route("/datapacks", post(upload_datapack))
        .route("/datapacks", get(list_datapacks))
        .route("/datapacks/:title", get(fetch_datapack))
        .route("/datapacks/:title", patch(edit_datapack))
        .route("/datapacks/:title", delete(delete_datapack))
        .route("/datapacks/:title/download", get(download_datapack))
        .route("/datapacks/:title/image", get(fetch_datapack_image))
        .route("/admin/datapacks/priorities", patch(admin_edit_priorities))
        .route(
            "/admin/official/:title/promote",
            post(admin_promote_to_workshop),
        )
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Parses a path segment into a validated title.
fn parse_title(raw: &str) -> Result<DatapackTitle, ErrorResponse> {
    DatapackTitle::new(raw)
        .map_err(|e| error::response(StatusCode::BAD_REQUEST, e.to_string()))
}

/// Resolves the namespace a request targets: an explicit `uuid` query
/// override, or the caller's own namespace.
fn resolve_target(
    ctx: &AuthContext,
    uuid: &Option<String>,
) -> Result<Namespace, ErrorResponse> {
    match uuid {
        Some(raw) => Namespace::parse(raw)
            .map_err(|e| error::response(StatusCode::BAD_REQUEST, e.to_string())),
        None => Ok(ctx.namespace.clone()),
    }
}

/// Read access: owners and admins always; others only for public
/// datapacks.
fn may_read(ctx: &AuthContext, target: &Namespace, metadata: &DatapackMetadata) -> bool {
    ctx.may_write(target) || metadata.is_public
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Health check response", body = HealthRes))
)]
/// Health check endpoint.
#[axum::debug_handler]
async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "Geochart datapack API is alive".into(),
    })
}

#[utoipa::path(
    post,
    path = "/datapacks",
    responses(
        (status = 200, description = "Datapack uploaded", body = MessageRes),
        (status = 400, description = "Invalid upload", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 409, description = "Title already taken", body = ErrorBody),
        (status = 413, description = "Upload too large", body = ErrorBody),
        (status = 415, description = "Disallowed file type", body = ErrorBody)
    )
)]
/// Uploads a datapack as a multipart request.
///
/// Fields: `datapack` (the payload file), optional `datapack-image`,
/// repeated `pdfFiles[]`, plus metadata fields. An admin may direct the
/// upload into `official` or a workshop namespace via the `uuid` field;
/// everyone else uploads into their own namespace.
#[axum::debug_handler]
async fn upload_datapack(
    State(state): State<AppState>,
    ctx: AuthContext,
    multipart: Multipart,
) -> Result<Json<MessageRes>, ErrorResponse> {
    let upload = state
        .pipeline
        .process(&ctx.namespace, multipart)
        .await
        .map_err(|e| error::upload_error(&e))?;

    let target = match requested_namespace(&upload, &ctx.namespace) {
        Ok(target) => target,
        Err(e) => {
            let response = error::upload_error(&e);
            upload.discard().await;
            return Err(response);
        }
    };

    if matches!(target, Namespace::Official | Namespace::Workshop(_)) && !ctx.is_admin {
        upload.discard().await;
        return Err(error::response(
            StatusCode::UNAUTHORIZED,
            "Only admins can upload official or workshop datapacks",
        ));
    }
    if !ctx.may_write(&target) {
        upload.discard().await;
        return Err(error::response(
            StatusCode::UNAUTHORIZED,
            "Unauthorized access",
        ));
    }
    if let Namespace::Workshop(id) = target {
        match state.workshops.is_active(id).await {
            Ok(true) => {}
            Ok(false) => {
                upload.discard().await;
                return Err(error::response(
                    StatusCode::NOT_FOUND,
                    "Workshop not found or has ended",
                ));
            }
            Err(e) => {
                let response = error::store_error(&e);
                upload.discard().await;
                return Err(response);
            }
        }
    }

    let metadata = match build_metadata(&target, &upload) {
        Ok(metadata) => metadata,
        Err(e) => {
            let response = error::upload_error(&e);
            upload.discard().await;
            return Err(response);
        }
    };

    if state.store.fetch(&target, &metadata.title).is_ok() {
        upload.discard().await;
        return Err(error::response(
            StatusCode::CONFLICT,
            "Datapack with the same title already exists",
        ));
    }

    let files = upload.datapack_files();
    match state
        .store
        .setup_datapack_directory(&target, files, metadata, false, false)
        .await
    {
        Ok(_) => Ok(message("Datapack uploaded successfully")),
        Err(e) => {
            let response = error::store_error(&e);
            upload.discard().await;
            Err(response)
        }
    }
}

#[utoipa::path(
    get,
    path = "/datapacks",
    responses(
        (status = 200, description = "Datapacks in the target namespace"),
        (status = 400, description = "Invalid namespace", body = ErrorBody)
    )
)]
/// Lists datapacks in the caller's namespace, or in another namespace via
/// `?uuid=` (admins see everything there; others only public entries).
#[axum::debug_handler]
async fn list_datapacks(
    State(state): State<AppState>,
    ctx: AuthContext,
    Query(query): Query<NamespaceQuery>,
) -> Result<Json<Vec<DatapackMetadata>>, ErrorResponse> {
    let target = resolve_target(&ctx, &query.uuid)?;
    let mut datapacks = state.store.list(&target);
    if !ctx.may_write(&target) {
        datapacks.retain(|metadata| metadata.is_public);
    }
    Ok(Json(datapacks))
}

#[utoipa::path(
    get,
    path = "/datapacks/{title}",
    responses(
        (status = 200, description = "Datapack metadata"),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 404, description = "Unknown datapack", body = ErrorBody)
    )
)]
/// Fetches one datapack's metadata.
#[axum::debug_handler]
async fn fetch_datapack(
    State(state): State<AppState>,
    ctx: AuthContext,
    AxumPath(title): AxumPath<String>,
    Query(query): Query<NamespaceQuery>,
) -> Result<Json<DatapackMetadata>, ErrorResponse> {
    let title = parse_title(&title)?;
    let target = resolve_target(&ctx, &query.uuid)?;
    let metadata = state
        .store
        .fetch(&target, &title)
        .map_err(|e| error::store_error(&e))?;
    if !may_read(&ctx, &target, &metadata) {
        return Err(error::response(
            StatusCode::UNAUTHORIZED,
            "Unauthorized access",
        ));
    }
    Ok(Json(metadata))
}

#[utoipa::path(
    get,
    path = "/datapacks/{title}/download",
    responses(
        (status = 200, description = "Datapack payload bytes"),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 404, description = "Unknown datapack", body = ErrorBody),
        (status = 422, description = "Encryptor produced invalid output", body = ErrorBody)
    )
)]
/// Downloads a datapack payload, optionally in its protected (encrypted)
/// form via `?encrypted=true`.
#[axum::debug_handler]
async fn download_datapack(
    State(state): State<AppState>,
    ctx: AuthContext,
    AxumPath(title): AxumPath<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ErrorResponse> {
    let title = parse_title(&title)?;
    let target = resolve_target(&ctx, &query.uuid)?;
    let metadata = state
        .store
        .fetch(&target, &title)
        .map_err(|e| error::store_error(&e))?;
    if !may_read(&ctx, &target, &metadata) {
        return Err(error::response(
            StatusCode::UNAUTHORIZED,
            "Unauthorized access",
        ));
    }

    let bytes = if query.encrypted.unwrap_or(false) {
        state
            .cache
            .get_or_encrypt(&target, &title, &metadata.stored_file_name)
            .await
            .map_err(|e| error::encrypt_error(&e))?
    } else {
        state
            .store
            .read_payload(&target, &title)
            .await
            .map_err(|e| error::store_error(&e))?
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_owned()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", metadata.stored_file_name),
            ),
        ],
        bytes,
    )
        .into_response())
}

#[utoipa::path(
    get,
    path = "/datapacks/{title}/image",
    responses(
        (status = 200, description = "Cover image bytes"),
        (status = 404, description = "No cover image", body = ErrorBody)
    )
)]
/// Serves a datapack's cover image.
#[axum::debug_handler]
async fn fetch_datapack_image(
    State(state): State<AppState>,
    ctx: AuthContext,
    AxumPath(title): AxumPath<String>,
    Query(query): Query<NamespaceQuery>,
) -> Result<Response, ErrorResponse> {
    let title = parse_title(&title)?;
    let target = resolve_target(&ctx, &query.uuid)?;
    let metadata = state
        .store
        .fetch(&target, &title)
        .map_err(|e| error::store_error(&e))?;
    if !may_read(&ctx, &target, &metadata) {
        return Err(error::response(
            StatusCode::UNAUTHORIZED,
            "Unauthorized access",
        ));
    }

    let bytes = state
        .store
        .read_cover_image(&target, &title)
        .await
        .map_err(|e| error::store_error(&e))?;
    let content_type = match metadata
        .datapack_image
        .as_deref()
        .and_then(|name| std::path::Path::new(name).extension())
        .and_then(|ext| ext.to_str())
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    };
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, content_type)],
        bytes,
    )
        .into_response())
}

#[utoipa::path(
    patch,
    path = "/datapacks/{title}",
    responses(
        (status = 200, description = "Metadata updated"),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 404, description = "Unknown datapack", body = ErrorBody),
        (status = 409, description = "New title already taken", body = ErrorBody)
    )
)]
/// Edits a datapack's metadata; a changed title renames its directory.
#[axum::debug_handler]
async fn edit_datapack(
    State(state): State<AppState>,
    ctx: AuthContext,
    AxumPath(title): AxumPath<String>,
    Query(query): Query<NamespaceQuery>,
    Json(patch): Json<DatapackMetadataPatch>,
) -> Result<Json<DatapackMetadata>, ErrorResponse> {
    let title = parse_title(&title)?;
    let target = resolve_target(&ctx, &query.uuid)?;
    if !ctx.may_write(&target) {
        return Err(error::response(
            StatusCode::UNAUTHORIZED,
            "Unauthorized access",
        ));
    }
    let updated = state
        .store
        .edit_metadata(&target, &title, &patch)
        .await
        .map_err(|e| error::store_error(&e))?;
    Ok(Json(updated))
}

#[utoipa::path(
    delete,
    path = "/datapacks/{title}",
    responses(
        (status = 200, description = "Datapack deleted", body = MessageRes),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 404, description = "Unknown datapack", body = ErrorBody)
    )
)]
/// Deletes a datapack and its cached encrypted artifacts.
#[axum::debug_handler]
async fn delete_datapack(
    State(state): State<AppState>,
    ctx: AuthContext,
    AxumPath(title): AxumPath<String>,
    Query(query): Query<NamespaceQuery>,
) -> Result<Json<MessageRes>, ErrorResponse> {
    let title = parse_title(&title)?;
    let target = resolve_target(&ctx, &query.uuid)?;
    if !ctx.may_write(&target) {
        return Err(error::response(
            StatusCode::UNAUTHORIZED,
            "Unauthorized access",
        ));
    }
    state
        .store
        .delete_datapack(&target, &title)
        .await
        .map_err(|e| error::store_error(&e))?;
    Ok(message("Datapack deleted"))
}

#[utoipa::path(
    patch,
    path = "/admin/datapacks/priorities",
    responses(
        (status = 200, description = "All priorities updated", body = MessageRes),
        (status = 400, description = "Invalid request", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 500, description = "Some or all updates failed", body = ErrorBody)
    )
)]
/// Applies a batch of priority changes, reporting per-item outcomes.
#[axum::debug_handler]
async fn admin_edit_priorities(
    State(state): State<AppState>,
    ctx: AuthContext,
    Json(request): Json<PriorityTasksReq>,
) -> Response {
    if !ctx.is_admin {
        return error::response(StatusCode::UNAUTHORIZED, "Unauthorized access")
            .into_response();
    }
    if request.tasks.is_empty() {
        return error::response(StatusCode::BAD_REQUEST, "Invalid request").into_response();
    }

    let outcome = state.store.update_priorities(request.tasks).await;
    if outcome.all_succeeded() {
        return message("Priorities updated").into_response();
    }
    let error_text = if outcome.all_failed() {
        "Failed to update priorities"
    } else {
        "Some priorities updated"
    };
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "error": error_text,
            "completedRequests": outcome.completed,
            "failedRequests": outcome.failed,
        })),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/admin/official/{title}/promote",
    responses(
        (status = 200, description = "Datapack added to workshop", body = MessageRes),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 404, description = "Unknown datapack or workshop", body = ErrorBody),
        (status = 409, description = "Workshop already holds this title", body = ErrorBody)
    )
)]
/// Copies an official datapack into an active workshop.
#[axum::debug_handler]
async fn admin_promote_to_workshop(
    State(state): State<AppState>,
    ctx: AuthContext,
    AxumPath(title): AxumPath<String>,
    Json(request): Json<PromoteReq>,
) -> Result<Json<MessageRes>, ErrorResponse> {
    if !ctx.is_admin {
        return Err(error::response(
            StatusCode::UNAUTHORIZED,
            "Unauthorized access",
        ));
    }
    let title = parse_title(&title)?;

    match state.workshops.is_active(request.workshop_id).await {
        Ok(true) => {}
        Ok(false) => {
            return Err(error::response(
                StatusCode::NOT_FOUND,
                "Workshop not found or has ended",
            ));
        }
        Err(e) => return Err(error::store_error(&e)),
    }

    state
        .store
        .promote_official_to_workshop(&title, request.workshop_id)
        .await
        .map_err(|e| error::store_error(&e))?;
    Ok(message("Datapack added to workshop"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ADMIN_HEADER, USER_HEADER};
    use axum::body::Body;
    use axum::http::Request;
    use geochart_encrypt::{EncryptError, EncryptResult, Encryptor, ENCRYPTED_HEADER};
    use http_body_util::BodyExt;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "geochart-router-test";

    struct FakeEncryptor;

    #[axum::async_trait]
    impl Encryptor for FakeEncryptor {
        async fn encrypt(&self, input: &Path, output_dir: &Path) -> EncryptResult<()> {
            let plaintext = tokio::fs::read(input).await.map_err(EncryptError::Io)?;
            let artifact = output_dir.join(input.file_name().unwrap());
            tokio::fs::write(artifact, [ENCRYPTED_HEADER, plaintext.as_slice()].concat())
                .await
                .map_err(EncryptError::Io)?;
            Ok(())
        }
    }

    fn test_state(temp: &TempDir, active_workshops: Vec<u32>) -> AppState {
        let cfg = Arc::new(ServiceConfig {
            addr: "127.0.0.1:0".into(),
            data_dir: temp.path().to_path_buf(),
            encryption_jar: temp.path().join("encrypt.jar"),
            encrypt_timeout: Duration::from_secs(5),
            max_upload_bytes: 8 * 1024 * 1024,
            active_workshops: active_workshops.clone(),
        });
        let layout = StorageLayout::new(temp.path());
        AppState {
            store: Arc::new(DatapackStore::new(layout.clone())),
            pipeline: Arc::new(UploadPipeline::new(layout.clone(), cfg.max_upload_bytes)),
            cache: Arc::new(EncryptionCache::new(layout, Arc::new(FakeEncryptor))),
            workshops: Arc::new(StaticWorkshopRegistry::new(active_workshops)),
            cfg,
        }
    }

    fn upload_body(title: &str) -> Vec<u8> {
        let mut body = Vec::new();
        let mut file_part = |name: &str, file_name: &str, content_type: &str, bytes: &[u8]| {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                     Content-Type: {content_type}\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        };
        file_part("datapack", "chart.dpk", "application/octet-stream", b"chart data bytes");
        file_part("datapack-image", "cover.jpg", "image/jpeg", b"jpeg bytes");
        for (name, value) in [
            ("title", title),
            ("description", "strata"),
            ("authoredBy", "J. Geologist"),
            ("tags", "[\"permian\"]"),
            ("references", "[]"),
            ("priority", "1"),
        ] {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            );
            body.extend_from_slice(value.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    const USER_UUID: &str = "550e8400-e29b-41d4-a716-446655440000";

    fn upload_request(as_admin: bool, title: &str, extra_fields: &[(&str, &str)]) -> Request<Body> {
        let mut body = upload_body(title);
        // splice extra fields in before the closing boundary
        let closing = format!("--{BOUNDARY}--\r\n");
        body.truncate(body.len() - closing.len());
        for (name, value) in extra_fields {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            );
            body.extend_from_slice(value.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(closing.as_bytes());

        let mut builder = Request::builder()
            .method("POST")
            .uri("/datapacks")
            .header(USER_HEADER, USER_UUID)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            );
        if as_admin {
            builder = builder.header(ADMIN_HEADER, "true");
        }
        builder.body(Body::from(body)).unwrap()
    }

    fn get_request(uri: &str, as_admin: bool) -> Request<Body> {
        let mut builder = Request::builder()
            .method("GET")
            .uri(uri)
            .header(USER_HEADER, USER_UUID);
        if as_admin {
            builder = builder.header(ADMIN_HEADER, "true");
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_upload_then_fetch_round_trip() {
        let temp = TempDir::new().unwrap();
        let app = build_router(test_state(&temp, vec![]));

        let response = app
            .clone()
            .oneshot(upload_request(false, "Permian Basin", &[]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(get_request("/datapacks/Permian%20Basin", false))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["title"], "Permian Basin");
        assert_eq!(json["uuid"], USER_UUID);
        assert_eq!(json["type"], "user");
        assert_eq!(json["hasFiles"], false);
        assert!(json["storedFileName"].as_str().unwrap().ends_with(".dpk"));
    }

    #[tokio::test]
    async fn test_duplicate_title_conflicts() {
        let temp = TempDir::new().unwrap();
        let app = build_router(test_state(&temp, vec![]));

        let first = app
            .clone()
            .oneshot(upload_request(false, "Permian Basin", &[]))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .clone()
            .oneshot(upload_request(false, "Permian Basin", &[]))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let json = body_json(second).await;
        assert_eq!(json["error"], "Datapack with the same title already exists");
    }

    #[tokio::test]
    async fn test_non_admin_cannot_upload_official() {
        let temp = TempDir::new().unwrap();
        let app = build_router(test_state(&temp, vec![]));

        let response = app
            .clone()
            .oneshot(upload_request(false, "Cambrian", &[("uuid", "official")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(
            json["error"],
            "Only admins can upload official or workshop datapacks"
        );
    }

    #[tokio::test]
    async fn test_missing_identity_header_is_unauthorized() {
        let temp = TempDir::new().unwrap();
        let app = build_router(test_state(&temp, vec![]));
        let request = Request::builder()
            .method("GET")
            .uri("/datapacks")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_download_plain_and_encrypted() {
        let temp = TempDir::new().unwrap();
        let app = build_router(test_state(&temp, vec![]));
        app.clone()
            .oneshot(upload_request(false, "Permian Basin", &[]))
            .await
            .unwrap();

        let plain = app
            .clone()
            .oneshot(get_request("/datapacks/Permian%20Basin/download", false))
            .await
            .unwrap();
        assert_eq!(plain.status(), StatusCode::OK);
        let bytes = plain.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], &b"chart data bytes"[..]);

        let encrypted = app
            .clone()
            .oneshot(get_request(
                "/datapacks/Permian%20Basin/download?encrypted=true",
                false,
            ))
            .await
            .unwrap();
        assert_eq!(encrypted.status(), StatusCode::OK);
        let bytes = encrypted.into_body().collect().await.unwrap().to_bytes();
        assert!(bytes.starts_with(ENCRYPTED_HEADER));

        // second encrypted download is a cache hit with identical bytes
        let again = app
            .clone()
            .oneshot(get_request(
                "/datapacks/Permian%20Basin/download?encrypted=true",
                false,
            ))
            .await
            .unwrap();
        let bytes_again = again.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(bytes, bytes_again);
    }

    #[tokio::test]
    async fn test_delete_then_fetch_is_not_found() {
        let temp = TempDir::new().unwrap();
        let app = build_router(test_state(&temp, vec![]));
        app.clone()
            .oneshot(upload_request(false, "Permian Basin", &[]))
            .await
            .unwrap();

        let request = Request::builder()
            .method("DELETE")
            .uri("/datapacks/Permian%20Basin")
            .header(USER_HEADER, USER_UUID)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(get_request("/datapacks/Permian%20Basin", false))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_priority_batch_partial_failure_reports_both_lists() {
        let temp = TempDir::new().unwrap();
        let app = build_router(test_state(&temp, vec![]));
        app.clone()
            .oneshot(upload_request(false, "First", &[]))
            .await
            .unwrap();
        app.clone()
            .oneshot(upload_request(false, "Third", &[]))
            .await
            .unwrap();

        let tasks = serde_json::json!({
            "tasks": [
                {"uuid": USER_UUID, "title": "First", "priority": 1},
                {"uuid": USER_UUID, "title": "Missing", "priority": 2},
                {"uuid": USER_UUID, "title": "Third", "priority": 3},
            ]
        });
        let request = Request::builder()
            .method("PATCH")
            .uri("/admin/datapacks/priorities")
            .header(USER_HEADER, USER_UUID)
            .header(ADMIN_HEADER, "true")
            .header("content-type", "application/json")
            .body(Body::from(tasks.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        assert_eq!(json["error"], "Some priorities updated");
        let completed: Vec<&str> = json["completedRequests"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["title"].as_str().unwrap())
            .collect();
        let failed: Vec<&str> = json["failedRequests"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["title"].as_str().unwrap())
            .collect();
        assert_eq!(completed, vec!["First", "Third"]);
        assert_eq!(failed, vec!["Missing"]);
    }

    #[tokio::test]
    async fn test_priorities_require_admin() {
        let temp = TempDir::new().unwrap();
        let app = build_router(test_state(&temp, vec![]));
        let request = Request::builder()
            .method("PATCH")
            .uri("/admin/datapacks/priorities")
            .header(USER_HEADER, USER_UUID)
            .header("content-type", "application/json")
            .body(Body::from(r#"{"tasks":[]}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_promote_official_into_workshop() {
        let temp = TempDir::new().unwrap();
        let app = build_router(test_state(&temp, vec![7]));
        let response = app
            .clone()
            .oneshot(upload_request(true, "Cambrian", &[("uuid", "official")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let request = Request::builder()
            .method("POST")
            .uri("/admin/official/Cambrian/promote")
            .header(USER_HEADER, USER_UUID)
            .header(ADMIN_HEADER, "true")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"workshopId": 7}"#))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(get_request("/datapacks/Cambrian?uuid=workshop-7", true))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["type"], "workshop");
        assert_eq!(json["uuid"], "workshop-7");
        assert_eq!(json["isPublic"], true);

        // the official original is still there
        let response = app
            .clone()
            .oneshot(get_request("/datapacks/Cambrian?uuid=official", true))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_promote_into_inactive_workshop_is_not_found() {
        let temp = TempDir::new().unwrap();
        let app = build_router(test_state(&temp, vec![]));
        app.clone()
            .oneshot(upload_request(true, "Cambrian", &[("uuid", "official")]))
            .await
            .unwrap();

        let request = Request::builder()
            .method("POST")
            .uri("/admin/official/Cambrian/promote")
            .header(USER_HEADER, USER_UUID)
            .header(ADMIN_HEADER, "true")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"workshopId": 9}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Workshop not found or has ended");
    }

    #[tokio::test]
    async fn test_rejected_file_type_returns_415() {
        let temp = TempDir::new().unwrap();
        let app = build_router(test_state(&temp, vec![]));

        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"datapack\"; filename=\"chart.exe\"\r\n\
              Content-Type: application/octet-stream\r\n\r\npayload\r\n",
        );
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        let request = Request::builder()
            .method("POST")
            .uri("/datapacks")
            .header(USER_HEADER, USER_UUID)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let json = body_json(response).await;
        assert_eq!(json["error"], "Invalid file type for datapack file");
    }

    #[tokio::test]
    async fn test_list_scopes_to_caller() {
        let temp = TempDir::new().unwrap();
        let app = build_router(test_state(&temp, vec![]));
        app.clone()
            .oneshot(upload_request(false, "Mine", &[]))
            .await
            .unwrap();
        app.clone()
            .oneshot(upload_request(true, "Public Official", &[
                ("uuid", "official"),
                ("isPublic", "true"),
            ]))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(get_request("/datapacks", false))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["title"], "Mine");

        // a non-admin listing the official namespace sees only public packs
        let response = app
            .clone()
            .oneshot(get_request("/datapacks?uuid=official", false))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["title"], "Public Official");
    }
}
