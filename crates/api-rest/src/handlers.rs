//! HTTP handlers.
//!
//! Every handler that touches the disk or the catalog hands the work to a blocking task. That
//! task runs to completion even if the client goes away, so a started upload always finishes or
//! cleans up after itself.

use crate::auth::Owner;
use crate::dto::{
    DeleteRes, HealthRes, ListParams, ListUploadsRes, StatsRes, UploadDto, UploadForm, UploadRes,
};
use crate::error::{ApiError, ErrorRes};
use crate::AppState;
use axum::{
    extract::{multipart::Field, Multipart, Path, Query, State},
    http::header,
    response::{IntoResponse, Json},
};
use scape_core::{
    SearchQuery, UploadId, UploadRequest, UploadResult, UploadService, CANONICAL_MEDIA_TYPE,
};
use std::sync::Arc;

async fn run_blocking<T, F>(service: &Arc<UploadService>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&UploadService) -> UploadResult<T> + Send + 'static,
    T: Send + 'static,
{
    let service = Arc::clone(service);
    match tokio::task::spawn_blocking(move || f(&service)).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => {
            tracing::error!("upload task failed to complete: {e}");
            Err(ApiError::storage_failure())
        }
    }
}

fn parse_id(raw: &str) -> Result<UploadId, ApiError> {
    raw.parse::<UploadId>()
        .map_err(|e| ApiError::invalid_input(e.to_string()))
}

async fn field_text(field: Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::invalid_input(format!("Failed to read form field: {e}")))
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API
#[axum::debug_handler]
pub async fn health(State(_state): State<AppState>) -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "Scape REST API is alive".into(),
    })
}

#[utoipa::path(
    post,
    path = "/api/upload",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    params(
        ("x-owner-id" = String, Header, description = "Authenticated account"),
    ),
    responses(
        (status = 200, description = "Upload committed", body = UploadRes),
        (status = 400, description = "Not an acceptable image", body = ErrorRes),
        (status = 401, description = "Missing or invalid credentials", body = ErrorRes),
        (status = 500, description = "Storage failure or orphaned commit", body = ErrorRes)
    )
)]
/// Upload an image
///
/// Expects a `file` part plus optional `title`, `description` and `tags` text parts. The image
/// is converted to PNG and recorded in the catalog under a newly allocated id.
///
/// # Errors
/// - `400 invalid_input` if the file is missing, empty, too large or not a decodable image
/// - `500 storage_failure` if allocation, staging or conversion output fails
/// - `500 orphan_commit` if the image was stored but could not be recorded
#[axum::debug_handler]
pub async fn upload(
    State(state): State<AppState>,
    Owner(owner_id): Owner,
    mut multipart: Multipart,
) -> Result<Json<UploadRes>, ApiError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut title = String::new();
    let mut description = String::new();
    let mut tags = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::invalid_input(format!("Failed to parse multipart: {e}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let data = field.bytes().await.map_err(|e| {
                    ApiError::invalid_input(format!("Failed to read file data: {e}"))
                })?;
                file = Some((file_name, data.to_vec()));
            }
            "title" => title = field_text(field).await?,
            "description" => description = field_text(field).await?,
            "tags" => tags = field_text(field).await?,
            _ => {}
        }
    }

    let (original_filename, bytes) =
        file.ok_or_else(|| ApiError::invalid_input("Missing file field"))?;

    let request = UploadRequest {
        owner_id,
        title,
        description,
        tags,
        original_filename,
        bytes,
    };

    let record = run_blocking(state.service(), move |service| service.upload(request)).await?;

    Ok(Json(UploadRes {
        success: true,
        message: "Upload successful".into(),
        id: record.id.get(),
    }))
}

#[utoipa::path(
    get,
    path = "/api/uploads",
    params(ListParams),
    responses(
        (status = 200, description = "Matching uploads, newest first", body = ListUploadsRes),
        (status = 500, description = "Catalog unavailable", body = ErrorRes)
    )
)]
/// Search the catalog
#[axum::debug_handler]
pub async fn list_uploads(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListUploadsRes>, ApiError> {
    let query = SearchQuery {
        text: params.q,
        owner_id: params.owner,
        limit: params.limit,
    };
    let records = run_blocking(state.service(), move |service| service.search(&query)).await?;

    Ok(Json(ListUploadsRes {
        uploads: records.into_iter().map(UploadDto::from).collect(),
    }))
}

#[utoipa::path(
    get,
    path = "/api/uploads/{id}",
    params(("id" = u32, Path, description = "Upload id")),
    responses(
        (status = 200, description = "The catalog record", body = UploadDto),
        (status = 400, description = "Malformed id", body = ErrorRes),
        (status = 404, description = "No such upload", body = ErrorRes)
    )
)]
/// Fetch one catalog record
#[axum::debug_handler]
pub async fn get_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UploadDto>, ApiError> {
    let id = parse_id(&id)?;
    let record = run_blocking(state.service(), move |service| service.get(id)).await?;
    Ok(Json(record.into()))
}

#[utoipa::path(
    get,
    path = "/view/{id}",
    params(("id" = u32, Path, description = "Upload id")),
    responses(
        (status = 200, description = "The canonical PNG", content_type = "image/png"),
        (status = 404, description = "No such upload", body = ErrorRes)
    )
)]
/// Serve the canonical image of an upload
#[axum::debug_handler]
pub async fn view_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let bytes = run_blocking(state.service(), move |service| service.read_final(id)).await?;
    Ok(([(header::CONTENT_TYPE, CANONICAL_MEDIA_TYPE)], bytes))
}

#[utoipa::path(
    delete,
    path = "/api/uploads/{id}",
    params(
        ("id" = u32, Path, description = "Upload id"),
        ("x-owner-id" = String, Header, description = "Authenticated account"),
    ),
    responses(
        (status = 200, description = "Upload deleted", body = DeleteRes),
        (status = 401, description = "Missing or invalid credentials", body = ErrorRes),
        (status = 403, description = "Upload belongs to another account", body = ErrorRes),
        (status = 404, description = "No such upload", body = ErrorRes)
    )
)]
/// Delete an upload owned by the caller
#[axum::debug_handler]
pub async fn delete_upload(
    State(state): State<AppState>,
    Owner(owner_id): Owner,
    Path(id): Path<String>,
) -> Result<Json<DeleteRes>, ApiError> {
    let id = parse_id(&id)?;
    run_blocking(state.service(), move |service| service.delete(id, &owner_id)).await?;

    Ok(Json(DeleteRes {
        success: true,
        message: "Upload deleted".into(),
    }))
}

#[utoipa::path(
    get,
    path = "/stats",
    responses(
        (status = 200, description = "Catalog totals", body = StatsRes)
    )
)]
/// Catalog totals
#[axum::debug_handler]
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsRes>, ApiError> {
    let stats = run_blocking(state.service(), |service| service.stats()).await?;
    Ok(Json(stats.into()))
}
