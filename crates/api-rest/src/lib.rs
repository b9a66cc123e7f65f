//! # API REST
//!
//! REST API implementation for Scape.
//!
//! Handles:
//! - HTTP endpoints with axum
//! - OpenAPI/Swagger documentation
//! - REST-specific concerns (multipart parsing, JSON serialization, CORS, request authentication)
//!
//! The upload pipeline itself lives in `scape-core`; handlers only translate between HTTP and
//! [`UploadService`].

#![warn(rust_2018_idioms)]

pub mod auth;
pub mod dto;
pub mod error;
pub mod handlers;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use scape_core::UploadService;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Room for multipart boundaries and the text parts on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state for the REST API server
///
/// Shared by every handler. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    service: Arc<UploadService>,
    api_key: Option<Arc<str>>,
}

impl AppState {
    /// `api_key` of `None` (or blank) disables the API key check.
    pub fn new(service: UploadService, api_key: Option<String>) -> Self {
        let api_key = api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .map(Arc::from);
        Self {
            service: Arc::new(service),
            api_key,
        }
    }

    pub fn service(&self) -> &Arc<UploadService> {
        &self.service
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::upload,
        handlers::list_uploads,
        handlers::get_upload,
        handlers::view_upload,
        handlers::delete_upload,
        handlers::stats,
    ),
    components(schemas(
        dto::HealthRes,
        dto::UploadForm,
        dto::UploadRes,
        dto::UploadDto,
        dto::ListUploadsRes,
        dto::DeleteRes,
        dto::StatsRes,
        error::ErrorRes,
    ))
)]
pub struct ApiDoc;

/// Builds the REST router with Swagger UI mounted at `/swagger-ui`.
pub fn router(state: AppState) -> Router {
    let body_limit = state
        .service
        .config()
        .max_upload_bytes()
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/upload",
            post(handlers::upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/api/uploads", get(handlers::list_uploads))
        .route(
            "/api/uploads/:id",
            get(handlers::get_upload).delete(handlers::delete_upload),
        )
        .route("/view/:id", get(handlers::view_upload))
        .route("/stats", get(handlers::stats))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
