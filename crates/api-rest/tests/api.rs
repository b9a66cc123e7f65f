use api_rest::{router, AppState};
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use image::{ImageFormat, RgbImage};
use scape_core::{CoreConfig, MemoryCatalog, UploadService};
use serde_json::Value;
use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "scape-test-boundary";

fn app_with_key(temp: &TempDir, api_key: Option<&str>) -> Router {
    let cfg = CoreConfig::new(temp.path().join("data"), 100, 1024 * 1024).unwrap();
    cfg.ensure_layout().unwrap();
    let service = UploadService::new(Arc::new(cfg), Arc::new(MemoryCatalog::new())).unwrap();
    router(AppState::new(service, api_key.map(str::to_string)))
}

fn app(temp: &TempDir) -> Router {
    app_with_key(temp, None)
}

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, image::Rgb([200, 120, 40]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
        .unwrap();
    bytes
}

fn multipart_body(filename: &str, file: &[u8], fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(file);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(owner: Option<&str>, filename: &str, file: &[u8]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(owner) = owner {
        builder = builder.header("x-owner-id", owner);
    }
    builder
        .body(Body::from(multipart_body(
            filename,
            file,
            &[("title", "cat"), ("description", "a cat"), ("tags", "animal")],
        )))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn health_reports_ok() {
    let temp = TempDir::new().unwrap();
    let (status, body) = send_json(&app(&temp), get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn upload_then_fetch_and_view() {
    let temp = TempDir::new().unwrap();
    let app = app(&temp);

    let (status, body) = send_json(&app, upload_request(Some("U1"), "cat.jpg", &jpeg(10, 10))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Upload successful");
    let id = body["id"].as_u64().unwrap();
    assert!((10_000..=99_999).contains(&id));

    let (status, record) = send_json(&app, get(&format!("/api/uploads/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["ownerId"], "U1");
    assert_eq!(record["title"], "cat");
    assert_eq!(record["tags"], "animal");
    assert_eq!(record["filename"], format!("{id}.png"));
    assert!(record["createdAt"].is_string());

    let response = app
        .clone()
        .oneshot(get(&format!("/view/{id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let decoded = image::load_from_memory_with_format(&bytes, ImageFormat::Png).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (10, 10));
}

#[tokio::test]
async fn non_image_upload_is_invalid_input() {
    let temp = TempDir::new().unwrap();
    let app = app(&temp);

    let (status, body) =
        send_json(&app, upload_request(Some("U1"), "notes.jpg", b"plain text")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "invalid_input");

    let (_, list) = send_json(&app, get("/api/uploads")).await;
    assert_eq!(list["uploads"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn upload_without_owner_is_unauthorized() {
    let temp = TempDir::new().unwrap();

    let (status, body) = send_json(&app(&temp), upload_request(None, "cat.jpg", &jpeg(4, 4))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn configured_api_key_is_enforced() {
    let temp = TempDir::new().unwrap();
    let app = app_with_key(&temp, Some("secret"));

    let (status, _) = send_json(&app, upload_request(Some("U1"), "cat.jpg", &jpeg(4, 4))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut request = upload_request(Some("U1"), "cat.jpg", &jpeg(4, 4));
    request
        .headers_mut()
        .insert("x-api-key", "secret".parse().unwrap());
    let (status, _) = send_json(&app, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn missing_file_part_is_invalid_input() {
    let temp = TempDir::new().unwrap();
    let body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\ncat\r\n--{BOUNDARY}--\r\n"
    );
    let request = Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header("x-owner-id", "U1")
        .body(Body::from(body))
        .unwrap();

    let (status, body) = send_json(&app(&temp), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_input");
}

#[tokio::test]
async fn unknown_and_malformed_ids() {
    let temp = TempDir::new().unwrap();
    let app = app(&temp);

    let (status, body) = send_json(&app, get("/api/uploads/12345")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, body) = send_json(&app, get("/view/not-a-number")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_input");
}

#[tokio::test]
async fn delete_is_limited_to_owner() {
    let temp = TempDir::new().unwrap();
    let app = app(&temp);
    let (_, body) = send_json(&app, upload_request(Some("U1"), "cat.jpg", &jpeg(4, 4))).await;
    let id = body["id"].as_u64().unwrap();

    let delete_as = |owner: &str| {
        Request::builder()
            .method("DELETE")
            .uri(format!("/api/uploads/{id}"))
            .header("x-owner-id", owner)
            .body(Body::empty())
            .unwrap()
    };

    let (status, body) = send_json(&app, delete_as("U2")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, body) = send_json(&app, delete_as("U1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, _) = send(&app, get(&format!("/view/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn search_and_stats() {
    let temp = TempDir::new().unwrap();
    let app = app(&temp);
    for owner in ["U1", "U2", "U2"] {
        let (status, _) = send_json(&app, upload_request(Some(owner), "cat.jpg", &jpeg(4, 4))).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send_json(&app, get("/api/uploads?owner=U2&q=ANIMAL")).await;
    assert_eq!(status, StatusCode::OK);
    let uploads = body["uploads"].as_array().unwrap();
    assert_eq!(uploads.len(), 2);
    assert!(uploads.iter().all(|u| u["ownerId"] == "U2"));

    let (_, body) = send_json(&app, get("/api/uploads?limit=1")).await;
    assert_eq!(body["uploads"].as_array().unwrap().len(), 1);

    let (status, body) = send_json(&app, get("/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uploads"], 3);
    assert_eq!(body["owners"], 2);
}

#[tokio::test]
async fn openapi_document_is_served() {
    let temp = TempDir::new().unwrap();

    let (status, body) = send_json(&app(&temp), get("/api-docs/openapi.json")).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/upload"].is_object());
}
