//! A tiny file server for pairing a reader device with the library.
//!
//! Routes:
//!
//! - `GET /index`: the allow-list as JSON, `relative path → [tags…]`.
//! - `GET /shutdown`: stops the server once in-flight requests finish.
//! - `GET /<relative path>`: the file, if it is on the allow-list. Anything
//!   else is a 404, including paths that merely exist under the root.

pub mod error;

use crate::error::{ErrorKind, Result};
use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use exn::ResultExt;
use lectern_library::AllowList;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct AppState {
    allowed: Arc<AllowList>,
    shutdown: Arc<Notify>,
}

/// Builds the router. `shutdown` is notified when `/shutdown` is requested.
pub fn router(allowed: AllowList, shutdown: Arc<Notify>) -> Router {
    let state = AppState { allowed: Arc::new(allowed), shutdown };
    Router::new()
        .route("/index", get(tag_index))
        .route("/shutdown", get(request_shutdown))
        .route("/*path", get(serve_file))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Binds `address` and serves until `/shutdown` or Ctrl+C.
pub async fn serve(address: SocketAddr, allowed: AllowList) -> Result<()> {
    let listener = TcpListener::bind(address).await.or_raise(|| ErrorKind::Bind(address))?;
    serve_on(listener, allowed).await
}

pub async fn serve_on(listener: TcpListener, allowed: AllowList) -> Result<()> {
    let shutdown = Arc::new(Notify::new());
    let files = allowed.len();
    let app = router(allowed, shutdown.clone());
    if let Ok(address) = listener.local_addr() {
        tracing::info!(address = %address, files, "Serving library");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown.notified() => tracing::info!("Shutdown requested"),
                _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl+C, shutting down"),
            }
        })
        .await
        .or_raise(|| ErrorKind::Serve)?;
    tracing::info!("Server stopped");
    Ok(())
}

async fn tag_index(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.allowed.index().clone())
}

async fn request_shutdown(State(state): State<AppState>) -> impl IntoResponse {
    state.shutdown.notify_one();
    "Shutting down\n"
}

async fn serve_file(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    let Some(file) = state.allowed.resolve(&path) else {
        tracing::debug!(path = %path, "Not on the allow-list");
        return StatusCode::NOT_FOUND.into_response();
    };
    match tokio::fs::read(&file).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type(&file))], bytes).into_response(),
        Err(e) => {
            tracing::warn!(path = %file.display(), error = %e, "Allowed file could not be read");
            StatusCode::NOT_FOUND.into_response()
        },
    }
}

fn content_type(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()).map(str::to_lowercase).as_deref() {
        Some("epub") => "application/epub+zip",
        Some("mobi" | "azw3") => "application/x-mobipocket-ebook",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tower::util::ServiceExt;

    fn library() -> (TempDir, AllowList) {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("Frank Herbert")).unwrap();
        std::fs::write(root.path().join("Frank Herbert/Dune.epub"), b"dune").unwrap();
        std::fs::write(root.path().join("secret.epub"), b"secret").unwrap();
        let mut allowed = AllowList::new(root.path());
        allowed.insert(&root.path().join("Frank Herbert/Dune.epub"), ["scifi".to_string()]);
        (root, allowed)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_index() {
        let (_root, allowed) = library();
        let (status, body) = get(router(allowed, Arc::default()), "/index").await;
        assert_eq!(status, StatusCode::OK);
        let index: BTreeMap<String, Vec<String>> = serde_json::from_slice(&body).unwrap();
        assert_eq!(index.get("Frank Herbert/Dune.epub"), Some(&vec!["scifi".to_string()]));
    }

    #[tokio::test]
    async fn test_serves_allowed_files_only() {
        let (_root, allowed) = library();
        let app = router(allowed, Arc::default());
        let (status, body) = get(app.clone(), "/Frank%20Herbert/Dune.epub").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"dune");
        assert_eq!(get(app.clone(), "/secret.epub").await.0, StatusCode::NOT_FOUND);
        assert_eq!(get(app, "/Frank%20Herbert/../secret.epub").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_shutdown_notifies() {
        let (_root, allowed) = library();
        let shutdown = Arc::new(Notify::new());
        let (status, _) = get(router(allowed, shutdown.clone()), "/shutdown").await;
        assert_eq!(status, StatusCode::OK);
        tokio::time::timeout(Duration::from_secs(1), shutdown.notified()).await.unwrap();
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let (_root, allowed) = library();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_on(listener, allowed));
        let mut stream = tokio::net::TcpStream::connect(address).await.unwrap();
        stream.write_all(b"GET /shutdown HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap().unwrap();
    }
}
