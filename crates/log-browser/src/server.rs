//! Axum router and server for the log browser

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Path as UrlPath, Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use tokio::net::TcpListener;
use tower::ServiceExt;
use tower_http::{services::ServeFile, trace::TraceLayer};

use crate::error::{BrowserError, BrowserResult};
use crate::listing::{read_entries, render_index};
use crate::BrowserConfig;

/// Supplies the JSON document served at `/status`
#[async_trait]
pub trait StatusProvider: Send + Sync + 'static {
    async fn status(&self) -> serde_json::Value;
}

#[derive(Clone)]
struct BrowserState {
    root: Arc<PathBuf>,
    status: Option<Arc<dyn StatusProvider>>,
}

/// Build the browser router over `root`
pub fn router(root: impl Into<PathBuf>, status: Option<Arc<dyn StatusProvider>>) -> Router {
    let state = BrowserState {
        root: Arc::new(root.into()),
        status,
    };

    Router::new()
        .route("/", get(|| async { Redirect::temporary("/logs/") }))
        .route("/logs", get(|| async { Redirect::temporary("/logs/") }))
        .route("/logs/", get(root_index_handler))
        .route("/logs/*path", get(log_path_handler))
        .route("/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the listener fails
pub async fn serve(
    config: BrowserConfig,
    status: Option<Arc<dyn StatusProvider>>,
) -> BrowserResult<()> {
    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| BrowserError::Bind {
            addr: addr.clone(),
            source,
        })?;

    tracing::info!("Log browser listening on http://{}/logs/", addr);
    tracing::info!("Serving {}", config.root.display());

    let app = router(config.root, status);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn root_index_handler(State(state): State<BrowserState>) -> Response {
    directory_index(&state.root, "/logs/").await
}

async fn log_path_handler(
    State(state): State<BrowserState>,
    UrlPath(path): UrlPath<String>,
    request: Request,
) -> Response {
    let Some(relative) = sanitize_path(&path) else {
        tracing::warn!("Rejected log path: {}", path);
        return (StatusCode::BAD_REQUEST, "invalid path").into_response();
    };

    let target = state.root.join(&relative);
    let meta = match tokio::fs::metadata(&target).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return StatusCode::NOT_FOUND.into_response();
        }
        Err(e) => {
            tracing::error!("Failed to stat {}: {}", target.display(), e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let url_path = request.uri().path().to_string();
    if meta.is_dir() {
        // Relative links in the index need the trailing slash
        if !url_path.ends_with('/') {
            return Redirect::permanent(&format!("{}/", url_path)).into_response();
        }
        return directory_index(&target, &url_path).await;
    }

    serve_log_file(&target, request).await
}

async fn serve_log_file(target: &Path, request: Request) -> Response {
    let response = match ServeFile::new(target).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    let mut response = response.map(Body::new);
    if response.status().is_success() {
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    }
    response
}

async fn directory_index(dir: &Path, url_path: &str) -> Response {
    match read_entries(dir).await {
        Ok(entries) => {
            let mut response = Html(render_index(url_path, &entries)).into_response();
            response
                .headers_mut()
                .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            response
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::error!("Failed to list {}: {}", dir.display(), e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn status_handler(State(state): State<BrowserState>) -> Response {
    match &state.status {
        Some(provider) => Json(provider.status().await).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Turn a decoded URL tail into a path under the log root.
///
/// `None` when any segment climbs out of the root or is not a plain name.
pub fn sanitize_path(path: &str) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for segment in path.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if segment.contains('\\') || segment.contains('\0') {
            return None;
        }
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => relative.push(name),
            _ => return None,
        }
    }
    Some(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("plebtoken.eth/2024-01-01"),
            Some(PathBuf::from("plebtoken.eth").join("2024-01-01"))
        );
        assert_eq!(sanitize_path("a//./b/"), Some(PathBuf::from("a").join("b")));
        assert_eq!(sanitize_path(""), Some(PathBuf::new()));
    }

    #[test]
    fn test_sanitize_rejects_traversal() {
        assert_eq!(sanitize_path("../etc/passwd"), None);
        assert_eq!(sanitize_path("a/../../b"), None);
        assert_eq!(sanitize_path("a\\..\\b"), None);
    }
}
