//! OTA file server.
//!
//! Serves the firmware build directory as static files so the robot can
//! fetch `version.json` and the firmware image. No routing beyond that.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

use super::metadata::VersionMetadata;

/// Write `version.json` into `dir`, bind `0.0.0.0:port` and serve `dir` until
/// Ctrl-C.
///
/// # Errors
///
/// Returns an error if the metadata cannot be written, the port cannot be
/// bound, or the server fails.
pub async fn serve_over_http(dir: &Path, port: u16, metadata: &VersionMetadata) -> io::Result<()> {
    metadata.write_to(dir)?;
    let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await?;
    serve_until(listener, dir.to_path_buf(), async {
        if tokio::signal::ctrl_c().await.is_err() {
            // Without a signal handler the server can only be stopped by killing it.
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Serve `root` on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns any I/O error from the underlying server.
pub async fn serve_until<F>(listener: TcpListener, root: PathBuf, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, root = %root.display(), "OTA server listening");
    }
    axum::serve(listener, router(root))
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("OTA server stopped");
    Ok(())
}

/// Routes serving every file under `root`.
pub fn router(root: PathBuf) -> Router {
    Router::new()
        .route("/*path", get(serve_file))
        .with_state(Arc::new(root))
}

async fn serve_file(State(root): State<Arc<PathBuf>>, UrlPath(path): UrlPath<String>) -> Response {
    let Some(file) = resolve(&root, &path) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match tokio::fs::read(&file).await {
        Ok(bytes) => {
            tracing::info!(path = %path, bytes = bytes.len(), "served");
            ([(header::CONTENT_TYPE, content_type(&file))], bytes).into_response()
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Map a request path onto a file under `root`, refusing anything that would
/// leave it.
fn resolve(root: &Path, request: &str) -> Option<PathBuf> {
    let relative = Path::new(request.trim_start_matches('/'));
    if relative.as_os_str().is_empty() {
        return None;
    }
    let safe = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    safe.then(|| root.join(relative))
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => "application/json",
        Some("html") => "text/html; charset=utf-8",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
