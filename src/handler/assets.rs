use std::path::{Component, Path, PathBuf};

use anyhow::Context as _;
use axum::{
    extract::State,
    http::{Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};

use crate::{api::AppState, handler::ApiResult};

pub const HOME_PAGE: &str = "home/index.html";
pub const CONTROLLER_PAGE: &str = "controller/index.html";

pub async fn home_page(State(state): State<AppState>) -> ApiResult<Response> {
    file_response(&state.public_dir, HOME_PAGE).await
}

pub async fn controller_page(State(state): State<AppState>) -> ApiResult<Response> {
    file_response(&state.public_dir, CONTROLLER_PAGE).await
}

/// Any other path: a file below the public directory, GET only.
pub async fn fallback(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
) -> ApiResult<Response> {
    if method != Method::GET {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }
    file_response(&state.public_dir, uri.path()).await
}

async fn file_response(public_dir: &Path, request_path: &str) -> ApiResult<Response> {
    let mut path = resolve(public_dir, request_path)?;
    if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
        path.push("index.html");
    }
    let data = tokio::fs::read(&path)
        .await
        .with_context(|| format!("assets not found: {}", path.display()))?;
    Ok(([(header::CONTENT_TYPE, content_type(&path))], data).into_response())
}

/// Maps a request path onto `public_dir`, refusing anything that would
/// leave it.
fn resolve(public_dir: &Path, request_path: &str) -> anyhow::Result<PathBuf> {
    let mut path = public_dir.to_path_buf();
    for component in Path::new(request_path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => {
                return Err(std::io::Error::from(std::io::ErrorKind::NotFound))
                    .with_context(|| format!("assets not found: {}", request_path));
            }
        }
    }
    Ok(path)
}

fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "html" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() -> anyhow::Result<()> {
        let root = Path::new("/srv/public");
        assert_eq!(resolve(root, "/css/app.css")?, root.join("css/app.css"));
        assert_eq!(resolve(root, "./a.js")?, root.join("a.js"));
        assert!(resolve(root, "/../etc/passwd").is_err());
        assert!(resolve(root, "/css/../../x").is_err());
        Ok(())
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type(Path::new("a/index.html")), "text/html; charset=utf-8");
        assert_eq!(content_type(Path::new("app.CSS")), "text/css");
        assert_eq!(content_type(Path::new("main.js")), "text/javascript");
        assert_eq!(content_type(Path::new("blob")), "application/octet-stream");
    }
}
