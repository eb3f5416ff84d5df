//! Serving files from the static root.
//!
//! Request paths are resolved strictly inside the root: `..`, absolute paths
//! and symlinks pointing outside it all resolve to "not found".

use std::path::{Component, Path, PathBuf};

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;
use tracing::{debug, warn};

use super::pages;

/// MIME type used when the extension is unknown.
pub const FALLBACK_MIME: &str = "text/plain";

/// Map a request path onto a regular file under `root`.
///
/// Returns `None` when the path is not valid UTF-8 after decoding, tries to
/// leave `root`, or does not name an existing file.
#[must_use]
pub fn resolve(root: &Path, request_path: &str) -> Option<PathBuf> {
    let decoded = percent_decode_str(request_path).decode_utf8().ok()?;

    let mut relative = PathBuf::new();
    for component in Path::new(decoded.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if relative.as_os_str().is_empty() {
        return None;
    }

    let root = root.canonicalize().ok()?;
    let candidate = root.join(relative).canonicalize().ok()?;
    (candidate.starts_with(&root) && candidate.is_file()).then_some(candidate)
}

/// Guess the MIME type of `path` from its extension.
#[must_use]
pub fn mime_for(path: &Path) -> &'static str {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(FALLBACK_MIME)
}

/// Serve `request_path` from `root`, or the fixed 404 page.
pub(crate) async fn serve(root: &Path, request_path: &str) -> Response {
    let Some(path) = resolve(root, request_path) else {
        debug!(path = %request_path, "static file not found");
        return pages::not_found();
    };

    match tokio::fs::read(&path).await {
        Ok(contents) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, mime_for(&path))],
            contents,
        )
            .into_response(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read static file");
            pages::not_found()
        }
    }
}
