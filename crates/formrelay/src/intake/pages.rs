//! Fixed HTML documents served by the intake endpoint.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};

/// Landing page, `GET /`.
pub const INDEX_HTML: &str = include_str!("../../assets/index.html");

/// Submission form, `GET /message`.
pub const MESSAGE_HTML: &str = include_str!("../../assets/message.html");

/// Body of every 404 response.
pub const NOT_FOUND_HTML: &str = include_str!("../../assets/error.html");

pub(crate) async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub(crate) async fn message_form() -> Html<&'static str> {
    Html(MESSAGE_HTML)
}

pub(crate) fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Html(NOT_FOUND_HTML)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_page_posts_a_form() {
        assert!(MESSAGE_HTML.contains("<form"));
        assert!(MESSAGE_HTML.contains("method=\"POST\""));
    }

    #[test]
    fn test_pages_are_distinct() {
        assert_ne!(INDEX_HTML, MESSAGE_HTML);
        assert_ne!(INDEX_HTML, NOT_FOUND_HTML);
    }

    #[test]
    fn test_not_found_status() {
        assert_eq!(not_found().status(), StatusCode::NOT_FOUND);
    }
}
