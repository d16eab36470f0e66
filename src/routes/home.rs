use askama::Template;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};

use crate::extractors::MaybeIdentity;

/// Wrapper to render askama templates as axum responses
pub struct Html<T: Template>(pub T);

impl<T: Template> IntoResponse for Html<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!("Template render error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
            }
        }
    }
}

/// GET / sends signed-in users to the feed (the guard takes it from there)
/// and everyone else to login.
pub async fn index(MaybeIdentity(identity): MaybeIdentity) -> Response {
    if identity.is_some() {
        Redirect::to("/feed").into_response()
    } else {
        Redirect::to("/login").into_response()
    }
}
