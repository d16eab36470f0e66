pub mod admin;
pub mod agreement;
pub mod alerts;
pub mod api;
pub mod assets;
pub mod auth;
pub mod feed;
pub mod home;
pub mod multipart;
pub mod notifications;
pub mod posts;
pub mod profile;
pub mod search;
pub mod swipe;
pub mod uploads;
pub mod view;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// The full application router with state applied.
pub fn build_router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/", get(home::index))
        .route("/assets/{*path}", get(assets::serve))
        .merge(auth::router())
        .merge(agreement::router())
        .merge(feed::router())
        .merge(posts::router())
        .merge(swipe::router())
        .merge(search::router())
        .merge(alerts::router())
        .merge(notifications::router())
        .merge(profile::router())
        .merge(admin::router())
        .merge(api::router())
        .merge(uploads::router());

    if state.config.debug.endpoints {
        tracing::warn!("Debug endpoints are enabled under /api/debug");
        app = app.merge(api::debug_router());
    }

    app.layer(DefaultBodyLimit::max(state.config.max_body_bytes()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
