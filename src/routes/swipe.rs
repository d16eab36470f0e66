use askama::Template;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::Router;

use crate::error::AppResult;
use crate::extractors::Member;
use crate::routes::home::Html;
use crate::routes::view::{Flash, Nav, PostCard};
use crate::social::posts;
use crate::state::AppState;

#[derive(Template)]
#[template(path = "pages/swipe.html")]
pub struct SwipeTemplate {
    pub nav: Option<Nav>,
    pub flash: Flash,
    pub post: Option<PostCard>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/swipe", get(swipe_page))
}

/// One unseen post at a time; voting posts back to `/post/{id}/vote` and
/// returns here.
async fn swipe_page(
    State(state): State<AppState>,
    member: Member,
    Query(flash): Query<Flash>,
) -> AppResult<Html<SwipeTemplate>> {
    let conn = state.db.get()?;
    let post = posts::next_unseen(&conn, member.id())?
        .map(|post| PostCard::new(post, member.id(), None));

    Ok(Html(SwipeTemplate {
        nav: Some(Nav::for_member(&conn, &member)?),
        flash,
        post,
    }))
}
