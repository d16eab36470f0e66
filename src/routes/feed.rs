use askama::Template;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use crate::error::AppResult;
use crate::extractors::Member;
use crate::routes::home::Html;
use crate::routes::view::{Flash, Nav, PostCard};
use crate::social::posts;
use crate::state::AppState;

#[derive(Template)]
#[template(path = "pages/feed.html")]
pub struct FeedTemplate {
    pub nav: Option<Nav>,
    pub flash: Flash,
    pub posts: Vec<PostCard>,
    pub page: i64,
    pub total_pages: i64,
}

#[derive(Deserialize)]
pub struct FeedQuery {
    pub page: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/feed", get(feed_page))
}

async fn feed_page(
    State(state): State<AppState>,
    member: Member,
    Query(query): Query<FeedQuery>,
    Query(flash): Query<Flash>,
) -> AppResult<Html<FeedTemplate>> {
    let conn = state.db.get()?;
    let page = posts::feed(&conn, query.page.unwrap_or(1))?;
    let nav = Nav::for_member(&conn, &member)?;

    Ok(Html(FeedTemplate {
        nav: Some(nav),
        flash,
        posts: PostCard::list(page.posts, member.id()),
        page: page.page,
        total_pages: page.total_pages,
    }))
}
