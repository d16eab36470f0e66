use askama::Template;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use crate::db::models::AlertType;
use crate::error::{AppError, AppResult};
use crate::extractors::Member;
use crate::routes::home::Html;
use crate::routes::view::{Flash, Nav, PostCard};
use crate::social::search;
use crate::state::AppState;

#[derive(Template)]
#[template(path = "pages/search.html")]
pub struct SearchTemplate {
    pub nav: Option<Nav>,
    pub flash: Flash,
    pub search_type: String,
    pub query: String,
    pub searched: bool,
    pub results: Vec<PostCard>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(rename = "type")]
    pub search_type: Option<String>,
    pub q: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/search", get(search_page))
}

async fn search_page(
    State(state): State<AppState>,
    member: Member,
    Query(query): Query<SearchQuery>,
    Query(mut flash): Query<Flash>,
) -> AppResult<Html<SearchTemplate>> {
    let search_type = query
        .search_type
        .as_deref()
        .and_then(AlertType::parse)
        .unwrap_or(AlertType::Name);
    let q = query.q.unwrap_or_default().trim().to_string();

    let conn = state.db.get()?;
    let mut results = Vec::new();
    let searched = !q.is_empty();

    if searched {
        match search::search_and_watch(&conn, member.id(), search_type, &q) {
            Ok(posts) => results = PostCard::list(posts, member.id()),
            Err(AppError::Validation(msg)) => flash.error = Some(msg),
            Err(e) => return Err(e),
        }
    }

    Ok(Html(SearchTemplate {
        nav: Some(Nav::for_member(&conn, &member)?),
        flash,
        search_type: search_type.as_str().to_string(),
        query: q,
        searched,
        results,
    }))
}
