use std::convert::Infallible;
use std::time::Duration;

use askama::Template;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::stream::{self, Stream};

use crate::db::models::Notification;
use crate::error::{AppError, AppResult};
use crate::extractors::Member;
use crate::moderation::domain::Capability;
use crate::routes::home::Html;
use crate::routes::view::{parse_and_format_time, Flash, Nav};
use crate::social::notifications;
use crate::state::AppState;

const PAGE_LIMIT: usize = 50;
const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct NotificationView {
    pub id: String,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: String,
    pub link: Option<String>,
}

impl From<Notification> for NotificationView {
    fn from(n: Notification) -> Self {
        Self {
            link: n.related_post_id.map(|id| format!("/post/{}", id)),
            created_at: parse_and_format_time(&n.created_at),
            id: n.id,
            title: n.title,
            message: n.message,
            is_read: n.is_read,
        }
    }
}

#[derive(Template)]
#[template(path = "pages/notifications.html")]
pub struct NotificationsTemplate {
    pub nav: Option<Nav>,
    pub flash: Flash,
    pub notifications: Vec<NotificationView>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(notifications_page))
        .route("/notifications/read-all", post(mark_all_read))
        .route("/notifications/stream", get(unread_events))
        .route("/notifications/{id}/read", post(mark_read))
}

async fn notifications_page(
    State(state): State<AppState>,
    member: Member,
    Query(flash): Query<Flash>,
) -> AppResult<Html<NotificationsTemplate>> {
    let conn = state.db.get()?;
    let notifications = notifications::list(&conn, member.id(), PAGE_LIMIT)?
        .into_iter()
        .map(NotificationView::from)
        .collect();

    Ok(Html(NotificationsTemplate {
        nav: Some(Nav::for_member(&conn, &member)?),
        flash,
        notifications,
    }))
}

/// Marks one notification read and follows its link when it has one.
async fn mark_read(
    State(state): State<AppState>,
    member: Member,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    if !notifications::mark_read(&conn, member.id(), &id)? {
        return Err(AppError::NotFound);
    }

    let related: Option<String> = conn
        .query_row(
            "SELECT related_post_id FROM notifications WHERE id = ?1",
            [&id],
            |row| row.get(0),
        )
        .unwrap_or(None);

    let to = related
        .map(|post_id| format!("/post/{}", post_id))
        .unwrap_or_else(|| "/notifications".to_string());
    Ok(Redirect::to(&to).into_response())
}

async fn mark_all_read(State(state): State<AppState>, member: Member) -> AppResult<Response> {
    let conn = state.db.get()?;
    let marked = notifications::mark_all_read(&conn, member.id())?;
    tracing::debug!("{} marked {} notifications read", member.id(), marked);
    Ok(Redirect::to("/notifications").into_response())
}

/// SSE stream of the unread count. Emits `unread` whenever the count changes
/// and ends once the member loses access.
async fn unread_events(
    State(state): State<AppState>,
    member: Member,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let user_id = member.id().to_string();

    let stream = stream::unfold(
        (state, user_id, None::<i64>),
        move |(state, user_id, last)| async move {
            if !state
                .moderation
                .verify(&user_id, Capability::ReadNotifications)
                .await
            {
                tracing::info!("Closing unread stream for {}", user_id);
                return None;
            }

            let current = state
                .db
                .get()
                .ok()
                .and_then(|conn| notifications::unread_count(&conn, &user_id).ok());

            if let Some(count) = current {
                if Some(count) != last {
                    let event = Event::default().event("unread").data(count.to_string());
                    return Some((Ok(event), (state, user_id, Some(count))));
                }
            }

            tokio::time::sleep(POLL_INTERVAL).await;

            let event = Event::default().comment("keep-alive");
            Some((Ok(event), (state, user_id, last)))
        },
    );

    Sse::new(stream).keep_alive(KeepAlive::default())
}
