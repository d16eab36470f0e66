use askama::Template;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;

use crate::db::models::User;
use crate::error::{AppError, AppResult};
use crate::extractors::{Admin, MaybeIdentity};
use crate::moderation::domain::ModerationState;
use crate::moderation::service::{ActionOutcome, NOT_ADMIN};
use crate::routes::home::Html;
use crate::routes::view::{parse_and_format_time, Flash, Nav, PostCard};
use crate::social::posts;
use crate::state::AppState;

/// One row of the admin user table.
pub struct AdminUserRow {
    pub id: String,
    pub email: String,
    pub name: String,
    pub full_name: String,
    pub state: &'static str,
    pub verification_photo_url: Option<String>,
    pub is_admin: bool,
    pub is_approved: bool,
    pub is_rejected: bool,
    pub joined: String,
    pub is_self: bool,
}

impl AdminUserRow {
    fn new(user: &User, caller_id: &str) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            name: user.public_name().to_string(),
            full_name: user.full_name.clone().unwrap_or_default(),
            state: ModerationState::of(Some(user)).name(),
            verification_photo_url: user.verification_photo_url.clone(),
            is_admin: user.is_admin,
            is_approved: user.is_approved,
            is_rejected: user.is_rejected,
            joined: parse_and_format_time(&user.created_at),
            is_self: user.id == caller_id,
        }
    }
}

#[derive(Template)]
#[template(path = "pages/admin.html")]
pub struct AdminTemplate {
    pub nav: Option<Nav>,
    pub flash: Flash,
    pub pending: Vec<AdminUserRow>,
    pub users: Vec<AdminUserRow>,
    pub posts: Vec<PostCard>,
}

#[derive(Deserialize)]
pub struct ApproveForm {
    pub approve: bool,
}

#[derive(Deserialize)]
pub struct AdminFlagForm {
    pub is_admin: bool,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin", get(admin_page))
        .route("/admin/users/{id}/approve", post(approve_user))
        .route("/admin/users/{id}/reject", post(reject_user))
        .route("/admin/users/{id}/admin", post(set_admin))
        .route("/admin/users/{id}/delete", post(delete_user))
        .route("/admin/posts/{id}/delete", post(delete_post))
}

async fn admin_page(
    State(state): State<AppState>,
    Admin(member): Admin,
    Query(flash): Query<Flash>,
) -> AppResult<Html<AdminTemplate>> {
    let users = state
        .moderation
        .list_users(member.id())
        .await?
        .ok_or(AppError::Forbidden)?;

    let (pending, users): (Vec<_>, Vec<_>) = users
        .iter()
        .map(|user| AdminUserRow::new(user, member.id()))
        .partition(|row| row.state == ModerationState::ApprovalPending.name());

    let conn = state.db.get()?;
    let recent = posts::feed(&conn, 1)?;

    Ok(Html(AdminTemplate {
        nav: Some(Nav::for_member(&conn, &member)?),
        flash,
        pending,
        users,
        posts: PostCard::list(recent.posts, member.id()),
    }))
}

// Actions re-verify the caller inside the service, so they only need a session.

async fn approve_user(
    State(state): State<AppState>,
    MaybeIdentity(identity): MaybeIdentity,
    Path(id): Path<String>,
    Form(form): Form<ApproveForm>,
) -> Json<ActionOutcome> {
    let Some(caller) = identity else {
        return Json(ActionOutcome::fail(NOT_ADMIN));
    };
    Json(state.moderation.approve(&caller.id, &id, form.approve).await)
}

async fn reject_user(
    State(state): State<AppState>,
    MaybeIdentity(identity): MaybeIdentity,
    Path(id): Path<String>,
) -> Json<ActionOutcome> {
    let Some(caller) = identity else {
        return Json(ActionOutcome::fail(NOT_ADMIN));
    };
    Json(state.moderation.reject(&caller.id, &id).await)
}

async fn set_admin(
    State(state): State<AppState>,
    MaybeIdentity(identity): MaybeIdentity,
    Path(id): Path<String>,
    Form(form): Form<AdminFlagForm>,
) -> Json<ActionOutcome> {
    let Some(caller) = identity else {
        return Json(ActionOutcome::fail(NOT_ADMIN));
    };
    Json(state.moderation.set_admin(&caller.id, &id, form.is_admin).await)
}

async fn delete_user(
    State(state): State<AppState>,
    MaybeIdentity(identity): MaybeIdentity,
    Path(id): Path<String>,
) -> Json<ActionOutcome> {
    let Some(caller) = identity else {
        return Json(ActionOutcome::fail(NOT_ADMIN));
    };
    Json(state.moderation.delete_user(&caller.id, &id).await)
}

async fn delete_post(
    State(state): State<AppState>,
    MaybeIdentity(identity): MaybeIdentity,
    Path(id): Path<String>,
) -> Json<ActionOutcome> {
    let Some(caller) = identity else {
        return Json(ActionOutcome::fail(NOT_ADMIN));
    };
    Json(state.moderation.delete_post(&caller.id, &id).await)
}
