use askama::Template;
use axum::extract::{Multipart, Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::error::{AppError, AppResult};
use crate::extractors::Member;
use crate::moderation::repository::ProfileUpdate;
use crate::routes::home::Html;
use crate::routes::multipart::MultipartForm;
use crate::routes::view::{redirect_with, Flash, Nav, PostCard, ProfileView};
use crate::social::posts;
use crate::state::AppState;
use crate::storage::AVATARS;

const MAX_NAME_CHARS: usize = 100;

#[derive(Template)]
#[template(path = "pages/profile.html")]
pub struct ProfileTemplate {
    pub nav: Option<Nav>,
    pub flash: Flash,
    pub profile: ProfileView,
    pub posts: Vec<PostCard>,
    pub is_self: bool,
}

#[derive(Template)]
#[template(path = "pages/profile_edit.html")]
pub struct ProfileEditTemplate {
    pub nav: Option<Nav>,
    pub flash: Flash,
    pub profile: ProfileView,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/profile", get(own_profile))
        .route("/profile/edit", get(edit_page).post(save_profile))
        .route("/user/{id}", get(user_profile))
}

async fn own_profile(
    State(state): State<AppState>,
    member: Member,
    Query(flash): Query<Flash>,
) -> AppResult<Html<ProfileTemplate>> {
    let conn = state.db.get()?;
    let posts = posts::by_author(&conn, member.id())?;

    Ok(Html(ProfileTemplate {
        nav: Some(Nav::for_member(&conn, &member)?),
        flash,
        profile: ProfileView::from(&member.user),
        posts: PostCard::list(posts, member.id()),
        is_self: true,
    }))
}

async fn user_profile(
    State(state): State<AppState>,
    member: Member,
    Path(id): Path<String>,
    Query(flash): Query<Flash>,
) -> AppResult<Html<ProfileTemplate>> {
    let user = state
        .moderation
        .users()
        .find(&id)
        .await?
        .ok_or(AppError::NotFound)?;

    let conn = state.db.get()?;
    let posts = posts::by_author(&conn, &user.id)?;

    Ok(Html(ProfileTemplate {
        nav: Some(Nav::for_member(&conn, &member)?),
        flash,
        is_self: user.id == member.id(),
        profile: ProfileView::from(&user),
        posts: PostCard::list(posts, member.id()),
    }))
}

async fn edit_page(
    State(state): State<AppState>,
    member: Member,
    Query(flash): Query<Flash>,
) -> AppResult<Html<ProfileEditTemplate>> {
    let conn = state.db.get()?;
    Ok(Html(ProfileEditTemplate {
        nav: Some(Nav::for_member(&conn, &member)?),
        flash,
        profile: ProfileView::from(&member.user),
    }))
}

fn too_long(value: &Option<String>) -> bool {
    value
        .as_deref()
        .is_some_and(|v| v.chars().count() > MAX_NAME_CHARS)
}

async fn save_profile(
    State(state): State<AppState>,
    member: Member,
    multipart: Multipart,
) -> AppResult<Response> {
    let mut form = MultipartForm::read(multipart).await?;

    let mut update = ProfileUpdate {
        display_name: form.non_empty("display_name"),
        full_name: form.non_empty("full_name"),
        phone_number: form.non_empty("phone_number"),
        avatar_url: None,
    };
    if too_long(&update.display_name) || too_long(&update.full_name) {
        let msg = format!("Names must be at most {} characters", MAX_NAME_CHARS);
        return Ok(redirect_with("/profile/edit", "error", &msg).into_response());
    }

    if let Some(avatar) = form.take_file("avatar") {
        match state
            .storage
            .upload(
                AVATARS,
                member.id(),
                &avatar.file_name,
                &avatar.content_type,
                &avatar.bytes,
            )
            .await
        {
            Ok(stored) => update.avatar_url = Some(stored.url),
            Err(e) if e.is_client_error() => {
                let msg = format!("Avatar: {}", e);
                return Ok(redirect_with("/profile/edit", "error", &msg).into_response());
            }
            Err(e) => return Err(e.into()),
        }
    }

    state
        .moderation
        .users()
        .update_profile(member.id(), &update)
        .await?;
    tracing::info!("{} updated their profile", member.id());

    Ok(redirect_with("/profile", "success", "Profile updated").into_response())
}
