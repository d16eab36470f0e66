use askama::Template;
use axum::extract::{Multipart, Path, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;

use crate::db::models::VoteType;
use crate::error::{AppError, AppResult};
use crate::extractors::Member;
use crate::routes::home::Html;
use crate::routes::multipart::MultipartForm;
use crate::routes::view::{redirect_with, Flash, Nav, PostCard};
use crate::social::comments::{self, CommentView};
use crate::social::posts::{self, NewPost, MAX_PHOTOS};
use crate::social::{alerts, votes};
use crate::state::AppState;
use crate::storage::{ObjectStore, StoredObject, POST_IMAGES};

// --- Templates ---

#[derive(Template)]
#[template(path = "pages/post_form.html")]
pub struct PostFormTemplate {
    pub nav: Option<Nav>,
    pub flash: Flash,
    pub max_photos: usize,
}

#[derive(Template)]
#[template(path = "pages/post_detail.html")]
pub struct PostDetailTemplate {
    pub nav: Option<Nav>,
    pub flash: Flash,
    pub post: PostCard,
    pub comments: Vec<CommentView>,
    pub max_comment_chars: usize,
}

// --- Forms ---

#[derive(Deserialize)]
pub struct VoteForm {
    pub vote_type: String,
    /// Page to come back to; only known pages are honoured.
    pub return_to: Option<String>,
}

#[derive(Deserialize)]
pub struct CommentForm {
    pub content: String,
}

// --- Router ---

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/post", get(new_post_page).post(create_post))
        .route("/post/{id}", get(post_page))
        .route("/post/{id}/delete", post(delete_post))
        .route("/post/{id}/vote", post(vote))
        .route("/post/{id}/comments", post(create_comment))
}

// --- Handlers ---

async fn new_post_page(
    State(state): State<AppState>,
    member: Member,
    Query(flash): Query<Flash>,
) -> AppResult<Html<PostFormTemplate>> {
    let conn = state.db.get()?;
    Ok(Html(PostFormTemplate {
        nav: Some(Nav::for_member(&conn, &member)?),
        flash,
        max_photos: MAX_PHOTOS,
    }))
}

async fn create_post(
    State(state): State<AppState>,
    member: Member,
    multipart: Multipart,
) -> AppResult<Response> {
    let mut form = MultipartForm::read(multipart).await?;

    let new_post = NewPost {
        subject_name: form.text("subject_name").unwrap_or_default().to_string(),
        subject_age: form.text("subject_age").unwrap_or_default().to_string(),
        city: form.text("city").unwrap_or_default().to_string(),
        state: form.text("state").unwrap_or_default().to_string(),
        phone_number: form.non_empty("phone_number"),
        caption: form.text("caption").unwrap_or_default().to_string(),
    };
    let valid = match new_post.validate() {
        Ok(valid) => valid,
        Err(AppError::Validation(msg)) => {
            return Ok(redirect_with("/post", "error", &msg).into_response());
        }
        Err(e) => return Err(e),
    };

    let photos = form.take_files("photos");
    if photos.len() > MAX_PHOTOS {
        let msg = format!("You can attach at most {} photos", MAX_PHOTOS);
        return Ok(redirect_with("/post", "error", &msg).into_response());
    }

    let mut stored = Vec::with_capacity(photos.len());
    for photo in &photos {
        match state
            .storage
            .upload(
                POST_IMAGES,
                member.id(),
                &photo.file_name,
                &photo.content_type,
                &photo.bytes,
            )
            .await
        {
            Ok(object) => stored.push(object),
            Err(e) => {
                discard_uploads(&state.storage, &stored).await;
                if e.is_client_error() {
                    let msg = format!("{}: {}", photo.file_name, e);
                    return Ok(redirect_with("/post", "error", &msg).into_response());
                }
                return Err(e.into());
            }
        }
    }

    let urls: Vec<String> = stored.iter().map(|object| object.url.clone()).collect();
    let inserted = state.db.get().map_err(AppError::from).and_then(|conn| {
        let post = posts::insert(&conn, member.id(), &valid, &urls)?;
        Ok((conn, post))
    });
    let (conn, post) = match inserted {
        Ok(inserted) => inserted,
        Err(e) => {
            discard_uploads(&state.storage, &stored).await;
            return Err(e);
        }
    };
    tracing::info!("{} created post {}", member.id(), post.id);

    if let Err(e) = alerts::notify_matches(&conn, &post) {
        tracing::warn!("Alert matching for post {} failed: {}", post.id, e);
    }

    Ok(redirect_with(&format!("/post/{}", post.id), "success", "Post created").into_response())
}

/// Remove photos stored for a post that was never created.
async fn discard_uploads(storage: &ObjectStore, stored: &[StoredObject]) {
    for object in stored {
        if let Err(e) = storage.remove(&object.bucket, &object.path).await {
            tracing::warn!(
                "Orphaned upload {}/{} left behind: {}",
                object.bucket,
                object.path,
                e
            );
        }
    }
}

async fn post_page(
    State(state): State<AppState>,
    member: Member,
    Path(id): Path<String>,
    Query(flash): Query<Flash>,
) -> AppResult<Html<PostDetailTemplate>> {
    let conn = state.db.get()?;
    let post = posts::find(&conn, &id)?.ok_or(AppError::NotFound)?;
    let my_vote = votes::current(&conn, &id, member.id())?;
    let comments = comments::for_post(&conn, &id)?;

    Ok(Html(PostDetailTemplate {
        nav: Some(Nav::for_member(&conn, &member)?),
        flash,
        post: PostCard::new(post, member.id(), my_vote),
        comments,
        max_comment_chars: comments::MAX_COMMENT_CHARS,
    }))
}

/// Owners delete their own posts here; admins use the admin action.
async fn delete_post(
    State(state): State<AppState>,
    member: Member,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let owner_id = {
        let conn = state.db.get()?;
        posts::find(&conn, &id)?
            .ok_or(AppError::NotFound)?
            .user_id
    };

    if owner_id != member.id() {
        return Err(AppError::Forbidden);
    }

    state.moderation.users().delete_post_cascade(&id).await?;
    tracing::info!("{} deleted own post {}", member.id(), id);

    Ok(redirect_with("/profile", "success", "Post deleted").into_response())
}

fn vote_return_path(return_to: Option<&str>, post_id: &str) -> String {
    match return_to {
        Some("/swipe") => "/swipe".to_string(),
        Some("/feed") => "/feed".to_string(),
        _ => format!("/post/{}", post_id),
    }
}

async fn vote(
    State(state): State<AppState>,
    member: Member,
    Path(id): Path<String>,
    Form(form): Form<VoteForm>,
) -> AppResult<Response> {
    let vote_type = VoteType::parse(&form.vote_type)
        .ok_or_else(|| AppError::BadRequest("vote_type must be green or red".into()))?;

    let outcome = {
        let conn = state.db.get()?;
        votes::cast(&conn, &id, member.id(), vote_type)?
    };
    tracing::debug!("{} voted {} on {}: {:?}", member.id(), vote_type.as_str(), id, outcome);

    Ok(Redirect::to(&vote_return_path(form.return_to.as_deref(), &id)).into_response())
}

async fn create_comment(
    State(state): State<AppState>,
    member: Member,
    Path(id): Path<String>,
    Form(form): Form<CommentForm>,
) -> AppResult<Response> {
    let back = format!("/post/{}", id);
    let conn = state.db.get()?;
    match comments::add(&conn, &id, member.id(), &form.content) {
        Ok(_) => Ok(Redirect::to(&format!("{}#comments", back)).into_response()),
        Err(AppError::Validation(msg)) => Ok(redirect_with(&back, "error", &msg).into_response()),
        Err(e) => Err(e),
    }
}
