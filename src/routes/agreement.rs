use askama::Template;
use axum::extract::{Multipart, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::extractors::SignedIn;
use crate::moderation::domain::{ModerationState, RouteTarget};
use crate::moderation::service::AgreementSubmission;
use crate::routes::home::Html;
use crate::routes::multipart::MultipartForm;
use crate::routes::view::{redirect_with, Flash, Nav};
use crate::state::AppState;
use crate::storage::{self, SignedUpload, StorageError, VERIFICATION_PHOTOS};

#[derive(Template)]
#[template(path = "pages/agreement.html")]
pub struct AgreementTemplate {
    pub nav: Option<Nav>,
    pub flash: Flash,
    pub email: String,
    pub full_name: String,
    pub display_name: String,
}

#[derive(Template)]
#[template(path = "pages/pending.html")]
pub struct PendingTemplate {
    pub nav: Option<Nav>,
    pub flash: Flash,
    pub email: String,
    pub rejected: bool,
}

#[derive(Deserialize)]
pub struct SignedUploadRequest {
    pub file_name: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/agreement", get(agreement_page).post(submit_agreement))
        .route("/agreement/signed-upload", post(signed_upload))
        .route("/pending", get(pending_page))
}

/// Redirect for users who do not belong on an onboarding page.
fn elsewhere(state: ModerationState, here: ModerationState, email: &str) -> Option<Redirect> {
    if state == here {
        return None;
    }
    match state.redirect() {
        Some(target) => Some(Redirect::to(&target.path(Some(email)))),
        None => Some(Redirect::to("/feed")),
    }
}

async fn agreement_page(
    State(state): State<AppState>,
    SignedIn(identity): SignedIn,
    Query(flash): Query<Flash>,
) -> AppResult<Response> {
    let user = state.moderation.ensure_profile(&identity).await?;
    let current = ModerationState::of(Some(&user));
    if let Some(redirect) = elsewhere(current, ModerationState::AgreementPending, &identity.email) {
        return Ok(redirect.into_response());
    }

    Ok(Html(AgreementTemplate {
        nav: None,
        flash,
        email: identity.email,
        full_name: user.full_name.unwrap_or_default(),
        display_name: user.display_name.unwrap_or_default(),
    })
    .into_response())
}

/// POST /agreement: validate, store the photo, then record the agreement.
async fn submit_agreement(
    State(state): State<AppState>,
    SignedIn(identity): SignedIn,
    multipart: Multipart,
) -> AppResult<Response> {
    let user = state.moderation.ensure_profile(&identity).await?;
    let current = ModerationState::of(Some(&user));
    if let Some(redirect) = elsewhere(current, ModerationState::AgreementPending, &identity.email) {
        tracing::warn!("{} submitted the agreement while {:?}", identity.id, current);
        return Ok(redirect.into_response());
    }

    let mut form = MultipartForm::read(multipart).await?;
    let back = RouteTarget::Agreement.path(Some(&identity.email));

    let Some(full_name) = form.non_empty("full_name") else {
        return Ok(redirect_with(&back, "error", "Please enter your full name").into_response());
    };
    if full_name.chars().count() > 100 {
        return Ok(
            redirect_with(&back, "error", "Full name must be at most 100 characters").into_response(),
        );
    }
    if !form.checked("agree") {
        return Ok(redirect_with(&back, "error", "You must accept the community terms").into_response());
    }

    // Either a direct file upload or a camera capture already PUT through a
    // signed upload URL
    let photo_url = if let Some(photo) = form.take_file("verification_photo") {
        match state
            .storage
            .upload(
                VERIFICATION_PHOTOS,
                &identity.id,
                &photo.file_name,
                &photo.content_type,
                &photo.bytes,
            )
            .await
        {
            Ok(stored) => stored.url,
            Err(e) if e.is_client_error() => {
                return Ok(redirect_with(&back, "error", &e.to_string()).into_response());
            }
            Err(e) => return Err(e.into()),
        }
    } else if let Some(path) = form.non_empty("photo_path") {
        if !path.starts_with(&format!("{}/", identity.id)) {
            return Err(AppError::Forbidden);
        }
        match state.storage.read(VERIFICATION_PHOTOS, &path).await {
            Ok(_) => storage::public_url(VERIFICATION_PHOTOS, &path),
            Err(StorageError::NotFound) => {
                return Ok(
                    redirect_with(&back, "error", "The captured photo was not uploaded").into_response(),
                );
            }
            Err(e) => return Err(e.into()),
        }
    } else {
        return Ok(redirect_with(&back, "error", "Please add a verification photo").into_response());
    };

    state
        .moderation
        .complete_agreement(
            &identity,
            AgreementSubmission {
                full_name,
                display_name: form.non_empty("display_name"),
                verification_photo_url: photo_url,
            },
        )
        .await?;

    let pending = RouteTarget::Pending.path(Some(&identity.email));
    Ok(redirect_with(
        &pending,
        "success",
        "Thanks! Your verification was submitted and is awaiting review.",
    )
    .into_response())
}

/// POST /agreement/signed-upload issues a one-time PUT URL for a camera capture.
async fn signed_upload(
    State(state): State<AppState>,
    SignedIn(identity): SignedIn,
    Json(req): Json<SignedUploadRequest>,
) -> AppResult<Json<SignedUpload>> {
    let user = state.moderation.ensure_profile(&identity).await?;
    if ModerationState::of(Some(&user)) != ModerationState::AgreementPending {
        return Err(AppError::Forbidden);
    }
    let file_name = req.file_name.unwrap_or_else(|| "capture.jpg".to_string());
    let mut tokens = state.upload_tokens.lock().await;
    let signed = state.storage.create_signed_upload(
        &mut tokens,
        VERIFICATION_PHOTOS,
        &identity.id,
        &file_name,
    )?;
    Ok(Json(signed))
}

async fn pending_page(
    State(state): State<AppState>,
    SignedIn(identity): SignedIn,
    Query(flash): Query<Flash>,
) -> AppResult<Response> {
    let user = state.moderation.ensure_profile(&identity).await?;
    let current = ModerationState::of(Some(&user));

    let rejected = current == ModerationState::Rejected;
    if !rejected {
        if let Some(redirect) = elsewhere(current, ModerationState::ApprovalPending, &identity.email) {
            return Ok(redirect.into_response());
        }
    }

    Ok(Html(PendingTemplate {
        nav: None,
        flash,
        email: identity.email,
        rejected,
    })
    .into_response())
}
