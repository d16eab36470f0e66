use askama::Template;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{AppendHeaders, IntoResponse, Redirect, Response};
use axum::Form;
use serde::Deserialize;

use crate::auth::identity::{Identity, IdentityError};
use crate::auth::session;
use crate::error::{AppError, AppResult};
use crate::extractors::MaybeIdentity;
use crate::routes::home::Html;
use crate::routes::view::{redirect_with, Flash, Nav};
use crate::state::AppState;

// -- Templates --

#[derive(Template)]
#[template(path = "pages/login.html")]
pub struct LoginTemplate {
    pub nav: Option<Nav>,
    pub flash: Flash,
}

#[derive(Template)]
#[template(path = "pages/signup.html")]
pub struct SignupTemplate {
    pub nav: Option<Nav>,
    pub flash: Flash,
    pub min_password_len: usize,
}

// -- Request types --

#[derive(Deserialize)]
pub struct CredentialsForm {
    pub email: String,
    pub password: String,
}

// -- Helpers --

fn start_session(state: &AppState, identity: &Identity) -> AppResult<Response> {
    let token = session::create_session(&state.db, &identity.id, state.config.auth.session_hours)?;
    let cookie = session::session_cookie(
        &state.config.auth.cookie_name,
        &token,
        state.config.auth.session_hours,
    );

    // The guard decides where a fresh session belongs
    Ok((
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Redirect::to("/feed"),
    )
        .into_response())
}

fn identity_failure(page: &str, e: IdentityError) -> AppResult<Response> {
    if e.is_user_facing() {
        return Ok(redirect_with(page, "error", &e.to_string()).into_response());
    }
    tracing::error!("Identity provider failure: {}", e);
    Err(AppError::Internal(e.to_string()))
}

// -- Handlers --

/// GET /login
pub async fn login_page(
    MaybeIdentity(identity): MaybeIdentity,
    Query(flash): Query<Flash>,
) -> Response {
    if identity.is_some() {
        return Redirect::to("/feed").into_response();
    }
    Html(LoginTemplate { nav: None, flash }).into_response()
}

/// POST /login
pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<CredentialsForm>,
) -> AppResult<Response> {
    match state.identity.sign_in(&form.email, &form.password).await {
        Ok(identity) => {
            tracing::info!("{} signed in", identity.email);
            start_session(&state, &identity)
        }
        Err(e) => identity_failure("/login", e),
    }
}

/// GET /signup
pub async fn signup_page(
    State(state): State<AppState>,
    MaybeIdentity(identity): MaybeIdentity,
    Query(flash): Query<Flash>,
) -> Response {
    if identity.is_some() {
        return Redirect::to("/feed").into_response();
    }
    Html(SignupTemplate {
        nav: None,
        flash,
        min_password_len: state.config.auth.min_password_len,
    })
    .into_response()
}

/// POST /signup
pub async fn signup(
    State(state): State<AppState>,
    Form(form): Form<CredentialsForm>,
) -> AppResult<Response> {
    match state.identity.sign_up(&form.email, &form.password).await {
        Ok(identity) => start_session(&state, &identity),
        Err(e) => identity_failure("/signup", e),
    }
}

/// POST /logout
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    let cookie_name = &state.config.auth.cookie_name;
    if let Some(token) = session::cookie_value(&headers, cookie_name) {
        session::delete_session(&state.db, token)?;
    }

    Ok((
        AppendHeaders([(header::SET_COOKIE, session::clear_session_cookie(cookie_name))]),
        Redirect::to("/login"),
    )
        .into_response())
}
