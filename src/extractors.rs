use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Redirect, Response};

use crate::auth::identity::Identity;
use crate::auth::session;
use crate::db::models::User;
use crate::error::AppError;
use crate::moderation::domain::{Capabilities, Capability};
use crate::moderation::service::GuardOutcome;
use crate::state::AppState;

/// Why a guarded extractor refused the request.
#[derive(Debug)]
pub enum GuardRejection {
    Redirect(String),
    Error(AppError),
}

impl IntoResponse for GuardRejection {
    fn into_response(self) -> Response {
        match self {
            GuardRejection::Redirect(to) => Redirect::to(&to).into_response(),
            GuardRejection::Error(e) => e.into_response(),
        }
    }
}

impl From<AppError> for GuardRejection {
    fn from(e: AppError) -> Self {
        GuardRejection::Error(e)
    }
}

/// Resolve the session cookie to an account. Lookup failures count as
/// signed out.
fn session_identity(parts: &Parts, state: &AppState) -> Option<Identity> {
    let token = session::cookie_value(&parts.headers, &state.config.auth.cookie_name)?;
    match session::lookup_session(&state.db, token) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!("Session lookup failed: {}", e);
            None
        }
    }
}

/// Optional account extractor, never rejects.
pub struct MaybeIdentity(pub Option<Identity>);

impl FromRequestParts<AppState> for MaybeIdentity {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(MaybeIdentity(session_identity(parts, state)))
    }
}

/// Any valid session, whatever the moderation state. Used by the onboarding
/// pages themselves.
#[derive(Debug, Clone)]
pub struct SignedIn(pub Identity);

impl FromRequestParts<AppState> for SignedIn {
    type Rejection = GuardRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        session_identity(parts, state)
            .map(SignedIn)
            .ok_or_else(|| GuardRejection::Redirect("/login".to_string()))
    }
}

/// An approved member. Runs the moderation guard; anyone else is redirected
/// to login, the agreement, or the pending page.
#[derive(Debug, Clone)]
pub struct Member {
    pub identity: Identity,
    pub user: User,
}

impl Member {
    pub fn id(&self) -> &str {
        &self.user.id
    }

    pub fn is_admin(&self) -> bool {
        Capabilities::for_user(Some(&self.user)).allows(Capability::Moderate)
    }
}

impl FromRequestParts<AppState> for Member {
    type Rejection = GuardRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let identity = session_identity(parts, state);

        match state.moderation.guard(identity.as_ref()).await {
            GuardOutcome::Admit(user) => match identity {
                Some(identity) => Ok(Member { identity, user }),
                None => Err(GuardRejection::Redirect("/login".to_string())),
            },
            GuardOutcome::Redirect(to) => Err(GuardRejection::Redirect(to)),
        }
    }
}

/// An approved admin. Members without moderation rights go back to the feed.
#[derive(Debug, Clone)]
pub struct Admin(pub Member);

impl FromRequestParts<AppState> for Admin {
    type Rejection = GuardRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let member = Member::from_request_parts(parts, state).await?;
        if !member.is_admin() {
            tracing::warn!("Non-admin {} tried to open the admin dashboard", member.id());
            return Err(GuardRejection::Redirect(
                "/feed?error=Admin+access+required".to_string(),
            ));
        }
        Ok(Admin(member))
    }
}
