use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::auth::identity::Identity;
use crate::db::models::User;
use crate::error::{AppError, AppResult};
use crate::extractors::MaybeIdentity;
use crate::moderation::domain::{Capabilities, Capability, ModerationState};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/admin/users", get(list_users))
}

/// Development-only diagnostics. Mounted when `debug.endpoints` is set.
pub fn debug_router() -> Router<AppState> {
    Router::new().route("/api/debug/session", get(debug_session))
}

async fn list_users(
    State(state): State<AppState>,
    MaybeIdentity(identity): MaybeIdentity,
) -> AppResult<Json<Vec<User>>> {
    let caller = identity.ok_or(AppError::Unauthorized)?;
    let users = state
        .moderation
        .list_users(&caller.id)
        .await?
        .ok_or(AppError::Forbidden)?;
    Ok(Json(users))
}

#[derive(Serialize)]
pub struct SessionReport {
    pub signed_in: bool,
    pub identity: Option<Identity>,
    pub state: Option<ModerationState>,
    pub user: Option<User>,
    pub capabilities: Vec<Capability>,
}

/// Read-only: never creates a profile.
async fn debug_session(
    State(state): State<AppState>,
    MaybeIdentity(identity): MaybeIdentity,
) -> AppResult<Json<SessionReport>> {
    let Some(identity) = identity else {
        return Ok(Json(SessionReport {
            signed_in: false,
            identity: None,
            state: None,
            user: None,
            capabilities: Vec::new(),
        }));
    };

    let user = state.moderation.users().find(&identity.id).await?;
    let capabilities = Capabilities::for_user(user.as_ref())
        .iter()
        .copied()
        .collect();

    Ok(Json(SessionReport {
        signed_in: true,
        state: Some(ModerationState::of(user.as_ref())),
        identity: Some(identity),
        user,
        capabilities,
    }))
}
