use askama::Template;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;

use crate::db::models::{Alert, AlertType};
use crate::error::{AppError, AppResult};
use crate::extractors::Member;
use crate::routes::home::Html;
use crate::routes::view::{redirect_with, Flash, Nav};
use crate::social::alerts;
use crate::state::AppState;

#[derive(Template)]
#[template(path = "pages/alerts.html")]
pub struct AlertsTemplate {
    pub nav: Option<Nav>,
    pub flash: Flash,
    pub alerts: Vec<Alert>,
}

#[derive(Deserialize)]
pub struct AlertForm {
    pub alert_type: String,
    pub alert_term: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/alerts", get(alerts_page).post(create_alert))
        .route("/alerts/{id}/delete", post(delete_alert))
}

async fn alerts_page(
    State(state): State<AppState>,
    member: Member,
    Query(flash): Query<Flash>,
) -> AppResult<Html<AlertsTemplate>> {
    let conn = state.db.get()?;
    Ok(Html(AlertsTemplate {
        nav: Some(Nav::for_member(&conn, &member)?),
        flash,
        alerts: alerts::list(&conn, member.id())?,
    }))
}

async fn create_alert(
    State(state): State<AppState>,
    member: Member,
    Form(form): Form<AlertForm>,
) -> AppResult<Response> {
    let Some(alert_type) = AlertType::parse(&form.alert_type) else {
        return Ok(redirect_with("/alerts", "error", "Choose name, location or phone").into_response());
    };

    let conn = state.db.get()?;
    let redirect = match alerts::create(&conn, member.id(), alert_type, &form.alert_term) {
        Ok(true) => redirect_with("/alerts", "success", "Alert created"),
        Ok(false) => redirect_with("/alerts", "success", "You already have that alert"),
        Err(AppError::Validation(msg)) => redirect_with("/alerts", "error", &msg),
        Err(e) => return Err(e),
    };
    Ok(redirect.into_response())
}

async fn delete_alert(
    State(state): State<AppState>,
    member: Member,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let conn = state.db.get()?;
    if !alerts::delete(&conn, member.id(), &id)? {
        return Err(AppError::NotFound);
    }
    Ok(redirect_with("/alerts", "success", "Alert deleted").into_response())
}
