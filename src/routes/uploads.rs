use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::extractors::MaybeIdentity;
use crate::state::AppState;
use crate::storage::{ImageType, StorageError};

const CAPTURE_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Serialize)]
pub struct UploadReceipt {
    pub path: String,
    pub url: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/uploads/signed/{token}", put(signed_put))
        .route("/uploads/{bucket}/{*path}", get(serve_object))
}

fn not_found(e: StorageError) -> AppError {
    match e {
        StorageError::NotFound | StorageError::UnknownBucket(_) | StorageError::InvalidPath(_) => {
            AppError::NotFound
        }
        other => other.into(),
    }
}

/// Objects are stored under `{owner}/...`.
fn owner_of(path: &str) -> &str {
    path.split('/').next().unwrap_or("")
}

/// Objects are only ever served as one of the accepted image types.
fn served_content_type(path: &str) -> &'static str {
    ImageType::from_path(path)
        .map(ImageType::mime)
        .unwrap_or("application/octet-stream")
}

async fn serve_object(
    State(state): State<AppState>,
    MaybeIdentity(identity): MaybeIdentity,
    Path((bucket, path)): Path<(String, String)>,
) -> AppResult<Response> {
    let public = state.storage.policy(&bucket).map_err(not_found)?.public;

    if !public {
        let Some(identity) = identity else {
            return Err(AppError::Unauthorized);
        };
        let allowed =
            owner_of(&path) == identity.id || state.moderation.verify_admin(&identity.id).await;
        if !allowed {
            tracing::warn!("{} denied private object {}/{}", identity.id, bucket, path);
            return Err(AppError::Forbidden);
        }
    }

    let bytes = state.storage.read(&bucket, &path).await.map_err(not_found)?;
    let content_type = served_content_type(&path);
    let cache = if public {
        "public, max-age=86400"
    } else {
        "private, no-store"
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, cache),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        bytes,
    )
        .into_response())
}

/// PUT the raw image bytes to a signed upload URL. The token is the only
/// credential and works once.
async fn signed_put(
    State(state): State<AppState>,
    Path(token): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<UploadReceipt>> {
    let pending = {
        let mut tokens = state.upload_tokens.lock().await;
        tokens.redeem(&token)
    };
    let pending =
        pending.ok_or_else(|| AppError::BadRequest("Upload link is invalid or expired".into()))?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(CAPTURE_CONTENT_TYPE);

    let stored = state
        .storage
        .put(&pending.bucket, &pending.path, content_type, &body)
        .await?;
    tracing::info!("{} uploaded {} via signed URL", pending.owner, stored.path);

    Ok(Json(UploadReceipt {
        path: stored.path,
        url: stored.url,
    }))
}
