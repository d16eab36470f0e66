use axum::http::{header, HeaderMap};
use rand::Rng;
use rusqlite::{params, OptionalExtension};

use crate::auth::identity::Identity;
use crate::state::DbPool;

fn pool_error(e: r2d2::Error) -> rusqlite::Error {
    rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
        Some(e.to_string()),
    )
}

/// Create a new session for an account. Returns the session token.
pub fn create_session(
    pool: &DbPool,
    account_id: &str,
    hours: u64,
) -> Result<String, rusqlite::Error> {
    let conn = pool.get().map_err(pool_error)?;

    let token = generate_token();
    let id = uuid::Uuid::now_v7().to_string();

    conn.execute(
        "INSERT INTO sessions (id, account_id, token, expires_at) VALUES (?1, ?2, ?3, datetime('now', ?4))",
        params![id, account_id, token, format!("+{} hours", hours)],
    )?;

    Ok(token)
}

/// Resolve a live session token to its account.
pub fn lookup_session(pool: &DbPool, token: &str) -> Result<Option<Identity>, rusqlite::Error> {
    let conn = pool.get().map_err(pool_error)?;

    conn.query_row(
        "SELECT a.id, a.email FROM sessions s \
         JOIN accounts a ON a.id = s.account_id \
         WHERE s.token = ?1 AND s.expires_at > datetime('now')",
        params![token],
        |row| {
            Ok(Identity {
                id: row.get(0)?,
                email: row.get(1)?,
            })
        },
    )
    .optional()
}

/// Delete a session by token.
pub fn delete_session(pool: &DbPool, token: &str) -> Result<(), rusqlite::Error> {
    let conn = pool.get().map_err(pool_error)?;

    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

// -- Cookie helpers --

pub fn session_cookie(name: &str, token: &str, max_age_hours: u64) -> String {
    let max_age_secs = max_age_hours * 3600;
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
        name, token, max_age_secs
    )
}

pub fn clear_session_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0", name)
}

pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let mut split = cookie.splitn(2, '=');
            let key = split.next()?.trim();
            let val = split.next()?.trim();
            if key == name && !val.is_empty() {
                Some(val)
            } else {
                None
            }
        })
}

/// Generate a cryptographically random 32-byte hex token.
pub(crate) fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    hex::encode(bytes)
}
