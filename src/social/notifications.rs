use rusqlite::{params, Connection, Row};
use serde::Serialize;

use crate::db::models::Notification;

/// The `type` column of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Vote,
    Comment,
    Alert,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vote => "vote",
            Self::Comment => "comment",
            Self::Alert => "alert",
        }
    }
}

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, title, message, type, related_post_id, is_read, created_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        message: row.get(3)?,
        kind: row.get(4)?,
        related_post_id: row.get(5)?,
        is_read: row.get(6)?,
        created_at: row.get(7)?,
    })
}

pub fn notify(
    conn: &Connection,
    recipient_id: &str,
    kind: NotificationKind,
    title: &str,
    message: &str,
    related_post_id: Option<&str>,
) -> rusqlite::Result<String> {
    let id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO notifications (id, user_id, title, message, type, related_post_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, recipient_id, title, message, kind.as_str(), related_post_id],
    )?;
    Ok(id)
}

/// Newest first.
pub fn list(conn: &Connection, user_id: &str, limit: usize) -> rusqlite::Result<Vec<Notification>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM notifications WHERE user_id = ?1
         ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        NOTIFICATION_COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![user_id, limit as i64], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn unread_count(conn: &Connection, user_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
        params![user_id],
        |row| row.get(0),
    )
}

/// Only the recipient can mark a notification. Returns false otherwise.
pub fn mark_read(conn: &Connection, user_id: &str, notification_id: &str) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
        params![notification_id, user_id],
    )?;
    Ok(rows > 0)
}

pub fn mark_all_read(conn: &Connection, user_id: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0",
        params![user_id],
    )
}
