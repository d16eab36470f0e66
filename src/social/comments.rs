use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::db;
use crate::error::{AppError, AppResult};
use crate::social::notifications::{self, NotificationKind};

pub const MAX_COMMENT_CHARS: usize = 500;

/// A comment with its author's public name, for display.
#[derive(Debug, Clone, Serialize)]
pub struct CommentView {
    pub id: String,
    pub user_id: String,
    pub author_name: String,
    pub author_avatar: Option<String>,
    pub content: String,
    pub created_at: String,
}

/// Insert a comment and notify the post owner unless they wrote it.
pub fn add(conn: &Connection, post_id: &str, author_id: &str, content: &str) -> AppResult<String> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::Validation("Comment cannot be empty".into()));
    }
    if content.chars().count() > MAX_COMMENT_CHARS {
        return Err(AppError::Validation(format!(
            "Comment must be at most {} characters",
            MAX_COMMENT_CHARS
        )));
    }

    db::in_transaction(conn, |tx| {
        let post: Option<(String, String)> = tx
            .query_row(
                "SELECT user_id, subject_name FROM posts WHERE id = ?1",
                params![post_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (owner_id, subject_name) = post.ok_or(AppError::NotFound)?;

        let id = uuid::Uuid::now_v7().to_string();
        tx.execute(
            "INSERT INTO comments (id, post_id, user_id, content) VALUES (?1, ?2, ?3, ?4)",
            params![id, post_id, author_id, content],
        )?;

        if owner_id != author_id {
            let author_name: String = tx.query_row(
                "SELECT COALESCE(NULLIF(TRIM(display_name), ''), NULLIF(TRIM(full_name), ''), 'Someone')
                 FROM users WHERE id = ?1",
                params![author_id],
                |row| row.get(0),
            )?;
            notifications::notify(
                tx,
                &owner_id,
                NotificationKind::Comment,
                "💬 New Comment",
                &format!("{} commented on your post about {}", author_name, subject_name),
                Some(post_id),
            )?;
        }

        Ok(id)
    })
}

/// Oldest first, the way a thread reads.
pub fn for_post(conn: &Connection, post_id: &str) -> rusqlite::Result<Vec<CommentView>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.user_id,
                COALESCE(NULLIF(TRIM(u.display_name), ''), NULLIF(TRIM(u.full_name), ''), 'Someone'),
                u.avatar_url, c.content, c.created_at
         FROM comments c
         JOIN users u ON u.id = c.user_id
         WHERE c.post_id = ?1
         ORDER BY c.created_at ASC, c.rowid ASC",
    )?;
    let comments = stmt
        .query_map(params![post_id], |row| {
            Ok(CommentView {
                id: row.get(0)?,
                user_id: row.get(1)?,
                author_name: row.get(2)?,
                author_avatar: row.get(3)?,
                content: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(comments)
}
