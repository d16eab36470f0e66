use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::db;
use crate::db::models::VoteType;
use crate::error::{AppError, AppResult};
use crate::social::notifications::{self, NotificationKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteOutcome {
    Created,
    /// Existing vote switched to the other type
    Changed,
    /// Same type again: the vote is withdrawn
    Removed,
}

/// Toggle a vote: first vote inserts, same type deletes, other type updates.
/// A new vote on someone else's post notifies its owner.
pub fn cast(
    conn: &Connection,
    post_id: &str,
    voter_id: &str,
    vote_type: VoteType,
) -> AppResult<VoteOutcome> {
    db::in_transaction(conn, |tx| {
        let post: Option<(String, String)> = tx
            .query_row(
                "SELECT user_id, subject_name FROM posts WHERE id = ?1",
                params![post_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (owner_id, subject_name) = post.ok_or(AppError::NotFound)?;

        let existing: Option<(String, String)> = tx
            .query_row(
                "SELECT id, vote_type FROM votes WHERE post_id = ?1 AND user_id = ?2",
                params![post_id, voter_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let outcome = match existing {
            Some((id, current)) if current == vote_type.as_str() => {
                tx.execute("DELETE FROM votes WHERE id = ?1", params![id])?;
                VoteOutcome::Removed
            }
            Some((id, _)) => {
                tx.execute(
                    "UPDATE votes SET vote_type = ?2 WHERE id = ?1",
                    params![id, vote_type.as_str()],
                )?;
                VoteOutcome::Changed
            }
            None => {
                tx.execute(
                    "INSERT INTO votes (id, post_id, user_id, vote_type) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        uuid::Uuid::now_v7().to_string(),
                        post_id,
                        voter_id,
                        vote_type.as_str()
                    ],
                )?;
                VoteOutcome::Created
            }
        };

        if outcome == VoteOutcome::Created && owner_id != voter_id {
            let voter_name: String = tx.query_row(
                "SELECT COALESCE(NULLIF(TRIM(display_name), ''), NULLIF(TRIM(full_name), ''), 'Someone')
                 FROM users WHERE id = ?1",
                params![voter_id],
                |row| row.get(0),
            )?;
            let (title, flag) = match vote_type {
                VoteType::Green => ("👍 New Green Flag", "green flag"),
                VoteType::Red => ("👎 New Red Flag", "red flag"),
            };
            notifications::notify(
                tx,
                &owner_id,
                NotificationKind::Vote,
                title,
                &format!(
                    "{} gave your post about {} a {}",
                    voter_name, subject_name, flag
                ),
                Some(post_id),
            )?;
        }

        Ok(outcome)
    })
}

pub fn current(conn: &Connection, post_id: &str, user_id: &str) -> rusqlite::Result<Option<VoteType>> {
    let vote: Option<String> = conn
        .query_row(
            "SELECT vote_type FROM votes WHERE post_id = ?1 AND user_id = ?2",
            params![post_id, user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(vote.as_deref().and_then(VoteType::parse))
}
