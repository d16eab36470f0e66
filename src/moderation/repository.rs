// Repository pattern - isolates all profile and cascade side effects
use async_trait::async_trait;
use rusqlite::{params, ErrorCode, OptionalExtension};
use std::sync::Arc;
use thiserror::Error;

use crate::db::models::{User, USER_COLUMNS};
use crate::db::{self};
use crate::moderation::domain::{AdminRepair, ApprovalFlags, InitialFlags};
use crate::retry::Transient;
use crate::state::DbPool;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl Transient for RepositoryError {
    /// Busy/locked databases and pool checkout timeouts clear up on their own.
    fn is_transient(&self) -> bool {
        match self {
            Self::Database(_) => true,
            Self::Sql(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Self-service profile fields. `None` clears the column.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub full_name: Option<String>,
    pub phone_number: Option<String>,
    /// Only replaced when a new avatar was uploaded.
    pub avatar_url: Option<String>,
}

/// What a user cascade removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub votes: usize,
    pub comments: usize,
    pub notifications: usize,
    pub alerts: usize,
    pub posts: usize,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<User>, RepositoryError>;

    /// Create the profile row if missing (keyed by account id) and return it.
    /// An existing row only has its email refreshed.
    async fn ensure_profile(
        &self,
        id: &str,
        email: &str,
        initial: InitialFlags,
    ) -> Result<User, RepositoryError>;

    async fn complete_agreement(
        &self,
        id: &str,
        full_name: &str,
        display_name: &str,
        verification_photo_url: &str,
    ) -> Result<User, RepositoryError>;

    async fn update_profile(&self, id: &str, update: &ProfileUpdate)
        -> Result<User, RepositoryError>;

    async fn set_approval(&self, id: &str, flags: ApprovalFlags) -> Result<bool, RepositoryError>;

    async fn set_admin(&self, id: &str, is_admin: bool) -> Result<bool, RepositoryError>;

    /// Idempotent: only touches approved admins and only fills blank fields.
    async fn apply_admin_repair(
        &self,
        id: &str,
        repair: &AdminRepair,
    ) -> Result<bool, RepositoryError>;

    async fn list(&self) -> Result<Vec<User>, RepositoryError>;

    /// Delete the profile and everything that references it, atomically.
    async fn delete_cascade(&self, id: &str) -> Result<CascadeReport, RepositoryError>;

    /// Delete a post with its votes, comments and notifications, atomically.
    /// Returns false when the post does not exist.
    async fn delete_post_cascade(&self, post_id: &str) -> Result<bool, RepositoryError>;
}

/// SQLite implementation
pub struct SqliteUserRepository {
    pool: DbPool,
}

impl SqliteUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn fetch(conn: &rusqlite::Connection, id: &str) -> Result<Option<User>, RepositoryError> {
        let user = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                params![id],
                User::from_row,
            )
            .optional()?;
        Ok(user)
    }

    fn fetch_existing(conn: &rusqlite::Connection, id: &str) -> Result<User, RepositoryError> {
        Self::fetch(conn, id)?.ok_or_else(|| RepositoryError::NotFound(format!("user {}", id)))
    }
}

fn blank_to_none(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn find(&self, id: &str) -> Result<Option<User>, RepositoryError> {
        let conn = self.pool.get()?;
        Self::fetch(&conn, id)
    }

    async fn ensure_profile(
        &self,
        id: &str,
        email: &str,
        initial: InitialFlags,
    ) -> Result<User, RepositoryError> {
        let conn = self.pool.get()?;

        let inserted = conn.execute(
            "INSERT INTO users (id, email, is_approved, is_admin, is_rejected)
             VALUES (?1, ?2, ?3, ?4, 0)
             ON CONFLICT(id) DO NOTHING",
            params![id, email, initial.is_approved, initial.is_admin],
        )?;

        if inserted > 0 {
            tracing::info!(
                "Created profile for {} (approved: {}, admin: {})",
                id,
                initial.is_approved,
                initial.is_admin
            );
        } else {
            conn.execute(
                "UPDATE users SET email = ?2 WHERE id = ?1 AND email <> ?2",
                params![id, email],
            )?;
        }

        Self::fetch_existing(&conn, id)
    }

    async fn complete_agreement(
        &self,
        id: &str,
        full_name: &str,
        display_name: &str,
        verification_photo_url: &str,
    ) -> Result<User, RepositoryError> {
        let conn = self.pool.get()?;

        let updated = conn.execute(
            "UPDATE users SET full_name = ?2, display_name = ?3, verification_photo_url = ?4,
                    agreed_to_terms = 1, updated_at = datetime('now')
             WHERE id = ?1",
            params![id, full_name, display_name, verification_photo_url],
        )?;
        if updated == 0 {
            return Err(RepositoryError::NotFound(format!("user {}", id)));
        }

        Self::fetch_existing(&conn, id)
    }

    async fn update_profile(
        &self,
        id: &str,
        update: &ProfileUpdate,
    ) -> Result<User, RepositoryError> {
        let conn = self.pool.get()?;

        let updated = conn.execute(
            "UPDATE users SET display_name = ?2, full_name = ?3, phone_number = ?4,
                    avatar_url = COALESCE(?5, avatar_url), updated_at = datetime('now')
             WHERE id = ?1",
            params![
                id,
                blank_to_none(&update.display_name),
                blank_to_none(&update.full_name),
                blank_to_none(&update.phone_number),
                update.avatar_url,
            ],
        )?;
        if updated == 0 {
            return Err(RepositoryError::NotFound(format!("user {}", id)));
        }

        Self::fetch_existing(&conn, id)
    }

    async fn set_approval(&self, id: &str, flags: ApprovalFlags) -> Result<bool, RepositoryError> {
        let conn = self.pool.get()?;
        let rows = conn.execute(
            "UPDATE users SET is_approved = ?2, is_rejected = ?3, updated_at = datetime('now')
             WHERE id = ?1",
            params![id, flags.is_approved, flags.is_rejected],
        )?;
        Ok(rows > 0)
    }

    async fn set_admin(&self, id: &str, is_admin: bool) -> Result<bool, RepositoryError> {
        let conn = self.pool.get()?;
        let rows = conn.execute(
            "UPDATE users SET is_admin = ?2, updated_at = datetime('now') WHERE id = ?1",
            params![id, is_admin],
        )?;
        Ok(rows > 0)
    }

    async fn apply_admin_repair(
        &self,
        id: &str,
        repair: &AdminRepair,
    ) -> Result<bool, RepositoryError> {
        let conn = self.pool.get()?;
        let rows = conn.execute(
            "UPDATE users SET
                 agreed_to_terms = 1,
                 full_name = CASE WHEN TRIM(COALESCE(full_name, '')) = '' THEN ?2 ELSE full_name END,
                 verification_photo_url = CASE WHEN TRIM(COALESCE(verification_photo_url, '')) = ''
                     THEN ?3 ELSE verification_photo_url END,
                 updated_at = datetime('now')
             WHERE id = ?1 AND is_admin = 1 AND is_approved = 1
               AND (agreed_to_terms = 0
                    OR TRIM(COALESCE(full_name, '')) = ''
                    OR TRIM(COALESCE(verification_photo_url, '')) = '')",
            params![
                id,
                repair
                    .full_name
                    .as_deref()
                    .unwrap_or(crate::moderation::domain::ADMIN_PLACEHOLDER_NAME),
                repair
                    .verification_photo_url
                    .as_deref()
                    .unwrap_or(crate::moderation::domain::ADMIN_PLACEHOLDER_PHOTO),
            ],
        )?;
        Ok(rows > 0)
    }

    async fn list(&self) -> Result<Vec<User>, RepositoryError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users ORDER BY created_at DESC, rowid DESC",
            USER_COLUMNS
        ))?;
        let users = stmt
            .query_map([], User::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    async fn delete_cascade(&self, id: &str) -> Result<CascadeReport, RepositoryError> {
        let conn = self.pool.get()?;

        db::in_transaction(&conn, |tx| {
            if Self::fetch(tx, id)?.is_none() {
                return Err(RepositoryError::NotFound(format!("user {}", id)));
            }

            let own_posts = "SELECT id FROM posts WHERE user_id = ?1";
            let mut report = CascadeReport::default();

            // Rows on the user's posts written by other members
            report.votes += tx.execute(
                &format!("DELETE FROM votes WHERE post_id IN ({})", own_posts),
                params![id],
            )?;
            report.comments += tx.execute(
                &format!("DELETE FROM comments WHERE post_id IN ({})", own_posts),
                params![id],
            )?;
            report.notifications += tx.execute(
                &format!(
                    "DELETE FROM notifications WHERE related_post_id IN ({})",
                    own_posts
                ),
                params![id],
            )?;

            report.votes += tx.execute("DELETE FROM votes WHERE user_id = ?1", params![id])?;
            report.comments += tx.execute("DELETE FROM comments WHERE user_id = ?1", params![id])?;
            report.notifications +=
                tx.execute("DELETE FROM notifications WHERE user_id = ?1", params![id])?;
            report.alerts = tx.execute("DELETE FROM alerts WHERE user_id = ?1", params![id])?;
            report.posts = tx.execute("DELETE FROM posts WHERE user_id = ?1", params![id])?;

            tx.execute("DELETE FROM users WHERE id = ?1", params![id])?;

            Ok(report)
        })
    }

    async fn delete_post_cascade(&self, post_id: &str) -> Result<bool, RepositoryError> {
        let conn = self.pool.get()?;

        db::in_transaction(&conn, |tx| {
            tx.execute("DELETE FROM votes WHERE post_id = ?1", params![post_id])?;
            tx.execute("DELETE FROM comments WHERE post_id = ?1", params![post_id])?;
            tx.execute(
                "DELETE FROM notifications WHERE related_post_id = ?1",
                params![post_id],
            )?;
            let rows = tx.execute("DELETE FROM posts WHERE id = ?1", params![post_id])?;
            Ok::<_, RepositoryError>(rows > 0)
        })
    }
}

/// Type alias for Arc-wrapped repository (for AppState)
pub type DynUserRepository = Arc<dyn UserRepository>;
