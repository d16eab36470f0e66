use async_trait::async_trait;
use rusqlite::{params, ErrorCode, OptionalExtension};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::state::DbPool;

/// A signed-in account. The id doubles as the profile id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("An account with that email already exists")]
    EmailTaken,

    #[error("Please enter a valid email address")]
    InvalidEmail,

    #[error("Password must be at least {0} characters")]
    WeakPassword(usize),

    #[error("Account not found")]
    NotFound,

    #[error("Database error: {0}")]
    Database(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
}

impl IdentityError {
    /// Errors the person at the keyboard can fix.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials | Self::EmailTaken | Self::InvalidEmail | Self::WeakPassword(_)
        )
    }
}

/// Account management. Profiles and moderation flags live elsewhere.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, IdentityError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, IdentityError>;

    /// Removes the account and all of its sessions.
    async fn delete_account(&self, id: &str) -> Result<(), IdentityError>;
}

pub type DynIdentityProvider = Arc<dyn IdentityProvider>;

pub fn normalize_email(email: &str) -> Option<String> {
    let email = email.trim().to_lowercase();
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') || email.contains(' ') {
        return None;
    }
    Some(email)
}

pub struct SqliteIdentityProvider {
    pool: DbPool,
    min_password_len: usize,
    cost: u32,
}

impl SqliteIdentityProvider {
    pub fn new(pool: DbPool, min_password_len: usize) -> Self {
        Self {
            pool,
            min_password_len,
            cost: bcrypt::DEFAULT_COST,
        }
    }

    /// Override the bcrypt work factor.
    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }
}

#[async_trait]
impl IdentityProvider for SqliteIdentityProvider {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, IdentityError> {
        let email = normalize_email(email).ok_or(IdentityError::InvalidEmail)?;
        if password.chars().count() < self.min_password_len {
            return Err(IdentityError::WeakPassword(self.min_password_len));
        }

        let hash = bcrypt::hash(password, self.cost)?;
        let id = uuid::Uuid::now_v7().to_string();

        let conn = self.pool.get()?;
        match conn.execute(
            "INSERT INTO accounts (id, email, password_hash) VALUES (?1, ?2, ?3)",
            params![id, email, hash],
        ) {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(IdentityError::EmailTaken);
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!("Account created: {}", email);
        Ok(Identity { id, email })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, IdentityError> {
        let email = normalize_email(email).ok_or(IdentityError::InvalidCredentials)?;

        let conn = self.pool.get()?;
        let row: Option<(String, String, String)> = conn
            .query_row(
                "SELECT id, email, password_hash FROM accounts WHERE email = ?1",
                params![email],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let (id, email, hash) = row.ok_or(IdentityError::InvalidCredentials)?;

        // Constant-time via bcrypt
        if !bcrypt::verify(password, &hash).unwrap_or(false) {
            tracing::warn!("Failed sign-in for {}", email);
            return Err(IdentityError::InvalidCredentials);
        }

        Ok(Identity { id, email })
    }

    async fn delete_account(&self, id: &str) -> Result<(), IdentityError> {
        let conn = self.pool.get()?;
        // Sessions cascade
        let rows = conn.execute("DELETE FROM accounts WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(IdentityError::NotFound);
        }
        tracing::info!("Account {} deleted", id);
        Ok(())
    }
}
