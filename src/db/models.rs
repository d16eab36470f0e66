use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Column list matching [`User::from_row`].
pub const USER_COLUMNS: &str = "id, email, full_name, display_name, phone_number, avatar_url, \
     verification_photo_url, agreed_to_terms, is_approved, is_rejected, is_admin, \
     created_at, updated_at";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub display_name: Option<String>,
    pub phone_number: Option<String>,
    pub avatar_url: Option<String>,
    pub verification_photo_url: Option<String>,
    pub agreed_to_terms: bool,
    pub is_approved: bool,
    pub is_rejected: bool,
    pub is_admin: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            full_name: row.get(2)?,
            display_name: row.get(3)?,
            phone_number: row.get(4)?,
            avatar_url: row.get(5)?,
            verification_photo_url: row.get(6)?,
            agreed_to_terms: row.get(7)?,
            is_approved: row.get(8)?,
            is_rejected: row.get(9)?,
            is_admin: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    /// Name shown next to the user's content.
    pub fn public_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(self.full_name.as_deref().filter(|s| !s.trim().is_empty()))
            .unwrap_or("Someone")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    Green,
    Red,
}

impl VoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Red => "red",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "green" => Some(Self::Green),
            "red" => Some(Self::Red),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Name,
    Location,
    Phone,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Location => "location",
            Self::Phone => "phone",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "name" => Some(Self::Name),
            "location" => Some(Self::Location),
            "phone" => Some(Self::Phone),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub author_name: String,
    pub subject_name: String,
    pub subject_age: i64,
    pub city: String,
    pub state: String,
    pub phone_number: Option<String>,
    pub caption: String,
    pub photos: Vec<String>,
    pub green_flags: i64,
    pub red_flags: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub kind: String,
    pub related_post_id: Option<String>,
    pub is_read: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub user_id: String,
    pub alert_type: AlertType,
    pub alert_term: String,
    pub is_active: bool,
    pub created_at: String,
}
