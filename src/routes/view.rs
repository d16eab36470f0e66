use axum::response::Redirect;
use chrono::{NaiveDateTime, Utc};
use rusqlite::Connection;
use serde::Deserialize;

use crate::db::models::{Post, User, VoteType};
use crate::extractors::Member;
use crate::social::notifications;

/// Toast messages carried across redirects in the query string.
#[derive(Debug, Default, Deserialize)]
pub struct Flash {
    pub error: Option<String>,
    pub success: Option<String>,
}

/// Redirect with a toast, e.g. `/alerts?success=Alert+created`.
pub fn redirect_with(path: &str, key: &str, message: &str) -> Redirect {
    let encoded: String = url::form_urlencoded::byte_serialize(message.as_bytes()).collect();
    let sep = if path.contains('?') { '&' } else { '?' };
    Redirect::to(&format!("{}{}{}={}", path, sep, key, encoded))
}

/// Header state shown on every member page.
#[derive(Debug, Clone)]
pub struct Nav {
    pub user_id: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub is_admin: bool,
    pub unread: i64,
}

impl Nav {
    pub fn for_member(conn: &Connection, member: &Member) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: member.user.id.clone(),
            name: member.user.public_name().to_string(),
            avatar_url: member.user.avatar_url.clone(),
            is_admin: member.is_admin(),
            unread: notifications::unread_count(conn, member.id())?,
        })
    }
}

/// A post as rendered in cards and on the detail page.
#[derive(Debug, Clone)]
pub struct PostCard {
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
    pub my_vote: Option<String>,
    pub can_delete: bool,
}

impl PostCard {
    pub fn new(post: Post, viewer_id: &str, my_vote: Option<VoteType>) -> Self {
        Self {
            can_delete: post.user_id == viewer_id,
            created_at: parse_and_format_time(&post.created_at),
            my_vote: my_vote.map(|v| v.as_str().to_string()),
            id: post.id,
            user_id: post.user_id,
            author_name: post.author_name,
            subject_name: post.subject_name,
            subject_age: post.subject_age,
            city: post.city,
            state: post.state,
            phone_number: post.phone_number,
            caption: post.caption,
            photos: post.photos,
            green_flags: post.green_flags,
            red_flags: post.red_flags,
        }
    }

    pub fn list(posts: Vec<Post>, viewer_id: &str) -> Vec<Self> {
        posts
            .into_iter()
            .map(|post| Self::new(post, viewer_id, None))
            .collect()
    }

    pub fn cover_photo(&self) -> Option<&str> {
        self.photos.first().map(String::as_str)
    }

    pub fn voted(&self, vote_type: &str) -> bool {
        self.my_vote.as_deref() == Some(vote_type)
    }

    pub fn location(&self) -> String {
        format!("{}, {}", self.city, self.state)
    }
}

/// Public profile fields.
#[derive(Debug, Clone)]
pub struct ProfileView {
    pub id: String,
    pub name: String,
    pub full_name: Option<String>,
    pub display_name: Option<String>,
    pub phone_number: Option<String>,
    pub avatar_url: Option<String>,
    pub member_since: String,
}

impl From<&User> for ProfileView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.public_name().to_string(),
            full_name: user.full_name.clone(),
            display_name: user.display_name.clone(),
            phone_number: user.phone_number.clone(),
            avatar_url: user.avatar_url.clone(),
            member_since: parse_and_format_time(&user.created_at),
        }
    }
}

pub fn parse_and_format_time(db_time: &str) -> String {
    NaiveDateTime::parse_from_str(db_time, "%Y-%m-%d %H:%M:%S")
        .map(|dt| format_relative_time(&dt))
        .unwrap_or_else(|_| db_time.to_string())
}

pub fn format_relative_time(dt: &NaiveDateTime) -> String {
    let now = Utc::now().naive_utc();
    let diff = now.signed_duration_since(*dt);

    let seconds = diff.num_seconds();
    if seconds < 60 {
        return "just now".to_string();
    }

    let minutes = diff.num_minutes();
    if minutes < 60 {
        return format!("{}m ago", minutes);
    }

    let hours = diff.num_hours();
    if hours < 24 {
        return format!("{}h ago", hours);
    }

    let days = diff.num_days();
    if days < 7 {
        return format!("{}d ago", days);
    }

    dt.format("%b %-d, %Y").to_string()
}
