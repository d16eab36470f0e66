use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::models::Post;
use crate::error::{AppError, AppResult};

pub const FEED_PAGE_SIZE: i64 = 12;
pub const MAX_PHOTOS: usize = 6;

/// Posts with their author's public name and live flag counts.
pub(crate) const POST_SELECT: &str = "SELECT p.id, p.user_id,
        COALESCE(NULLIF(TRIM(u.display_name), ''), NULLIF(TRIM(u.full_name), ''), 'Someone'),
        p.subject_name, p.subject_age, p.city, p.state, p.phone_number, p.caption, p.photos,
        COALESCE(c.green_flags, 0), COALESCE(c.red_flags, 0), p.created_at
     FROM posts p
     JOIN users u ON u.id = p.user_id
     LEFT JOIN post_flag_counts c ON c.post_id = p.id";

pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    let photos: String = row.get(9)?;
    let photos = serde_json::from_str(&photos)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?;

    Ok(Post {
        id: row.get(0)?,
        user_id: row.get(1)?,
        author_name: row.get(2)?,
        subject_name: row.get(3)?,
        subject_age: row.get(4)?,
        city: row.get(5)?,
        state: row.get(6)?,
        phone_number: row.get(7)?,
        caption: row.get(8)?,
        photos,
        green_flags: row.get(10)?,
        red_flags: row.get(11)?,
        created_at: row.get(12)?,
    })
}

/// Raw post form fields.
#[derive(Debug, Clone, Default)]
pub struct NewPost {
    pub subject_name: String,
    pub subject_age: String,
    pub city: String,
    pub state: String,
    pub phone_number: Option<String>,
    pub caption: String,
}

/// Post fields after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidPost {
    pub subject_name: String,
    pub subject_age: i64,
    pub city: String,
    pub state: String,
    pub phone_number: Option<String>,
    pub caption: String,
}

fn required(value: &str, field: &str, max: usize) -> AppResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    if value.chars().count() > max {
        return Err(AppError::Validation(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(value.to_string())
}

impl NewPost {
    pub fn validate(&self) -> AppResult<ValidPost> {
        let subject_age: i64 = self
            .subject_age
            .trim()
            .parse()
            .map_err(|_| AppError::Validation("Age must be a number".into()))?;
        if !(18..=100).contains(&subject_age) {
            return Err(AppError::Validation("Age must be between 18 and 100".into()));
        }

        Ok(ValidPost {
            subject_name: required(&self.subject_name, "Name", 100)?,
            subject_age,
            city: required(&self.city, "City", 100)?,
            state: required(&self.state, "State", 100)?,
            phone_number: self
                .phone_number
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            caption: required(&self.caption, "Caption", 1000)?,
        })
    }
}

pub fn insert(
    conn: &Connection,
    user_id: &str,
    post: &ValidPost,
    photos: &[String],
) -> AppResult<Post> {
    if photos.len() > MAX_PHOTOS {
        return Err(AppError::Validation(format!(
            "At most {} photos per post",
            MAX_PHOTOS
        )));
    }

    let id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO posts (id, user_id, subject_name, subject_age, city, state, phone_number, caption, photos)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id,
            user_id,
            post.subject_name,
            post.subject_age,
            post.city,
            post.state,
            post.phone_number,
            post.caption,
            serde_json::to_string(photos)?,
        ],
    )?;

    find(conn, &id)?.ok_or(AppError::NotFound)
}

pub fn find(conn: &Connection, post_id: &str) -> rusqlite::Result<Option<Post>> {
    conn.query_row(
        &format!("{} WHERE p.id = ?1", POST_SELECT),
        params![post_id],
        from_row,
    )
    .optional()
}

#[derive(Debug, Clone)]
pub struct FeedPage {
    pub posts: Vec<Post>,
    /// 1-based
    pub page: i64,
    pub total_pages: i64,
}

/// Newest first, `FEED_PAGE_SIZE` per page. Out-of-range pages are clamped.
pub fn feed(conn: &Connection, page: i64) -> rusqlite::Result<FeedPage> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?;
    let total_pages = ((total + FEED_PAGE_SIZE - 1) / FEED_PAGE_SIZE).max(1);
    let page = page.clamp(1, total_pages);

    let mut stmt = conn.prepare(&format!(
        "{} ORDER BY p.created_at DESC, p.rowid DESC LIMIT ?1 OFFSET ?2",
        POST_SELECT
    ))?;
    let posts = stmt
        .query_map(params![FEED_PAGE_SIZE, (page - 1) * FEED_PAGE_SIZE], from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FeedPage {
        posts,
        page,
        total_pages,
    })
}

pub fn by_author(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<Post>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE p.user_id = ?1 ORDER BY p.created_at DESC, p.rowid DESC",
        POST_SELECT
    ))?;
    let posts = stmt
        .query_map(params![user_id], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(posts)
}

/// Newest post the user neither wrote nor voted on.
pub fn next_unseen(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<Post>> {
    conn.query_row(
        &format!(
            "{} WHERE p.user_id <> ?1
               AND NOT EXISTS (SELECT 1 FROM votes v WHERE v.post_id = p.id AND v.user_id = ?1)
             ORDER BY p.created_at DESC, p.rowid DESC LIMIT 1",
            POST_SELECT
        ),
        params![user_id],
        from_row,
    )
    .optional()
}
