use rusqlite::{params, Connection, Row};

use crate::db::models::{Alert, AlertType, Post};
use crate::error::{AppError, AppResult};
use crate::social::notifications::{self, NotificationKind};

fn from_row(row: &Row<'_>) -> rusqlite::Result<Alert> {
    let alert_type: String = row.get(2)?;
    let alert_type = AlertType::parse(&alert_type).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown alert type {}", alert_type).into(),
        )
    })?;
    Ok(Alert {
        id: row.get(0)?,
        user_id: row.get(1)?,
        alert_type,
        alert_term: row.get(3)?,
        is_active: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub fn list(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<Alert>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, alert_type, alert_term, is_active, created_at
         FROM alerts WHERE user_id = ?1
         ORDER BY created_at DESC, rowid DESC",
    )?;
    let alerts = stmt
        .query_map(params![user_id], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(alerts)
}

pub fn normalize_term(term: &str) -> String {
    term.trim().to_lowercase()
}

/// Returns false when the same alert already exists.
pub fn create(conn: &Connection, user_id: &str, alert_type: AlertType, term: &str) -> AppResult<bool> {
    let term = normalize_term(term);
    if term.is_empty() {
        return Err(AppError::Validation("Alert term cannot be empty".into()));
    }
    if term.chars().count() > 100 {
        return Err(AppError::Validation(
            "Alert term must be at most 100 characters".into(),
        ));
    }

    let rows = conn.execute(
        "INSERT OR IGNORE INTO alerts (id, user_id, alert_type, alert_term) VALUES (?1, ?2, ?3, ?4)",
        params![
            uuid::Uuid::now_v7().to_string(),
            user_id,
            alert_type.as_str(),
            term
        ],
    )?;
    Ok(rows > 0)
}

/// Owner scoped.
pub fn delete(conn: &Connection, user_id: &str, alert_id: &str) -> rusqlite::Result<bool> {
    let rows = conn.execute(
        "DELETE FROM alerts WHERE id = ?1 AND user_id = ?2",
        params![alert_id, user_id],
    )?;
    Ok(rows > 0)
}

fn digits(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

pub fn matches(alert_type: AlertType, term: &str, post: &Post) -> bool {
    let term = normalize_term(term);
    if term.is_empty() {
        return false;
    }
    match alert_type {
        AlertType::Name => post.subject_name.to_lowercase().contains(&term),
        AlertType::Location => {
            post.city.to_lowercase().contains(&term) || post.state.to_lowercase().contains(&term)
        }
        AlertType::Phone => {
            let wanted = digits(&term);
            !wanted.is_empty()
                && post
                    .phone_number
                    .as_deref()
                    .is_some_and(|phone| digits(phone).contains(&wanted))
        }
    }
}

/// Notify everyone except the author whose active alerts match a new post.
/// Returns how many notifications were sent.
pub fn notify_matches(conn: &Connection, post: &Post) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, alert_type, alert_term, is_active, created_at
         FROM alerts WHERE is_active = 1 AND user_id <> ?1",
    )?;
    let alerts = stmt
        .query_map(params![post.user_id], from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut notified: Vec<&str> = Vec::new();
    for alert in &alerts {
        // One notification per recipient per post
        if notified.contains(&alert.user_id.as_str())
            || !matches(alert.alert_type, &alert.alert_term, post)
        {
            continue;
        }
        notifications::notify(
            conn,
            &alert.user_id,
            NotificationKind::Alert,
            "🔔 Alert Match",
            &format!(
                "A new post about {} in {}, {} matches your {} alert \"{}\"",
                post.subject_name,
                post.city,
                post.state,
                alert.alert_type.as_str(),
                alert.alert_term
            ),
            Some(&post.id),
        )?;
        notified.push(&alert.user_id);
    }

    if !notified.is_empty() {
        tracing::info!("Post {} matched alerts of {} member(s)", post.id, notified.len());
    }
    Ok(notified.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::social::test_support::{seed_post, seed_user, test_pool};

    fn post(phone: Option<&str>) -> Post {
        Post {
            id: "p1".into(),
            user_id: "author".into(),
            author_name: "Author".into(),
            subject_name: "Sam Smith".into(),
            subject_age: 30,
            city: "Austin".into(),
            state: "TX".into(),
            phone_number: phone.map(str::to_string),
            caption: "c".into(),
            photos: vec![],
            green_flags: 0,
            red_flags: 0,
            created_at: "2024-01-01 00:00:00".into(),
        }
    }

    #[test]
    fn create_normalizes_and_dedupes() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        seed_user(&conn, "u1");

        assert!(create(&conn, "u1", AlertType::Name, "  SAM ").unwrap());
        assert!(!create(&conn, "u1", AlertType::Name, "sam").unwrap());
        assert!(create(&conn, "u1", AlertType::Location, "sam").unwrap());
        assert!(matches!(
            create(&conn, "u1", AlertType::Phone, "   "),
            Err(AppError::Validation(_))
        ));

        let alerts = list(&conn, "u1").unwrap();
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().all(|a| a.alert_term == "sam"));
    }

    #[test]
    fn delete_is_owner_scoped() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        seed_user(&conn, "u1");
        seed_user(&conn, "u2");
        create(&conn, "u1", AlertType::Name, "sam").unwrap();
        let id = list(&conn, "u1").unwrap()[0].id.clone();

        assert!(!delete(&conn, "u2", &id).unwrap());
        assert!(delete(&conn, "u1", &id).unwrap());
        assert!(list(&conn, "u1").unwrap().is_empty());
    }

    #[test]
    fn matching_rules() {
        let p = post(Some("(512) 555-0100"));
        assert!(matches(AlertType::Name, "smith", &p));
        assert!(!matches(AlertType::Name, "austin", &p));
        assert!(matches(AlertType::Location, "aus", &p));
        assert!(matches(AlertType::Location, "tx", &p));
        assert!(matches(AlertType::Phone, "555-0100", &p));
        assert!(!matches(AlertType::Phone, "abc", &p));
        assert!(!matches(AlertType::Phone, "555", &post(None)));
    }

    #[test]
    fn notify_matches_skips_author_and_dedupes_recipients() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        seed_user(&conn, "author");
        seed_user(&conn, "watcher");
        seed_user(&conn, "bystander");
        seed_post(&conn, "p1", "author");

        create(&conn, "author", AlertType::Name, "sam").unwrap();
        create(&conn, "watcher", AlertType::Name, "sam").unwrap();
        create(&conn, "watcher", AlertType::Location, "austin").unwrap();
        create(&conn, "bystander", AlertType::Name, "alex").unwrap();

        let post = crate::social::posts::find(&conn, "p1").unwrap().unwrap();
        assert_eq!(notify_matches(&conn, &post).unwrap(), 1);

        let alert_notifications: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = 'watcher' AND type = 'alert'
                 AND related_post_id = 'p1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(alert_notifications, 1);
    }
}
