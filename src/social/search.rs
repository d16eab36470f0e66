use rusqlite::{params, Connection};

use crate::db::models::{AlertType, Post};
use crate::error::{AppError, AppResult};
use crate::social::alerts;
use crate::social::posts::{from_row, POST_SELECT};

pub const MIN_QUERY_CHARS: usize = 2;
pub const MAX_RESULTS: i64 = 50;

/// Escape LIKE wildcards so the term matches literally.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Case-insensitive substring search, newest first.
pub fn search(conn: &Connection, search_type: AlertType, query: &str) -> AppResult<Vec<Post>> {
    let query = query.trim();
    if query.chars().count() < MIN_QUERY_CHARS {
        return Err(AppError::Validation(format!(
            "Search term must be at least {} characters",
            MIN_QUERY_CHARS
        )));
    }

    let filter = match search_type {
        AlertType::Name => "p.subject_name LIKE ?1 ESCAPE '\\'",
        AlertType::Location => "(p.city LIKE ?1 ESCAPE '\\' OR p.state LIKE ?1 ESCAPE '\\')",
        AlertType::Phone => "p.phone_number LIKE ?1 ESCAPE '\\'",
    };

    let mut stmt = conn.prepare(&format!(
        "{} WHERE {} ORDER BY p.created_at DESC, p.rowid DESC LIMIT ?2",
        POST_SELECT, filter
    ))?;
    let posts = stmt
        .query_map(params![like_pattern(query), MAX_RESULTS], from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(posts)
}

/// Search, and when something turns up, keep watching the same term for
/// the searcher. A failed alert insert never hides the results.
pub fn search_and_watch(
    conn: &Connection,
    user_id: &str,
    search_type: AlertType,
    query: &str,
) -> AppResult<Vec<Post>> {
    let results = search(conn, search_type, query)?;
    if results.is_empty() {
        return Ok(results);
    }
    match alerts::create(conn, user_id, search_type, query) {
        Ok(true) => {
            tracing::info!("Saved {} alert for {} from search", search_type.as_str(), user_id)
        }
        Ok(false) => {}
        Err(e) => tracing::warn!("Could not save search alert for {}: {}", user_id, e),
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::social::test_support::{seed_post, seed_user, test_pool};

    #[test]
    fn short_queries_are_rejected() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        assert!(matches!(
            search(&conn, AlertType::Name, " a "),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn location_matches_city_or_state_case_insensitively() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        seed_user(&conn, "u1");
        seed_post(&conn, "p1", "u1");

        assert_eq!(search(&conn, AlertType::Location, "aUs").unwrap().len(), 1);
        assert_eq!(search(&conn, AlertType::Location, "tx").unwrap().len(), 1);
        assert!(search(&conn, AlertType::Name, "aus").unwrap().is_empty());
    }

    #[test]
    fn wildcards_match_literally() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        seed_user(&conn, "u1");
        seed_post(&conn, "p1", "u1");
        assert!(search(&conn, AlertType::Name, "%%").unwrap().is_empty());
    }

    #[test]
    fn successful_search_records_one_alert() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        seed_user(&conn, "u1");
        seed_user(&conn, "u2");
        seed_post(&conn, "p1", "u1");

        assert_eq!(search_and_watch(&conn, "u2", AlertType::Name, "SAM").unwrap().len(), 1);
        search_and_watch(&conn, "u2", AlertType::Name, "sam").unwrap();
        assert!(search_and_watch(&conn, "u2", AlertType::Name, "nobody").unwrap().is_empty());

        let saved = alerts::list(&conn, "u2").unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].alert_term, "sam");
    }

    #[test]
    fn results_survive_a_failed_alert_insert() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        seed_user(&conn, "u1");
        seed_post(&conn, "p1", "u1");

        // No profile row for the searcher, so the alert insert violates its foreign key
        let results = search_and_watch(&conn, "ghost", AlertType::Name, "sam").unwrap();
        assert_eq!(results.len(), 1);
        assert!(alerts::list(&conn, "ghost").unwrap().is_empty());
    }
}
