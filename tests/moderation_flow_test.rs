use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use futures::StreamExt;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use coffee::auth::SqliteIdentityProvider;
use coffee::config::Config;
use coffee::db;
use coffee::routes::build_router;
use coffee::state::AppState;
use coffee::storage::ObjectStore;

const ADMIN_EMAIL: &str = "admin@example.com";
const PASSWORD: &str = "correct horse";
const BOUNDARY: &str = "coffee-test-boundary";

struct TestApp {
    router: Router,
    state: AppState,
    _dir: TempDir,
}

async fn test_app(debug_endpoints: bool) -> TestApp {
    let dir = TempDir::new().unwrap();

    let mut config = Config::default();
    config.moderation.admin_email = Some(ADMIN_EMAIL.to_string());
    config.moderation.retry_base_delay_ms = 1;
    config.debug.endpoints = debug_endpoints;

    let pool = db::create_pool(&dir.path().join("coffee.db")).expect("pool");
    db::run_migrations(&pool).expect("migrations");
    let storage = ObjectStore::open(dir.path().join("uploads"), &config.storage)
        .await
        .expect("storage");
    let identity = SqliteIdentityProvider::new(pool.clone(), config.auth.min_password_len).with_cost(4);

    let state = AppState::new(pool, config, storage, identity);
    TestApp {
        router: build_router(state.clone()),
        state,
        _dir: dir,
    }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, path: &str, cookie: Option<&str>) -> Response {
        let mut builder = Request::get(path);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn post_form(&self, path: &str, cookie: Option<&str>, body: &str) -> Response {
        let mut builder = Request::post(path)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap()).await
    }

    /// Sign up and return the `name=token` cookie pair.
    async fn sign_up(&self, email: &str) -> String {
        let body = format!("email={}&password={}", email.replace('@', "%40"), PASSWORD.replace(' ', "+"));
        let response = self.post_form("/signup", None, &body).await;
        assert_eq!(location(&response), "/feed");

        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    fn account_id(&self, email: &str) -> String {
        let conn = self.state.db.get().unwrap();
        conn.query_row("SELECT id FROM accounts WHERE email = ?1", [email], |row| row.get(0))
            .unwrap()
    }

    async fn post_multipart(&self, path: &str, cookie: &str, body: String) -> Response {
        self.send(
            Request::post(path)
                .header(header::COOKIE, cookie)
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }

    async fn create_post(&self, cookie: &str, photos: &[(&str, &str, &str, &str)]) -> Response {
        let body = multipart_with_files(
            &[
                ("subject_name", "Sam"),
                ("subject_age", "30"),
                ("city", "Austin"),
                ("state", "TX"),
                ("caption", "Met for coffee"),
            ],
            photos,
        );
        self.post_multipart("/post", cookie, body).await
    }

    fn post_count(&self) -> i64 {
        let conn = self.state.db.get().unwrap();
        conn.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))
            .unwrap()
    }

    fn post_photos(&self) -> Vec<String> {
        let conn = self.state.db.get().unwrap();
        let mut stmt = conn.prepare("SELECT photos FROM posts").unwrap();
        let rows: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        rows.iter()
            .flat_map(|json| serde_json::from_str::<Vec<String>>(json).unwrap())
            .collect()
    }

    fn verification(&self, user_id: &str) -> (Option<String>, Option<String>) {
        let conn = self.state.db.get().unwrap();
        conn.query_row(
            "SELECT full_name, verification_photo_url FROM users WHERE id = ?1",
            [user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap()
    }

    /// Run the onboarding form with a camera capture, as the browser would.
    async fn complete_agreement(&self, cookie: &str, full_name: &str) -> Response {
        let signed = self
            .send(
                Request::post("/agreement/signed-upload")
                    .header(header::COOKIE, cookie)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"file_name":"selfie.png"}"#))
                    .unwrap(),
            )
            .await;
        assert_eq!(signed.status(), StatusCode::OK);
        let signed = json(signed).await;

        let put = self
            .send(
                Request::put(signed["url"].as_str().unwrap())
                    .header(header::CONTENT_TYPE, "image/jpeg")
                    .body(Body::from(vec![0xFF, 0xD8, 0xFF, 0xE0]))
                    .unwrap(),
            )
            .await;
        assert_eq!(put.status(), StatusCode::OK);

        let body = multipart_body(&[
            ("full_name", full_name),
            ("display_name", ""),
            ("photo_path", signed["path"].as_str().unwrap()),
            ("agree", "on"),
        ]);
        self.send(
            Request::post("/agreement")
                .header(header::COOKIE, cookie)
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }
}

fn location(response: &Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn json(response: Response) -> serde_json::Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

fn multipart_body(fields: &[(&str, &str)]) -> String {
    multipart_with_files(fields, &[])
}

/// Files are `(field, file name, content type, contents)`.
fn multipart_with_files(fields: &[(&str, &str)], files: &[(&str, &str, &str, &str)]) -> String {
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
            BOUNDARY, name, value
        ));
    }
    for (name, file_name, content_type, contents) in files {
        body.push_str(&format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n{}\r\n",
            BOUNDARY, name, file_name, content_type, contents
        ));
    }
    body.push_str(&format!("--{}--\r\n", BOUNDARY));
    body
}

#[tokio::test]
async fn anonymous_visitors_are_sent_to_login() {
    let app = test_app(false).await;

    for path in ["/feed", "/swipe", "/admin", "/profile", "/notifications"] {
        let response = app.get(path, None).await;
        assert_eq!(location(&response), "/login", "{} should require a session", path);
    }

    let response = app.get("/", None).await;
    assert_eq!(location(&response), "/login");
}

#[tokio::test]
async fn new_member_is_sent_to_the_agreement() {
    let app = test_app(false).await;
    let cookie = app.sign_up("new@example.com").await;

    let response = app.get("/feed", Some(&cookie)).await;
    assert_eq!(location(&response), "/agreement?email=new%40example.com");

    let response = app.get("/agreement", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("new@example.com"));
}

#[tokio::test]
async fn configured_admin_skips_onboarding() {
    let app = test_app(false).await;
    let cookie = app.sign_up(ADMIN_EMAIL).await;

    let response = app.get("/feed", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Latest posts"));

    let response = app.get("/admin", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn agreement_then_approval_admits_member() {
    let app = test_app(false).await;
    let admin = app.sign_up(ADMIN_EMAIL).await;
    app.get("/feed", Some(&admin)).await;
    let member = app.sign_up("member@example.com").await;
    let member_id = app.account_id("member@example.com");

    let response = app.complete_agreement(&member, "Mem Ber").await;
    assert!(location(&response).starts_with("/pending?email=member%40example.com"));

    // Pending members cannot reach content or the agreement again
    let response = app.get("/feed", Some(&member)).await;
    assert!(location(&response).starts_with("/pending"));
    let response = app.get("/agreement", Some(&member)).await;
    assert!(location(&response).starts_with("/pending"));

    let response = app
        .post_form(&format!("/admin/users/{}/approve", member_id), Some(&admin), "approve=true")
        .await;
    assert_eq!(json(response).await, serde_json::json!({ "success": true }));

    let response = app.get("/feed", Some(&member)).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Approved members are bounced off the pending page
    let response = app.get("/pending", Some(&member)).await;
    assert_eq!(location(&response), "/feed");
}

#[tokio::test]
async fn rejected_member_sees_the_pending_page() {
    let app = test_app(false).await;
    let admin = app.sign_up(ADMIN_EMAIL).await;
    app.get("/feed", Some(&admin)).await;
    let member = app.sign_up("member@example.com").await;
    let member_id = app.account_id("member@example.com");
    app.complete_agreement(&member, "Mem Ber").await;

    let response = app
        .post_form(&format!("/admin/users/{}/reject", member_id), Some(&admin), "")
        .await;
    assert_eq!(json(response).await["success"], true);

    let response = app.get("/swipe", Some(&member)).await;
    assert!(location(&response).starts_with("/pending"));

    let response = app.get("/pending", Some(&member)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("not approved"));

    let conn = app.state.db.get().unwrap();
    let (approved, rejected): (bool, bool) = conn
        .query_row(
            "SELECT is_approved, is_rejected FROM users WHERE id = ?1",
            [&member_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert!(!approved);
    assert!(rejected);
}

#[tokio::test]
async fn admin_actions_refuse_non_admins() {
    let app = test_app(false).await;
    let member = app.sign_up("member@example.com").await;
    let member_id = app.account_id("member@example.com");
    let expected = serde_json::json!({ "success": false, "error": "Unauthorized: Not an admin." });

    let response = app
        .post_form(&format!("/admin/users/{}/approve", member_id), Some(&member), "approve=true")
        .await;
    assert_eq!(json(response).await, expected);

    let response = app
        .post_form(&format!("/admin/users/{}/admin", member_id), None, "is_admin=true")
        .await;
    assert_eq!(json(response).await, expected);

    let response = app.get("/admin", Some(&member)).await;
    assert!(location(&response).starts_with("/agreement"));
}

#[tokio::test]
async fn admin_user_listing_api_checks_the_caller() {
    let app = test_app(false).await;

    let response = app.get("/api/admin/users", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let member = app.sign_up("member@example.com").await;
    let response = app.get("/api/admin/users", Some(&member)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let admin = app.sign_up(ADMIN_EMAIL).await;
    // The member's profile row only exists once they hit a guarded route
    app.get("/feed", Some(&member)).await;
    app.get("/feed", Some(&admin)).await;

    let response = app.get("/api/admin/users", Some(&admin)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let users = json(response).await;
    let emails: Vec<&str> = users
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["email"].as_str().unwrap())
        .collect();
    assert!(emails.contains(&ADMIN_EMAIL));
    assert!(emails.contains(&"member@example.com"));
}

#[tokio::test]
async fn verification_photos_are_private() {
    let app = test_app(false).await;
    let admin = app.sign_up(ADMIN_EMAIL).await;
    app.get("/feed", Some(&admin)).await;
    let member = app.sign_up("member@example.com").await;
    let other = app.sign_up("other@example.com").await;
    app.complete_agreement(&member, "Mem Ber").await;

    let photo_url: String = {
        let conn = app.state.db.get().unwrap();
        conn.query_row(
            "SELECT verification_photo_url FROM users WHERE email = 'member@example.com'",
            [],
            |row| row.get(0),
        )
        .unwrap()
    };
    assert!(photo_url.starts_with("/uploads/verification-photos/"));

    assert_eq!(app.get(&photo_url, None).await.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.get(&photo_url, Some(&other)).await.status(), StatusCode::FORBIDDEN);
    assert_eq!(app.get(&photo_url, Some(&member)).await.status(), StatusCode::OK);
    assert_eq!(app.get(&photo_url, Some(&admin)).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn signed_upload_urls_work_once() {
    let app = test_app(false).await;
    let member = app.sign_up("member@example.com").await;

    let signed = app
        .send(
            Request::post("/agreement/signed-upload")
                .header(header::COOKIE, &member)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await;
    let signed = json(signed).await;
    let url = signed["url"].as_str().unwrap().to_string();

    let put = |url: String| {
        Request::put(url)
            .header(header::CONTENT_TYPE, "image/jpeg")
            .body(Body::from(vec![1u8, 2, 3]))
            .unwrap()
    };
    assert_eq!(app.send(put(url.clone())).await.status(), StatusCode::OK);
    assert_eq!(app.send(put(url)).await.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn debug_endpoints_are_opt_in() {
    let app = test_app(false).await;
    let response = app.get("/api/debug/session", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let app = test_app(true).await;
    let cookie = app.sign_up("new@example.com").await;
    let response = app.get("/api/debug/session", Some(&cookie)).await;
    let report = json(response).await;
    assert_eq!(report["signed_in"], true);
    assert_eq!(report["identity"]["email"], "new@example.com");
    // Read-only: no profile row was created
    assert_eq!(report["state"], "new");
    assert_eq!(report["capabilities"], serde_json::json!(["complete_agreement"]));
}

#[tokio::test]
async fn uploaded_photos_are_only_served_as_images() {
    let app = test_app(false).await;
    let admin = app.sign_up(ADMIN_EMAIL).await;
    app.get("/feed", Some(&admin)).await;
    let admin_id = app.account_id(ADMIN_EMAIL);

    // A page declared as a PNG is stored and served as a PNG
    let response = app
        .create_post(
            &admin,
            &[("photos", "evil.html", "image/png", "<script>alert(document.domain)</script>")],
        )
        .await;
    assert!(location(&response).starts_with("/post/"));
    let photos = app.post_photos();
    assert_eq!(photos.len(), 1);
    assert!(photos[0].ends_with("-evil.png"), "stored as {}", photos[0]);

    let response = app.get(&photos[0], None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");

    // Non-images are refused outright
    for (file_name, content_type) in [("page.html", "text/html"), ("logo.svg", "image/svg+xml")] {
        let response = app
            .create_post(&admin, &[("photos", file_name, content_type, "<svg onload=alert(1)>")])
            .await;
        assert!(location(&response).starts_with("/post?error="), "{} was accepted", file_name);
    }
    assert_eq!(app.post_count(), 1);

    // Photos stored before a refused one are removed again
    let response = app
        .create_post(
            &admin,
            &[
                ("photos", "fine.jpg", "image/jpeg", "jpeg"),
                ("photos", "page.html", "text/html", "<html>"),
            ],
        )
        .await;
    assert!(location(&response).starts_with("/post?error="));
    assert_eq!(app.post_count(), 1);
    let owner_dir = app._dir.path().join("uploads").join("post-images").join(&admin_id);
    assert_eq!(std::fs::read_dir(owner_dir).unwrap().count(), 1);
}

#[tokio::test]
async fn rejected_member_cannot_resubmit_the_agreement() {
    let app = test_app(false).await;
    let admin = app.sign_up(ADMIN_EMAIL).await;
    app.get("/feed", Some(&admin)).await;
    let member = app.sign_up("member@example.com").await;
    let member_id = app.account_id("member@example.com");
    app.complete_agreement(&member, "Mem Ber").await;
    app.post_form(&format!("/admin/users/{}/reject", member_id), Some(&admin), "")
        .await;
    let before = app.verification(&member_id);

    let response = app
        .send(
            Request::post("/agreement/signed-upload")
                .header(header::COOKIE, &member)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = multipart_with_files(
        &[("full_name", "Someone Else"), ("agree", "on")],
        &[("verification_photo", "new.jpg", "image/jpeg", "jpeg")],
    );
    let response = app.post_multipart("/agreement", &member, body).await;
    assert!(location(&response).starts_with("/pending"));

    assert_eq!(app.verification(&member_id), before);
    assert_eq!(before.0.as_deref(), Some("Mem Ber"));
}

#[tokio::test]
async fn unread_stream_closes_once_member_is_rejected() {
    let app = test_app(false).await;
    let admin = app.sign_up(ADMIN_EMAIL).await;
    app.get("/feed", Some(&admin)).await;
    let member = app.sign_up("member@example.com").await;
    let member_id = app.account_id("member@example.com");
    app.complete_agreement(&member, "Mem Ber").await;
    app.post_form(&format!("/admin/users/{}/approve", member_id), Some(&admin), "approve=true")
        .await;

    let response = app.get("/notifications/stream", Some(&member)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let mut events = response.into_body().into_data_stream();

    let first = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .expect("first event")
        .expect("stream open")
        .unwrap();
    assert!(String::from_utf8_lossy(&first).contains("event: unread"));

    app.post_form(&format!("/admin/users/{}/reject", member_id), Some(&admin), "")
        .await;

    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(chunk) = events.next().await {
            chunk.unwrap();
        }
    })
    .await;
    assert!(drained.is_ok(), "stream stayed open after rejection");
}
