//! Router-level tests: every request goes through the full axum stack,
//! including the auth middleware, against an in-memory database.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use mango_api::auth::{AppState, AppStateInner};
use mango_api::completions::{CompletionError, CompletionProvider};
use mango_api::tokens;
use mango_db::Database;
use mango_db::models::UserChanges;
use mango_gateway::Dispatcher;
use mango_types::api::{RESET_AUDIENCE, VERIFY_AUDIENCE};
use mango_types::config::Config;

const JWT_SECRET: &str = "integration-test-secret";
const PASSWORD: &str = "correct horse battery";

struct FakeProvider;

#[async_trait]
impl CompletionProvider for FakeProvider {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        Ok(format!("echo: {prompt}"))
    }

    async fn generate_images(
        &self,
        _prompt: &str,
        size: &str,
        n: u8,
    ) -> Result<Vec<String>, CompletionError> {
        Ok((0..n).map(|i| format!("https://img.test/{size}/{i}")).collect())
    }

    async fn list_engines(&self) -> Result<Vec<String>, CompletionError> {
        Ok(vec!["fake-engine".into()])
    }
}

struct FailingProvider;

#[async_trait]
impl CompletionProvider for FailingProvider {
    async fn complete(&self, _prompt: &str) -> Result<String, CompletionError> {
        Err(CompletionError::Api {
            status: 500,
            body: "model overloaded".into(),
        })
    }

    async fn generate_images(
        &self,
        _prompt: &str,
        _size: &str,
        _n: u8,
    ) -> Result<Vec<String>, CompletionError> {
        Err(CompletionError::Malformed("no data".into()))
    }

    async fn list_engines(&self) -> Result<Vec<String>, CompletionError> {
        Err(CompletionError::Malformed("no data".into()))
    }
}

struct TestApp {
    router: Router,
    state: AppState,
    uploads: TempDir,
}

fn test_app_with(dev_endpoints: bool, completions: Option<Arc<dyn CompletionProvider>>) -> TestApp {
    let uploads = tempfile::tempdir().unwrap();
    let upload_dir = uploads.path().to_string_lossy().into_owned();

    let config = Config::from_lookup(|key| match key {
        "MANGO_JWT_SECRET" => Some(JWT_SECRET.into()),
        "MANGO_UPLOAD_DIR" => Some(upload_dir.clone()),
        "MANGO_MAX_UPLOAD_BYTES" => Some("1024".into()),
        "MANGO_DEV_ENDPOINTS" => Some(dev_endpoints.to_string()),
        _ => None,
    })
    .unwrap();

    let db = Database::open_in_memory().unwrap();
    let state: AppState = Arc::new(AppStateInner::new(
        &config,
        db,
        Dispatcher::new(),
        completions,
    ));

    TestApp {
        router: mango_api::router(state.clone()),
        state,
        uploads,
    }
}

fn test_app() -> TestApp {
    test_app_with(false, Some(Arc::new(FakeProvider)))
}

impl TestApp {
    async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    async fn json(&self, method: &str, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap()).await
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn delete(&self, uri: &str, token: &str) -> StatusCode {
        let req = Request::builder()
            .method("DELETE")
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        self.send(req).await.0
    }

    async fn register(&self, email: &str) -> (StatusCode, Value) {
        self.json(
            "POST",
            "/auth/register",
            None,
            json!({
                "email": email,
                "password": PASSWORD,
                "name": "Ann",
                "surname": "Lee",
                "phone_number": " +491701234567 ",
            }),
        )
        .await
    }

    async fn login_with(&self, email: &str, password: &str) -> (StatusCode, Value) {
        self.json(
            "POST",
            "/auth/jwt/login",
            None,
            json!({ "username": email, "password": password }),
        )
        .await
    }

    async fn login(&self, email: &str) -> String {
        let (status, body) = self.login_with(email, PASSWORD).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["token_type"], "bearer");
        body["access_token"].as_str().unwrap().to_string()
    }

    /// Register and log in, returning `(token, user_id)`.
    async fn user(&self, email: &str) -> (String, i64) {
        let (status, body) = self.register(email).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let id = body["id"].as_i64().unwrap();
        (self.login(email).await, id)
    }

    fn make_superuser(&self, id: i64) {
        let changes = UserChanges {
            is_superuser: Some(true),
            ..Default::default()
        };
        self.state.db.update_user(id, &changes).unwrap().unwrap();
    }
}

// -- Health and auth --

#[tokio::test]
async fn health_needs_no_auth() {
    let app = test_app();
    let (status, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn register_forces_unprivileged_flags() {
    let app = test_app();
    let (status, body) = app
        .json(
            "POST",
            "/auth/register",
            None,
            json!({
                "email": "Ann@Example.com",
                "password": "correct horse battery",
                "name": "Ann",
                "surname": "Lee",
                "phone_number": "+491701234567",
                "is_superuser": true,
                "is_verified": true,
            }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["email"], "ann@example.com");
    assert_eq!(body["is_active"], true);
    assert_eq!(body["is_superuser"], false);
    assert_eq!(body["is_verified"], false);
    assert!(body.get("hashed_password").is_none());
}

#[tokio::test]
async fn register_rejects_duplicates_and_bad_input() {
    let app = test_app();
    let (status, body) = app.register("ann@example.com").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["phone_number"], "+491701234567");

    let (status, body) = app.register("ann@example.com").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "REGISTER_USER_ALREADY_EXISTS");

    let (status, _) = app
        .json(
            "POST",
            "/auth/register",
            None,
            json!({
                "email": "bob@example.com",
                "password": "correct horse battery",
                "name": "Bob",
                "surname": "Ray",
                "phone_number": "0123",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn login_with_wrong_password_fails() {
    let app = test_app();
    app.register("ann@example.com").await;

    let (status, body) = app
        .json(
            "POST",
            "/auth/jwt/login",
            None,
            json!({ "username": "ann@example.com", "password": "wrong password" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "LOGIN_BAD_CREDENTIALS");
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let app = test_app();
    let (status, body) = app.get("/users/me", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Unauthorized");

    let (status, _) = app.get("/users/me", Some("not-a-jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_revokes_the_token() {
    let app = test_app();
    let (token, _) = app.user("ann@example.com").await;

    let (status, body) = app.get("/users/me", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "ann@example.com");

    let (status, _) = app.json("POST", "/auth/jwt/logout", Some(&token), json!({})).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.get("/users/me", Some(&token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // A fresh login still works.
    let token = app.login("ann@example.com").await;
    let (status, _) = app.get("/users/me", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn forgot_password_always_accepts() {
    let app = test_app();
    let (status, _) = app
        .json(
            "POST",
            "/auth/forgot-password",
            None,
            json!({ "email": "nobody@example.com" }),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = app
        .json(
            "POST",
            "/auth/reset-password",
            None,
            json!({ "token": "garbage", "password": "another password" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "RESET_PASSWORD_BAD_TOKEN");
}

#[tokio::test]
async fn verify_rejects_access_tokens() {
    let app = test_app();
    let (token, _) = app.user("ann@example.com").await;

    // Audiences keep access tokens from doubling as verification tokens.
    let (status, body) = app
        .json("POST", "/auth/verify", None, json!({ "token": token }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "VERIFY_USER_BAD_TOKEN");
}

#[tokio::test]
async fn reset_password_swaps_the_password() {
    let app = test_app();
    let (_, id) = app.user("ann@example.com").await;

    let (token, _) = tokens::issue(
        JWT_SECRET,
        id,
        "ann@example.com",
        RESET_AUDIENCE,
        chrono::Duration::minutes(5),
    )
    .unwrap();

    let (status, body) = app
        .json(
            "POST",
            "/auth/reset-password",
            None,
            json!({ "token": token, "password": "a brand new secret" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["id"], id);

    let (status, body) = app.login_with("ann@example.com", PASSWORD).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "LOGIN_BAD_CREDENTIALS");

    let (status, _) = app
        .login_with("ann@example.com", "a brand new secret")
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn reset_token_for_a_changed_email_is_refused() {
    let app = test_app();
    let (_, id) = app.user("ann@example.com").await;

    let (token, _) = tokens::issue(
        JWT_SECRET,
        id,
        "old@example.com",
        RESET_AUDIENCE,
        chrono::Duration::minutes(5),
    )
    .unwrap();

    let (status, body) = app
        .json(
            "POST",
            "/auth/reset-password",
            None,
            json!({ "token": token, "password": "a brand new secret" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "RESET_PASSWORD_BAD_TOKEN");
}

#[tokio::test]
async fn verify_marks_the_user_once() {
    let app = test_app();
    let (access, id) = app.user("ann@example.com").await;

    let (token, _) = tokens::issue(
        JWT_SECRET,
        id,
        "ann@example.com",
        VERIFY_AUDIENCE,
        chrono::Duration::minutes(5),
    )
    .unwrap();

    let (status, body) = app
        .json("POST", "/auth/verify", None, json!({ "token": token }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["is_verified"], true);

    let (_, me) = app.get("/users/me", Some(&access)).await;
    assert_eq!(me["is_verified"], true);

    let (status, body) = app
        .json("POST", "/auth/verify", None, json!({ "token": token }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "VERIFY_USER_ALREADY_VERIFIED");
}

// -- Users --

#[tokio::test]
async fn current_user_greets_by_id() {
    let app = test_app();
    let (token, id) = app.user("ann@example.com").await;

    let (status, body) = app.get("/current_user", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!(format!("Hello, {id} email =ann@example.com phone=+491701234567"))
    );
}

#[tokio::test]
async fn update_me_ignores_privileged_flags() {
    let app = test_app();
    let (token, _) = app.user("ann@example.com").await;

    let (status, body) = app
        .json(
            "PATCH",
            "/users/me",
            Some(&token),
            json!({ "name": "Annie", "is_superuser": true }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["name"], "Annie");
    assert_eq!(body["is_superuser"], false);
}

#[tokio::test]
async fn update_me_refuses_a_taken_email() {
    let app = test_app();
    let (token, _) = app.user("ann@example.com").await;
    app.register("bob@example.com").await;

    let (status, body) = app
        .json(
            "PATCH",
            "/users/me",
            Some(&token),
            json!({ "email": "bob@example.com" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "UPDATE_USER_EMAIL_ALREADY_EXISTS");
}

#[tokio::test]
async fn user_admin_routes_need_superuser() {
    let app = test_app();
    let (admin_token, admin_id) = app.user("admin@example.com").await;
    let (_, bob_id) = app.user("bob@example.com").await;

    let (status, _) = app.get(&format!("/users/{bob_id}"), Some(&admin_token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    app.make_superuser(admin_id);

    let (status, body) = app.get(&format!("/users/{bob_id}"), Some(&admin_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "bob@example.com");

    let (status, body) = app
        .json(
            "PATCH",
            &format!("/users/{bob_id}"),
            Some(&admin_token),
            json!({ "is_verified": true }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_verified"], true);

    assert_eq!(
        app.delete(&format!("/users/{bob_id}"), &admin_token).await,
        StatusCode::NO_CONTENT
    );
    let (status, _) = app.get(&format!("/users/{bob_id}"), Some(&admin_token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deleting_a_user_removes_their_picture_files() {
    let app = test_app();
    let (admin_token, admin_id) = app.user("admin@example.com").await;
    let (bob, bob_id) = app.user("bob@example.com").await;
    app.make_superuser(admin_id);

    let (status, body) = app
        .send(upload("/pictures/add", &bob, "image/png", vec![1, 2, 3]))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let stored = app
        .uploads
        .path()
        .join(body["pictures"][0]["filename"].as_str().unwrap());
    assert!(stored.exists());

    assert_eq!(
        app.delete(&format!("/users/{bob_id}"), &admin_token).await,
        StatusCode::NO_CONTENT
    );
    assert!(!stored.exists());
    assert!(app.state.db.get_pictures_by_user(bob_id).unwrap().is_empty());
}

// -- Pictures --

fn upload(uri: &str, token: &str, content_type: &str, bytes: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(bytes))
        .unwrap()
}

#[tokio::test]
async fn picture_upload_download_delete() {
    let app = test_app();
    let (token, id) = app.user("ann@example.com").await;
    let (other, _) = app.user("bob@example.com").await;

    let png = vec![0x89, b'P', b'N', b'G', 1, 2, 3];
    let (status, body) = app
        .send(upload("/pictures/add?tag=avatar", &token, "image/png", png.clone()))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let picture = &body["pictures"][0];
    assert_eq!(picture["user_id"], id);
    assert_eq!(picture["tag"], "avatar");
    assert_eq!(picture["content_type"], "image/png");
    assert_eq!(picture["size"], 7);
    let picture_id = picture["id"].as_i64().unwrap();
    let stored = app.uploads.path().join(picture["filename"].as_str().unwrap());
    assert!(stored.exists());

    let (status, body) = app.get("/pictures/get", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pictures"].as_array().unwrap().len(), 1);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/pictures/{picture_id}"))
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes.as_ref(), png.as_slice());

    // Someone else's picture looks missing.
    let (status, _) = app.get(&format!("/pictures/{picture_id}"), Some(&other)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        app.delete(&format!("/pictures/{picture_id}"), &other).await,
        StatusCode::NOT_FOUND
    );

    assert_eq!(
        app.delete(&format!("/pictures/{picture_id}"), &token).await,
        StatusCode::NO_CONTENT
    );
    assert!(!stored.exists());
}

#[tokio::test]
async fn picture_upload_rejects_empty_and_oversized_bodies() {
    let app = test_app();
    let (token, _) = app.user("ann@example.com").await;

    let (status, _) = app
        .send(upload("/pictures/add", &token, "image/png", Vec::new()))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .send(upload("/pictures/add", &token, "image/png", vec![0u8; 4096]))
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["detail"], "Payload too large");
    assert_eq!(std::fs::read_dir(app.uploads.path()).unwrap().count(), 0);

    // Exactly at the limit is still accepted.
    let (status, _) = app
        .send(upload("/pictures/add", &token, "image/png", vec![7u8; 1024]))
        .await;
    assert_eq!(status, StatusCode::CREATED);
}

// -- Messages and reactions --

#[tokio::test]
async fn messages_are_listed_and_broadcast() {
    let app = test_app();
    let (token, id) = app.user("ann@example.com").await;
    let mut feed = app.state.dispatcher.subscribe();

    let (status, body) = app
        .json("POST", "/private/add", Some(&token), json!({ "body": "hello" }))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["messages"][0]["author_id"], id);
    assert!(body["messages"][0]["chat_id"].is_null());

    let event = feed.try_recv().unwrap();
    assert!(event.recipients.is_none());
    let event: Value = serde_json::from_str(&event.json).unwrap();
    assert_eq!(event["type"], "MessageCreate");
    assert_eq!(event["data"]["body"], "hello");

    app.json("POST", "/private/add", Some(&token), json!({ "body": "again" }))
        .await;
    let (_, body) = app.get("/private/get", Some(&token)).await;
    let bodies: Vec<_> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["body"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(bodies, ["hello", "again"]);

    let (status, _) = app
        .json("POST", "/private/add", Some(&token), json!({ "body": "   " }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn only_the_author_deletes_a_message() {
    let app = test_app();
    let (ann, _) = app.user("ann@example.com").await;
    let (bob, _) = app.user("bob@example.com").await;

    let (_, body) = app
        .json("POST", "/private/add", Some(&ann), json!({ "body": "mine" }))
        .await;
    let message_id = body["messages"][0]["id"].as_i64().unwrap();

    assert_eq!(
        app.delete(&format!("/private/{message_id}"), &bob).await,
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        app.delete(&format!("/private/{message_id}"), &ann).await,
        StatusCode::NO_CONTENT
    );
    assert_eq!(
        app.delete(&format!("/private/{message_id}"), &ann).await,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn reactions_lifecycle() {
    let app = test_app();
    let (ann, ann_id) = app.user("ann@example.com").await;
    let (bob, _) = app.user("bob@example.com").await;

    let (_, body) = app
        .json("POST", "/private/add", Some(&ann), json!({ "body": "react to me" }))
        .await;
    let message_id = body["messages"][0]["id"].as_i64().unwrap();

    let reaction = json!({ "type": "like", "message_id": message_id });
    let (status, body) = app
        .json("POST", "/reactions/add", Some(&ann), reaction.clone())
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["reactions"][0]["type"], "like");
    assert_eq!(body["reactions"][0]["user_id"], ann_id);
    let reaction_id = body["reactions"][0]["id"].as_i64().unwrap();

    let (status, _) = app.json("POST", "/reactions/add", Some(&ann), reaction).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Same type from another user is fine.
    let (status, _) = app
        .json(
            "POST",
            "/reactions/add",
            Some(&bob),
            json!({ "type": "like", "message_id": message_id }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app
        .json(
            "POST",
            "/reactions/add",
            Some(&ann),
            json!({ "type": "like", "message_id": 9999 }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = app
        .get(&format!("/reactions/message/{message_id}"), Some(&bob))
        .await;
    assert_eq!(body["reactions"].as_array().unwrap().len(), 2);

    let (_, body) = app.get("/reactions/get", Some(&ann)).await;
    assert_eq!(body["reactions"].as_array().unwrap().len(), 1);

    assert_eq!(
        app.delete(&format!("/reactions/{reaction_id}"), &bob).await,
        StatusCode::FORBIDDEN
    );

    let mut feed = app.state.dispatcher.subscribe();
    assert_eq!(
        app.delete(&format!("/reactions/{reaction_id}"), &ann).await,
        StatusCode::NO_CONTENT
    );
    let event: Value = serde_json::from_str(&feed.try_recv().unwrap().json).unwrap();
    assert_eq!(event["type"], "ReactionRemove");
    assert_eq!(event["data"]["id"], reaction_id);
}

// -- Chats --

#[tokio::test]
async fn chat_creation_and_membership() {
    let app = test_app();
    let (ann, ann_id) = app.user("ann@example.com").await;
    let (bob, bob_id) = app.user("bob@example.com").await;
    let (eve, eve_id) = app.user("eve@example.com").await;
    let mut feed = app.state.dispatcher.subscribe();

    let (status, chat) = app
        .json(
            "POST",
            "/chat/add",
            Some(&ann),
            json!({ "participants": [bob_id, 4242] }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{chat}");
    assert_eq!(chat["participants"], json!([ann_id, bob_id]));
    assert_eq!(chat["messages"], json!([]));
    let chat_id = chat["id"].as_i64().unwrap();

    let event = feed.try_recv().unwrap();
    assert!(event.is_for(bob_id));
    assert!(!event.is_for(eve_id));

    let (status, _) = app
        .json(
            "POST",
            "/private/add",
            Some(&bob),
            json!({ "body": "hi ann", "chat_id": chat_id }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app
        .json(
            "POST",
            "/private/add",
            Some(&eve),
            json!({ "body": "let me in", "chat_id": chat_id }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .json(
            "POST",
            "/private/add",
            Some(&ann),
            json!({ "body": "nowhere", "chat_id": 777 }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .get(&format!("/chat/{chat_id}/messages"), Some(&ann))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messages"][0]["body"], "hi ann");

    let (status, _) = app
        .get(&format!("/chat/{chat_id}/messages"), Some(&eve))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = app.get("/chat/get", Some(&bob)).await;
    assert_eq!(body["chats"][0]["id"], chat_id);
    assert_eq!(body["chats"][0]["messages"].as_array().unwrap().len(), 1);

    let (_, body) = app.get("/chat/get", Some(&eve)).await;
    assert_eq!(body["chats"], json!([]));
}

#[tokio::test]
async fn chat_needs_two_real_participants() {
    let app = test_app();
    let (ann, ann_id) = app.user("ann@example.com").await;

    let (status, _) = app
        .json(
            "POST",
            "/chat/add",
            Some(&ann),
            json!({ "participants": [ann_id, 9000] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// -- Prompt proxy --

#[tokio::test]
async fn prompt_routes_use_the_provider() {
    let app = test_app();
    let (token, _) = app.user("ann@example.com").await;

    let (status, body) = app
        .json("POST", "/prompt/do", Some(&token), json!({ "prompt": "hi" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answer"], "echo: hi");

    let (status, body) = app
        .json("POST", "/prompt/image", Some(&token), json!({ "prompt": "a cat" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let images = body["images"].as_array().unwrap();
    assert_eq!(images.len(), 4);
    assert!(images[0].as_str().unwrap().contains("512x512"));

    let (status, _) = app
        .json(
            "POST",
            "/prompt/image",
            Some(&token),
            json!({ "prompt": "a cat", "image_size": "300x300" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.get("/prompt/engines", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["engines"], json!(["fake-engine"]));
}

#[tokio::test]
async fn prompt_without_provider_is_unavailable() {
    let app = test_app_with(false, None);
    let (token, _) = app.user("ann@example.com").await;

    let (status, _) = app
        .json("POST", "/prompt/do", Some(&token), json!({ "prompt": "hi" }))
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn prompt_upstream_failure_is_bad_gateway() {
    let app = test_app_with(false, Some(Arc::new(FailingProvider)));
    let (token, _) = app.user("ann@example.com").await;

    let (status, body) = app
        .json("POST", "/prompt/do", Some(&token), json!({ "prompt": "hi" }))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["detail"].as_str().unwrap().contains("model overloaded"));
}

// -- Releases --

#[tokio::test]
async fn release_crud() {
    let app = test_app();
    let (token, _) = app.user("ann@example.com").await;

    let (status, body) = app
        .json(
            "POST",
            "/releases/add",
            Some(&token),
            json!({
                "name": "Blue Hour",
                "artist": "Ann",
                "genre": "ambient",
                "story_text": "Recorded at dawn.",
                "record_label": "Mango Records",
                "filename": "blue-hour.flac",
                "cover_id": null,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["details"], "Blue Hour successfully added");
    let id = body["id"].as_i64().unwrap();

    let (status, body) = app.get(&format!("/releases/get/{id}"), Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["artist"], "Ann");

    let (status, body) = app
        .get("/releases/get_by_name?release_name=Blue%20Hour", Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], id);

    let (_, body) = app.get("/releases/get_all", Some(&token)).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    assert_eq!(
        app.delete(&format!("/releases/delete/{id}"), &token).await,
        StatusCode::NO_CONTENT
    );
    let (status, _) = app.get(&format!("/releases/get/{id}"), Some(&token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        app.delete(&format!("/releases/delete/{id}"), &token).await,
        StatusCode::NOT_FOUND
    );
}

// -- Admin --

#[tokio::test]
async fn drop_all_is_hidden_without_dev_endpoints() {
    let app = test_app();
    let (token, id) = app.user("admin@example.com").await;
    app.make_superuser(id);

    let (status, _) = app
        .json("POST", "/drop_all?command=releases", Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn drop_all_checks_caller_and_table() {
    let app = test_app_with(true, None);
    let (token, id) = app.user("admin@example.com").await;

    let (status, _) = app
        .json("POST", "/drop_all?command=releases", None, json!({}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .json("POST", "/drop_all?command=releases", Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    app.make_superuser(id);

    let (status, _) = app
        .json(
            "POST",
            "/drop_all?command=users;DROP%20TABLE%20chats",
            Some(&token),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .json("POST", "/drop_all?command=releases", Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Table releases dropped");

    // The releases table is gone until the schema is recreated.
    let (status, _) = app.get("/releases/get_all", Some(&token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .json("POST", "/drop_all?command=create_all", Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.get("/releases/get_all", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn schema_can_be_rebuilt_after_drop_all() {
    let app = test_app_with(true, None);
    let (token, id) = app.user("admin@example.com").await;
    app.make_superuser(id);

    let (status, body) = app
        .json("POST", "/drop_all?command=drop_all", Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["message"], "Database and tables dropped");

    let (status, body) = app
        .json("POST", "/drop_all?command=create_all", Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["message"], "Database and new tables migrated");

    // The old account went with the tables.
    let (status, _) = app.get("/users/me", Some(&token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.register("admin@example.com").await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn dropping_the_users_table_can_be_undone() {
    let app = test_app_with(true, None);
    let (token, id) = app.user("admin@example.com").await;
    app.make_superuser(id);

    let (status, _) = app
        .json("POST", "/drop_all?command=users", Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.get("/users/me", Some(&token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .json("POST", "/drop_all?command=create_all", Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.register("bob@example.com").await;
    assert_eq!(status, StatusCode::CREATED);
}
