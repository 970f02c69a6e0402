pub mod admin;
pub mod auth;
pub mod health;
pub mod reader;

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Session
        .route("/api/v1/auth/sign-in", post(auth::handle_sign_in))
        .route("/api/v1/auth/sign-out", post(auth::handle_sign_out))
        .route("/api/v1/auth/refresh", post(auth::handle_refresh))
        .route("/api/v1/auth/session", get(auth::handle_get_session))
        .route("/api/v1/auth/oauth/callback", post(auth::handle_oauth_callback))
        .route("/api/v1/auth/oauth/:provider", get(auth::handle_oauth_url))
        .route("/api/v1/auth/visibility", post(auth::handle_visibility))
        .route("/api/v1/auth/online", post(auth::handle_online))
        // Reader
        .route("/api/v1/stories", get(reader::handle_list_stories))
        .route("/api/v1/stories/:id", get(reader::handle_get_story))
        .route("/api/v1/stories/:id/read", post(reader::handle_toggle_read))
        .route(
            "/api/v1/filters",
            get(reader::handle_get_filters).put(reader::handle_put_filters),
        )
        .route("/api/v1/tags", get(reader::handle_list_tags))
        .route("/api/v1/about", get(reader::handle_get_about))
        // Admin
        .route(
            "/api/v1/admin/posts",
            get(admin::handle_list_posts).post(admin::handle_create_post),
        )
        .route(
            "/api/v1/admin/posts/:id",
            get(admin::handle_get_post)
                .put(admin::handle_save_post)
                .delete(admin::handle_delete_post),
        )
        .route(
            "/api/v1/admin/posts/:id/publish",
            post(admin::handle_publish_post),
        )
        .route(
            "/api/v1/admin/posts/:id/unpublish",
            post(admin::handle_unpublish_post),
        )
        .route(
            "/api/v1/admin/posts/:id/translations",
            post(admin::handle_link_translation),
        )
        .route("/api/v1/admin/tags", post(admin::handle_create_tag))
        .route(
            "/api/v1/admin/tags/:name",
            put(admin::handle_update_tag).delete(admin::handle_delete_tag),
        )
        .route(
            "/api/v1/admin/tags/:name/rename",
            post(admin::handle_rename_tag),
        )
        .route("/api/v1/admin/users", get(admin::handle_list_users))
        .route(
            "/api/v1/admin/users/:id/admin",
            put(admin::handle_grant_admin).delete(admin::handle_revoke_admin),
        )
        .route("/api/v1/admin/about", put(admin::handle_update_about))
        .layer(middleware::from_fn_with_state(state.clone(), track_user))
        .with_state(state)
}

/// Keeps per-user caches tied to whoever is signed in around every request,
/// including sessions dropped by a background refresh.
async fn track_user(State(state): State<AppState>, request: Request, next: Next) -> Response {
    state.sync_user();
    let response = next.run(request).await;
    state.sync_user();
    response
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::config::Config;
    use crate::local_state::LocalStore;
    use crate::models::Role;

    fn app() -> (Arc<FakeBackend>, AppState, Router) {
        let fake = Arc::new(FakeBackend::new());
        let admin = fake.add_account("admin@example.com", "pw");
        fake.grant(admin, Role::Admin);
        fake.add_account("reader@example.com", "pw");
        let config = Config {
            backend_url: "http://backend.test".into(),
            backend_anon_key: "anon".into(),
            local_state_path: String::new(),
            port: 0,
            rust_log: "debug".into(),
            posts_cache: None,
            reading_history_cache: Duration::from_secs(60),
        };
        let state = AppState::build(config, fake.clone(), Arc::new(LocalStore::in_memory()));
        (fake, state.clone(), build_router(state))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn sign_in(app: &Router, email: &str) -> Value {
        let (status, body) = send(
            app,
            "POST",
            "/api/v1/auth/sign-in",
            Some(json!({ "email": email, "password": "pw" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body
    }

    #[tokio::test]
    async fn test_health() {
        let (_fake, _state, app) = app();
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["signed_in"], false);
    }

    #[tokio::test]
    async fn test_bad_credentials_are_rejected() {
        let (_fake, _state, app) = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/auth/sign-in",
            Some(json!({ "email": "admin@example.com", "password": "nope" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_admin_routes_need_admin_role() {
        let (_fake, _state, app) = app();
        let (status, _) = send(&app, "GET", "/api/v1/admin/posts", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let session = sign_in(&app, "reader@example.com").await;
        assert_eq!(session["is_admin"], false);
        let (status, body) = send(&app, "GET", "/api/v1/admin/posts", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_publish_flow_reaches_readers() {
        let (fake, _state, app) = app();
        let session = sign_in(&app, "admin@example.com").await;
        assert_eq!(session["is_admin"], true);

        let (status, draft) = send(&app, "POST", "/api/v1/admin/posts", None).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = draft["id"].as_str().unwrap().to_string();

        let mut edited = draft.clone();
        edited["title"] = json!("The Golem of Prague");
        edited["content"] = json!("Clay, and a word.");
        let (status, _) = send(&app, "PUT", &format!("/api/v1/admin/posts/{id}"), Some(edited)).await;
        assert_eq!(status, StatusCode::OK);

        let (_, stories) = send(&app, "GET", "/api/v1/stories", None).await;
        assert!(stories["stories"].as_array().unwrap().is_empty());

        let (status, published) =
            send(&app, "POST", &format!("/api/v1/admin/posts/{id}/publish"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(published["status"], "published");

        let (_, stories) = send(&app, "GET", "/api/v1/stories", None).await;
        assert_eq!(stories["stories"][0]["title"], "The Golem of Prague");

        let (_, story) = send(&app, "GET", &format!("/api/v1/stories/{id}"), None).await;
        assert_eq!(story["read_status"], "read");
        assert_eq!(fake.reading_rows().len(), 1);

        let (_, toggled) = send(&app, "POST", &format!("/api/v1/stories/{id}/read"), None).await;
        assert_eq!(toggled["read_status"], "unread");
        assert!(fake.reading_rows().is_empty());
    }

    #[tokio::test]
    async fn test_sign_out_clears_session() {
        let (_fake, _state, app) = app();
        sign_in(&app, "reader@example.com").await;

        let (status, _) = send(&app, "POST", "/api/v1/auth/sign-out", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, session) = send(&app, "GET", "/api/v1/auth/session", None).await;
        assert_eq!(session["signed_in"], false);
    }

    #[tokio::test]
    async fn test_missing_story_is_not_found() {
        let (_fake, _state, app) = app();
        let (status, body) = send(
            &app,
            "GET",
            &format!("/api/v1/stories/{}", uuid::Uuid::new_v4()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    /// Signs in as the reader and leaves one read story in every per-user cache.
    async fn reader_with_history(state: &AppState, app: &Router) -> uuid::Uuid {
        sign_in(app, "reader@example.com").await;
        let post = uuid::Uuid::new_v4();
        state.history.mark_read(post).await.unwrap();
        state.history.loader().load_settled(true).await;
        let reader = state.session.user_id().unwrap();
        state.read_status.get(reader, post).begin_view();
        assert_eq!(state.history.read_post_ids().len(), 1);
        assert!(!state.read_status.is_empty());
        post
    }

    #[tokio::test]
    async fn test_oauth_callback_for_other_user_drops_reading_history() {
        let (fake, state, app) = app();
        reader_with_history(&state, &app).await;
        let other = fake.add_account("other@example.com", "pw");
        let token = fake.issue_session(other).refresh_token;

        let (status, session) = send(
            &app,
            "POST",
            "/api/v1/auth/oauth/callback",
            Some(json!({ "refresh_token": token })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(session["user_id"], json!(other));
        assert!(state.history.read_post_ids().is_empty());
        assert!(state.history.loader().data().is_empty());
        assert!(state.read_status.is_empty());
    }

    #[tokio::test]
    async fn test_session_lost_to_failed_refresh_drops_reading_history() {
        let (fake, state, app) = app();
        let post = reader_with_history(&state, &app).await;
        fake.fail_next("refresh", 401, "Invalid Refresh Token");

        let (status, _) = send(&app, "POST", "/api/v1/auth/refresh", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(state.session.current().is_none());
        assert!(state.history.loader().data().is_empty());

        sign_in(&app, "admin@example.com").await;
        state.history.loader().load_settled(false).await;
        assert!(!state.history.read_post_ids().contains(&post));
        assert!(state.read_status.is_empty());
    }
}
