pub mod admin;
pub mod auth;
pub mod chats;
pub mod completions;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod password;
pub mod pictures;
pub mod prompt;
pub mod reactions;
pub mod releases;
pub mod socket;
pub mod tokens;
pub mod users;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use serde_json::{Value, json};
use tracing::error;

use mango_db::Database;

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};

/// Run a database closure on the blocking pool. Database failures surface as
/// [`ApiError::Database`].
pub(crate) async fn blocking<F, T>(state: &AppState, f: F) -> ApiResult<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.to_string())
        })?
        .map_err(ApiError::Database)
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/jwt/login", post(auth::login))
        .route("/auth/forgot-password", post(auth::forgot_password))
        .route("/auth/reset-password", post(auth::reset_password))
        .route("/auth/request-verify-token", post(auth::request_verify_token))
        .route("/auth/verify", post(auth::verify))
        // The socket authenticates through its query string.
        .route("/socket", get(socket::upgrade))
        // Checks its own caller, see `admin::drop_all`.
        .route("/drop_all", post(admin::drop_all));

    let protected_routes = Router::new()
        .route("/auth/jwt/logout", post(auth::logout))
        .route("/users/me", get(users::me).patch(users::update_me))
        .route(
            "/users/{id}",
            get(users::get_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
        .route("/current_user", get(users::current_user))
        .route("/pictures/add", post(pictures::add_picture))
        .route("/pictures/get", get(pictures::get_pictures))
        .route(
            "/pictures/{id}",
            get(pictures::download_picture).delete(pictures::delete_picture),
        )
        .route("/private/add", post(messages::send_message))
        .route("/private/get", get(messages::get_messages))
        .route("/private/{id}", delete(messages::delete_message))
        .route("/reactions/add", post(reactions::add_reaction))
        .route("/reactions/get", get(reactions::get_reactions))
        .route(
            "/reactions/message/{message_id}",
            get(reactions::get_message_reactions),
        )
        .route("/reactions/{id}", delete(reactions::delete_reaction))
        .route("/chat/add", post(chats::create_chat))
        .route("/chat/get", get(chats::get_chats))
        .route("/chat/{id}/messages", get(chats::get_chat_messages))
        .route("/prompt/do", post(prompt::complete))
        .route("/prompt/image", post(prompt::generate_images))
        .route("/prompt/engines", get(prompt::list_engines))
        .route("/releases/add", post(releases::add_release))
        .route("/releases/get/{id}", get(releases::get_release))
        .route("/releases/get_by_name", get(releases::get_release_by_name))
        .route("/releases/get_all", get(releases::get_all_releases))
        .route("/releases/delete/{id}", delete(releases::delete_release))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .with_state(state)
}
