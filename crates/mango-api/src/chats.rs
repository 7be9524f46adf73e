use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use mango_types::api::{ChatCreate, ChatList, ChatRead, MessageList};
use mango_types::events::SocketEvent;

use crate::auth::AppState;
use crate::blocking;
use crate::error::{ApiError, ApiResult};
use crate::middleware::CurrentUser;

/// POST /chat/add creates a chat between the caller and the listed users.
/// Ids that match no user are dropped.
pub async fn create_chat(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<ChatCreate>,
) -> ApiResult<impl IntoResponse> {
    let mut requested = req.participants;
    requested.push(user.id);
    requested.sort_unstable();
    requested.dedup();

    let chat = blocking(&state, move |db| {
        let participants = db.existing_user_ids(&requested)?;
        if participants.len() < 2 {
            return Ok(Err(ApiError::BadRequest(
                "A chat needs at least two existing participants".into(),
            )));
        }
        Ok(Ok(db.create_chat(&participants)?))
    })
    .await??;

    let chat = ChatRead::from(chat);
    state
        .dispatcher
        .send_to(&SocketEvent::ChatCreate(chat.clone()), &chat.participants);

    info!(
        "Chat {} created by {} with {} participants",
        chat.id,
        user.id,
        chat.participants.len()
    );
    Ok((StatusCode::CREATED, Json(chat)))
}

pub async fn get_chats(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<Json<ChatList>> {
    let rows = blocking(&state, move |db| db.get_chats_for_user(user.id)).await?;
    Ok(Json(ChatList {
        chats: rows.into_iter().map(Into::into).collect(),
    }))
}

pub async fn get_chat_messages(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<MessageList>> {
    let user_id = user.id;
    let rows = blocking(&state, move |db| {
        if db.get_chat(id)?.is_none() {
            return Ok(Err(ApiError::NotFound));
        }
        if !db.is_chat_participant(id, user_id)? {
            return Ok(Err(ApiError::Forbidden));
        }
        Ok(Ok(db.get_messages_by_chat(id)?))
    })
    .await??;

    Ok(Json(MessageList {
        messages: rows.into_iter().map(Into::into).collect(),
    }))
}
