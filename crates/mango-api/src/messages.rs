use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;

use mango_db::Database;
use mango_types::api::{MessageCreate, MessageList, MessageRead};
use mango_types::events::SocketEvent;

use crate::auth::AppState;
use crate::blocking;
use crate::error::{ApiError, ApiResult};
use crate::middleware::CurrentUser;

/// Who gets socket events about a message: the chat's participants, or
/// everyone (`None`) for messages outside any chat.
pub(crate) fn message_audience(db: &Database, chat_id: Option<i64>) -> anyhow::Result<Option<Vec<i64>>> {
    chat_id.map(|id| db.chat_participants(id)).transpose()
}

pub(crate) fn publish(state: &AppState, event: &SocketEvent, audience: Option<&[i64]>) {
    match audience {
        Some(user_ids) => state.dispatcher.send_to(event, user_ids),
        None => state.dispatcher.broadcast(event),
    }
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<MessageCreate>,
) -> ApiResult<impl IntoResponse> {
    if req.body.trim().is_empty() {
        return Err(ApiError::BadRequest("Message body must not be empty".into()));
    }

    let author_id = user.id;
    let (message, audience) = blocking(&state, move |db| {
        if let Some(chat_id) = req.chat_id {
            if db.get_chat(chat_id)?.is_none() {
                return Ok(Err(ApiError::NotFound));
            }
            if !db.is_chat_participant(chat_id, author_id)? {
                return Ok(Err(ApiError::Forbidden));
            }
        }

        let message = db.insert_message(author_id, &req.body, req.chat_id, Utc::now())?;
        let audience = message_audience(db, message.chat_id)?;
        Ok(Ok((message, audience)))
    })
    .await??;

    let message = MessageRead::from(message);
    publish(
        &state,
        &SocketEvent::MessageCreate(message.clone()),
        audience.as_deref(),
    );

    info!("Message {} sent by {}", message.id, author_id);
    Ok((
        StatusCode::CREATED,
        Json(MessageList {
            messages: vec![message],
        }),
    ))
}

/// Messages written by the caller, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<Json<MessageList>> {
    let rows = blocking(&state, move |db| db.get_messages_by_author(user.id)).await?;
    Ok(Json(MessageList {
        messages: rows.into_iter().map(Into::into).collect(),
    }))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let author_id = user.id;
    blocking(&state, move |db| {
        let Some(message) = db.get_message(id)? else {
            return Ok(Err(ApiError::NotFound));
        };
        if message.author_id != author_id {
            return Ok(Err(ApiError::Forbidden));
        }
        db.delete_message(id)?;
        Ok(Ok(()))
    })
    .await??;

    info!("Message {} deleted by {}", id, author_id);
    Ok(StatusCode::NO_CONTENT)
}
