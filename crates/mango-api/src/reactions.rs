use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use mango_types::api::{ReactionCreate, ReactionList, ReactionRead};
use mango_types::events::SocketEvent;

use crate::auth::AppState;
use crate::blocking;
use crate::error::{ApiError, ApiResult};
use crate::messages::{message_audience, publish};
use crate::middleware::CurrentUser;

pub async fn add_reaction(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<ReactionCreate>,
) -> ApiResult<impl IntoResponse> {
    if req.kind.trim().is_empty() {
        return Err(ApiError::BadRequest("Reaction type must not be empty".into()));
    }

    let user_id = user.id;
    let (reaction, audience) = blocking(&state, move |db| {
        let Some(message) = db.get_message(req.message_id)? else {
            return Ok(Err(ApiError::NotFound));
        };
        if let Some(chat_id) = message.chat_id {
            if !db.is_chat_participant(chat_id, user_id)? {
                return Ok(Err(ApiError::Forbidden));
            }
        }

        let Some(reaction) = db.insert_reaction(user_id, &req.kind, message.id)? else {
            return Ok(Err(ApiError::Conflict("REACTION_ALREADY_EXISTS".into())));
        };
        let audience = message_audience(db, message.chat_id)?;
        Ok(Ok((reaction, audience)))
    })
    .await??;

    let reaction = ReactionRead::from(reaction);
    publish(
        &state,
        &SocketEvent::ReactionAdd(reaction.clone()),
        audience.as_deref(),
    );

    info!(
        "User {} reacted '{}' to message {}",
        user_id, reaction.kind, reaction.message_id
    );
    Ok((
        StatusCode::CREATED,
        Json(ReactionList {
            reactions: vec![reaction],
        }),
    ))
}

pub async fn get_reactions(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<Json<ReactionList>> {
    let rows = blocking(&state, move |db| db.get_reactions_by_user(user.id)).await?;
    Ok(Json(ReactionList {
        reactions: rows.into_iter().map(Into::into).collect(),
    }))
}

/// Reactions on one message. Messages inside a chat are only visible to
/// its participants.
pub async fn get_message_reactions(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(message_id): Path<i64>,
) -> ApiResult<Json<ReactionList>> {
    let user_id = user.id;
    let rows = blocking(&state, move |db| {
        let Some(message) = db.get_message(message_id)? else {
            return Ok(Err(ApiError::NotFound));
        };
        if let Some(chat_id) = message.chat_id {
            if !db.is_chat_participant(chat_id, user_id)? {
                return Ok(Err(ApiError::Forbidden));
            }
        }
        Ok(Ok(db.get_reactions_by_message(message_id)?))
    })
    .await??;

    Ok(Json(ReactionList {
        reactions: rows.into_iter().map(Into::into).collect(),
    }))
}

pub async fn delete_reaction(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    let user_id = user.id;
    let (reaction, audience) = blocking(&state, move |db| {
        let Some(reaction) = db.get_reaction(id)? else {
            return Ok(Err(ApiError::NotFound));
        };
        if reaction.user_id != user_id {
            return Ok(Err(ApiError::Forbidden));
        }

        let chat_id = db.get_message(reaction.message_id)?.and_then(|m| m.chat_id);
        let audience = message_audience(db, chat_id)?;
        db.delete_reaction(id)?;
        Ok(Ok((reaction, audience)))
    })
    .await??;

    publish(
        &state,
        &SocketEvent::ReactionRemove {
            id: reaction.id,
            message_id: reaction.message_id,
            user_id: reaction.user_id,
        },
        audience.as_deref(),
    );

    info!("Reaction {} removed by {}", id, user_id);
    Ok(StatusCode::NO_CONTENT)
}
