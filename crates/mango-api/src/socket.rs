use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
};
use serde::Deserialize;

use mango_gateway::connection;

use crate::auth::AppState;
use crate::error::ApiResult;
use crate::middleware::authenticate;

#[derive(Debug, Deserialize)]
pub struct SocketQuery {
    pub token: String,
}

/// GET /socket?token= checks the access token before upgrading, so only
/// authenticated users ever reach the event loop.
pub async fn upgrade(
    State(state): State<AppState>,
    Query(query): Query<SocketQuery>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let (_, user) = authenticate(&state, &query.token).await?;

    let dispatcher = state.dispatcher.clone();
    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, dispatcher, user.id, user.email)
    }))
}
