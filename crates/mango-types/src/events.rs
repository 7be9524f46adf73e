use serde::{Deserialize, Serialize};

use crate::api::{ChatRead, MessageRead, ReactionRead};

/// Events pushed to `/socket` clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SocketEvent {
    /// Server confirms the connection is authenticated
    Ready { user_id: i64, email: String },

    /// A message was posted
    MessageCreate(MessageRead),

    /// A reaction was added to a message
    ReactionAdd(ReactionRead),

    /// A reaction was removed from a message
    ReactionRemove {
        id: i64,
        message_id: i64,
        user_id: i64,
    },

    /// A chat the receiver takes part in was created
    ChatCreate(ChatRead),
}
