use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// International phone number, optional leading `+`, 8 to 15 digits.
pub static PHONE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[1-9][0-9]{7,14}$").expect("phone pattern compiles"));

// -- JWT Claims --

pub const AUTH_AUDIENCE: &str = "mango:auth";
pub const RESET_AUDIENCE: &str = "mango:reset";
pub const VERIFY_AUDIENCE: &str = "mango:verify";

/// Claims carried by every token the server issues. The audience tells
/// access tokens apart from password-reset and verification tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub email: String,
    pub aud: String,
    pub jti: Uuid,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[validate(length(min = 1, max = 30))]
    pub name: String,
    pub surname: String,
    #[validate(regex(path = *PHONE_NUMBER))]
    pub phone_number: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub is_verified: bool,
}

fn default_true() -> bool {
    true
}

/// Login form. `username` holds the account email.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    pub token: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub token: String,
}

// -- Users --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRead {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub surname: String,
    pub phone_number: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub is_verified: bool,
}

/// Partial update of a user. The privileged flags are only honoured on the
/// superuser routes.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct UserUpdate {
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 8, max = 128))]
    pub password: Option<String>,
    #[validate(length(min = 1, max = 30))]
    pub name: Option<String>,
    pub surname: Option<String>,
    #[validate(regex(path = *PHONE_NUMBER))]
    pub phone_number: Option<String>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
    pub is_verified: Option<bool>,
}

// -- Pictures --

#[derive(Debug, Default, Deserialize)]
pub struct PictureQuery {
    #[serde(default)]
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PictureRead {
    pub id: i64,
    pub user_id: i64,
    pub filename: String,
    pub tag: String,
    pub content_type: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PictureList {
    pub pictures: Vec<PictureRead>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageCreate {
    pub body: String,
    pub chat_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRead {
    pub id: i64,
    pub author_id: i64,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub chat_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageList {
    pub messages: Vec<MessageRead>,
}

// -- Reactions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReactionCreate {
    #[serde(rename = "type")]
    pub kind: String,
    pub message_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionRead {
    pub id: i64,
    pub user_id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub message_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReactionList {
    pub reactions: Vec<ReactionRead>,
}

// -- Chats --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatCreate {
    pub participants: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRead {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub participants: Vec<i64>,
    pub messages: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatList {
    pub chats: Vec<ChatRead>,
}

// -- Prompt proxy --

#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    pub prompt: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PromptAnswer {
    pub answer: String,
}

#[derive(Debug, Deserialize)]
pub struct ImageRequest {
    pub prompt: String,
    pub image_size: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImageResponse {
    pub images: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnginesResponse {
    pub engines: Vec<String>,
}

// -- Releases --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReleaseCreate {
    pub name: String,
    pub artist: String,
    pub genre: String,
    pub story_text: String,
    pub record_label: String,
    pub filename: String,
    pub cover_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseRead {
    pub id: i64,
    pub name: String,
    pub artist: String,
    pub genre: String,
    pub release_date: DateTime<Utc>,
    pub story_text: String,
    pub record_label: String,
    pub filename: String,
    pub cover_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseCreated {
    pub details: String,
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseNameQuery {
    pub release_name: String,
}

// -- Admin --

#[derive(Debug, Deserialize)]
pub struct DropQuery {
    pub command: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageBody {
    pub message: String,
}
