//! Database row types. These map directly to SQLite rows and stay distinct
//! from the wire models in mango-types; the `From` impls below are the only
//! bridge between the two.

use chrono::{DateTime, Utc};
use mango_types::api::{ChatRead, MessageRead, PictureRead, ReactionRead, ReleaseRead, UserRead};

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub surname: String,
    pub phone_number: String,
    pub hashed_password: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

pub struct NewUser<'a> {
    pub email: &'a str,
    pub name: &'a str,
    pub surname: &'a str,
    pub phone_number: &'a str,
    pub hashed_password: &'a str,
    pub is_active: bool,
    pub is_superuser: bool,
    pub is_verified: bool,
}

/// Column updates for a user; `None` leaves the column untouched.
#[derive(Debug, Default)]
pub struct UserChanges {
    pub email: Option<String>,
    pub name: Option<String>,
    pub surname: Option<String>,
    pub phone_number: Option<String>,
    pub hashed_password: Option<String>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
    pub is_verified: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct PictureRow {
    pub id: i64,
    pub user_id: i64,
    pub filename: String,
    pub tag: String,
    pub content_type: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub author_id: i64,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub chat_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ReactionRow {
    pub id: i64,
    pub user_id: i64,
    pub kind: String,
    pub message_id: i64,
    pub created_at: DateTime<Utc>,
}

/// A chat with its participant ids and the ids of its messages.
#[derive(Debug, Clone)]
pub struct ChatRow {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub participants: Vec<i64>,
    pub message_ids: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct ReleaseRow {
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

pub struct NewRelease<'a> {
    pub name: &'a str,
    pub artist: &'a str,
    pub genre: &'a str,
    pub release_date: DateTime<Utc>,
    pub story_text: &'a str,
    pub record_label: &'a str,
    pub filename: &'a str,
    pub cover_id: Option<i64>,
}

impl From<UserRow> for UserRead {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            name: row.name,
            surname: row.surname,
            phone_number: row.phone_number,
            is_active: row.is_active,
            is_superuser: row.is_superuser,
            is_verified: row.is_verified,
        }
    }
}

impl From<PictureRow> for PictureRead {
    fn from(row: PictureRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            filename: row.filename,
            tag: row.tag,
            content_type: row.content_type,
            size: row.size,
            created_at: row.created_at,
        }
    }
}

impl From<MessageRow> for MessageRead {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            author_id: row.author_id,
            body: row.body,
            created_at: row.created_at,
            chat_id: row.chat_id,
        }
    }
}

impl From<ReactionRow> for ReactionRead {
    fn from(row: ReactionRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            kind: row.kind,
            message_id: row.message_id,
        }
    }
}

impl From<ChatRow> for ChatRead {
    fn from(row: ChatRow) -> Self {
        Self {
            id: row.id,
            created_at: row.created_at,
            participants: row.participants,
            messages: row.message_ids,
        }
    }
}

impl From<ReleaseRow> for ReleaseRead {
    fn from(row: ReleaseRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            artist: row.artist,
            genre: row.genre,
            release_date: row.release_date,
            story_text: row.story_text,
            record_label: row.record_label,
            filename: row.filename,
            cover_id: row.cover_id,
        }
    }
}
