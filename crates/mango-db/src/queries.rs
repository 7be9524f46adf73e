use crate::Database;
use crate::models::{
    ChatRow, MessageRow, NewRelease, NewUser, PictureRow, ReactionRow, ReleaseRow, UserChanges,
    UserRow,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};

const USER_COLUMNS: &str = "id, email, name, surname, phone_number, hashed_password, \
                            is_active, is_superuser, is_verified, created_at";
const PICTURE_COLUMNS: &str = "id, user_id, filename, tag, content_type, size, created_at";
const MESSAGE_COLUMNS: &str = "id, author_id, body, created_at, chat_id";
const REACTION_COLUMNS: &str = "id, user_id, type, message_id, created_at";
const RELEASE_COLUMNS: &str = "id, name, artist, genre, release_date, story_text, \
                               record_label, filename, cover_id";

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &NewUser<'_>) -> Result<UserRow> {
        self.with_conn(|conn| {
            let row = conn.query_row(
                &format!(
                    "INSERT INTO users (email, name, surname, phone_number, hashed_password,
                                        is_active, is_superuser, is_verified, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     RETURNING {USER_COLUMNS}"
                ),
                rusqlite::params![
                    user.email,
                    user.name,
                    user.surname,
                    user.phone_number,
                    user.hashed_password,
                    user.is_active,
                    user.is_superuser,
                    user.is_verified,
                    Utc::now(),
                ],
                user_from_row,
            )?;
            Ok(row)
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                [email],
                user_from_row,
            )
            .optional()
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [id],
                user_from_row,
            )
            .optional()
        })
    }

    /// Apply the given column changes. Returns the updated row, or `None` if
    /// the user does not exist.
    pub fn update_user(&self, id: i64, changes: &UserChanges) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "UPDATE users SET
                        email           = COALESCE(?2, email),
                        name            = COALESCE(?3, name),
                        surname         = COALESCE(?4, surname),
                        phone_number    = COALESCE(?5, phone_number),
                        hashed_password = COALESCE(?6, hashed_password),
                        is_active       = COALESCE(?7, is_active),
                        is_superuser    = COALESCE(?8, is_superuser),
                        is_verified     = COALESCE(?9, is_verified)
                     WHERE id = ?1
                     RETURNING {USER_COLUMNS}"
                ),
                rusqlite::params![
                    id,
                    changes.email,
                    changes.name,
                    changes.surname,
                    changes.phone_number,
                    changes.hashed_password,
                    changes.is_active,
                    changes.is_superuser,
                    changes.is_verified,
                ],
                user_from_row,
            )
            .optional()
        })
    }

    pub fn delete_user(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM users WHERE id = ?1", [id])? > 0))
    }

    /// Filter `ids` down to the ones that name existing users, preserving
    /// order and dropping duplicates.
    pub fn existing_user_ids(&self, ids: &[i64]) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT 1 FROM users WHERE id = ?1")?;
            let mut found = Vec::with_capacity(ids.len());
            for id in ids {
                if !found.contains(id) && stmt.exists([id])? {
                    found.push(*id);
                }
            }
            Ok(found)
        })
    }

    // -- Revoked tokens --

    pub fn revoke_token(&self, jti: &str, expires_at: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO revoked_tokens (jti, expires_at) VALUES (?1, ?2)",
                rusqlite::params![jti, expires_at],
            )?;
            // Expired entries can no longer match a valid token.
            conn.execute(
                "DELETE FROM revoked_tokens WHERE expires_at < ?1",
                [Utc::now().timestamp()],
            )?;
            Ok(())
        })
    }

    pub fn is_token_revoked(&self, jti: &str) -> Result<bool> {
        self.with_conn(|conn| {
            Ok(conn
                .prepare_cached("SELECT 1 FROM revoked_tokens WHERE jti = ?1")?
                .exists([jti])?)
        })
    }

    // -- Pictures --

    pub fn insert_picture(
        &self,
        user_id: i64,
        filename: &str,
        tag: &str,
        content_type: &str,
        size: i64,
    ) -> Result<PictureRow> {
        self.with_conn(|conn| {
            let row = conn.query_row(
                &format!(
                    "INSERT INTO pictures (user_id, filename, tag, content_type, size, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     RETURNING {PICTURE_COLUMNS}"
                ),
                rusqlite::params![user_id, filename, tag, content_type, size, Utc::now()],
                picture_from_row,
            )?;
            Ok(row)
        })
    }

    pub fn get_picture(&self, id: i64) -> Result<Option<PictureRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {PICTURE_COLUMNS} FROM pictures WHERE id = ?1"),
                [id],
                picture_from_row,
            )
            .optional()
        })
    }

    pub fn get_pictures_by_user(&self, user_id: i64) -> Result<Vec<PictureRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PICTURE_COLUMNS} FROM pictures WHERE user_id = ?1 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map([user_id], picture_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_picture(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM pictures WHERE id = ?1", [id])? > 0))
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        author_id: i64,
        body: &str,
        chat_id: Option<i64>,
        created_at: DateTime<Utc>,
    ) -> Result<MessageRow> {
        self.with_conn(|conn| {
            let row = conn.query_row(
                &format!(
                    "INSERT INTO messages (author_id, body, created_at, chat_id)
                     VALUES (?1, ?2, ?3, ?4)
                     RETURNING {MESSAGE_COLUMNS}"
                ),
                rusqlite::params![author_id, body, created_at, chat_id],
                message_from_row,
            )?;
            Ok(row)
        })
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                [id],
                message_from_row,
            )
            .optional()
        })
    }

    pub fn get_messages_by_author(&self, author_id: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE author_id = ?1 ORDER BY created_at, id"
            ))?;
            let rows = stmt
                .query_map([author_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_messages_by_chat(&self, chat_id: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1 ORDER BY created_at, id"
            ))?;
            let rows = stmt
                .query_map([chat_id], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_message(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM messages WHERE id = ?1", [id])? > 0))
    }

    // -- Reactions --

    /// Insert a reaction. Returns `None` when the user already reacted to the
    /// message with the same type.
    pub fn insert_reaction(
        &self,
        user_id: i64,
        kind: &str,
        message_id: i64,
    ) -> Result<Option<ReactionRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "INSERT INTO reactions (user_id, type, message_id, created_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT (message_id, user_id, type) DO NOTHING
                     RETURNING {REACTION_COLUMNS}"
                ),
                rusqlite::params![user_id, kind, message_id, Utc::now()],
                reaction_from_row,
            )
            .optional()
        })
    }

    pub fn get_reaction(&self, id: i64) -> Result<Option<ReactionRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {REACTION_COLUMNS} FROM reactions WHERE id = ?1"),
                [id],
                reaction_from_row,
            )
            .optional()
        })
    }

    pub fn get_reactions_by_user(&self, user_id: i64) -> Result<Vec<ReactionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REACTION_COLUMNS} FROM reactions WHERE user_id = ?1 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map([user_id], reaction_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_reactions_by_message(&self, message_id: i64) -> Result<Vec<ReactionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REACTION_COLUMNS} FROM reactions WHERE message_id = ?1 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map([message_id], reaction_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_reaction(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM reactions WHERE id = ?1", [id])? > 0))
    }

    // -- Chats --

    /// Create a chat with the given participants in one transaction.
    pub fn create_chat(&self, participants: &[i64]) -> Result<ChatRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let created_at = Utc::now();
            let id: i64 = tx.query_row(
                "INSERT INTO chats (created_at) VALUES (?1) RETURNING id",
                [created_at],
                |row| row.get(0),
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO chat_participants (chat_id, user_id) VALUES (?1, ?2)",
                )?;
                for user_id in participants {
                    stmt.execute([id, *user_id])?;
                }
            }
            let chat = load_chat(&tx, id)?;
            tx.commit()?;
            chat.ok_or_else(|| anyhow::anyhow!("chat {} vanished during creation", id))
        })
    }

    pub fn get_chat(&self, id: i64) -> Result<Option<ChatRow>> {
        self.with_conn(|conn| load_chat(conn, id))
    }

    pub fn get_chats_for_user(&self, user_id: i64) -> Result<Vec<ChatRow>> {
        self.with_conn(|conn| {
            let ids: Vec<i64> = conn
                .prepare(
                    "SELECT chat_id FROM chat_participants WHERE user_id = ?1 ORDER BY chat_id",
                )?
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut chats = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(chat) = load_chat(conn, id)? {
                    chats.push(chat);
                }
            }
            Ok(chats)
        })
    }

    pub fn chat_participants(&self, chat_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| query_participants(conn, chat_id))
    }

    pub fn is_chat_participant(&self, chat_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            Ok(conn
                .prepare_cached(
                    "SELECT 1 FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2",
                )?
                .exists([chat_id, user_id])?)
        })
    }

    // -- Releases --

    pub fn insert_release(&self, release: &NewRelease<'_>) -> Result<ReleaseRow> {
        self.with_conn(|conn| {
            let row = conn.query_row(
                &format!(
                    "INSERT INTO releases (name, artist, genre, release_date, story_text,
                                           record_label, filename, cover_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     RETURNING {RELEASE_COLUMNS}"
                ),
                rusqlite::params![
                    release.name,
                    release.artist,
                    release.genre,
                    release.release_date,
                    release.story_text,
                    release.record_label,
                    release.filename,
                    release.cover_id,
                ],
                release_from_row,
            )?;
            Ok(row)
        })
    }

    pub fn get_release(&self, id: i64) -> Result<Option<ReleaseRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {RELEASE_COLUMNS} FROM releases WHERE id = ?1"),
                [id],
                release_from_row,
            )
            .optional()
        })
    }

    /// First release with exactly this name.
    pub fn get_release_by_name(&self, name: &str) -> Result<Option<ReleaseRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {RELEASE_COLUMNS} FROM releases WHERE name = ?1 ORDER BY id LIMIT 1"),
                [name],
                release_from_row,
            )
            .optional()
        })
    }

    pub fn get_all_releases(&self) -> Result<Vec<ReleaseRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {RELEASE_COLUMNS} FROM releases ORDER BY id"))?;
            let rows = stmt
                .query_map([], release_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn delete_release(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM releases WHERE id = ?1", [id])? > 0))
    }
}

fn load_chat(conn: &Connection, id: i64) -> Result<Option<ChatRow>> {
    let created_at: Option<DateTime<Utc>> = conn
        .query_row("SELECT created_at FROM chats WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;

    let Some(created_at) = created_at else {
        return Ok(None);
    };

    let participants = query_participants(conn, id)?;
    let message_ids = conn
        .prepare("SELECT id FROM messages WHERE chat_id = ?1 ORDER BY created_at, id")?
        .query_map([id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<i64>, _>>()?;

    Ok(Some(ChatRow {
        id,
        created_at,
        participants,
        message_ids,
    }))
}

fn query_participants(conn: &Connection, chat_id: i64) -> Result<Vec<i64>> {
    let ids = conn
        .prepare("SELECT user_id FROM chat_participants WHERE chat_id = ?1 ORDER BY user_id")?
        .query_map([chat_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<i64>, _>>()?;
    Ok(ids)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        surname: row.get(3)?,
        phone_number: row.get(4)?,
        hashed_password: row.get(5)?,
        is_active: row.get(6)?,
        is_superuser: row.get(7)?,
        is_verified: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn picture_from_row(row: &Row<'_>) -> rusqlite::Result<PictureRow> {
    Ok(PictureRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        filename: row.get(2)?,
        tag: row.get(3)?,
        content_type: row.get(4)?,
        size: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        author_id: row.get(1)?,
        body: row.get(2)?,
        created_at: row.get(3)?,
        chat_id: row.get(4)?,
    })
}

fn reaction_from_row(row: &Row<'_>) -> rusqlite::Result<ReactionRow> {
    Ok(ReactionRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: row.get(2)?,
        message_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn release_from_row(row: &Row<'_>) -> rusqlite::Result<ReleaseRow> {
    Ok(ReleaseRow {
        id: row.get(0)?,
        name: row.get(1)?,
        artist: row.get(2)?,
        genre: row.get(3)?,
        release_date: row.get(4)?,
        story_text: row.get(5)?,
        record_label: row.get(6)?,
        filename: row.get(7)?,
        cover_id: row.get(8)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
