use anyhow::{Result, bail};
use rusqlite::Connection;
use tracing::{info, warn};

/// Every table the server owns, children before parents so they can be
/// dropped in this order.
pub const TABLES: &[&str] = &[
    "revoked_tokens",
    "reactions",
    "messages",
    "chat_participants",
    "chats",
    "pictures",
    "releases",
    "users",
];

pub fn create_all(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            email           TEXT NOT NULL UNIQUE,
            name            TEXT NOT NULL,
            surname         TEXT NOT NULL,
            phone_number    TEXT NOT NULL,
            hashed_password TEXT NOT NULL,
            is_active       INTEGER NOT NULL DEFAULT 1,
            is_superuser    INTEGER NOT NULL DEFAULT 0,
            is_verified     INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS pictures (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            filename        TEXT NOT NULL,
            tag             TEXT NOT NULL DEFAULT '',
            content_type    TEXT NOT NULL,
            size            INTEGER NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_pictures_user ON pictures(user_id);

        CREATE TABLE IF NOT EXISTS chats (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chat_participants (
            chat_id         INTEGER NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
            user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            PRIMARY KEY (chat_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_chat_participants_user
            ON chat_participants(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            author_id       INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            body            TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            chat_id         INTEGER REFERENCES chats(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_messages_author ON messages(author_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, created_at);

        CREATE TABLE IF NOT EXISTS reactions (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            type            TEXT NOT NULL,
            message_id      INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            created_at      TEXT NOT NULL,
            UNIQUE(message_id, user_id, type)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_user ON reactions(user_id);

        CREATE TABLE IF NOT EXISTS releases (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            name            TEXT NOT NULL,
            artist          TEXT NOT NULL,
            genre           TEXT NOT NULL,
            release_date    TEXT NOT NULL,
            story_text      TEXT NOT NULL,
            record_label    TEXT NOT NULL,
            filename        TEXT NOT NULL,
            cover_id        INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_releases_name ON releases(name);

        CREATE TABLE IF NOT EXISTS revoked_tokens (
            jti             TEXT PRIMARY KEY,
            expires_at      INTEGER NOT NULL
        );
        ",
    )?;

    info!("Database schema ready");
    Ok(())
}

pub fn drop_all(conn: &Connection) -> Result<()> {
    for table in TABLES {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {table}"))?;
    }
    warn!("All tables dropped");
    Ok(())
}

/// Drop one table by name. Only names from [`TABLES`] are accepted, anything
/// else is refused before it reaches SQL.
pub fn drop_table(conn: &Connection, name: &str) -> Result<()> {
    let Some(table) = TABLES.iter().find(|t| **t == name) else {
        bail!("unknown table: {}", name);
    };

    // Other tables may still reference this one.
    conn.pragma_update(None, "foreign_keys", "OFF")?;
    let dropped = conn.execute_batch(&format!("DROP TABLE IF EXISTS {table}"));
    conn.pragma_update(None, "foreign_keys", "ON")?;
    dropped?;

    warn!("Table {} dropped", table);
    Ok(())
}

pub fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    Ok(conn
        .prepare_cached("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?
        .exists([name])?)
}
