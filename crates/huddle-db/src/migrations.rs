use rusqlite::Connection;
use tracing::info;

use crate::StoreError;

pub fn run(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS chat_rooms (
            id                        TEXT PRIMARY KEY,
            workspace_id              TEXT NOT NULL,
            name                      TEXT NOT NULL,
            description               TEXT,
            kind                      TEXT NOT NULL
                CHECK (kind IN ('general', 'private', 'direct')),
            archived                  INTEGER NOT NULL DEFAULT 0,
            file_sharing              INTEGER NOT NULL DEFAULT 1,
            reactions_enabled         INTEGER NOT NULL DEFAULT 1,
            notifications_enabled     INTEGER NOT NULL DEFAULT 1,
            retention_days            INTEGER NOT NULL DEFAULT 90,
            last_message_content      TEXT,
            last_message_sender_id    TEXT,
            last_message_sender_name  TEXT,
            last_message_kind         TEXT,
            last_message_at           TEXT,
            created_at                TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (workspace_id, kind, name)
        );

        CREATE TABLE IF NOT EXISTS room_participants (
            room_id     TEXT NOT NULL REFERENCES chat_rooms(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            is_admin    INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (room_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            room_id         TEXT NOT NULL REFERENCES chat_rooms(id) ON DELETE CASCADE,
            content         TEXT NOT NULL,
            kind            TEXT NOT NULL DEFAULT 'text'
                CHECK (kind IN ('text', 'file', 'image', 'system')),
            sender_id       TEXT NOT NULL,
            sender_name     TEXT NOT NULL,
            sender_avatar   TEXT,
            file_url        TEXT,
            file_name       TEXT,
            file_size       INTEGER,
            reply_to        TEXT,
            edited          INTEGER NOT NULL DEFAULT 0,
            edited_at       TEXT,
            temp_id         TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room_id, created_at);

        CREATE TABLE IF NOT EXISTS reactions (
            id          TEXT PRIMARY KEY,
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            user_name   TEXT NOT NULL,
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (message_id, user_id, emoji)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON reactions(message_id);

        CREATE TABLE IF NOT EXISTS read_markers (
            message_id  TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            read_at     TEXT NOT NULL,
            PRIMARY KEY (message_id, user_id)
        );
        ",
    )?;

    info!("Chat store migrations complete");
    Ok(())
}
