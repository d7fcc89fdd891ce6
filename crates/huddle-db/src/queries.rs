use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};

use crate::models::{
    MessageRow, NewMessage, NewRoom, ParticipantRow, ReactionRow, ReadMarkerRow, RoomRow,
};
use crate::{Database, MAX_CONTENT_LEN, StoreError};

/// Canonical timestamp format used for all store-written timestamps.
/// Fixed-width UTC so lexicographic order matches chronological order.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Tolerant parse: our RFC 3339 strings, plus SQLite's bare
/// "YYYY-MM-DD HH:MM:SS" default format.
pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
                .ok()
        })
}

impl Database {
    // -- Rooms --

    pub fn create_room(&self, room: &NewRoom<'_>) -> Result<(), StoreError> {
        if room.kind == "direct" && room.participants.len() != 2 {
            return Err(StoreError::DirectRoomParticipants);
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO chat_rooms (
                    id, workspace_id, name, description, kind,
                    file_sharing, reactions_enabled, notifications_enabled,
                    retention_days, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    room.id,
                    room.workspace_id,
                    room.name,
                    room.description,
                    room.kind,
                    room.file_sharing,
                    room.reactions_enabled,
                    room.notifications_enabled,
                    room.retention_days,
                    format_ts(Utc::now()),
                ],
            )
            .map_err(map_room_unique)?;

            for (user_id, is_admin) in room.participants {
                tx.execute(
                    "INSERT OR REPLACE INTO room_participants (room_id, user_id, is_admin)
                     VALUES (?1, ?2, ?3)",
                    params![room.id, user_id, is_admin],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
    }

    /// Default-seeding routine: make sure the workspace has its fixed-name
    /// general room, with the given user as a participant.
    pub fn ensure_general_room(
        &self,
        room_id: &str,
        workspace_id: &str,
        user_id: &str,
    ) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO chat_rooms (id, workspace_id, name, kind, created_at)
                 SELECT ?1, ?2, 'general', 'general', ?3
                 WHERE NOT EXISTS (
                     SELECT 1 FROM chat_rooms
                     WHERE workspace_id = ?2 AND kind = 'general' AND name = 'general'
                 )",
                params![room_id, workspace_id, format_ts(Utc::now())],
            )?;
            conn.execute(
                "INSERT OR IGNORE INTO room_participants (room_id, user_id, is_admin)
                 SELECT id, ?2, 0 FROM chat_rooms
                 WHERE workspace_id = ?1 AND kind = 'general' AND name = 'general'",
                params![workspace_id, user_id],
            )?;
            Ok(())
        })
    }

    pub fn get_room(&self, room_id: &str) -> Result<Option<RoomRow>, StoreError> {
        self.with_conn(|conn| query_room(conn, room_id))
    }

    pub fn list_rooms(&self, workspace_id: &str) -> Result<Vec<RoomRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ROOM_COLS} FROM chat_rooms
                 WHERE workspace_id = ?1
                 ORDER BY last_message_at DESC NULLS LAST, created_at DESC"
            ))?;
            let rows = stmt
                .query_map([workspace_id], room_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Apply a partial update. Renaming a general room is rejected; the
    /// (workspace, kind, name) uniqueness constraint is enforced by SQLite.
    #[allow(clippy::too_many_arguments)]
    pub fn update_room(
        &self,
        room_id: &str,
        name: Option<&str>,
        description: Option<&str>,
        archived: Option<bool>,
        settings: Option<(bool, bool, bool, u32)>,
    ) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            let room = query_room(conn, room_id)?.ok_or(StoreError::RoomNotFound)?;

            if let Some(new_name) = name {
                if room.kind == "general" && new_name != room.name {
                    return Err(StoreError::GeneralRoomRename);
                }
            }

            let (file_sharing, reactions_enabled, notifications_enabled, retention_days) =
                settings.unwrap_or((
                    room.file_sharing,
                    room.reactions_enabled,
                    room.notifications_enabled,
                    room.retention_days,
                ));

            conn.execute(
                "UPDATE chat_rooms SET
                    name = ?2, description = ?3, archived = ?4,
                    file_sharing = ?5, reactions_enabled = ?6,
                    notifications_enabled = ?7, retention_days = ?8
                 WHERE id = ?1",
                params![
                    room_id,
                    name.unwrap_or(&room.name),
                    description.or(room.description.as_deref()),
                    archived.unwrap_or(room.archived),
                    file_sharing,
                    reactions_enabled,
                    notifications_enabled,
                    retention_days,
                ],
            )
            .map_err(map_room_unique)?;
            Ok(())
        })
    }

    pub fn get_participants(&self, room_id: &str) -> Result<Vec<ParticipantRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT room_id, user_id, is_admin FROM room_participants
                 WHERE room_id = ?1 ORDER BY user_id",
            )?;
            let rows = stmt
                .query_map([room_id], |row| {
                    Ok(ParticipantRow {
                        room_id: row.get(0)?,
                        user_id: row.get(1)?,
                        is_admin: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn add_participant(
        &self,
        room_id: &str,
        user_id: &str,
        is_admin: bool,
    ) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            let room = query_room(conn, room_id)?.ok_or(StoreError::RoomNotFound)?;

            if room.kind == "direct" {
                let already: bool = conn.query_row(
                    "SELECT COUNT(*) FROM room_participants WHERE room_id = ?1 AND user_id = ?2",
                    params![room_id, user_id],
                    |row| row.get::<_, i64>(0).map(|n| n > 0),
                )?;
                if !already {
                    return Err(StoreError::DirectRoomParticipants);
                }
            }

            conn.execute(
                "INSERT OR REPLACE INTO room_participants (room_id, user_id, is_admin)
                 VALUES (?1, ?2, ?3)",
                params![room_id, user_id, is_admin],
            )?;
            Ok(())
        })
    }

    pub fn remove_participant(&self, room_id: &str, user_id: &str) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "DELETE FROM room_participants WHERE room_id = ?1 AND user_id = ?2",
                params![room_id, user_id],
            )?;
            Ok(())
        })
    }

    pub fn is_room_admin(&self, room_id: &str, user_id: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let admin: Option<bool> = conn
                .query_row(
                    "SELECT is_admin FROM room_participants
                     WHERE room_id = ?1 AND user_id = ?2",
                    params![room_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(admin.unwrap_or(false))
        })
    }

    /// Hard-delete a room and everything in it. Runs inside the store mutex,
    /// so it is exclusive with respect to in-flight message writes.
    pub fn delete_room(&self, room_id: &str) -> Result<(), StoreError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let deleted = tx.execute("DELETE FROM chat_rooms WHERE id = ?1", [room_id])?;
            if deleted == 0 {
                return Err(StoreError::RoomNotFound);
            }
            tx.commit()?;
            Ok(())
        })
    }

    // -- Messages --

    /// Insert a message and refresh the owning room's last-message snapshot
    /// in one transaction.
    pub fn insert_message(&self, msg: &NewMessage<'_>) -> Result<(), StoreError> {
        if msg.content.chars().count() > MAX_CONTENT_LEN {
            return Err(StoreError::ContentTooLarge(MAX_CONTENT_LEN));
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let room_exists: bool = tx.query_row(
                "SELECT COUNT(*) FROM chat_rooms WHERE id = ?1",
                [msg.room_id],
                |row| row.get::<_, i64>(0).map(|n| n > 0),
            )?;
            if !room_exists {
                return Err(StoreError::RoomNotFound);
            }

            tx.execute(
                "INSERT INTO messages (
                    id, room_id, content, kind, sender_id, sender_name,
                    sender_avatar, file_url, file_name, file_size, reply_to,
                    temp_id, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    msg.id,
                    msg.room_id,
                    msg.content,
                    msg.kind,
                    msg.sender_id,
                    msg.sender_name,
                    msg.sender_avatar,
                    msg.file_url,
                    msg.file_name,
                    msg.file_size,
                    msg.reply_to,
                    msg.temp_id,
                    msg.created_at,
                ],
            )?;

            tx.execute(
                "UPDATE chat_rooms SET
                    last_message_content = ?2, last_message_sender_id = ?3,
                    last_message_sender_name = ?4, last_message_kind = ?5,
                    last_message_at = ?6
                 WHERE id = ?1",
                params![
                    msg.room_id,
                    msg.content,
                    msg.sender_id,
                    msg.sender_name,
                    msg.kind,
                    msg.created_at,
                ],
            )?;

            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_message(&self, message_id: &str) -> Result<Option<MessageRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MSG_COLS} FROM messages WHERE id = ?1"
            ))?;
            let row = stmt.query_row([message_id], message_from_row).optional()?;
            Ok(row)
        })
    }

    pub fn count_messages(&self, room_id: &str) -> Result<u64, StoreError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE room_id = ?1",
                [room_id],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Page of messages, newest first. `page` is zero-based.
    pub fn get_messages_page(
        &self,
        room_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<Vec<MessageRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MSG_COLS} FROM messages
                 WHERE room_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt
                .query_map(
                    params![room_id, limit, u64::from(page) * u64::from(limit)],
                    message_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn edit_message(
        &self,
        message_id: &str,
        content: &str,
        edited_at: &str,
    ) -> Result<(), StoreError> {
        if content.chars().count() > MAX_CONTENT_LEN {
            return Err(StoreError::ContentTooLarge(MAX_CONTENT_LEN));
        }

        self.with_conn_mut(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET content = ?2, edited = 1, edited_at = ?3
                 WHERE id = ?1",
                params![message_id, content, edited_at],
            )?;
            if updated == 0 {
                return Err(StoreError::MessageNotFound);
            }
            Ok(())
        })
    }

    /// Hard-delete a message, then recompute the room's last-message
    /// snapshot from the newest remaining row. Returns the deleted row.
    pub fn delete_message(&self, message_id: &str) -> Result<MessageRow, StoreError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let row = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {MSG_COLS} FROM messages WHERE id = ?1"
                ))?;
                stmt.query_row([message_id], message_from_row)
                    .optional()?
                    .ok_or(StoreError::MessageNotFound)?
            };

            tx.execute("DELETE FROM messages WHERE id = ?1", [message_id])?;

            tx.execute(
                "UPDATE chat_rooms SET
                    last_message_content = (
                        SELECT content FROM messages WHERE room_id = ?1
                        ORDER BY created_at DESC, id DESC LIMIT 1),
                    last_message_sender_id = (
                        SELECT sender_id FROM messages WHERE room_id = ?1
                        ORDER BY created_at DESC, id DESC LIMIT 1),
                    last_message_sender_name = (
                        SELECT sender_name FROM messages WHERE room_id = ?1
                        ORDER BY created_at DESC, id DESC LIMIT 1),
                    last_message_kind = (
                        SELECT kind FROM messages WHERE room_id = ?1
                        ORDER BY created_at DESC, id DESC LIMIT 1),
                    last_message_at = (
                        SELECT created_at FROM messages WHERE room_id = ?1
                        ORDER BY created_at DESC, id DESC LIMIT 1)
                 WHERE id = ?1",
                [&row.room_id],
            )?;

            tx.commit()?;
            Ok(row)
        })
    }

    // -- Reactions --

    /// Toggle a reaction: removes if the (message, user, emoji) pair exists,
    /// inserts otherwise. Returns true if the reaction was added.
    pub fn toggle_reaction(
        &self,
        id: &str,
        message_id: &str,
        user_id: &str,
        user_name: &str,
        emoji: &str,
    ) -> Result<bool, StoreError> {
        self.with_conn_mut(|conn| {
            let message_exists: bool = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE id = ?1",
                [message_id],
                |row| row.get::<_, i64>(0).map(|n| n > 0),
            )?;
            if !message_exists {
                return Err(StoreError::MessageNotFound);
            }

            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM reactions
                     WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                    params![message_id, user_id, emoji],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(existing_id) = existing {
                conn.execute("DELETE FROM reactions WHERE id = ?1", [&existing_id])?;
                Ok(false)
            } else {
                conn.execute(
                    "INSERT INTO reactions (id, message_id, user_id, user_name, emoji, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![id, message_id, user_id, user_name, emoji, format_ts(Utc::now())],
                )?;
                Ok(true)
            }
        })
    }

    /// Batch-fetch reactions for a set of message IDs.
    pub fn reactions_for_messages(
        &self,
        message_ids: &[String],
    ) -> Result<Vec<ReactionRow>, StoreError> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=message_ids.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "SELECT id, message_id, user_id, user_name, emoji, created_at
                 FROM reactions WHERE message_id IN ({})
                 ORDER BY created_at, id",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let bind: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(bind.as_slice(), |row| {
                    Ok(ReactionRow {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        user_id: row.get(2)?,
                        user_name: row.get(3)?,
                        emoji: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Read markers --

    /// Append read markers; pairs already present are left untouched.
    /// Returns the ids that were newly marked.
    pub fn mark_read(
        &self,
        message_ids: &[String],
        user_id: &str,
        read_at: &str,
    ) -> Result<Vec<String>, StoreError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let mut marked = Vec::new();
            for message_id in message_ids {
                let inserted = tx.execute(
                    "INSERT OR IGNORE INTO read_markers (message_id, user_id, read_at)
                     SELECT ?1, ?2, ?3 WHERE EXISTS (SELECT 1 FROM messages WHERE id = ?1)",
                    params![message_id, user_id, read_at],
                )?;
                if inserted > 0 {
                    marked.push(message_id.clone());
                }
            }
            tx.commit()?;
            Ok(marked)
        })
    }

    /// Batch-fetch read markers for a set of message IDs.
    pub fn read_markers_for_messages(
        &self,
        message_ids: &[String],
    ) -> Result<Vec<ReadMarkerRow>, StoreError> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=message_ids.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "SELECT message_id, user_id, read_at FROM read_markers
                 WHERE message_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let bind: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(bind.as_slice(), |row| {
                    Ok(ReadMarkerRow {
                        message_id: row.get(0)?,
                        user_id: row.get(1)?,
                        read_at: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Retention --

    /// Delete messages older than their room's retention window, then refresh
    /// the last-message snapshot of rooms whose newest message was purged.
    /// Reactions and read markers go with them via ON DELETE CASCADE.
    pub fn purge_expired_messages(&self) -> Result<usize, StoreError> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let deleted = tx.execute(
                "DELETE FROM messages WHERE id IN (
                    SELECT m.id FROM messages m
                    JOIN chat_rooms r ON m.room_id = r.id
                    WHERE m.created_at <
                        strftime('%Y-%m-%dT%H:%M:%S', 'now', '-' || r.retention_days || ' days')
                 )",
                [],
            )?;

            if deleted > 0 {
                // A snapshot is stale exactly when the message it mirrors fell
                // inside the purge window.
                tx.execute(
                    "UPDATE chat_rooms SET
                        last_message_content = (
                            SELECT content FROM messages WHERE room_id = chat_rooms.id
                            ORDER BY created_at DESC, id DESC LIMIT 1),
                        last_message_sender_id = (
                            SELECT sender_id FROM messages WHERE room_id = chat_rooms.id
                            ORDER BY created_at DESC, id DESC LIMIT 1),
                        last_message_sender_name = (
                            SELECT sender_name FROM messages WHERE room_id = chat_rooms.id
                            ORDER BY created_at DESC, id DESC LIMIT 1),
                        last_message_kind = (
                            SELECT kind FROM messages WHERE room_id = chat_rooms.id
                            ORDER BY created_at DESC, id DESC LIMIT 1),
                        last_message_at = (
                            SELECT created_at FROM messages WHERE room_id = chat_rooms.id
                            ORDER BY created_at DESC, id DESC LIMIT 1)
                     WHERE last_message_at IS NOT NULL
                       AND last_message_at <
                        strftime('%Y-%m-%dT%H:%M:%S', 'now', '-' || retention_days || ' days')",
                    [],
                )?;
            }

            tx.commit()?;
            Ok(deleted)
        })
    }
}

const ROOM_COLS: &str = "id, workspace_id, name, description, kind, archived, \
    file_sharing, reactions_enabled, notifications_enabled, retention_days, \
    last_message_content, last_message_sender_id, last_message_sender_name, \
    last_message_kind, last_message_at, created_at";

const MSG_COLS: &str = "id, room_id, content, kind, sender_id, sender_name, \
    sender_avatar, file_url, file_name, file_size, reply_to, edited, edited_at, \
    temp_id, created_at";

fn query_room(conn: &Connection, room_id: &str) -> Result<Option<RoomRow>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {ROOM_COLS} FROM chat_rooms WHERE id = ?1"))?;
    let row = stmt.query_row([room_id], room_from_row).optional()?;
    Ok(row)
}

fn room_from_row(row: &rusqlite::Row<'_>) -> Result<RoomRow, rusqlite::Error> {
    Ok(RoomRow {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        kind: row.get(4)?,
        archived: row.get(5)?,
        file_sharing: row.get(6)?,
        reactions_enabled: row.get(7)?,
        notifications_enabled: row.get(8)?,
        retention_days: row.get(9)?,
        last_message_content: row.get(10)?,
        last_message_sender_id: row.get(11)?,
        last_message_sender_name: row.get(12)?,
        last_message_kind: row.get(13)?,
        last_message_at: row.get(14)?,
        created_at: row.get(15)?,
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        room_id: row.get(1)?,
        content: row.get(2)?,
        kind: row.get(3)?,
        sender_id: row.get(4)?,
        sender_name: row.get(5)?,
        sender_avatar: row.get(6)?,
        file_url: row.get(7)?,
        file_name: row.get(8)?,
        file_size: row.get(9)?,
        reply_to: row.get(10)?,
        edited: row.get(11)?,
        edited_at: row.get(12)?,
        temp_id: row.get(13)?,
        created_at: row.get(14)?,
    })
}

fn map_room_unique(e: rusqlite::Error) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::RoomNameTaken
        }
        _ => StoreError::Sqlite(e),
    }
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewMessage, NewRoom};

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn make_room(db: &Database, id: &str, workspace: &str, kind: &str, name: &str, parts: &[(String, bool)]) {
        db.create_room(&NewRoom {
            id,
            workspace_id: workspace,
            name,
            description: None,
            kind,
            participants: parts,
            file_sharing: true,
            reactions_enabled: true,
            notifications_enabled: true,
            retention_days: 90,
        })
        .unwrap();
    }

    fn make_message(db: &Database, id: &str, room_id: &str, content: &str, created_at: &str) {
        db.insert_message(&NewMessage {
            id,
            room_id,
            content,
            kind: "text",
            sender_id: "u1",
            sender_name: "Ana",
            sender_avatar: None,
            file_url: None,
            file_name: None,
            file_size: None,
            reply_to: None,
            temp_id: None,
            created_at,
        })
        .unwrap();
    }

    #[test]
    fn room_name_unique_per_workspace_and_kind() {
        let db = test_db();
        make_room(&db, "r1", "ws1", "private", "design", &[]);

        let dup = db.create_room(&NewRoom {
            id: "r2",
            workspace_id: "ws1",
            name: "design",
            description: None,
            kind: "private",
            participants: &[],
            file_sharing: true,
            reactions_enabled: true,
            notifications_enabled: true,
            retention_days: 90,
        });
        assert!(matches!(dup, Err(StoreError::RoomNameTaken)));

        // Same name is fine in another workspace or with another kind
        make_room(&db, "r3", "ws2", "private", "design", &[]);
        make_room(&db, "r4", "ws1", "direct", "design", &[("a".into(), false), ("b".into(), false)]);
    }

    #[test]
    fn direct_room_has_exactly_two_participants() {
        let db = test_db();

        let one = db.create_room(&NewRoom {
            id: "d1",
            workspace_id: "ws1",
            name: "a:b",
            description: None,
            kind: "direct",
            participants: &[("a".into(), false)],
            file_sharing: true,
            reactions_enabled: true,
            notifications_enabled: true,
            retention_days: 90,
        });
        assert!(matches!(one, Err(StoreError::DirectRoomParticipants)));

        make_room(&db, "d2", "ws1", "direct", "a:b", &[("a".into(), false), ("b".into(), false)]);

        let third = db.add_participant("d2", "c", false);
        assert!(matches!(third, Err(StoreError::DirectRoomParticipants)));
        assert_eq!(db.get_participants("d2").unwrap().len(), 2);

        // Re-adding an existing participant (e.g. promoting) is allowed
        db.add_participant("d2", "a", true).unwrap();
        assert!(db.is_room_admin("d2", "a").unwrap());
    }

    #[test]
    fn general_room_seeding_and_rename_rejection() {
        let db = test_db();
        db.ensure_general_room("g1", "ws1", "ana").unwrap();
        db.ensure_general_room("g2", "ws1", "bob").unwrap();

        let rooms = db.list_rooms("ws1").unwrap();
        assert_eq!(rooms.len(), 1, "seeding must be idempotent");
        let general = &rooms[0];
        assert_eq!(general.id, "g1");
        assert_eq!(general.kind, "general");

        // Schema defaults for settings
        assert!(general.file_sharing);
        assert!(general.reactions_enabled);
        assert!(general.notifications_enabled);
        assert_eq!(general.retention_days, 90);

        // Both callers became participants
        assert_eq!(db.get_participants("g1").unwrap().len(), 2);

        let rename = db.update_room("g1", Some("lounge"), None, None, None);
        assert!(matches!(rename, Err(StoreError::GeneralRoomRename)));

        // Non-name updates to the general room are fine
        db.update_room("g1", None, Some("workspace-wide chat"), Some(false), None)
            .unwrap();
    }

    #[test]
    fn reaction_toggle_semantics() {
        let db = test_db();
        make_room(&db, "r1", "ws1", "private", "design", &[]);
        make_message(&db, "m1", "r1", "hello", "2026-08-01T10:00:00.000Z");

        assert!(db.toggle_reaction("x1", "m1", "u2", "Bob", "👍").unwrap());
        assert!(!db.toggle_reaction("x2", "m1", "u2", "Bob", "👍").unwrap());
        assert!(db.toggle_reaction("x3", "m1", "u2", "Bob", "👍").unwrap());

        let reactions = db.reactions_for_messages(&["m1".to_string()]).unwrap();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].emoji, "👍");

        // Same emoji from another user is independent
        assert!(db.toggle_reaction("x4", "m1", "u3", "Cleo", "👍").unwrap());
        assert_eq!(db.reactions_for_messages(&["m1".to_string()]).unwrap().len(), 2);

        let missing = db.toggle_reaction("x5", "nope", "u2", "Bob", "👍");
        assert!(matches!(missing, Err(StoreError::MessageNotFound)));
    }

    #[test]
    fn last_message_snapshot_follows_insert_and_delete() {
        let db = test_db();
        make_room(&db, "r1", "ws1", "private", "design", &[]);
        make_message(&db, "m1", "r1", "first", "2026-08-01T10:00:00.000Z");
        make_message(&db, "m2", "r1", "second", "2026-08-01T10:00:01.000Z");

        let room = db.get_room("r1").unwrap().unwrap();
        assert_eq!(room.last_message_content.as_deref(), Some("second"));

        db.delete_message("m2").unwrap();
        let room = db.get_room("r1").unwrap().unwrap();
        assert_eq!(room.last_message_content.as_deref(), Some("first"));

        db.delete_message("m1").unwrap();
        let room = db.get_room("r1").unwrap().unwrap();
        assert!(room.last_message_content.is_none());
    }

    #[test]
    fn content_cap_enforced() {
        let db = test_db();
        make_room(&db, "r1", "ws1", "private", "design", &[]);

        let oversized = "x".repeat(MAX_CONTENT_LEN + 1);
        let err = db.insert_message(&NewMessage {
            id: "m1",
            room_id: "r1",
            content: &oversized,
            kind: "text",
            sender_id: "u1",
            sender_name: "Ana",
            sender_avatar: None,
            file_url: None,
            file_name: None,
            file_size: None,
            reply_to: None,
            temp_id: None,
            created_at: "2026-08-01T10:00:00.000Z",
        });
        assert!(matches!(err, Err(StoreError::ContentTooLarge(_))));
    }

    #[test]
    fn pagination_is_newest_first() {
        let db = test_db();
        make_room(&db, "r1", "ws1", "private", "design", &[]);
        for i in 0..5 {
            make_message(
                &db,
                &format!("m{i}"),
                "r1",
                &format!("msg {i}"),
                &format!("2026-08-01T10:00:0{i}.000Z"),
            );
        }

        let page0 = db.get_messages_page("r1", 0, 2).unwrap();
        assert_eq!(
            page0.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            ["msg 4", "msg 3"]
        );

        let page1 = db.get_messages_page("r1", 1, 2).unwrap();
        assert_eq!(
            page1.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            ["msg 2", "msg 1"]
        );

        assert_eq!(db.count_messages("r1").unwrap(), 5);
    }

    #[test]
    fn read_markers_append_once() {
        let db = test_db();
        make_room(&db, "r1", "ws1", "private", "design", &[]);
        make_message(&db, "m1", "r1", "hello", "2026-08-01T10:00:00.000Z");

        let ids = vec!["m1".to_string(), "missing".to_string()];
        let marked = db.mark_read(&ids, "u2", "2026-08-01T10:01:00.000Z").unwrap();
        assert_eq!(marked, ["m1"]);

        // Second pass is a no-op
        let marked = db.mark_read(&ids, "u2", "2026-08-01T10:02:00.000Z").unwrap();
        assert!(marked.is_empty());

        let markers = db.read_markers_for_messages(&["m1".to_string()]).unwrap();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].read_at, "2026-08-01T10:01:00.000Z");
    }

    #[test]
    fn edit_marks_message_edited() {
        let db = test_db();
        make_room(&db, "r1", "ws1", "private", "design", &[]);
        make_message(&db, "m1", "r1", "helo", "2026-08-01T10:00:00.000Z");

        db.edit_message("m1", "hello", "2026-08-01T10:05:00.000Z").unwrap();
        let row = db.get_message("m1").unwrap().unwrap();
        assert_eq!(row.content, "hello");
        assert!(row.edited);
        assert_eq!(row.edited_at.as_deref(), Some("2026-08-01T10:05:00.000Z"));

        let missing = db.edit_message("nope", "x", "2026-08-01T10:05:00.000Z");
        assert!(matches!(missing, Err(StoreError::MessageNotFound)));
    }

    #[test]
    fn room_delete_cascades() {
        let db = test_db();
        make_room(&db, "r1", "ws1", "private", "design", &[("a".into(), true)]);
        make_message(&db, "m1", "r1", "hello", "2026-08-01T10:00:00.000Z");
        db.toggle_reaction("x1", "m1", "u2", "Bob", "👍").unwrap();
        db.mark_read(&["m1".to_string()], "u2", "2026-08-01T10:01:00.000Z").unwrap();

        db.delete_room("r1").unwrap();
        assert!(db.get_room("r1").unwrap().is_none());
        assert!(db.get_message("m1").unwrap().is_none());
        assert!(db.reactions_for_messages(&["m1".to_string()]).unwrap().is_empty());
        assert!(db.get_participants("r1").unwrap().is_empty());

        assert!(matches!(db.delete_room("r1"), Err(StoreError::RoomNotFound)));
    }

    #[test]
    fn retention_purges_only_expired_messages() {
        let db = test_db();
        make_room(&db, "r1", "ws1", "private", "design", &[]);

        let old = format_ts(Utc::now() - chrono::Duration::days(120));
        let fresh = format_ts(Utc::now() - chrono::Duration::days(5));
        make_message(&db, "m-old", "r1", "ancient", &old);
        make_message(&db, "m-new", "r1", "recent", &fresh);

        let purged = db.purge_expired_messages().unwrap();
        assert_eq!(purged, 1);
        assert!(db.get_message("m-old").unwrap().is_none());
        assert!(db.get_message("m-new").unwrap().is_some());
    }

    #[test]
    fn retention_purge_refreshes_last_message_snapshot() {
        let db = test_db();
        make_room(&db, "r1", "ws1", "private", "design", &[]);
        make_room(&db, "r2", "ws1", "private", "support", &[]);

        let old = format_ts(Utc::now() - chrono::Duration::days(120));
        let fresh = format_ts(Utc::now() - chrono::Duration::days(5));
        // r1's only message expires; r2 keeps a fresh newest message
        make_message(&db, "m1", "r1", "ancient", &old);
        make_message(&db, "m2", "r2", "older", &old);
        make_message(&db, "m3", "r2", "recent", &fresh);

        assert_eq!(db.purge_expired_messages().unwrap(), 2);

        let r1 = db.get_room("r1").unwrap().unwrap();
        assert!(r1.last_message_content.is_none(), "snapshot must not dangle");
        assert!(r1.last_message_at.is_none());

        // An intact newest message keeps its snapshot untouched
        let r2 = db.get_room("r2").unwrap().unwrap();
        assert_eq!(r2.last_message_content.as_deref(), Some("recent"));
    }

    #[test]
    fn timestamp_parsing_is_tolerant() {
        assert!(parse_ts("2026-08-01T10:00:00.000Z").is_some());
        assert!(parse_ts("2026-08-01 10:00:00").is_some());
        assert!(parse_ts("not a date").is_none());
    }
}
