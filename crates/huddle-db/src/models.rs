/// Database row types — these map directly to SQLite rows.
/// Distinct from the huddle-types wire models to keep the store independent.

pub struct RoomRow {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub description: Option<String>,
    pub kind: String,
    pub archived: bool,
    pub file_sharing: bool,
    pub reactions_enabled: bool,
    pub notifications_enabled: bool,
    pub retention_days: u32,
    pub last_message_content: Option<String>,
    pub last_message_sender_id: Option<String>,
    pub last_message_sender_name: Option<String>,
    pub last_message_kind: Option<String>,
    pub last_message_at: Option<String>,
    pub created_at: String,
}

pub struct ParticipantRow {
    pub room_id: String,
    pub user_id: String,
    pub is_admin: bool,
}

pub struct MessageRow {
    pub id: String,
    pub room_id: String,
    pub content: String,
    pub kind: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub reply_to: Option<String>,
    pub edited: bool,
    pub edited_at: Option<String>,
    pub temp_id: Option<String>,
    pub created_at: String,
}

pub struct ReactionRow {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    pub user_name: String,
    pub emoji: String,
    pub created_at: String,
}

pub struct ReadMarkerRow {
    pub message_id: String,
    pub user_id: String,
    pub read_at: String,
}

/// Parameters for creating a room.
pub struct NewRoom<'a> {
    pub id: &'a str,
    pub workspace_id: &'a str,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub kind: &'a str,
    /// (user_id, is_admin) pairs; the creator should be among them.
    pub participants: &'a [(String, bool)],
    pub file_sharing: bool,
    pub reactions_enabled: bool,
    pub notifications_enabled: bool,
    pub retention_days: u32,
}

/// Parameters for inserting a message.
pub struct NewMessage<'a> {
    pub id: &'a str,
    pub room_id: &'a str,
    pub content: &'a str,
    pub kind: &'a str,
    pub sender_id: &'a str,
    pub sender_name: &'a str,
    pub sender_avatar: Option<&'a str>,
    pub file_url: Option<&'a str>,
    pub file_name: Option<&'a str>,
    pub file_size: Option<u64>,
    pub reply_to: Option<&'a str>,
    pub temp_id: Option<&'a str>,
    pub created_at: &'a str,
}
