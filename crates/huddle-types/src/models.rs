use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    General,
    Private,
    Direct,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Private => "private",
            Self::Direct => "direct",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    File,
    Image,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::File => "file",
            Self::Image => "image",
            Self::System => "system",
        }
    }
}

/// Per-room settings. Admin-editable; defaults apply when a room is created
/// without an explicit settings object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettings {
    pub file_sharing: bool,
    pub reactions: bool,
    pub notifications_enabled: bool,
    pub retention_days: u32,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            file_sharing: true,
            reactions: true,
            notifications_enabled: true,
            retention_days: 90,
        }
    }
}

/// Denormalized snapshot of a room's newest message, kept on the room so
/// list views render without a join. Treated as a cache; sender_name is not
/// retroactively updated on rename.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub content: String,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: Uuid,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: RoomKind,
    pub participants: Vec<Participant>,
    pub archived: bool,
    pub settings: RoomSettings,
    pub last_message: Option<LastMessage>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub emoji: String,
    pub user_id: Uuid,
    pub user_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadMarker {
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}

/// A persisted message. Sender fields are a denormalized snapshot, not a
/// live join; reply_to is a weak reference resolved lazily by clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub chat_room_id: Uuid,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub reply_to: Option<Uuid>,
    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    /// Client correlation token echoed back so receivers can collapse the
    /// real-time copy and the fetched copy into one entry.
    pub temp_id: Option<String>,
    pub reactions: Vec<Reaction>,
    pub read_by: Vec<ReadMarker>,
    pub created_at: DateTime<Utc>,
}
