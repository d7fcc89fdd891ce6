use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, RoomKind, RoomSettings};

// -- JWT Claims --

/// JWT claims validated by the REST middleware. Token issuance lives in the
/// identity service; this subsystem only verifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub workspace_id: Uuid,
    pub exp: usize,
}

// -- Rooms --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateRoomRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type", default = "default_room_kind")]
    pub kind: RoomKind,
    #[serde(default)]
    pub participants: Vec<Uuid>,
    pub settings: Option<RoomSettings>,
}

fn default_room_kind() -> RoomKind {
    RoomKind::Private
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateRoomRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub archived: Option<bool>,
    pub settings: Option<RoomSettings>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AddParticipantRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub is_admin: bool,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: crate::models::MessageKind,
    pub temp_id: Option<String>,
    pub reply_to: Option<Uuid>,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EditMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
}

// -- Reactions --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleReactionResponse {
    pub added: bool,
}

// -- Read markers --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MarkReadRequest {
    pub message_ids: Vec<Uuid>,
}
