use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::MessageKind;

/// Commands sent FROM client TO hub over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientCommand {
    /// Bind a user identity to this connection. Must precede room operations.
    #[serde(rename_all = "camelCase")]
    IdentifyUser {
        user_id: Uuid,
        user_name: String,
        workspace_id: Uuid,
    },

    /// Subscribe to a chat room channel.
    JoinChat(Uuid),

    /// Unsubscribe from a chat room channel.
    LeaveChat(Uuid),

    /// Send a message to a room (the dual-write pipeline entry point).
    #[serde(rename_all = "camelCase")]
    SendMessage {
        chat_room_id: Uuid,
        #[serde(default)]
        content: String,
        #[serde(rename = "type", default)]
        kind: MessageKind,
        temp_id: Option<String>,
        reply_to: Option<Uuid>,
        file_url: Option<String>,
        file_name: Option<String>,
        file_size: Option<u64>,
    },

    #[serde(rename_all = "camelCase")]
    TypingStart { chat_room_id: Uuid },

    #[serde(rename_all = "camelCase")]
    TypingStop { chat_room_id: Uuid },

    /// Toggle a reaction on a message.
    #[serde(rename_all = "camelCase")]
    AddReaction {
        message_id: Uuid,
        emoji: String,
        chat_room_id: Uuid,
    },

    #[serde(rename_all = "camelCase")]
    DeleteMessage {
        message_id: Uuid,
        chat_room_id: Uuid,
    },

    #[serde(rename_all = "camelCase")]
    MarkMessagesRead {
        chat_room_id: Uuid,
        message_ids: Vec<Uuid>,
    },
}

/// Events sent FROM hub TO clients over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Hub confirms the identify-user command.
    UserIdentified { success: bool },

    /// Hub confirms a join, echoing the room id back to the joiner.
    JoinedChat(Uuid),

    #[serde(rename_all = "camelCase")]
    UserJoinedRoom {
        user_id: Uuid,
        user_name: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    UserLeftRoom {
        user_id: Uuid,
        user_name: String,
        timestamp: DateTime<Utc>,
    },

    /// A new message, pushed before the durable write completes.
    /// Carries the sender's tempId so receivers can deduplicate against a
    /// later history fetch; the canonical id is assigned by the store.
    #[serde(rename_all = "camelCase")]
    NewMessage {
        chat_room_id: Uuid,
        content: String,
        #[serde(rename = "type")]
        kind: MessageKind,
        sender_id: Uuid,
        sender_name: String,
        reply_to: Option<Uuid>,
        file_url: Option<String>,
        file_name: Option<String>,
        file_size: Option<u64>,
        timestamp: DateTime<Utc>,
        temp_id: Option<String>,
    },

    /// Sent only to the originating connection when the durable write for an
    /// already-broadcast message fails. Never broadcast to the room.
    #[serde(rename_all = "camelCase")]
    MessageSendFailed {
        temp_id: Option<String>,
        error: String,
    },

    #[serde(rename_all = "camelCase")]
    UserTyping {
        user_id: Uuid,
        user_name: String,
        chat_room_id: Uuid,
    },

    #[serde(rename_all = "camelCase")]
    UserStoppedTyping {
        user_id: Uuid,
        user_name: String,
        chat_room_id: Uuid,
    },

    /// A reaction was toggled. Receivers apply toggle semantics locally:
    /// an (emoji, userId) pair already present is removed, otherwise added.
    #[serde(rename_all = "camelCase")]
    MessageReactionAdded {
        message_id: Uuid,
        emoji: String,
        user_id: Uuid,
        user_name: String,
    },

    #[serde(rename_all = "camelCase")]
    MessageDeleted { message_id: Uuid, deleted_by: Uuid },

    /// Workspace-wide presence update (online on identify, offline on
    /// disconnect).
    #[serde(rename_all = "camelCase")]
    UserStatusUpdated {
        user_id: Uuid,
        user_name: String,
        status: PresenceStatus,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    MessagesRead {
        chat_room_id: Uuid,
        message_ids: Vec<Uuid>,
        user_id: Uuid,
        user_name: String,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_kebab_case_tags() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"join-chat","data":"7f8ef34e-7d2c-4f00-9c55-8f9a30f2e001"}"#)
                .unwrap();
        assert!(matches!(cmd, ClientCommand::JoinChat(_)));

        let cmd: ClientCommand = serde_json::from_str(
            r#"{"type":"send-message","data":{"chatRoomId":"7f8ef34e-7d2c-4f00-9c55-8f9a30f2e001","content":"hello","tempId":"abc123"}}"#,
        )
        .unwrap();
        match cmd {
            ClientCommand::SendMessage {
                content,
                kind,
                temp_id,
                ..
            } => {
                assert_eq!(content, "hello");
                assert_eq!(kind, MessageKind::Text);
                assert_eq!(temp_id.as_deref(), Some("abc123"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn events_carry_camel_case_payloads() {
        let event = ServerEvent::MessageReactionAdded {
            message_id: Uuid::nil(),
            emoji: "👍".into(),
            user_id: Uuid::nil(),
            user_name: "ana".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "message-reaction-added");
        assert_eq!(json["data"]["userName"], "ana");
        assert_eq!(json["data"]["messageId"], Uuid::nil().to_string());
    }

    #[test]
    fn message_kind_serializes_as_type_field() {
        let event = ServerEvent::NewMessage {
            chat_room_id: Uuid::nil(),
            content: "hi".into(),
            kind: MessageKind::Image,
            sender_id: Uuid::nil(),
            sender_name: "ana".into(),
            reply_to: None,
            file_url: Some("https://cdn.example/pic.png".into()),
            file_name: Some("pic.png".into()),
            file_size: Some(1024),
            timestamp: Utc::now(),
            temp_id: Some("t-1".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["type"], "image");
        assert_eq!(json["data"]["tempId"], "t-1");
    }
}
