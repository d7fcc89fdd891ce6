use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use huddle_db::models::NewMessage;
use huddle_db::queries::format_ts;
use huddle_db::{Database, MAX_CONTENT_LEN, StoreError};
use huddle_types::events::ServerEvent;
use huddle_types::models::MessageKind;

use crate::hub::{ConnId, Hub, Identity};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("message must carry text or an attachment")]
    EmptyMessage,

    #[error("content exceeds {0} characters")]
    ContentTooLarge(usize),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("store task failed: {0}")]
    TaskJoin(String),
}

/// An outgoing message as submitted by a sender. One invocation per
/// attachment: a multi-file send is N independent messages.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub chat_room_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub temp_id: Option<String>,
    pub reply_to: Option<Uuid>,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub sender_avatar: Option<String>,
}

/// The dual-write message pipeline: broadcast over the hub first for
/// latency, then persist as the source of truth. The two paths are not
/// transactionally coupled — a broadcast message whose durable write fails
/// is reported back to the sender only (message-send-failed), never
/// retracted from other subscribers.
#[derive(Clone)]
pub struct Pipeline {
    hub: Hub,
    db: Arc<Database>,
}

impl Pipeline {
    pub fn new(hub: Hub, db: Arc<Database>) -> Self {
        Self { hub, db }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// Validate, broadcast, persist. Returns the canonical message id on
    /// durable success; it always differs from the client tempId.
    pub async fn send_message(
        &self,
        conn_id: ConnId,
        sender: &Identity,
        outgoing: OutgoingMessage,
        exclude_sender: bool,
    ) -> Result<Uuid, PipelineError> {
        // Step 1: validate before touching either path.
        let has_attachment = outgoing.file_url.is_some();
        if outgoing.content.trim().is_empty() && !has_attachment {
            return Err(PipelineError::EmptyMessage);
        }
        if outgoing.content.chars().count() > MAX_CONTENT_LEN {
            return Err(PipelineError::ContentTooLarge(MAX_CONTENT_LEN));
        }

        let message_id = Uuid::new_v4();
        let timestamp = Utc::now();

        // Step 2: real-time fan-out, before durable persistence completes.
        let exclude = exclude_sender.then_some(conn_id);
        self.hub
            .broadcast_to_room(
                outgoing.chat_room_id,
                ServerEvent::NewMessage {
                    chat_room_id: outgoing.chat_room_id,
                    content: outgoing.content.clone(),
                    kind: outgoing.kind,
                    sender_id: sender.user_id,
                    sender_name: sender.user_name.clone(),
                    reply_to: outgoing.reply_to,
                    file_url: outgoing.file_url.clone(),
                    file_name: outgoing.file_name.clone(),
                    file_size: outgoing.file_size,
                    timestamp,
                    temp_id: outgoing.temp_id.clone(),
                },
                exclude,
            )
            .await;

        // Step 3: durable write — message row plus the room's last-message
        // snapshot. Blocking SQLite work goes off the async runtime.
        let db = self.db.clone();
        let sender_id = sender.user_id.to_string();
        let sender_name = sender.user_name.clone();
        let out = outgoing.clone();
        let write = tokio::task::spawn_blocking(move || {
            db.insert_message(&NewMessage {
                id: &message_id.to_string(),
                room_id: &out.chat_room_id.to_string(),
                content: &out.content,
                kind: out.kind.as_str(),
                sender_id: &sender_id,
                sender_name: &sender_name,
                sender_avatar: out.sender_avatar.as_deref(),
                file_url: out.file_url.as_deref(),
                file_name: out.file_name.as_deref(),
                file_size: out.file_size,
                reply_to: out.reply_to.map(|id| id.to_string()).as_deref(),
                temp_id: out.temp_id.as_deref(),
                created_at: &format_ts(timestamp),
            })
        })
        .await
        .map_err(|e| PipelineError::TaskJoin(e.to_string()))?;

        // Step 4: on failure, report to the originating sender only so its
        // UI can drop the optimistic entry and offer retry. Other
        // subscribers keep a message that will not survive a refetch.
        if let Err(store_err) = write {
            warn!(
                "durable write failed for room {} (tempId {:?}): {}",
                outgoing.chat_room_id, outgoing.temp_id, store_err
            );
            self.hub
                .send_to_conn(
                    conn_id,
                    ServerEvent::MessageSendFailed {
                        temp_id: outgoing.temp_id.clone(),
                        error: store_err.to_string(),
                    },
                )
                .await;
            return Err(store_err.into());
        }

        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_types::events::ServerEvent;

    fn identity(name: &str) -> Identity {
        Identity {
            user_id: Uuid::new_v4(),
            user_name: name.to_string(),
            workspace_id: Uuid::new_v4(),
        }
    }

    fn outgoing(room: Uuid, content: &str, temp_id: Option<&str>) -> OutgoingMessage {
        OutgoingMessage {
            chat_room_id: room,
            content: content.to_string(),
            kind: MessageKind::Text,
            temp_id: temp_id.map(str::to_string),
            reply_to: None,
            file_url: None,
            file_name: None,
            file_size: None,
            sender_avatar: None,
        }
    }

    async fn setup() -> (Hub, Pipeline, Uuid) {
        let hub = Hub::new();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let room = Uuid::new_v4();
        db.create_room(&huddle_db::models::NewRoom {
            id: &room.to_string(),
            workspace_id: &Uuid::new_v4().to_string(),
            name: "design",
            description: None,
            kind: "private",
            participants: &[],
            file_sharing: true,
            reactions_enabled: true,
            notifications_enabled: true,
            retention_days: 90,
        })
        .unwrap();
        let pipeline = Pipeline::new(hub.clone(), db);
        (hub, pipeline, room)
    }

    #[tokio::test]
    async fn broadcasts_with_temp_id_and_persists() {
        let (hub, pipeline, room) = setup().await;
        let sender = identity("ana");

        let (sender_conn, mut sender_rx) = hub.register().await;
        hub.identify(sender_conn, sender.clone()).await;
        hub.join_room(sender_conn, room).await;

        let (receiver_conn, mut receiver_rx) = hub.register().await;
        hub.identify(receiver_conn, identity("bob")).await;
        hub.join_room(receiver_conn, room).await;
        while receiver_rx.try_recv().is_ok() {}
        while sender_rx.try_recv().is_ok() {}

        let id = pipeline
            .send_message(
                sender_conn,
                &sender,
                outgoing(room, "hello", Some("abc123")),
                false,
            )
            .await
            .unwrap();

        // Receiver saw the pushed copy with the correlation token
        let event = receiver_rx.try_recv().unwrap();
        match event {
            ServerEvent::NewMessage {
                content, temp_id, ..
            } => {
                assert_eq!(content, "hello");
                assert_eq!(temp_id.as_deref(), Some("abc123"));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // Sender's own session also got the push (exclude_sender = false)
        assert!(matches!(
            sender_rx.try_recv(),
            Ok(ServerEvent::NewMessage { .. })
        ));

        // Durable copy exists, canonical id differs from the temp id
        let row = pipeline
            .db()
            .get_message(&id.to_string())
            .unwrap()
            .expect("message persisted");
        assert_eq!(row.temp_id.as_deref(), Some("abc123"));
        assert_ne!(id.to_string(), "abc123");

        // Room snapshot was refreshed in the same write
        let room_row = pipeline.db().get_room(&room.to_string()).unwrap().unwrap();
        assert_eq!(room_row.last_message_content.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn rejects_empty_and_oversized_content() {
        let (hub, pipeline, room) = setup().await;
        let sender = identity("ana");
        let (conn, mut rx) = hub.register().await;
        hub.identify(conn, sender.clone()).await;
        hub.join_room(conn, room).await;
        while rx.try_recv().is_ok() {}

        let empty = pipeline
            .send_message(conn, &sender, outgoing(room, "   ", None), false)
            .await;
        assert!(matches!(empty, Err(PipelineError::EmptyMessage)));

        let huge = "x".repeat(MAX_CONTENT_LEN + 1);
        let oversized = pipeline
            .send_message(conn, &sender, outgoing(room, &huge, None), false)
            .await;
        assert!(matches!(oversized, Err(PipelineError::ContentTooLarge(_))));

        // Neither attempt reached the hub or the store
        assert!(rx.try_recv().is_err());
        assert_eq!(pipeline.db().count_messages(&room.to_string()).unwrap(), 0);
    }

    #[tokio::test]
    async fn attachment_without_text_is_valid() {
        let (hub, pipeline, room) = setup().await;
        let sender = identity("ana");
        let (conn, _rx) = hub.register().await;
        hub.identify(conn, sender.clone()).await;

        let mut msg = outgoing(room, "", Some("t-file"));
        msg.kind = MessageKind::File;
        msg.file_url = Some("https://files.example/report.pdf".into());
        msg.file_name = Some("report.pdf".into());
        msg.file_size = Some(48_213);

        let id = pipeline.send_message(conn, &sender, msg, false).await.unwrap();
        let row = pipeline.db().get_message(&id.to_string()).unwrap().unwrap();
        assert_eq!(row.kind, "file");
        assert_eq!(row.file_name.as_deref(), Some("report.pdf"));
    }

    #[tokio::test]
    async fn durable_failure_reports_to_sender_only() {
        let (hub, pipeline, _room) = setup().await;
        let sender = identity("ana");

        // A room that exists on the hub but not in the store
        let ghost_room = Uuid::new_v4();

        let (sender_conn, mut sender_rx) = hub.register().await;
        hub.identify(sender_conn, sender.clone()).await;
        hub.join_room(sender_conn, ghost_room).await;

        let (receiver_conn, mut receiver_rx) = hub.register().await;
        hub.identify(receiver_conn, identity("bob")).await;
        hub.join_room(receiver_conn, ghost_room).await;
        while receiver_rx.try_recv().is_ok() {}
        while sender_rx.try_recv().is_ok() {}

        let result = pipeline
            .send_message(
                sender_conn,
                &sender,
                outgoing(ghost_room, "doomed", Some("t-1")),
                true,
            )
            .await;
        assert!(matches!(
            result,
            Err(PipelineError::Store(StoreError::RoomNotFound))
        ));

        // The receiver got the optimistic push — the accepted inconsistency
        // window — but no failure report.
        let receiver_events: Vec<_> = std::iter::from_fn(|| receiver_rx.try_recv().ok()).collect();
        assert!(receiver_events
            .iter()
            .any(|e| matches!(e, ServerEvent::NewMessage { .. })));
        assert!(!receiver_events
            .iter()
            .any(|e| matches!(e, ServerEvent::MessageSendFailed { .. })));

        // The sender got only the failure report (excluded from the push).
        let sender_events: Vec<_> = std::iter::from_fn(|| sender_rx.try_recv().ok()).collect();
        assert!(sender_events.iter().any(|e| matches!(
            e,
            ServerEvent::MessageSendFailed { temp_id, .. } if temp_id.as_deref() == Some("t-1")
        )));
        assert!(!sender_events
            .iter()
            .any(|e| matches!(e, ServerEvent::NewMessage { .. })));
    }
}
