use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};
use uuid::Uuid;

use huddle_db::queries::format_ts;
use huddle_types::events::{ClientCommand, ServerEvent};

use crate::hub::{ConnId, Hub, Identity};
use crate::pipeline::{OutgoingMessage, Pipeline, PipelineError};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a single WebSocket connection from registration to teardown.
/// `hub.disconnect` runs unconditionally on exit, so abnormal drops fan out
/// the same leave/offline events as explicit leaves.
pub async fn handle_connection(socket: WebSocket, hub: Hub, pipeline: Pipeline) {
    let (mut sender, mut receiver) = socket.split();

    let (conn_id, mut conn_rx) = hub.register().await;
    debug!("connection {conn_id} registered");

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward hub events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = conn_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("failed to encode event: {e}");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("heartbeat timeout (missed {missed_heartbeats} pongs), dropping connection");
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let hub_recv = hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&hub_recv, &pipeline, conn_id, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "connection {} bad command: {} -- raw: {}",
                            conn_id,
                            e,
                            truncate_chars(&text, 200)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.disconnect(conn_id).await;
}

/// Truncate to at most `max` characters, always on a char boundary.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

async fn handle_command(hub: &Hub, pipeline: &Pipeline, conn_id: ConnId, cmd: ClientCommand) {
    match cmd {
        ClientCommand::IdentifyUser {
            user_id,
            user_name,
            workspace_id,
        } => {
            hub.identify(
                conn_id,
                Identity {
                    user_id,
                    user_name,
                    workspace_id,
                },
            )
            .await;

            // Idempotent seeding: first identify in a workspace creates its
            // general room, later ones are no-ops.
            let db = pipeline.db().clone();
            let ws_key = workspace_id.to_string();
            let user_key = user_id.to_string();
            let seed_id = Uuid::new_v4().to_string();
            let seeded = tokio::task::spawn_blocking(move || {
                db.ensure_general_room(&seed_id, &ws_key, &user_key)
            })
            .await;
            match seeded {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("general room seeding failed for {workspace_id}: {e}"),
                Err(e) => warn!("general room seeding task failed: {e}"),
            }

            hub.send_to_conn(conn_id, ServerEvent::UserIdentified { success: true })
                .await;
        }

        ClientCommand::JoinChat(room_id) => {
            hub.join_room(conn_id, room_id).await;
        }

        ClientCommand::LeaveChat(room_id) => {
            hub.leave_room(conn_id, room_id).await;
        }

        ClientCommand::SendMessage {
            chat_room_id,
            content,
            kind,
            temp_id,
            reply_to,
            file_url,
            file_name,
            file_size,
        } => {
            let Some(identity) = hub.identity_of(conn_id).await else {
                debug!("send-message from unidentified connection {conn_id}, ignoring");
                return;
            };

            let outgoing = OutgoingMessage {
                chat_room_id,
                content,
                kind,
                temp_id: temp_id.clone(),
                reply_to,
                file_url,
                file_name,
                file_size,
                sender_avatar: None,
            };

            match pipeline
                .send_message(conn_id, &identity, outgoing, false)
                .await
            {
                Ok(_) => {}
                Err(e @ (PipelineError::EmptyMessage | PipelineError::ContentTooLarge(_))) => {
                    // Rejected before any hub or store write; tell the sender.
                    hub.send_to_conn(
                        conn_id,
                        ServerEvent::MessageSendFailed {
                            temp_id,
                            error: e.to_string(),
                        },
                    )
                    .await;
                }
                // Store failures were already reported by the pipeline.
                Err(e) => warn!("send-message pipeline error: {e}"),
            }
        }

        ClientCommand::TypingStart { chat_room_id } => {
            let Some(identity) = hub.identity_of(conn_id).await else {
                return;
            };
            hub.broadcast_to_room(
                chat_room_id,
                ServerEvent::UserTyping {
                    user_id: identity.user_id,
                    user_name: identity.user_name,
                    chat_room_id,
                },
                Some(conn_id),
            )
            .await;
        }

        ClientCommand::TypingStop { chat_room_id } => {
            let Some(identity) = hub.identity_of(conn_id).await else {
                return;
            };
            hub.broadcast_to_room(
                chat_room_id,
                ServerEvent::UserStoppedTyping {
                    user_id: identity.user_id,
                    user_name: identity.user_name,
                    chat_room_id,
                },
                Some(conn_id),
            )
            .await;
        }

        ClientCommand::AddReaction {
            message_id,
            emoji,
            chat_room_id,
        } => {
            let Some(identity) = hub.identity_of(conn_id).await else {
                return;
            };

            let db = pipeline.db().clone();
            let room_key = chat_room_id.to_string();
            let message_key = message_id.to_string();
            let user_key = identity.user_id.to_string();
            let user_name = identity.user_name.clone();
            let reaction_id = Uuid::new_v4().to_string();

            // Store first; the broadcast only goes out for a write that took.
            let result = tokio::task::spawn_blocking(move || {
                let room = db.get_room(&room_key)?;
                if !room.is_some_and(|r| r.reactions_enabled) {
                    return Ok(None);
                }
                db.toggle_reaction(&reaction_id, &message_key, &user_key, &user_name, &emoji)
                    .map(|_| Some(emoji))
            })
            .await;

            match result {
                Ok(Ok(Some(emoji))) => {
                    hub.broadcast_to_room(
                        chat_room_id,
                        ServerEvent::MessageReactionAdded {
                            message_id,
                            emoji,
                            user_id: identity.user_id,
                            user_name: identity.user_name,
                        },
                        None,
                    )
                    .await;
                }
                Ok(Ok(None)) => {
                    debug!("reactions disabled for room {chat_room_id}, ignoring");
                }
                Ok(Err(e)) => warn!("add-reaction failed: {e}"),
                Err(e) => warn!("add-reaction task failed: {e}"),
            }
        }

        ClientCommand::DeleteMessage {
            message_id,
            chat_room_id,
        } => {
            let Some(identity) = hub.identity_of(conn_id).await else {
                return;
            };

            let db = pipeline.db().clone();
            let message_key = message_id.to_string();
            let room_key = chat_room_id.to_string();
            let user_key = identity.user_id.to_string();

            let result = tokio::task::spawn_blocking(move || {
                let Some(row) = db.get_message(&message_key)? else {
                    return Ok(false);
                };
                // Sender or room admin only
                if row.sender_id != user_key && !db.is_room_admin(&room_key, &user_key)? {
                    return Ok(false);
                }
                db.delete_message(&message_key)?;
                Ok::<_, huddle_db::StoreError>(true)
            })
            .await;

            match result {
                Ok(Ok(true)) => {
                    hub.broadcast_to_room(
                        chat_room_id,
                        ServerEvent::MessageDeleted {
                            message_id,
                            deleted_by: identity.user_id,
                        },
                        None,
                    )
                    .await;
                }
                Ok(Ok(false)) => {
                    debug!(
                        "delete-message {} by {} rejected (missing or not permitted)",
                        message_id, identity.user_id
                    );
                }
                Ok(Err(e)) => warn!("delete-message failed: {e}"),
                Err(e) => warn!("delete-message task failed: {e}"),
            }
        }

        ClientCommand::MarkMessagesRead {
            chat_room_id,
            message_ids,
        } => {
            let Some(identity) = hub.identity_of(conn_id).await else {
                return;
            };

            let db = pipeline.db().clone();
            let keys: Vec<String> = message_ids.iter().map(Uuid::to_string).collect();
            let user_key = identity.user_id.to_string();
            let now = Utc::now();
            let read_at = format_ts(now);

            let result =
                tokio::task::spawn_blocking(move || db.mark_read(&keys, &user_key, &read_at)).await;

            match result {
                Ok(Ok(marked)) if !marked.is_empty() => {
                    let marked_ids: Vec<Uuid> = marked
                        .iter()
                        .filter_map(|id| id.parse().ok())
                        .collect();
                    hub.broadcast_to_room(
                        chat_room_id,
                        ServerEvent::MessagesRead {
                            chat_room_id,
                            message_ids: marked_ids,
                            user_id: identity.user_id,
                            user_name: identity.user_name,
                            timestamp: now,
                        },
                        None,
                    )
                    .await;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("mark-messages-read failed: {e}"),
                Err(e) => warn!("mark-messages-read task failed: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_preview_respects_char_boundaries() {
        // Multibyte chars straddling the cut must not panic the slice
        let long = format!("{{\"type\":\"bad\"}}{}", "é".repeat(300));
        let preview = truncate_chars(&long, 200);
        assert_eq!(preview.chars().count(), 200);
        assert!(long.starts_with(preview));

        assert_eq!(truncate_chars("short", 200), "short");
        assert_eq!(truncate_chars("", 200), "");
    }
}
