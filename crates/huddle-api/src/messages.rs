use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use huddle_db::models::MessageRow;
use huddle_db::queries::{format_ts, parse_ts};
use huddle_gateway::{OutgoingMessage, PipelineError};
use huddle_types::api::{
    Claims, EditMessageRequest, MarkReadRequest, MessagePage, SendMessageRequest,
};
use huddle_types::models::{Message, Reaction, ReadMarker};
use huddle_types::events::ServerEvent;

use crate::rooms::{parse_message_kind, parse_uuid};
use crate::{AppState, room_in_workspace, store_status};

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// Paginated history, newest first. Reactions and read markers for the page
/// are batch-fetched to avoid N+1 queries.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    room_in_workspace(&state, room_id, &claims)?;

    let db = state.db.clone();
    let room_key = room_id.to_string();
    let page = query.page;
    let limit = query.limit.clamp(1, 200);

    // Run all blocking store queries off the async runtime
    let (rows, reaction_rows, marker_rows, total) = tokio::task::spawn_blocking(move || {
        let rows = db
            .get_messages_page(&room_key, page, limit)
            .map_err(|e| store_status(&e))?;
        let total = db.count_messages(&room_key).map_err(|e| store_status(&e))?;

        let message_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let reaction_rows = db
            .reactions_for_messages(&message_ids)
            .map_err(|e| store_status(&e))?;
        let marker_rows = db
            .read_markers_for_messages(&message_ids)
            .map_err(|e| store_status(&e))?;

        Ok::<_, StatusCode>((rows, reaction_rows, marker_rows, total))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    // Group per message (cheap in-memory work, fine on the async thread)
    let mut reactions_by_message: HashMap<String, Vec<Reaction>> = HashMap::new();
    for r in reaction_rows {
        reactions_by_message
            .entry(r.message_id.clone())
            .or_default()
            .push(Reaction {
                emoji: r.emoji,
                user_id: parse_uuid(&r.user_id, "reaction user_id", &r.message_id),
                user_name: r.user_name,
            });
    }

    let mut markers_by_message: HashMap<String, Vec<ReadMarker>> = HashMap::new();
    for m in marker_rows {
        markers_by_message
            .entry(m.message_id.clone())
            .or_default()
            .push(ReadMarker {
                user_id: parse_uuid(&m.user_id, "read marker user_id", &m.message_id),
                read_at: parse_ts(&m.read_at).unwrap_or_default(),
            });
    }

    let messages: Vec<Message> = rows
        .into_iter()
        .map(|row| {
            let reactions = reactions_by_message.remove(&row.id).unwrap_or_default();
            let read_by = markers_by_message.remove(&row.id).unwrap_or_default();
            message_to_api(row, reactions, read_by)
        })
        .collect();

    Ok(Json(MessagePage {
        messages,
        page,
        limit,
        total,
    }))
}

/// REST entry into the dual-write pipeline: same validation, broadcast-first
/// ordering, and durable write as the WebSocket path, with failures surfaced
/// as the HTTP response instead of a targeted event.
pub async fn send_message(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    room_in_workspace(&state, room_id, &claims)?;

    let identity = huddle_gateway::Identity {
        user_id: claims.sub,
        user_name: claims.username.clone(),
        workspace_id: claims.workspace_id,
    };

    let outgoing = OutgoingMessage {
        chat_room_id: room_id,
        content: req.content,
        kind: req.kind,
        temp_id: req.temp_id,
        reply_to: req.reply_to,
        file_url: req.file_url,
        file_name: req.file_name,
        file_size: req.file_size,
        sender_avatar: None,
    };

    // No originating connection on this path; failure reports go nowhere.
    let message_id = state
        .pipeline
        .send_message(Uuid::nil(), &identity, outgoing, false)
        .await
        .map_err(|e| match e {
            PipelineError::EmptyMessage | PipelineError::ContentTooLarge(_) => {
                StatusCode::BAD_REQUEST
            }
            PipelineError::Store(store_err) => store_status(&store_err),
            PipelineError::TaskJoin(_) => StatusCode::INTERNAL_SERVER_ERROR,
        })?;

    let row = state
        .db
        .get_message(&message_id.to_string())
        .map_err(|e| store_status(&e))?
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((
        StatusCode::CREATED,
        Json(message_to_api(row, vec![], vec![])),
    ))
}

pub async fn edit_message(
    State(state): State<AppState>,
    Path((room_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<EditMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.content.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    room_in_workspace(&state, room_id, &claims)?;

    let key = message_id.to_string();
    let row = state
        .db
        .get_message(&key)
        .map_err(|e| store_status(&e))?
        .ok_or(StatusCode::NOT_FOUND)?;
    if row.room_id != room_id.to_string() {
        return Err(StatusCode::NOT_FOUND);
    }

    // Only the sender may edit
    if row.sender_id != claims.sub.to_string() {
        return Err(StatusCode::FORBIDDEN);
    }

    state
        .db
        .edit_message(&key, &req.content, &format_ts(Utc::now()))
        .map_err(|e| store_status(&e))?;

    let row = state
        .db
        .get_message(&key)
        .map_err(|e| store_status(&e))?
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(message_to_api(row, vec![], vec![])))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path((room_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    room_in_workspace(&state, room_id, &claims)?;

    let key = message_id.to_string();
    let row = state
        .db
        .get_message(&key)
        .map_err(|e| store_status(&e))?
        .ok_or(StatusCode::NOT_FOUND)?;
    if row.room_id != room_id.to_string() {
        return Err(StatusCode::NOT_FOUND);
    }

    // Sender or room admin only
    if row.sender_id != claims.sub.to_string() {
        let is_admin = state
            .db
            .is_room_admin(&room_id.to_string(), &claims.sub.to_string())
            .map_err(|e| store_status(&e))?;
        if !is_admin {
            return Err(StatusCode::FORBIDDEN);
        }
    }

    let db = state.db.clone();
    tokio::task::spawn_blocking(move || db.delete_message(&key))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|e| store_status(&e))?;

    // Read-side removal in all live views
    state
        .hub
        .broadcast_to_room(
            room_id,
            ServerEvent::MessageDeleted {
                message_id,
                deleted_by: claims.sub,
            },
            None,
        )
        .await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    room_in_workspace(&state, room_id, &claims)?;

    let db = state.db.clone();
    let keys: Vec<String> = req.message_ids.iter().map(Uuid::to_string).collect();
    let user_key = claims.sub.to_string();
    let now = Utc::now();
    let read_at = format_ts(now);

    let marked = tokio::task::spawn_blocking(move || db.mark_read(&keys, &user_key, &read_at))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|e| store_status(&e))?;

    if !marked.is_empty() {
        let marked_ids: Vec<Uuid> = marked.iter().filter_map(|id| id.parse().ok()).collect();
        state
            .hub
            .broadcast_to_room(
                room_id,
                ServerEvent::MessagesRead {
                    chat_room_id: room_id,
                    message_ids: marked_ids,
                    user_id: claims.sub,
                    user_name: claims.username.clone(),
                    timestamp: now,
                },
                None,
            )
            .await;
    }

    Ok(StatusCode::NO_CONTENT)
}

pub(crate) fn message_to_api(
    row: MessageRow,
    reactions: Vec<Reaction>,
    read_by: Vec<ReadMarker>,
) -> Message {
    Message {
        id: parse_uuid(&row.id, "id", &row.id),
        chat_room_id: parse_uuid(&row.room_id, "room_id", &row.id),
        content: row.content,
        kind: parse_message_kind(Some(&row.kind)),
        sender_id: parse_uuid(&row.sender_id, "sender_id", &row.id),
        sender_name: row.sender_name,
        sender_avatar: row.sender_avatar,
        file_url: row.file_url,
        file_name: row.file_name,
        file_size: row.file_size,
        // Weak reference: keep the id even if the target no longer exists
        reply_to: row.reply_to.and_then(|id| id.parse().ok()),
        edited: row.edited,
        edited_at: row.edited_at.as_deref().and_then(parse_ts),
        temp_id: row.temp_id,
        reactions,
        read_by,
        created_at: parse_ts(&row.created_at).unwrap_or_default(),
    }
}
