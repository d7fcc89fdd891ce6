use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::warn;
use uuid::Uuid;

use huddle_db::models::{NewRoom, ParticipantRow, RoomRow};
use huddle_db::queries::parse_ts;
use huddle_types::api::{AddParticipantRequest, Claims, CreateRoomRequest, UpdateRoomRequest};
use huddle_types::models::{
    ChatRoom, LastMessage, MessageKind, Participant, RoomKind, RoomSettings,
};

use crate::{AppState, store_status};

pub async fn create_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let name = req.name.trim();
    if name.is_empty() || name.len() > 100 {
        return Err(StatusCode::BAD_REQUEST);
    }
    // The general room comes from the seeding routine, not from clients.
    if req.kind == RoomKind::General {
        return Err(StatusCode::BAD_REQUEST);
    }

    let settings = req.settings.unwrap_or_default();
    let room_id = Uuid::new_v4();

    // Creator is always a participant and an admin.
    let mut participants: Vec<(String, bool)> = vec![(claims.sub.to_string(), true)];
    for user_id in &req.participants {
        if *user_id != claims.sub {
            participants.push((user_id.to_string(), false));
        }
    }

    state
        .db
        .create_room(&NewRoom {
            id: &room_id.to_string(),
            workspace_id: &claims.workspace_id.to_string(),
            name,
            description: req.description.as_deref(),
            kind: req.kind.as_str(),
            participants: &participants,
            file_sharing: settings.file_sharing,
            reactions_enabled: settings.reactions,
            notifications_enabled: settings.notifications_enabled,
            retention_days: settings.retention_days,
        })
        .map_err(|e| store_status(&e))?;

    let room = fetch_room(&state, room_id)?;
    Ok((StatusCode::CREATED, Json(room)))
}

pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let rows = state
        .db
        .list_rooms(&claims.workspace_id.to_string())
        .map_err(|e| store_status(&e))?;

    let mut rooms = Vec::with_capacity(rows.len());
    for row in rows {
        let participants = state
            .db
            .get_participants(&row.id)
            .map_err(|e| store_status(&e))?;
        rooms.push(room_to_api(row, participants));
    }
    Ok(Json(rooms))
}

pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let room = fetch_room(&state, room_id)?;
    if room.workspace_id != claims.workspace_id {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(room))
}

pub async fn update_room(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateRoomRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&state, room_id, &claims)?;

    let settings = req
        .settings
        .map(|s| (s.file_sharing, s.reactions, s.notifications_enabled, s.retention_days));

    state
        .db
        .update_room(
            &room_id.to_string(),
            req.name.as_deref(),
            req.description.as_deref(),
            req.archived,
            settings,
        )
        .map_err(|e| store_status(&e))?;

    let room = fetch_room(&state, room_id)?;
    Ok(Json(room))
}

pub async fn add_participant(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<AddParticipantRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&state, room_id, &claims)?;

    state
        .db
        .add_participant(&room_id.to_string(), &req.user_id.to_string(), req.is_admin)
        .map_err(|e| store_status(&e))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_participant(
    State(state): State<AppState>,
    Path((room_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&state, room_id, &claims)?;

    state
        .db
        .remove_participant(&room_id.to_string(), &user_id.to_string())
        .map_err(|e| store_status(&e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Hard delete. The store serializes this against in-flight message writes,
/// so a room never disappears mid-insert.
pub async fn delete_room(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    require_admin(&state, room_id, &claims)?;

    let db = state.db.clone();
    let key = room_id.to_string();
    tokio::task::spawn_blocking(move || db.delete_room(&key))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|e| store_status(&e))?;
    Ok(StatusCode::NO_CONTENT)
}

fn require_admin(state: &AppState, room_id: Uuid, claims: &Claims) -> Result<(), StatusCode> {
    let room = fetch_room(state, room_id)?;
    if room.workspace_id != claims.workspace_id {
        return Err(StatusCode::NOT_FOUND);
    }
    let is_admin = state
        .db
        .is_room_admin(&room_id.to_string(), &claims.sub.to_string())
        .map_err(|e| store_status(&e))?;
    if !is_admin {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(())
}

fn fetch_room(state: &AppState, room_id: Uuid) -> Result<ChatRoom, StatusCode> {
    let row = state
        .db
        .get_room(&room_id.to_string())
        .map_err(|e| store_status(&e))?
        .ok_or(StatusCode::NOT_FOUND)?;
    let participants = state
        .db
        .get_participants(&row.id)
        .map_err(|e| store_status(&e))?;
    Ok(room_to_api(row, participants))
}

pub(crate) fn room_to_api(row: RoomRow, participants: Vec<ParticipantRow>) -> ChatRoom {
    let last_message = match (
        &row.last_message_content,
        &row.last_message_sender_id,
        &row.last_message_sender_name,
        &row.last_message_at,
    ) {
        (Some(content), Some(sender_id), Some(sender_name), Some(at)) => Some(LastMessage {
            content: content.clone(),
            sender_id: parse_uuid(sender_id, "last_message_sender_id", &row.id),
            sender_name: sender_name.clone(),
            timestamp: parse_ts(at).unwrap_or_default(),
            kind: parse_message_kind(row.last_message_kind.as_deref()),
        }),
        _ => None,
    };

    ChatRoom {
        id: parse_uuid(&row.id, "id", &row.id),
        workspace_id: parse_uuid(&row.workspace_id, "workspace_id", &row.id),
        name: row.name,
        description: row.description,
        kind: match row.kind.as_str() {
            "general" => RoomKind::General,
            "direct" => RoomKind::Direct,
            _ => RoomKind::Private,
        },
        participants: participants
            .into_iter()
            .map(|p| Participant {
                user_id: parse_uuid(&p.user_id, "participant user_id", &p.room_id),
                is_admin: p.is_admin,
            })
            .collect(),
        archived: row.archived,
        settings: RoomSettings {
            file_sharing: row.file_sharing,
            reactions: row.reactions_enabled,
            notifications_enabled: row.notifications_enabled,
            retention_days: row.retention_days,
        },
        last_message,
        created_at: parse_ts(&row.created_at).unwrap_or_default(),
    }
}

pub(crate) fn parse_uuid(raw: &str, field: &str, context: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {field} '{raw}' on '{context}': {e}");
        Uuid::default()
    })
}

pub(crate) fn parse_message_kind(raw: Option<&str>) -> MessageKind {
    match raw {
        Some("file") => MessageKind::File,
        Some("image") => MessageKind::Image,
        Some("system") => MessageKind::System,
        _ => MessageKind::Text,
    }
}
