use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use huddle_types::api::{Claims, ToggleReactionRequest, ToggleReactionResponse};
use huddle_types::events::ServerEvent;

use crate::{AppState, room_in_workspace, store_status};

pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path((room_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.emoji.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let room = room_in_workspace(&state, room_id, &claims)?;
    if !room.reactions_enabled {
        return Err(StatusCode::FORBIDDEN);
    }

    let db = state.db.clone();
    let reaction_id = Uuid::new_v4().to_string();
    let message_key = message_id.to_string();
    let user_key = claims.sub.to_string();
    let user_name = claims.username.clone();
    let emoji = req.emoji.clone();

    let added = tokio::task::spawn_blocking(move || {
        db.toggle_reaction(&reaction_id, &message_key, &user_key, &user_name, &emoji)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .map_err(|e| store_status(&e))?;

    // Both add and remove fan out as the same toggle event.
    state
        .hub
        .broadcast_to_room(
            room_id,
            ServerEvent::MessageReactionAdded {
                message_id,
                emoji: req.emoji,
                user_id: claims.sub,
                user_name: claims.username,
            },
            None,
        )
        .await;

    Ok(Json(ToggleReactionResponse { added }))
}
