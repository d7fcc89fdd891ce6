pub mod messages;
pub mod middleware;
pub mod reactions;
pub mod rooms;

use std::sync::Arc;

use axum::http::StatusCode;
use uuid::Uuid;

use huddle_db::models::RoomRow;
use huddle_db::{Database, StoreError};
use huddle_gateway::{Hub, Pipeline};
use huddle_types::api::Claims;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub hub: Hub,
    pub pipeline: Pipeline,
    pub jwt_secret: String,
}

/// Map store failures onto HTTP status codes.
pub(crate) fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::RoomNameTaken => StatusCode::CONFLICT,
        StoreError::DirectRoomParticipants
        | StoreError::GeneralRoomRename
        | StoreError::ContentTooLarge(_) => StatusCode::BAD_REQUEST,
        StoreError::RoomNotFound | StoreError::MessageNotFound => StatusCode::NOT_FOUND,
        StoreError::Sqlite(_) | StoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Fetch a room and enforce tenant scoping: rooms outside the caller's
/// workspace are indistinguishable from missing ones.
pub(crate) fn room_in_workspace(
    state: &AppState,
    room_id: Uuid,
    claims: &Claims,
) -> Result<RoomRow, StatusCode> {
    let row = state
        .db
        .get_room(&room_id.to_string())
        .map_err(|e| store_status(&e))?
        .ok_or(StatusCode::NOT_FOUND)?;
    if row.workspace_id != claims.workspace_id.to_string() {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(row)
}
