use thiserror::Error;

/// Store-layer failures. Invariant violations get their own variants so the
/// REST layer can map them to meaningful status codes.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a room with this name already exists in the workspace")]
    RoomNameTaken,

    #[error("direct rooms have exactly two participants")]
    DirectRoomParticipants,

    #[error("the general room cannot be renamed")]
    GeneralRoomRename,

    #[error("room not found")]
    RoomNotFound,

    #[error("message not found")]
    MessageNotFound,

    #[error("content exceeds {0} characters")]
    ContentTooLarge(usize),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Internal(String),
}

impl StoreError {
    /// True for violations of a caller-visible invariant (as opposed to
    /// storage faults).
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::RoomNameTaken
                | Self::DirectRoomParticipants
                | Self::GeneralRoomRename
                | Self::ContentTooLarge(_)
        )
    }
}
