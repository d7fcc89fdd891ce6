use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use huddle_types::events::{PresenceStatus, ServerEvent};

/// Identifier of a single WebSocket connection. A reconnect gets a fresh id;
/// there is no transition back from disconnected.
pub type ConnId = Uuid;

/// Identity bound to a connection by the identify-user command.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: Uuid,
    pub user_name: String,
    pub workspace_id: Uuid,
}

/// The in-process real-time event hub: tracks connected sessions, their room
/// subscriptions, and fans events out to room subscribers. Delivery is
/// best-effort, at-most-once; durability is the store's job.
///
/// Process-wide singleton with an explicit lifecycle (created in main,
/// dropped on shutdown). Running multiple replicas requires replacing this
/// with a shared pub/sub backplane.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    /// All connected sessions, identified or not.
    sessions: RwLock<HashMap<ConnId, Session>>,
    /// Per-room subscriber sets. Sets, not counters: joining twice must not
    /// double-subscribe or double-broadcast.
    rooms: RwLock<HashMap<Uuid, HashSet<ConnId>>>,
}

struct Session {
    tx: mpsc::UnboundedSender<ServerEvent>,
    identity: Option<Identity>,
    rooms: HashSet<Uuid>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                sessions: RwLock::new(HashMap::new()),
                rooms: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a new connection. Returns its id and the event receiver the
    /// connection loop drains into the socket.
    pub async fn register(&self) -> (ConnId, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.sessions.write().await.insert(
            conn_id,
            Session {
                tx,
                identity: None,
                rooms: HashSet::new(),
            },
        );
        (conn_id, rx)
    }

    /// Bind an identity to a connection. Idempotent; the workspace-wide
    /// online presence event fires only on the first bind.
    pub async fn identify(&self, conn_id: ConnId, identity: Identity) {
        let first_bind = {
            let mut sessions = self.inner.sessions.write().await;
            match sessions.get_mut(&conn_id) {
                Some(session) => {
                    let first = session.identity.is_none();
                    session.identity = Some(identity.clone());
                    first
                }
                None => return,
            }
        };

        if first_bind {
            info!("{} ({}) identified", identity.user_name, identity.user_id);
            self.broadcast_to_workspace(
                identity.workspace_id,
                ServerEvent::UserStatusUpdated {
                    user_id: identity.user_id,
                    user_name: identity.user_name.clone(),
                    status: PresenceStatus::Online,
                    timestamp: Utc::now(),
                },
                Some(conn_id),
            )
            .await;
        }
    }

    pub async fn identity_of(&self, conn_id: ConnId) -> Option<Identity> {
        self.inner
            .sessions
            .read()
            .await
            .get(&conn_id)
            .and_then(|s| s.identity.clone())
    }

    /// Subscribe a connection to a room channel. Idempotent: re-joining does
    /// not broadcast again. Unidentified connections are a logged no-op.
    pub async fn join_room(&self, conn_id: ConnId, room_id: Uuid) {
        let identity = {
            let mut sessions = self.inner.sessions.write().await;
            let Some(session) = sessions.get_mut(&conn_id) else {
                return;
            };
            let Some(identity) = session.identity.clone() else {
                debug!("join-chat from unidentified connection {conn_id}, ignoring");
                return;
            };
            if !session.rooms.insert(room_id) {
                // Already subscribed; confirm again but don't re-broadcast.
                let _ = session.tx.send(ServerEvent::JoinedChat(room_id));
                return;
            }
            identity
        };

        self.inner
            .rooms
            .write()
            .await
            .entry(room_id)
            .or_default()
            .insert(conn_id);

        self.broadcast_to_room(
            room_id,
            ServerEvent::UserJoinedRoom {
                user_id: identity.user_id,
                user_name: identity.user_name.clone(),
                timestamp: Utc::now(),
            },
            Some(conn_id),
        )
        .await;

        self.send_to_conn(conn_id, ServerEvent::JoinedChat(room_id)).await;
        debug!("{} joined room {}", identity.user_name, room_id);
    }

    /// Unsubscribe a connection from a room channel.
    pub async fn leave_room(&self, conn_id: ConnId, room_id: Uuid) {
        let identity = {
            let mut sessions = self.inner.sessions.write().await;
            let Some(session) = sessions.get_mut(&conn_id) else {
                return;
            };
            let Some(identity) = session.identity.clone() else {
                debug!("leave-chat from unidentified connection {conn_id}, ignoring");
                return;
            };
            if !session.rooms.remove(&room_id) {
                return;
            }
            identity
        };

        self.remove_from_room(conn_id, room_id).await;

        self.broadcast_to_room(
            room_id,
            ServerEvent::UserLeftRoom {
                user_id: identity.user_id,
                user_name: identity.user_name,
                timestamp: Utc::now(),
            },
            Some(conn_id),
        )
        .await;
    }

    pub async fn is_subscribed(&self, conn_id: ConnId, room_id: Uuid) -> bool {
        self.inner
            .sessions
            .read()
            .await
            .get(&conn_id)
            .is_some_and(|s| s.rooms.contains(&room_id))
    }

    /// Fan an event out to every current subscriber of a room, except the
    /// optional excluded connection. Fire-and-forget: subscribers that are
    /// gone simply miss the event.
    pub async fn broadcast_to_room(
        &self,
        room_id: Uuid,
        event: ServerEvent,
        exclude: Option<ConnId>,
    ) {
        let subscribers: Vec<ConnId> = {
            let rooms = self.inner.rooms.read().await;
            match rooms.get(&room_id) {
                Some(set) => set.iter().copied().collect(),
                None => return,
            }
        };

        let sessions = self.inner.sessions.read().await;
        for conn_id in subscribers {
            if Some(conn_id) == exclude {
                continue;
            }
            if let Some(session) = sessions.get(&conn_id) {
                let _ = session.tx.send(event.clone());
            }
        }
    }

    /// Send an event to every identified connection in a workspace.
    pub async fn broadcast_to_workspace(
        &self,
        workspace_id: Uuid,
        event: ServerEvent,
        exclude: Option<ConnId>,
    ) {
        let sessions = self.inner.sessions.read().await;
        for (conn_id, session) in sessions.iter() {
            if Some(*conn_id) == exclude {
                continue;
            }
            if session
                .identity
                .as_ref()
                .is_some_and(|i| i.workspace_id == workspace_id)
            {
                let _ = session.tx.send(event.clone());
            }
        }
    }

    /// Targeted send to a single connection.
    pub async fn send_to_conn(&self, conn_id: ConnId, event: ServerEvent) {
        let sessions = self.inner.sessions.read().await;
        if let Some(session) = sessions.get(&conn_id) {
            let _ = session.tx.send(event);
        }
    }

    /// Tear a connection down: one user-left-room per subscribed room, then a
    /// workspace-wide offline presence update. Runs on abnormal drops too —
    /// the connection loop calls this unconditionally on exit.
    pub async fn disconnect(&self, conn_id: ConnId) {
        let Some(session) = self.inner.sessions.write().await.remove(&conn_id) else {
            return;
        };

        for &room_id in &session.rooms {
            self.remove_from_room(conn_id, room_id).await;
        }

        if let Some(identity) = session.identity {
            let now = Utc::now();
            for &room_id in &session.rooms {
                self.broadcast_to_room(
                    room_id,
                    ServerEvent::UserLeftRoom {
                        user_id: identity.user_id,
                        user_name: identity.user_name.clone(),
                        timestamp: now,
                    },
                    None,
                )
                .await;
            }

            self.broadcast_to_workspace(
                identity.workspace_id,
                ServerEvent::UserStatusUpdated {
                    user_id: identity.user_id,
                    user_name: identity.user_name.clone(),
                    status: PresenceStatus::Offline,
                    timestamp: now,
                },
                None,
            )
            .await;

            info!("{} ({}) disconnected", identity.user_name, identity.user_id);
        }
    }

    async fn remove_from_room(&self, conn_id: ConnId, room_id: Uuid) {
        let mut rooms = self.inner.rooms.write().await;
        if let Some(set) = rooms.get_mut(&room_id) {
            set.remove(&conn_id);
            if set.is_empty() {
                rooms.remove(&room_id);
            }
        }
    }
}
