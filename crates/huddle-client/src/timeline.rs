use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use huddle_types::events::ServerEvent;
use huddle_types::models::{Message, MessageKind, Reaction, ReadMarker};

/// One logical message in a room's live view. `id` is whatever identity the
/// entry arrived with: the canonical store id after a fetch, or the sender's
/// temp id when only the real-time push has been seen so far.
#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub id: String,
    pub temp_id: Option<String>,
    pub content: String,
    pub kind: MessageKind,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub reply_to: Option<Uuid>,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub edited: bool,
    pub reactions: Vec<Reaction>,
    pub read_by: Vec<ReadMarker>,
    pub timestamp: DateTime<Utc>,
}

impl TimelineEntry {
    /// Two entries are the same logical message if their ids match directly,
    /// or if one side's temp id equals the other side's id (the canonical id
    /// assigned later correlating with the token sent earlier).
    fn same_message(&self, other: &TimelineEntry) -> bool {
        self.id == other.id
            || self.temp_id.as_deref() == Some(other.id.as_str())
            || other.temp_id.as_deref() == Some(self.id.as_str())
    }

    fn matches_id(&self, id: &str) -> bool {
        self.id == id || self.temp_id.as_deref() == Some(id)
    }

    fn from_message(msg: &Message) -> Self {
        Self {
            id: msg.id.to_string(),
            temp_id: msg.temp_id.clone(),
            content: msg.content.clone(),
            kind: msg.kind,
            sender_id: msg.sender_id,
            sender_name: msg.sender_name.clone(),
            reply_to: msg.reply_to,
            file_url: msg.file_url.clone(),
            file_name: msg.file_name.clone(),
            file_size: msg.file_size,
            edited: msg.edited,
            reactions: msg.reactions.clone(),
            read_by: msg.read_by.clone(),
            timestamp: msg.created_at,
        }
    }
}

/// Ordered, duplicate-free message sequence for one room, merged from the
/// real-time push path and paginated history fetches.
#[derive(Debug)]
pub struct Timeline {
    room_id: Uuid,
    entries: Vec<TimelineEntry>,
}

impl Timeline {
    pub fn new(room_id: Uuid) -> Self {
        Self {
            room_id,
            entries: Vec::new(),
        }
    }

    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    /// Entries in display order, oldest first.
    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply a real-time event. Events for other rooms are discarded, not
    /// applied to the wrong view.
    pub fn apply_event(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::NewMessage {
                chat_room_id,
                content,
                kind,
                sender_id,
                sender_name,
                reply_to,
                file_url,
                file_name,
                file_size,
                timestamp,
                temp_id,
            } => {
                if *chat_room_id != self.room_id {
                    debug!(
                        "dropping new-message for room {} (viewing {})",
                        chat_room_id, self.room_id
                    );
                    return;
                }

                // Pushed messages have no canonical id yet; the temp id is
                // the only identity available. Without one (e.g. a system
                // message), synthesize a local id.
                let id = temp_id
                    .clone()
                    .unwrap_or_else(|| format!("local-{}", Uuid::new_v4()));

                let entry = TimelineEntry {
                    id,
                    temp_id: temp_id.clone(),
                    content: content.clone(),
                    kind: *kind,
                    sender_id: *sender_id,
                    sender_name: sender_name.clone(),
                    reply_to: *reply_to,
                    file_url: file_url.clone(),
                    file_name: file_name.clone(),
                    file_size: *file_size,
                    edited: false,
                    reactions: Vec::new(),
                    read_by: Vec::new(),
                    timestamp: *timestamp,
                };

                // The earlier entry wins; a match means we already have this
                // message (our own optimistic render, or a replayed push).
                if !self.entries.iter().any(|e| e.same_message(&entry)) {
                    self.entries.push(entry);
                }
            }

            ServerEvent::MessageReactionAdded {
                message_id,
                emoji,
                user_id,
                user_name,
            } => {
                let key = message_id.to_string();
                if let Some(entry) = self.entries.iter_mut().find(|e| e.matches_id(&key)) {
                    toggle_reaction(&mut entry.reactions, emoji, *user_id, user_name);
                }
            }

            ServerEvent::MessageDeleted { message_id, .. } => {
                let key = message_id.to_string();
                self.entries.retain(|e| !e.matches_id(&key));
            }

            ServerEvent::MessagesRead {
                chat_room_id,
                message_ids,
                user_id,
                timestamp,
                ..
            } => {
                if *chat_room_id != self.room_id {
                    return;
                }
                for message_id in message_ids {
                    let key = message_id.to_string();
                    if let Some(entry) = self.entries.iter_mut().find(|e| e.matches_id(&key)) {
                        if !entry.read_by.iter().any(|m| m.user_id == *user_id) {
                            entry.read_by.push(ReadMarker {
                                user_id: *user_id,
                                read_at: *timestamp,
                            });
                        }
                    }
                }
            }

            // Typing and presence events never enter the message sequence.
            _ => {}
        }
    }

    /// Merge a page of history (newest first, as the REST API returns it).
    /// Fetched entries that match an existing one upgrade it in place with
    /// the canonical id and persisted state; the rest are prepended in
    /// chronological order.
    pub fn merge_history(&mut self, page: &[Message]) {
        let mut fresh: Vec<TimelineEntry> = Vec::new();

        for msg in page {
            if msg.chat_room_id != self.room_id {
                debug!(
                    "dropping fetched message for room {} (viewing {})",
                    msg.chat_room_id, self.room_id
                );
                continue;
            }

            let fetched = TimelineEntry::from_message(msg);
            if let Some(existing) = self
                .entries
                .iter_mut()
                .find(|e| e.same_message(&fetched))
            {
                *existing = fetched;
            } else {
                fresh.push(fetched);
            }
        }

        // Page arrives newest-first; flip to oldest-first before prepending.
        fresh.reverse();
        fresh.append(&mut self.entries);
        self.entries = fresh;
    }
}

/// Toggle semantics shared with the store: an (emoji, user) pair already
/// present is removed, otherwise added.
fn toggle_reaction(reactions: &mut Vec<Reaction>, emoji: &str, user_id: Uuid, user_name: &str) {
    if let Some(pos) = reactions
        .iter()
        .position(|r| r.emoji == emoji && r.user_id == user_id)
    {
        reactions.remove(pos);
    } else {
        reactions.push(Reaction {
            emoji: emoji.to_string(),
            user_id,
            user_name: user_name.to_string(),
        });
    }
}
