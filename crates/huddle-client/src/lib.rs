//! Client-side reconciliation between the optimistic real-time path and the
//! authoritative persisted path: one duplicate-free message sequence per
//! room, plus transient typing state with automatic expiry.

pub mod timeline;
pub mod typing;

pub use timeline::{Timeline, TimelineEntry};
pub use typing::TypingTracker;
