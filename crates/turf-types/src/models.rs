use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Delivery lifecycle of a message as seen by the client.
///
/// A locally-created message starts `Pending`, becomes `Sent` once the
/// server-confirmed row is reconciled against it, or `Failed` if the send
/// call errors or times out before any confirmation arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

/// A chat message. Server-confirmed rows carry `id`; optimistic local rows
/// carry only `correlation_id` until reconciled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Option<Uuid>,
    /// Client-generated id attached to an optimistic entry so the
    /// server-confirmed row can later be matched back to it.
    pub correlation_id: Option<Uuid>,
    pub room_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    /// Reply target. Replies form a tree one level deep: a reply never has
    /// replies of its own.
    pub parent_id: Option<Uuid>,
}

/// One user's emoji reaction to one message. Identity is the
/// (message_id, user_id, emoji) triple; reacting again toggles the row off
/// rather than duplicating it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub message_id: Uuid,
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Award,
    Pin,
    Mention,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub body: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// A "user is typing" row as carried over the change feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingEntry {
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub last_seen: DateTime<Utc>,
}
