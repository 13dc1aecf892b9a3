use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, Notification, Reaction, TypingEntry};

/// What happened to the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row delivered over the change feed, tagged by source table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "table", content = "row")]
#[serde(rename_all = "snake_case")]
pub enum Row {
    Message(Message),
    Reaction(Reaction),
    Notification(Notification),
    Typing(TypingEntry),
}

impl Row {
    /// Returns the room this row is scoped to. Rows that return `None`
    /// (notifications) are global and delivered on every room's feed.
    pub fn room_id(&self) -> Option<Uuid> {
        match self {
            Self::Message(m) => Some(m.room_id),
            Self::Reaction(r) => Some(r.room_id),
            Self::Typing(t) => Some(t.room_id),
            Self::Notification(_) => None,
        }
    }
}

/// One change-feed event: an insert, update, or delete of a single row.
/// For updates, `previous` carries the pre-image when the transport
/// provides one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub row: Row,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<Row>,
}

impl ChangeEvent {
    pub fn insert(row: Row) -> Self {
        Self { kind: ChangeKind::Insert, row, previous: None }
    }

    pub fn update(row: Row, previous: Option<Row>) -> Self {
        Self { kind: ChangeKind::Update, row, previous }
    }

    pub fn delete(row: Row) -> Self {
        Self { kind: ChangeKind::Delete, row, previous: None }
    }
}
