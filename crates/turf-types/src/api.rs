use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// A message the user asked to send, before it has any server identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDraft {
    pub room_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
}

/// One page of older history. `has_more` is false exactly when the page came
/// back shorter than the requested size; there is no separate count call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToggleReactionRequest {
    pub message_id: Uuid,
    pub emoji: String,
}

/// Query shape for fetching history: messages strictly older than `before`
/// (newest first up to `limit`), or the newest `limit` when `before` is None.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub room_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<DateTime<Utc>>,
    pub limit: u32,
}
