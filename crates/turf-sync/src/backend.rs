use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use turf_types::api::MessageDraft;
use turf_types::events::ChangeEvent;
use turf_types::models::{Message, Notification, Reaction, Room};

use crate::error::{BackendError, FeedError};

/// CRUD seam to the managed backend. Everything behind this trait — the
/// actual database, its schema, auth token plumbing — is out of scope for
/// the sync core and swapped out wholesale in tests.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn rooms(&self) -> Result<Vec<Room>, BackendError>;

    /// Persist a draft. The returned row is server-authoritative and echoes
    /// `correlation_id` so optimistic entries can be matched back.
    async fn insert_message(
        &self,
        draft: &MessageDraft,
        correlation_id: Uuid,
    ) -> Result<Message, BackendError>;

    /// Up to `limit` messages strictly older than `before` (newest page of
    /// the room when `before` is None), returned oldest first.
    async fn messages_before(
        &self,
        room_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Message>, BackendError>;

    /// Toggle semantics: inserts the (message, user, emoji) row if absent,
    /// deletes it if present. Returns true when the row was added.
    async fn toggle_reaction(
        &self,
        room_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<bool, BackendError>;

    async fn reactions_for_room(&self, room_id: Uuid) -> Result<Vec<Reaction>, BackendError>;

    async fn set_typing(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    ) -> Result<(), BackendError>;

    async fn notifications_for_user(&self, user_id: Uuid)
    -> Result<Vec<Notification>, BackendError>;

    async fn mark_notification_read(&self, id: Uuid) -> Result<(), BackendError>;
}

/// Push side of the backend: a server-side-filtered change feed. `open`
/// yields a stream of events for one room (plus global rows); the stream
/// closing signals a disconnect and the caller owns reconnection.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn open(
        &self,
        room_id: Uuid,
    ) -> Result<mpsc::UnboundedReceiver<ChangeEvent>, FeedError>;
}
