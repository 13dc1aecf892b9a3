//! In-memory implementation of the Turf backend and change-feed seams.
//!
//! Stands in for the managed backend in tests and the demo: plain
//! `RwLock`-guarded tables plus a per-room registry of feed senders, so
//! every write fans out to subscribed rooms the way the real feed does.
//! Carries fault-injection hooks (failing/hanging/delayed sends, failing
//! fetches, refused feed opens, raw event injection) for exercising the
//! sync core's error paths.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use turf_sync::backend::{Backend, FeedTransport};
use turf_sync::error::{BackendError, FeedError};
use turf_types::api::MessageDraft;
use turf_types::events::{ChangeEvent, Row};
use turf_types::models::{
    DeliveryStatus, Message, Notification, NotificationKind, Reaction, Room, TypingEntry,
};

#[derive(Clone)]
pub struct InMemoryBackend {
    inner: Arc<Inner>,
}

struct Inner {
    rooms: RwLock<HashMap<Uuid, Room>>,
    messages: RwLock<Vec<Message>>,
    reactions: RwLock<Vec<Reaction>>,
    notifications: RwLock<Vec<Notification>>,
    /// Feed senders per room. Closed receivers are swept on publish.
    feeds: RwLock<HashMap<Uuid, Vec<mpsc::UnboundedSender<ChangeEvent>>>>,
    failing_sends: AtomicU32,
    hanging_sends: AtomicU32,
    delayed_sends: AtomicU32,
    send_delay_ms: AtomicU64,
    failing_opens: AtomicU32,
    failing_fetches: AtomicU32,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                rooms: RwLock::new(HashMap::new()),
                messages: RwLock::new(Vec::new()),
                reactions: RwLock::new(Vec::new()),
                notifications: RwLock::new(Vec::new()),
                feeds: RwLock::new(HashMap::new()),
                failing_sends: AtomicU32::new(0),
                hanging_sends: AtomicU32::new(0),
                delayed_sends: AtomicU32::new(0),
                send_delay_ms: AtomicU64::new(0),
                failing_opens: AtomicU32::new(0),
                failing_fetches: AtomicU32::new(0),
            }),
        }
    }

    pub async fn create_room(&self, name: &str) -> Room {
        let room = Room {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.inner.rooms.write().await.insert(room.id, room.clone());
        room
    }

    /// Create a notification and deliver it over the feed, the way a
    /// server-side award/pin/mention trigger would.
    pub async fn push_notification(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        body: &str,
    ) -> Notification {
        let n = Notification {
            id: Uuid::new_v4(),
            user_id,
            kind,
            body: body.to_string(),
            read: false,
            created_at: Utc::now(),
        };
        self.inner.notifications.write().await.push(n.clone());
        self.publish(None, ChangeEvent::insert(Row::Notification(n.clone())))
            .await;
        n
    }

    // -- Fault injection --

    /// Fail the next `n` message inserts with a backend error.
    pub fn fail_sends(&self, n: u32) {
        self.inner.failing_sends.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` message inserts hang past any send timeout.
    pub fn hang_sends(&self, n: u32) {
        self.inner.hanging_sends.store(n, Ordering::SeqCst);
    }

    /// Delay the next `n` message inserts by `delay`. The write still
    /// lands: it is moved to a detached task, so it completes and publishes
    /// its feed insert even if the caller stopped waiting.
    pub fn delay_sends(&self, n: u32, delay: Duration) {
        self.inner
            .send_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self.inner.delayed_sends.store(n, Ordering::SeqCst);
    }

    /// Refuse the next `n` feed opens.
    pub fn fail_opens(&self, n: u32) {
        self.inner.failing_opens.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` history fetches with a backend error.
    pub fn fail_fetches(&self, n: u32) {
        self.inner.failing_fetches.store(n, Ordering::SeqCst);
    }

    /// Live subscriber count on a room's feed, for teardown assertions.
    pub async fn feed_subscriber_count(&self, room_id: Uuid) -> usize {
        self.inner
            .feeds
            .read()
            .await
            .get(&room_id)
            .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Deliver an arbitrary event on a room's feed, bypassing the
    /// server-side filter. Models a misbehaving transport.
    pub async fn inject_event(&self, room_id: Uuid, event: ChangeEvent) {
        self.publish(Some(room_id), event).await;
    }

    async fn store_message(
        &self,
        draft: &MessageDraft,
        correlation_id: Uuid,
    ) -> Result<Message, BackendError> {
        if !self.inner.rooms.read().await.contains_key(&draft.room_id) {
            return Err(BackendError::NotFound);
        }

        let row = Message {
            id: Some(Uuid::new_v4()),
            correlation_id: Some(correlation_id),
            room_id: draft.room_id,
            author_id: draft.author_id,
            content: draft.content.clone(),
            created_at: Utc::now(),
            status: DeliveryStatus::Sent,
            parent_id: draft.parent_id,
        };
        self.inner.messages.write().await.push(row.clone());
        self.publish(Some(draft.room_id), ChangeEvent::insert(Row::Message(row.clone())))
            .await;
        debug!(room = %draft.room_id, "message stored");
        Ok(row)
    }

    async fn publish(&self, room_id: Option<Uuid>, event: ChangeEvent) {
        let mut feeds = self.inner.feeds.write().await;
        match room_id {
            Some(rid) => {
                if let Some(senders) = feeds.get_mut(&rid) {
                    senders.retain(|tx| tx.send(event.clone()).is_ok());
                }
            }
            // Global rows (notifications) go out on every room's feed.
            None => {
                for senders in feeds.values_mut() {
                    senders.retain(|tx| tx.send(event.clone()).is_ok());
                }
            }
        }
    }
}

fn consume(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn rooms(&self) -> Result<Vec<Room>, BackendError> {
        let mut rooms: Vec<Room> = self.inner.rooms.read().await.values().cloned().collect();
        rooms.sort_by_key(|r| r.created_at);
        Ok(rooms)
    }

    async fn insert_message(
        &self,
        draft: &MessageDraft,
        correlation_id: Uuid,
    ) -> Result<Message, BackendError> {
        if consume(&self.inner.hanging_sends) {
            tokio::time::sleep(Duration::from_secs(86_400)).await;
            return Err(BackendError::Unavailable("send never completed".into()));
        }
        if consume(&self.inner.failing_sends) {
            return Err(BackendError::Unavailable("injected send failure".into()));
        }
        if consume(&self.inner.delayed_sends) {
            let delay =
                Duration::from_millis(self.inner.send_delay_ms.load(Ordering::SeqCst));
            // Detached, like a real server: the write completes whether or
            // not the caller is still waiting on the response.
            let backend = self.clone();
            let draft = draft.clone();
            let write = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                backend.store_message(&draft, correlation_id).await
            });
            return write
                .await
                .map_err(|e| BackendError::Request(e.to_string()))?;
        }
        self.store_message(draft, correlation_id).await
    }

    async fn messages_before(
        &self,
        room_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<Message>, BackendError> {
        if consume(&self.inner.failing_fetches) {
            return Err(BackendError::Unavailable("injected fetch failure".into()));
        }
        let messages = self.inner.messages.read().await;
        let mut page: Vec<Message> = messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .filter(|m| before.is_none_or(|cursor| m.created_at < cursor))
            .cloned()
            .collect();
        // Newest `limit` of the matching range, returned oldest first.
        page.sort_by_key(|m| m.created_at);
        let skip = page.len().saturating_sub(limit as usize);
        Ok(page.split_off(skip))
    }

    async fn toggle_reaction(
        &self,
        room_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<bool, BackendError> {
        let mut reactions = self.inner.reactions.write().await;
        let existing = reactions
            .iter()
            .position(|r| r.message_id == message_id && r.user_id == user_id && r.emoji == emoji);

        match existing {
            Some(pos) => {
                let row = reactions.remove(pos);
                drop(reactions);
                self.publish(Some(room_id), ChangeEvent::delete(Row::Reaction(row)))
                    .await;
                Ok(false)
            }
            None => {
                let row = Reaction {
                    message_id,
                    room_id,
                    user_id,
                    emoji: emoji.to_string(),
                    created_at: Utc::now(),
                };
                reactions.push(row.clone());
                drop(reactions);
                self.publish(Some(room_id), ChangeEvent::insert(Row::Reaction(row)))
                    .await;
                Ok(true)
            }
        }
    }

    async fn reactions_for_room(&self, room_id: Uuid) -> Result<Vec<Reaction>, BackendError> {
        Ok(self
            .inner
            .reactions
            .read()
            .await
            .iter()
            .filter(|r| r.room_id == room_id)
            .cloned()
            .collect())
    }

    async fn set_typing(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    ) -> Result<(), BackendError> {
        // Typing is ephemeral: broadcast only, nothing persisted.
        let entry = TypingEntry { room_id, user_id, last_seen: Utc::now() };
        let event = if is_typing {
            ChangeEvent::insert(Row::Typing(entry))
        } else {
            ChangeEvent::delete(Row::Typing(entry))
        };
        self.publish(Some(room_id), event).await;
        Ok(())
    }

    async fn notifications_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Notification>, BackendError> {
        Ok(self
            .inner
            .notifications
            .read()
            .await
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn mark_notification_read(&self, id: Uuid) -> Result<(), BackendError> {
        let updated = {
            let mut notifications = self.inner.notifications.write().await;
            let n = notifications
                .iter_mut()
                .find(|n| n.id == id)
                .ok_or(BackendError::NotFound)?;
            if n.read {
                None
            } else {
                n.read = true;
                Some(n.clone())
            }
        };
        if let Some(n) = updated {
            self.publish(None, ChangeEvent::update(Row::Notification(n), None))
                .await;
        }
        Ok(())
    }
}

#[async_trait]
impl FeedTransport for InMemoryBackend {
    async fn open(
        &self,
        room_id: Uuid,
    ) -> Result<mpsc::UnboundedReceiver<ChangeEvent>, FeedError> {
        if consume(&self.inner.failing_opens) {
            return Err(FeedError::Transport("injected open failure".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.feeds.write().await.entry(room_id).or_default().push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(room_id: Uuid, author_id: Uuid, content: &str) -> MessageDraft {
        MessageDraft { room_id, author_id, content: content.into(), parent_id: None }
    }

    #[tokio::test]
    async fn toggle_reaction_adds_then_removes() {
        let backend = InMemoryBackend::new();
        let room = backend.create_room("general").await;
        let (message, user) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(backend.toggle_reaction(room.id, message, user, "🔥").await.unwrap());
        assert_eq!(backend.reactions_for_room(room.id).await.unwrap().len(), 1);

        assert!(!backend.toggle_reaction(room.id, message, user, "🔥").await.unwrap());
        assert!(backend.reactions_for_room(room.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn messages_before_pages_from_newest() {
        let backend = InMemoryBackend::new();
        let room = backend.create_room("general").await;
        let author = Uuid::new_v4();

        let mut rows = Vec::new();
        for i in 0..5 {
            rows.push(
                backend
                    .insert_message(&draft(room.id, author, &format!("m{i}")), Uuid::new_v4())
                    .await
                    .unwrap(),
            );
        }

        let newest = backend.messages_before(room.id, None, 2).await.unwrap();
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[1].content, "m4");

        let older = backend
            .messages_before(room.id, Some(newest[0].created_at), 10)
            .await
            .unwrap();
        assert_eq!(older.len(), 3);
        assert_eq!(older.last().unwrap().content, "m2");
    }

    #[tokio::test]
    async fn feed_delivers_room_scoped_inserts() {
        let backend = InMemoryBackend::new();
        let room = backend.create_room("general").await;
        let other = backend.create_room("other").await;
        let author = Uuid::new_v4();

        let mut feed = backend.open(room.id).await.unwrap();
        backend
            .insert_message(&draft(other.id, author, "elsewhere"), Uuid::new_v4())
            .await
            .unwrap();
        backend
            .insert_message(&draft(room.id, author, "here"), Uuid::new_v4())
            .await
            .unwrap();

        let event = feed.recv().await.unwrap();
        assert_eq!(event.row.room_id(), Some(room.id));
    }

    #[tokio::test]
    async fn send_to_unknown_room_is_not_found() {
        let backend = InMemoryBackend::new();
        let result = backend
            .insert_message(&draft(Uuid::new_v4(), Uuid::new_v4(), "hi"), Uuid::new_v4())
            .await;
        assert!(matches!(result, Err(BackendError::NotFound)));
    }
}
