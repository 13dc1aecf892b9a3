use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use turf_types::api::MessageDraft;
use turf_types::events::{ChangeKind, Row};
use turf_types::models::{Message, Notification};

use crate::backend::Backend;
use crate::config::SyncConfig;
use crate::error::{BackendError, HistoryError, SendError};
use crate::feed::{FeedClient, FeedStatus, Subscription, SubscriptionKey};
use crate::history::HistoryLoader;
use crate::notify::NotificationInbox;
use crate::reactions::{ReactionLog, ReactionTally, aggregate};
use crate::session::SessionContext;
use crate::store::MessageStore;
use crate::typing::{TypingPublisher, TypingTracker};

struct RoomState {
    store: MessageStore,
    reactions: ReactionLog,
    typing: TypingTracker,
    inbox: NotificationInbox,
}

/// One open room: the store, reaction log, typing tracker, and inbox behind
/// a single handle, kept current by a background pump draining the room's
/// change-feed subscription.
///
/// Every outbound action checks the session first and returns a
/// discriminated `Result`; nothing here panics on a contract violation.
/// There is exactly one `RoomSession` per open room per client — stores are
/// never shared across rooms.
pub struct RoomSession {
    room_id: Uuid,
    backend: Arc<dyn Backend>,
    session: SessionContext,
    config: SyncConfig,
    state: Arc<Mutex<RoomState>>,
    feed: Arc<FeedClient>,
    key: SubscriptionKey,
    sub_token: Uuid,
    feed_status: watch::Receiver<FeedStatus>,
    history: HistoryLoader,
    typing_pub: TypingPublisher,
    has_more: AtomicBool,
    pump: JoinHandle<()>,
}

impl RoomSession {
    /// Subscribe to the room's feed, fetch the initial page plus reactions
    /// and notifications, and start the event pump. Events arriving while
    /// the initial fetch runs sit in the subscription's queue and are
    /// deduplicated against the fetched rows when the pump catches up.
    ///
    /// `feed` is the app-wide client: one per application, shared by every
    /// open room, so the one-subscription-per-key rule spans rooms rather
    /// than holding per handle.
    pub async fn open(
        backend: Arc<dyn Backend>,
        feed: Arc<FeedClient>,
        session: SessionContext,
        config: SyncConfig,
        room_id: Uuid,
    ) -> Result<Self, BackendError> {
        let key = SubscriptionKey::room(room_id);
        let sub = feed.subscribe(key.clone());
        let sub_token = sub.token();
        let feed_status = sub.watch_status();

        // A failed fetch must hand the subscription back, or its connect
        // task would sit on the transport with nobody draining it.
        let (state, has_more) =
            match initial_state(&backend, &session, &config, room_id).await {
                Ok(seeded) => seeded,
                Err(err) => {
                    feed.unsubscribe(sub);
                    return Err(err);
                }
            };
        let state = Arc::new(Mutex::new(state));

        let pump = tokio::spawn(pump(
            sub,
            state.clone(),
            room_id,
            config.reconcile_window,
            session.clone(),
        ));

        info!(room = %room_id, "room opened");
        Ok(Self {
            history: HistoryLoader::new(backend.clone(), room_id, config.page_size),
            typing_pub: TypingPublisher::new(backend.clone(), room_id, config.typing_debounce),
            has_more: AtomicBool::new(has_more),
            room_id,
            backend,
            session,
            config,
            state,
            feed,
            key,
            sub_token,
            feed_status,
            pump,
        })
    }

    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    /// Current feed connection state, for the room-level banner.
    pub fn feed_status(&self) -> FeedStatus {
        *self.feed_status.borrow()
    }

    pub fn watch_feed_status(&self) -> watch::Receiver<FeedStatus> {
        self.feed_status.clone()
    }

    /// Send a message. The optimistic entry appears in the store before the
    /// network call resolves; on error or timeout it is marked failed and
    /// left in place for [`RoomSession::resend`]. Returns the entry's
    /// correlation id.
    pub async fn send_message(
        &self,
        content: &str,
        parent_id: Option<Uuid>,
    ) -> Result<Uuid, SendError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SendError::EmptyMessage);
        }
        let author_id = self.session.require_user()?;

        let correlation_id = {
            let mut st = self.state.lock().await;
            st.store.insert_pending(author_id, content, parent_id, Utc::now())
        };

        // An actual send clears the typing indicator immediately, bypassing
        // the throttle. Best effort; a failure here doesn't fail the send.
        if let Err(err) = self.typing_pub.set_typing(author_id, false).await {
            debug!(room = %self.room_id, error = %err, "typing clear failed");
        }

        let draft = MessageDraft {
            room_id: self.room_id,
            author_id,
            content: content.to_string(),
            parent_id,
        };
        self.dispatch(draft, correlation_id).await
    }

    /// Retry a failed entry in place. The entry flips back to pending and
    /// goes through the same send path; other sends are unaffected either
    /// way.
    pub async fn resend(&self, correlation_id: Uuid) -> Result<Uuid, SendError> {
        self.session.require_user()?;
        let draft = {
            let mut st = self.state.lock().await;
            st.store.take_for_resend(correlation_id)
        }
        .ok_or(SendError::NothingToResend)?;
        self.dispatch(draft, correlation_id).await
    }

    async fn dispatch(&self, draft: MessageDraft, correlation_id: Uuid) -> Result<Uuid, SendError> {
        let call = self.backend.insert_message(&draft, correlation_id);
        match tokio::time::timeout(self.config.send_timeout, call).await {
            Ok(Ok(row)) => {
                // If the feed insert got here first this is a no-op
                // confirmation; reconcile is idempotent either way.
                let mut st = self.state.lock().await;
                st.store.reconcile(row, self.config.reconcile_window);
                Ok(correlation_id)
            }
            Ok(Err(err)) => {
                warn!(room = %self.room_id, error = %err, "send failed");
                self.state.lock().await.store.mark_failed(correlation_id);
                Err(err.into())
            }
            Err(_) => {
                // The write may still land server-side; if its feed event
                // ever arrives it reconciles the failed entry.
                warn!(room = %self.room_id, "send timed out");
                self.state.lock().await.store.mark_failed(correlation_id);
                Err(SendError::Timeout)
            }
        }
    }

    /// Toggle an emoji reaction. Returns true when the reaction was added.
    /// The reaction log updates when the feed event comes back.
    pub async fn react(&self, message_id: Uuid, emoji: &str) -> Result<bool, SendError> {
        let user_id = self.session.require_user()?;
        Ok(self
            .backend
            .toggle_reaction(self.room_id, message_id, user_id, emoji)
            .await?)
    }

    /// Load one more page of history before the oldest loaded message.
    /// Returns whether more remains. A call while a load is in flight
    /// returns `HistoryError::AlreadyLoading` rather than double-prepending.
    pub async fn load_older(&self) -> Result<bool, HistoryError> {
        if !self.has_more.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let before = { self.state.lock().await.store.oldest_created_at() };
        let page = self.history.load_older(before).await?;
        let has_more = page.has_more;
        self.has_more.store(has_more, Ordering::SeqCst);
        self.state.lock().await.store.prepend(page.messages);
        Ok(has_more)
    }

    pub fn has_more(&self) -> bool {
        self.has_more.load(Ordering::SeqCst)
    }

    /// Publish this user's typing state. `true` is throttled; `false` goes
    /// out immediately. Refused when signed out.
    pub async fn set_typing(&self, is_typing: bool) -> Result<(), SendError> {
        let user_id = self.session.require_user()?;
        Ok(self.typing_pub.set_typing(user_id, is_typing).await?)
    }

    /// Persist first, then mark locally: a refused write leaves the unread
    /// badge as it was instead of quietly diverging from the backend.
    pub async fn mark_notification_read(&self, id: Uuid) -> Result<(), SendError> {
        self.session.require_user()?;
        self.backend.mark_notification_read(id).await?;
        self.state.lock().await.inbox.mark_read(id);
        Ok(())
    }

    /// Mark every notification read, persisting each before marking it
    /// locally. History is kept, never deleted. On a mid-way failure the
    /// notifications already persisted stay read; the rest stay unread.
    pub async fn clear_notifications(&self) -> Result<(), SendError> {
        self.session.require_user()?;
        let unread: Vec<Uuid> = {
            let st = self.state.lock().await;
            st.inbox
                .items()
                .iter()
                .filter(|n| !n.read)
                .map(|n| n.id)
                .collect()
        };
        for id in unread {
            self.backend.mark_notification_read(id).await?;
            self.state.lock().await.inbox.mark_read(id);
        }
        Ok(())
    }

    // -- Render-side snapshots --

    pub async fn messages(&self) -> Vec<Message> {
        self.state.lock().await.store.messages().to_vec()
    }

    pub async fn message_count(&self) -> usize {
        self.state.lock().await.store.len()
    }

    pub async fn reaction_tallies(&self) -> HashMap<Uuid, Vec<ReactionTally>> {
        let st = self.state.lock().await;
        aggregate(st.reactions.rows(), self.session.current_user())
    }

    pub async fn typing_users(&self) -> Vec<Uuid> {
        self.state.lock().await.typing.typing_users(Instant::now())
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.state.lock().await.inbox.items().to_vec()
    }

    pub async fn unread_notifications(&self) -> usize {
        self.state.lock().await.inbox.unread_count()
    }

    /// Tear down the room: feed unsubscribed, pump stopped, any in-flight
    /// history load cancelled. Dropping the session does the same; this
    /// spells it out at navigation call sites.
    pub fn close(self) {}
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        self.feed.release(&self.key, self.sub_token);
        self.pump.abort();
        info!(room = %self.room_id, "room closed");
    }
}

/// The initial fetch bundle: first page of history, the room's reactions,
/// and the signed-in user's notifications.
async fn initial_state(
    backend: &Arc<dyn Backend>,
    session: &SessionContext,
    config: &SyncConfig,
    room_id: Uuid,
) -> Result<(RoomState, bool), BackendError> {
    let mut store = MessageStore::new(room_id);
    let page = backend.messages_before(room_id, None, config.page_size).await?;
    let has_more = page.len() as u32 == config.page_size;
    store.prepend(page);

    let mut reactions = ReactionLog::default();
    reactions.replace_all(backend.reactions_for_room(room_id).await?);

    let mut inbox = NotificationInbox::default();
    if let Some(user) = session.current_user() {
        inbox.replace_all(backend.notifications_for_user(user).await?);
    }

    let state = RoomState {
        store,
        reactions,
        typing: TypingTracker::new(config.typing_liveness),
        inbox,
    };
    Ok((state, has_more))
}

/// Drain the subscription into the domain stores. Events scoped to another
/// room — possible with a misbehaving transport or a handle outliving a
/// navigation — are discarded here rather than applied to the wrong store.
async fn pump(
    mut sub: Subscription,
    state: Arc<Mutex<RoomState>>,
    room_id: Uuid,
    reconcile_window: Duration,
    session: SessionContext,
) {
    while let Some(event) = sub.events.recv().await {
        if let Some(rid) = event.row.room_id() {
            if rid != room_id {
                warn!(room = %room_id, event_room = %rid, "discarding event for another room");
                continue;
            }
        }

        let mut st = state.lock().await;
        match (event.kind, event.row) {
            (ChangeKind::Insert | ChangeKind::Update, Row::Message(m)) => {
                st.store.reconcile(m, reconcile_window);
            }
            (ChangeKind::Delete, Row::Message(m)) => {
                if let Some(id) = m.id {
                    st.store.remove(id);
                }
            }
            (ChangeKind::Insert, Row::Reaction(r)) => st.reactions.apply_insert(r),
            (ChangeKind::Delete, Row::Reaction(r)) => st.reactions.apply_delete(&r),
            // Reactions toggle; they are never updated in place.
            (ChangeKind::Update, Row::Reaction(_)) => {}
            (ChangeKind::Insert | ChangeKind::Update, Row::Typing(t)) => {
                st.typing.observe(t.user_id, true, Instant::now());
            }
            (ChangeKind::Delete, Row::Typing(t)) => {
                st.typing.observe(t.user_id, false, Instant::now());
            }
            (ChangeKind::Insert | ChangeKind::Update, Row::Notification(n)) => {
                if session.current_user() == Some(n.user_id) {
                    st.inbox.push(n);
                }
            }
            // Notification history is never deleted, only marked read.
            (ChangeKind::Delete, Row::Notification(_)) => {}
        }
    }
    debug!(room = %room_id, "event pump stopped");
}
