use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use turf_types::events::ChangeEvent;

use crate::backend::FeedTransport;
use crate::config::SyncConfig;

/// Identity of a logical subscription: a channel name plus the room filter.
/// The client keeps at most one live subscription per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub channel: String,
    pub room_id: Uuid,
}

impl SubscriptionKey {
    pub fn room(room_id: Uuid) -> Self {
        Self { channel: "room".into(), room_id }
    }
}

/// Connection state of one subscription, published over a watch channel so
/// the UI can render a reconnecting/offline banner per room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Connecting,
    Live,
    Reconnecting,
    /// Retries exhausted; the subscription is terminal. The caller decides
    /// whether to tear down and resubscribe fresh.
    Unavailable,
}

/// A live subscription handle. Dropping the receiver stops event delivery;
/// pass the handle back to [`FeedClient::unsubscribe`] to release the slot.
pub struct Subscription {
    pub key: SubscriptionKey,
    pub events: mpsc::UnboundedReceiver<ChangeEvent>,
    status: watch::Receiver<FeedStatus>,
    token: Uuid,
}

impl Subscription {
    pub fn status(&self) -> FeedStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<FeedStatus> {
        self.status.clone()
    }

    pub(crate) fn token(&self) -> Uuid {
        self.token
    }
}

struct ActiveEntry {
    token: Uuid,
    abort: AbortHandle,
}

/// Wraps a [`FeedTransport`] with subscription bookkeeping and
/// reconnect-with-backoff. Delivers events; never touches domain stores —
/// mapping rows into the message store, reaction log, etc. is the caller's
/// job, which keeps this reusable for every table alike.
pub struct FeedClient {
    transport: Arc<dyn FeedTransport>,
    config: SyncConfig,
    active: Mutex<HashMap<SubscriptionKey, ActiveEntry>>,
}

impl FeedClient {
    pub fn new(transport: Arc<dyn FeedTransport>, config: SyncConfig) -> Self {
        Self { transport, config, active: Mutex::new(HashMap::new()) }
    }

    /// Open a subscription for `key`. If one is already live for the same
    /// key it is torn down first, so there is never more than one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, key: SubscriptionKey) -> Subscription {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(FeedStatus::Connecting);
        let token = Uuid::new_v4();

        let task = tokio::spawn(run_subscription(
            self.transport.clone(),
            key.clone(),
            self.config.clone(),
            event_tx,
            status_tx,
        ));

        if let Ok(mut active) = self.active.lock() {
            let entry = ActiveEntry { token, abort: task.abort_handle() };
            if let Some(prev) = active.insert(key.clone(), entry) {
                warn!(channel = %key.channel, room = %key.room_id,
                    "replacing live subscription for the same key");
                prev.abort.abort();
            }
        }

        debug!(channel = %key.channel, room = %key.room_id, "subscribed");
        Subscription { key, events: event_rx, status: status_rx, token }
    }

    /// Tear down `sub`. A handle already replaced by a newer `subscribe`
    /// call for the same key is left alone — its task was aborted then.
    pub fn unsubscribe(&self, sub: Subscription) {
        self.release(&sub.key, sub.token);
    }

    /// Token-checked teardown for callers whose `Subscription` handle lives
    /// inside a task (the room pump): the slot is released only while
    /// `token` still owns it, so a stale caller cannot tear down a newer
    /// subscription for the same key.
    pub(crate) fn release(&self, key: &SubscriptionKey, token: Uuid) {
        if let Ok(mut active) = self.active.lock() {
            let owns_slot = active.get(key).map(|e| e.token) == Some(token);
            if owns_slot {
                if let Some(entry) = active.remove(key) {
                    entry.abort.abort();
                }
                debug!(channel = %key.channel, room = %key.room_id, "unsubscribed");
            }
        }
    }
}

/// One subscription's lifetime: connect, forward events until the stream
/// drops, then reconnect with capped exponential backoff. Gives up and goes
/// `Unavailable` after `feed_max_attempts` consecutive failures.
async fn run_subscription(
    transport: Arc<dyn FeedTransport>,
    key: SubscriptionKey,
    config: SyncConfig,
    events: mpsc::UnboundedSender<ChangeEvent>,
    status: watch::Sender<FeedStatus>,
) {
    let mut attempts: u32 = 0;
    loop {
        match transport.open(key.room_id).await {
            Ok(mut rx) => {
                attempts = 0;
                let _ = status.send(FeedStatus::Live);
                info!(channel = %key.channel, room = %key.room_id, "feed live");

                while let Some(event) = rx.recv().await {
                    if events.send(event).is_err() {
                        // Consumer dropped the subscription; nothing left to do.
                        return;
                    }
                }
                warn!(channel = %key.channel, room = %key.room_id, "feed stream closed");
            }
            Err(err) => {
                warn!(channel = %key.channel, room = %key.room_id, error = %err,
                    "feed connect failed");
            }
        }

        attempts += 1;
        if attempts >= config.feed_max_attempts {
            error!(channel = %key.channel, room = %key.room_id, attempts,
                "feed unavailable, giving up");
            let _ = status.send(FeedStatus::Unavailable);
            return;
        }

        let _ = status.send(FeedStatus::Reconnecting);
        tokio::time::sleep(backoff_delay(&config, attempts)).await;
    }
}

/// Exponential backoff with a cap and up to 10% added jitter.
fn backoff_delay(config: &SyncConfig, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    let base = config.feed_backoff_base.saturating_mul(1u32 << shift);
    let capped = base.min(config.feed_backoff_cap);
    let jitter_ms = capped.as_millis() as u64 / 10;
    if jitter_ms == 0 {
        return capped;
    }
    capped + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
}
