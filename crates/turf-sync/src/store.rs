use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use turf_types::api::MessageDraft;
use turf_types::models::{DeliveryStatus, Message};

/// The authoritative in-memory message sequence for one open room.
///
/// Owns ordering and the pending→sent/failed lifecycle; the UI renders from
/// it and never mutates entries directly. The sequence is kept sorted by
/// `created_at` ascending after every mutation, with equal timestamps left
/// in insertion order so rows do not shuffle between renders.
pub struct MessageStore {
    room_id: Uuid,
    messages: Vec<Message>,
    /// Server ids already present, for deduplicating feed replays and
    /// pagination overlap.
    server_ids: HashSet<Uuid>,
}

impl MessageStore {
    pub fn new(room_id: Uuid) -> Self {
        Self { room_id, messages: Vec::new(), server_ids: HashSet::new() }
    }

    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Pagination cursor: `created_at` of the oldest loaded message.
    pub fn oldest_created_at(&self) -> Option<DateTime<Utc>> {
        self.messages.first().map(|m| m.created_at)
    }

    /// Append an optimistic entry for a just-sent draft. Returns the
    /// correlation id the caller must keep to reconcile or mark it failed.
    pub fn insert_pending(
        &mut self,
        author_id: Uuid,
        content: &str,
        parent_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Uuid {
        let correlation_id = Uuid::new_v4();
        self.insert_sorted(Message {
            id: None,
            correlation_id: Some(correlation_id),
            room_id: self.room_id,
            author_id,
            content: content.to_string(),
            created_at: now,
            status: DeliveryStatus::Pending,
            parent_id,
        });
        correlation_id
    }

    /// Fold a server-confirmed row into the sequence.
    ///
    /// Matching order: (a) an unconfirmed entry with the same correlation
    /// id; (b) an unconfirmed entry from the same author with the same
    /// trimmed content inside `window`, for transports that cannot
    /// round-trip a client id; otherwise the row is brand new and appended
    /// in order. Unconfirmed covers both pending entries and entries a
    /// timed-out send already marked failed — the write can still land
    /// server-side, and its late feed row confirms the entry instead of
    /// duplicating it. A match is replaced in its slot, and re-delivery of
    /// an already-known row updates in place, so reconciliation is
    /// idempotent.
    pub fn reconcile(&mut self, mut server: Message, window: Duration) {
        if server.room_id != self.room_id {
            warn!(store = %self.room_id, row = %server.room_id,
                "dropping confirmed row for a different room");
            return;
        }
        let Some(server_id) = server.id else {
            warn!(room = %self.room_id, "confirmed row without a server id, ignoring");
            return;
        };
        server.status = DeliveryStatus::Sent;

        if self.server_ids.contains(&server_id) {
            if let Some(existing) = self.messages.iter_mut().find(|m| m.id == Some(server_id)) {
                existing.content = server.content;
                existing.status = DeliveryStatus::Sent;
            }
            return;
        }

        let by_correlation = server.correlation_id.and_then(|cid| {
            self.messages
                .iter()
                .position(|m| is_unconfirmed(m) && m.correlation_id == Some(cid))
        });

        let matched = by_correlation.or_else(|| {
            let pos = self.messages.iter().position(|m| {
                is_unconfirmed(m)
                    && m.author_id == server.author_id
                    && m.content.trim() == server.content.trim()
                    && within_window(m.created_at, server.created_at, window)
            });
            if pos.is_some() {
                // Ambiguous if the author sent identical content twice inside
                // the window; the earliest unconfirmed entry wins.
                debug!(room = %self.room_id, "reconciled entry by content fallback");
            }
            pos
        });

        match matched {
            Some(pos) => {
                self.server_ids.insert(server_id);
                server.correlation_id = self.messages[pos].correlation_id.or(server.correlation_id);
                self.messages[pos] = server;
                self.restore_order(pos);
            }
            None => self.insert_sorted(server),
        }
    }

    /// Mark the pending entry for `correlation_id` failed, keeping it in
    /// place so the UI can offer resend. A no-op if the feed already
    /// confirmed the entry (the send response lost the race).
    pub fn mark_failed(&mut self, correlation_id: Uuid) -> bool {
        match self
            .messages
            .iter_mut()
            .find(|m| m.correlation_id == Some(correlation_id))
        {
            Some(m) if m.status == DeliveryStatus::Pending => {
                m.status = DeliveryStatus::Failed;
                true
            }
            Some(_) => {
                debug!(room = %self.room_id, %correlation_id,
                    "entry already confirmed, ignoring send failure");
                false
            }
            None => {
                warn!(room = %self.room_id, %correlation_id, "no entry to mark failed");
                false
            }
        }
    }

    /// Flip a failed entry back to pending and hand back a draft for the
    /// retry call. None if the entry is missing or not failed.
    pub fn take_for_resend(&mut self, correlation_id: Uuid) -> Option<MessageDraft> {
        let m = self
            .messages
            .iter_mut()
            .find(|m| m.correlation_id == Some(correlation_id) && m.status == DeliveryStatus::Failed)?;
        m.status = DeliveryStatus::Pending;
        Some(MessageDraft {
            room_id: m.room_id,
            author_id: m.author_id,
            content: m.content.clone(),
            parent_id: m.parent_id,
        })
    }

    /// Merge a page of older history, skipping rows already present.
    pub fn prepend(&mut self, older: Vec<Message>) {
        for mut msg in older {
            if msg.room_id != self.room_id {
                warn!(store = %self.room_id, row = %msg.room_id,
                    "dropping history row for a different room");
                continue;
            }
            msg.status = DeliveryStatus::Sent;
            self.insert_sorted(msg);
        }
    }

    /// Remove a deleted row. Pending entries have no server id and are
    /// never removed this way.
    pub fn remove(&mut self, server_id: Uuid) -> bool {
        if !self.server_ids.remove(&server_id) {
            return false;
        }
        self.messages.retain(|m| m.id != Some(server_id));
        true
    }

    fn insert_sorted(&mut self, msg: Message) {
        if let Some(id) = msg.id {
            if !self.server_ids.insert(id) {
                debug!(room = %self.room_id, %id, "duplicate row, skipping");
                return;
            }
        }
        let idx = self
            .messages
            .partition_point(|m| m.created_at <= msg.created_at);
        self.messages.insert(idx, msg);
    }

    /// After an in-place replacement, relocate the entry if the adopted
    /// server timestamp broke the neighbour ordering. Stays put otherwise,
    /// which is what preserves the slot in the common case.
    fn restore_order(&mut self, pos: usize) {
        let created_at = self.messages[pos].created_at;
        let before_ok = pos == 0 || self.messages[pos - 1].created_at <= created_at;
        let after_ok =
            pos + 1 >= self.messages.len() || created_at <= self.messages[pos + 1].created_at;
        if before_ok && after_ok {
            return;
        }
        let msg = self.messages.remove(pos);
        let idx = self
            .messages
            .partition_point(|m| m.created_at <= msg.created_at);
        self.messages.insert(idx, msg);
    }
}

fn is_unconfirmed(m: &Message) -> bool {
    matches!(m.status, DeliveryStatus::Pending | DeliveryStatus::Failed)
}

fn within_window(a: DateTime<Utc>, b: DateTime<Utc>, window: Duration) -> bool {
    let window = TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX);
    (a - b).abs() <= window
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const WINDOW: Duration = Duration::from_secs(2);

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn confirmed(room: Uuid, author: Uuid, content: &str, secs: i64) -> Message {
        Message {
            id: Some(Uuid::new_v4()),
            correlation_id: None,
            room_id: room,
            author_id: author,
            content: content.into(),
            created_at: at(secs),
            status: DeliveryStatus::Sent,
            parent_id: None,
        }
    }

    #[test]
    fn out_of_order_arrival_sorts_by_created_at() {
        let room = Uuid::new_v4();
        let author = Uuid::new_v4();
        let mut store = MessageStore::new(room);

        store.reconcile(confirmed(room, author, "second", 200), WINDOW);
        store.reconcile(confirmed(room, author, "first", 100), WINDOW);
        store.reconcile(confirmed(room, author, "third", 300), WINDOW);

        let contents: Vec<&str> = store.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["first", "second", "third"]);
    }

    #[test]
    fn equal_timestamps_keep_insertion_order() {
        let room = Uuid::new_v4();
        let author = Uuid::new_v4();
        let mut store = MessageStore::new(room);

        store.reconcile(confirmed(room, author, "a", 100), WINDOW);
        store.reconcile(confirmed(room, author, "b", 100), WINDOW);
        store.reconcile(confirmed(room, author, "c", 100), WINDOW);

        let contents: Vec<&str> = store.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["a", "b", "c"]);
    }

    #[test]
    fn pending_send_reconciles_in_place() {
        let room = Uuid::new_v4();
        let author = Uuid::new_v4();
        let mut store = MessageStore::new(room);
        store.reconcile(confirmed(room, author, "hi", 100), WINDOW);

        let cid = store.insert_pending(author, "hello", None, at(105));
        assert_eq!(store.len(), 2);
        assert_eq!(store.messages()[1].status, DeliveryStatus::Pending);

        let mut server = confirmed(room, author, "hello", 105);
        server.correlation_id = Some(cid);
        store.reconcile(server, WINDOW);

        assert_eq!(store.len(), 2);
        let entry = &store.messages()[1];
        assert_eq!(entry.status, DeliveryStatus::Sent);
        assert!(entry.id.is_some());
        assert_eq!(entry.content, "hello");
    }

    #[test]
    fn reconcile_is_idempotent() {
        let room = Uuid::new_v4();
        let author = Uuid::new_v4();
        let mut store = MessageStore::new(room);

        let cid = store.insert_pending(author, "hello", None, at(105));
        let mut server = confirmed(room, author, "hello", 105);
        server.correlation_id = Some(cid);

        store.reconcile(server.clone(), WINDOW);
        store.reconcile(server, WINDOW);

        assert_eq!(store.len(), 1);
        assert_eq!(store.messages()[0].status, DeliveryStatus::Sent);
    }

    #[test]
    fn fallback_matches_on_author_content_and_window() {
        let room = Uuid::new_v4();
        let author = Uuid::new_v4();
        let mut store = MessageStore::new(room);

        store.insert_pending(author, "hello", None, at(105));
        // Server row without a correlation id, one second later.
        store.reconcile(confirmed(room, author, "hello", 106), WINDOW);

        assert_eq!(store.len(), 1);
        assert_eq!(store.messages()[0].status, DeliveryStatus::Sent);
    }

    #[test]
    fn fallback_outside_window_appends_instead() {
        let room = Uuid::new_v4();
        let author = Uuid::new_v4();
        let mut store = MessageStore::new(room);

        store.insert_pending(author, "hello", None, at(100));
        store.reconcile(confirmed(room, author, "hello", 110), WINDOW);

        // Too far apart to be the same send: both entries remain.
        assert_eq!(store.len(), 2);
        assert_eq!(store.messages()[0].status, DeliveryStatus::Pending);
    }

    #[test]
    fn wrong_room_row_is_ignored() {
        let room = Uuid::new_v4();
        let author = Uuid::new_v4();
        let mut store = MessageStore::new(room);

        store.reconcile(confirmed(Uuid::new_v4(), author, "elsewhere", 100), WINDOW);
        assert!(store.is_empty());
    }

    #[test]
    fn mark_failed_keeps_entry_for_resend() {
        let room = Uuid::new_v4();
        let author = Uuid::new_v4();
        let mut store = MessageStore::new(room);

        let cid = store.insert_pending(author, "hello", None, at(100));
        assert!(store.mark_failed(cid));
        assert_eq!(store.messages()[0].status, DeliveryStatus::Failed);

        let draft = store.take_for_resend(cid).unwrap();
        assert_eq!(draft.content, "hello");
        assert_eq!(store.messages()[0].status, DeliveryStatus::Pending);
    }

    #[test]
    fn mark_failed_after_confirmation_is_a_no_op() {
        let room = Uuid::new_v4();
        let author = Uuid::new_v4();
        let mut store = MessageStore::new(room);

        let cid = store.insert_pending(author, "hello", None, at(100));
        let mut server = confirmed(room, author, "hello", 100);
        server.correlation_id = Some(cid);
        store.reconcile(server, WINDOW);

        // The feed won the race; the late send-error must not regress it.
        assert!(!store.mark_failed(cid));
        assert_eq!(store.messages()[0].status, DeliveryStatus::Sent);
    }

    #[test]
    fn late_confirmation_revives_failed_entry() {
        let room = Uuid::new_v4();
        let author = Uuid::new_v4();
        let mut store = MessageStore::new(room);

        // A send times out, the entry goes failed, then the write turns out
        // to have landed and its feed row shows up with the correlation id.
        let cid = store.insert_pending(author, "hello", None, at(100));
        assert!(store.mark_failed(cid));

        let mut server = confirmed(room, author, "hello", 100);
        server.correlation_id = Some(cid);
        store.reconcile(server, WINDOW);

        assert_eq!(store.len(), 1);
        assert_eq!(store.messages()[0].status, DeliveryStatus::Sent);
        // Once confirmed there is nothing left to resend.
        assert!(store.take_for_resend(cid).is_none());
    }

    #[test]
    fn fallback_also_matches_failed_entries() {
        let room = Uuid::new_v4();
        let author = Uuid::new_v4();
        let mut store = MessageStore::new(room);

        let cid = store.insert_pending(author, "hello", None, at(100));
        assert!(store.mark_failed(cid));

        // Same late-landing write, but the transport lost the client id.
        store.reconcile(confirmed(room, author, "hello", 101), WINDOW);

        assert_eq!(store.len(), 1);
        assert_eq!(store.messages()[0].status, DeliveryStatus::Sent);
    }

    #[test]
    fn prepend_deduplicates_known_ids() {
        let room = Uuid::new_v4();
        let author = Uuid::new_v4();
        let mut store = MessageStore::new(room);

        let m1 = confirmed(room, author, "one", 100);
        let m2 = confirmed(room, author, "two", 200);
        store.reconcile(m2.clone(), WINDOW);

        store.prepend(vec![m1.clone(), m2]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.oldest_created_at(), Some(m1.created_at));
    }

    #[test]
    fn remove_drops_confirmed_row() {
        let room = Uuid::new_v4();
        let author = Uuid::new_v4();
        let mut store = MessageStore::new(room);

        let m = confirmed(room, author, "gone", 100);
        let id = m.id.unwrap();
        store.reconcile(m, WINDOW);

        assert!(store.remove(id));
        assert!(store.is_empty());
        assert!(!store.remove(id));
    }
}
