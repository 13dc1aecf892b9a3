use tracing::debug;
use uuid::Uuid;

use turf_types::models::Notification;

/// Read/unread list fed by award, pin, and mention events arriving over
/// the change feed. Ordered newest first; ties keep arrival order.
#[derive(Default)]
pub struct NotificationInbox {
    items: Vec<Notification>,
}

impl NotificationInbox {
    pub fn items(&self) -> &[Notification] {
        &self.items
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|n| !n.read).count()
    }

    /// Seed from the initial fetch. Sorting is stable, so same-timestamp
    /// rows keep the order the backend returned them in.
    pub fn replace_all(&mut self, mut items: Vec<Notification>) {
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.items = items;
    }

    /// Fan in one notification. Re-delivery of a known id updates the row
    /// in place (e.g. marked read from another device).
    pub fn push(&mut self, notification: Notification) {
        if let Some(existing) = self.items.iter_mut().find(|n| n.id == notification.id) {
            *existing = notification;
            return;
        }
        let idx = self
            .items
            .partition_point(|n| n.created_at >= notification.created_at);
        self.items.insert(idx, notification);
    }

    /// Idempotent: marking an already-read or unknown id is a no-op.
    /// Returns true when something actually changed.
    pub fn mark_read(&mut self, id: Uuid) -> bool {
        match self.items.iter_mut().find(|n| n.id == id) {
            Some(n) if !n.read => {
                n.read = true;
                true
            }
            Some(_) => false,
            None => {
                debug!(%id, "mark_read for unknown notification");
                false
            }
        }
    }

    /// Marks everything read. History is kept, never deleted.
    pub fn clear_all(&mut self) {
        for n in &mut self.items {
            n.read = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use turf_types::models::NotificationKind;

    use super::*;

    fn notification(secs: i64, kind: NotificationKind) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            kind,
            body: "you earned an award".into(),
            read: false,
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn newest_first_with_stable_ties() {
        let mut inbox = NotificationInbox::default();
        let early = notification(100, NotificationKind::Award);
        let tie_a = notification(200, NotificationKind::Pin);
        let tie_b = notification(200, NotificationKind::Mention);

        inbox.push(early.clone());
        inbox.push(tie_a.clone());
        inbox.push(tie_b.clone());

        let ids: Vec<Uuid> = inbox.items().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![tie_a.id, tie_b.id, early.id]);
    }

    #[test]
    fn mark_read_is_idempotent() {
        let mut inbox = NotificationInbox::default();
        let n = notification(100, NotificationKind::Mention);
        inbox.push(n.clone());

        assert!(inbox.mark_read(n.id));
        assert!(!inbox.mark_read(n.id));
        assert!(!inbox.mark_read(Uuid::new_v4()));
        assert_eq!(inbox.unread_count(), 0);
    }

    #[test]
    fn clear_all_marks_without_deleting() {
        let mut inbox = NotificationInbox::default();
        inbox.push(notification(100, NotificationKind::Award));
        inbox.push(notification(200, NotificationKind::System));

        inbox.clear_all();
        assert_eq!(inbox.items().len(), 2);
        assert_eq!(inbox.unread_count(), 0);
    }

    #[test]
    fn push_of_known_id_updates_in_place() {
        let mut inbox = NotificationInbox::default();
        let mut n = notification(100, NotificationKind::Award);
        inbox.push(n.clone());

        n.read = true;
        inbox.push(n);
        assert_eq!(inbox.items().len(), 1);
        assert_eq!(inbox.unread_count(), 0);
    }
}
