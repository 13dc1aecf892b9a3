use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use turf_types::api::HistoryPage;

use crate::backend::Backend;
use crate::error::HistoryError;

/// Loads bounded pages of older messages for one room.
///
/// Exhaustion is signalled purely by page length: a page shorter than
/// `page_size` means there is nothing older, no count query involved. A
/// second load while one is in flight is refused so the same page can't be
/// prepended twice.
pub struct HistoryLoader {
    backend: Arc<dyn Backend>,
    room_id: Uuid,
    page_size: u32,
    in_flight: Arc<AtomicBool>,
}

impl HistoryLoader {
    pub fn new(backend: Arc<dyn Backend>, room_id: Uuid, page_size: u32) -> Self {
        Self { backend, room_id, page_size, in_flight: Arc::new(AtomicBool::new(false)) }
    }

    /// Fetch the page of messages older than `before` (the caller passes
    /// the store's oldest `created_at`, never a guessed cursor).
    pub async fn load_older(
        &self,
        before: Option<DateTime<Utc>>,
    ) -> Result<HistoryPage, HistoryError> {
        let _guard = InFlightGuard::acquire(&self.in_flight).ok_or(HistoryError::AlreadyLoading)?;

        let messages = self
            .backend
            .messages_before(self.room_id, before, self.page_size)
            .await?;
        let has_more = messages.len() as u32 == self.page_size;
        debug!(room = %self.room_id, count = messages.len(), has_more, "loaded history page");
        Ok(HistoryPage { messages, has_more })
    }
}

/// Clears the in-flight flag on drop, including when the load future is
/// cancelled by room teardown.
struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(Self { flag: flag.clone() })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_guard_is_exclusive_and_resets_on_drop() {
        let flag = Arc::new(AtomicBool::new(false));

        let guard = InFlightGuard::acquire(&flag).unwrap();
        assert!(InFlightGuard::acquire(&flag).is_none());

        drop(guard);
        assert!(InFlightGuard::acquire(&flag).is_some());
    }
}
