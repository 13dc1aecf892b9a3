use std::sync::{Arc, RwLock};

use tracing::info;
use uuid::Uuid;

use crate::error::SendError;

/// The one owner of client auth state.
///
/// Initialized at app start, updated on every auth-state-change event from
/// the provider, cleared on logout. Components hold clones and consult it
/// before each outbound action; none of them cache the user id. Token
/// refresh stays with the auth provider — this only tracks "who, if anyone,
/// is signed in right now".
#[derive(Clone, Default)]
pub struct SessionContext {
    user: Arc<RwLock<Option<Uuid>>>,
}

impl SessionContext {
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn signed_in(user_id: Uuid) -> Self {
        Self { user: Arc::new(RwLock::new(Some(user_id))) }
    }

    /// Apply an auth-state-change event. `None` means the session ended;
    /// in-flight sends are not cancelled but new actions will be refused.
    pub fn on_auth_change(&self, user_id: Option<Uuid>) {
        match user_id {
            Some(id) => info!(user = %id, "session established"),
            None => info!("session ended"),
        }
        if let Ok(mut slot) = self.user.write() {
            *slot = user_id;
        }
    }

    pub fn current_user(&self) -> Option<Uuid> {
        self.user.read().ok().and_then(|slot| *slot)
    }

    /// The explicit "require auth" check every outbound action runs first.
    pub fn require_user(&self) -> Result<Uuid, SendError> {
        self.current_user().ok_or(SendError::AuthRequired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_user_refuses_when_signed_out() {
        let session = SessionContext::signed_out();
        assert!(matches!(session.require_user(), Err(SendError::AuthRequired)));
    }

    #[test]
    fn auth_change_flips_both_ways() {
        let session = SessionContext::signed_out();
        let id = Uuid::new_v4();

        session.on_auth_change(Some(id));
        assert_eq!(session.current_user(), Some(id));

        session.on_auth_change(None);
        assert_eq!(session.current_user(), None);
    }
}
