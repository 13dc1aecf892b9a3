use thiserror::Error;

/// Failure talking to the managed backend.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("not found")]
    NotFound,
}

/// Failure of an outbound user action. Returned, never thrown across the
/// render boundary, so the UI can show inline error states.
#[derive(Debug, Clone, Error)]
pub enum SendError {
    /// Content was empty after trimming. Nothing was queued.
    #[error("message is empty")]
    EmptyMessage,
    /// No signed-in session. The action was short-circuited, not retried.
    #[error("sign-in required")]
    AuthRequired,
    /// No response within the send timeout; the entry was marked failed.
    #[error("send timed out")]
    Timeout,
    /// No failed entry with this correlation id to resend.
    #[error("nothing to resend")]
    NothingToResend,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Clone, Error)]
pub enum HistoryError {
    /// A page load for this room is already in flight; the caller should
    /// wait for it rather than issue a duplicate prepend.
    #[error("a history load is already in flight")]
    AlreadyLoading,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[derive(Debug, Clone, Error)]
pub enum FeedError {
    #[error("feed transport error: {0}")]
    Transport(String),
}
