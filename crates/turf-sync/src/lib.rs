//! Client-side real-time synchronization core for Turf chat rooms.
//!
//! The pieces compose bottom-up: a [`feed::FeedClient`] delivers change
//! events from a pluggable [`backend::FeedTransport`]; a
//! [`store::MessageStore`] keeps the optimistic, ordered message sequence
//! for one room and reconciles pending sends against confirmed rows; and a
//! [`room::RoomSession`] ties store, reactions, typing, notifications, and
//! the feed pump together behind one handle per open room.

pub mod backend;
pub mod config;
pub mod error;
pub mod feed;
pub mod history;
pub mod notify;
pub mod reactions;
pub mod room;
pub mod session;
pub mod store;
pub mod typing;

pub use config::SyncConfig;
pub use error::{BackendError, FeedError, HistoryError, SendError};
pub use feed::{FeedClient, FeedStatus};
pub use room::RoomSession;
pub use session::SessionContext;
