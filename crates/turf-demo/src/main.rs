//! Two simulated users chatting through the sync core over the in-memory
//! backend. Run with `RUST_LOG=turf=debug` to watch the feed and store work.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use uuid::Uuid;

use turf_backend_mem::InMemoryBackend;
use turf_sync::{FeedClient, RoomSession, SessionContext, SyncConfig};
use turf_types::models::NotificationKind;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "turf=info".into()),
        )
        .init();

    // Config
    let room_name = std::env::var("TURF_ROOM").unwrap_or_else(|_| "rust-vs-go".into());
    let page_size: u32 = std::env::var("TURF_PAGE_SIZE")
        .unwrap_or_else(|_| "50".into())
        .parse()
        .context("TURF_PAGE_SIZE must be a number")?;
    let config = SyncConfig { page_size, ..SyncConfig::default() };

    let backend = Arc::new(InMemoryBackend::new());
    let room = backend.create_room(&room_name).await;
    info!(room = %room.id, name = %room.name, "circle created");

    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    // One feed client per simulated app instance.
    let alice_feed = Arc::new(FeedClient::new(backend.clone(), config.clone()));
    let bob_feed = Arc::new(FeedClient::new(backend.clone(), config.clone()));

    let alice_chat = RoomSession::open(
        backend.clone(),
        alice_feed,
        SessionContext::signed_in(alice),
        config.clone(),
        room.id,
    )
    .await?;
    let bob_chat = RoomSession::open(
        backend.clone(),
        bob_feed,
        SessionContext::signed_in(bob),
        config,
        room.id,
    )
    .await?;

    alice_chat.set_typing(true).await?;
    alice_chat
        .send_message("Rust wins on correctness, fight me", None)
        .await?;

    bob_chat.set_typing(true).await?;
    let reply_to = wait_for_messages(&bob_chat, 1).await?;
    bob_chat
        .send_message("bold words for someone in my circle", Some(reply_to))
        .await?;

    wait_for_messages(&alice_chat, 2).await?;
    let bobs_message = alice_chat.messages().await[1].id.context("unconfirmed message")?;
    alice_chat.react(bobs_message, "🔥").await?;

    backend
        .push_notification(alice, NotificationKind::Award, "genius award: hot take")
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    info!(
        typing = ?bob_chat.typing_users().await,
        unread = alice_chat.unread_notifications().await,
        "room state settled"
    );
    for message in alice_chat.messages().await {
        println!("{}", serde_json::to_string_pretty(&message)?);
    }

    bob_chat.close();
    alice_chat.close();
    Ok(())
}

/// Poll until `chat` has at least `count` messages and return the last
/// confirmed id.
async fn wait_for_messages(chat: &RoomSession, count: usize) -> anyhow::Result<Uuid> {
    for _ in 0..100 {
        let messages = chat.messages().await;
        if messages.len() >= count {
            if let Some(id) = messages.last().and_then(|m| m.id) {
                return Ok(id);
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("messages never arrived")
}
