use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use attendwise_realtime::config::token_store_from_env;
use attendwise_realtime::{
    ApiClient, FeedEvent, RealtimeConfig, RealtimeSession, TokenStore, Topic, TracingNotifier,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "attendwise_realtime=debug".into()),
        )
        .init();

    // ── Configuration ─────────────────────────────────────────────────────────
    let config = RealtimeConfig::from_env();
    let tokens = token_store_from_env();
    let token = tokens
        .require()
        .context("set ACCESS_TOKEN or ACCESS_TOKEN_FILE")?;

    let api = ApiClient::new(&config.api_base_url, token)?;
    let user = api.fetch_current_user().await.context("failed to load current user")?;
    info!(user_id = %user.id, name = %user.name, "signed in");

    // ── Session ───────────────────────────────────────────────────────────────
    let session = RealtimeSession::start(config, &*tokens, user, Arc::new(TracingNotifier))?;

    match session.load_conversations().await {
        Ok(conversations) => info!(count = conversations.len(), "conversations loaded"),
        Err(e) => warn!(error = %e, "failed to load conversations"),
    }

    for topic in Topic::ALL {
        let mut rx = session.bus().subscribe(topic);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => log_feed_event(&event),
                    Err(RecvError::Lagged(skipped)) => warn!(%topic, skipped, "feed subscriber lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    let mut state = session.watch_state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = state.borrow_and_update().clone();
            info!(state = %current, "connection state");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    session.dispose().await;
    Ok(())
}

fn log_feed_event(event: &FeedEvent) {
    match event {
        FeedEvent::PostDeleted(post_id) => info!(topic = %event.topic(), %post_id, "feed event"),
        FeedEvent::NewComment(payload)
        | FeedEvent::NewPost(payload)
        | FeedEvent::PostUpdated(payload)
        | FeedEvent::NewReaction(payload) => info!(topic = %event.topic(), %payload, "feed event"),
    }
}
