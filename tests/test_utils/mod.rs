//! Test utilities for integration tests
#![allow(dead_code)]
use tempfile::TempDir;

use streamchat::backend::ChatApi;
use streamchat::chat::{ChatSession, ChatSessionBuilder};
use streamchat::core::{AppConfig, ClientContext};

/// A client context backed by a fresh storage directory and pointed at
/// `api_url`. Keep the returned `TempDir` alive for as long as the
/// context is used.
pub async fn test_context(api_url: &str) -> (TempDir, ClientContext) {
    let dir = tempfile::tempdir().expect("Failed to create storage directory");
    let ctx = reopen(&dir, api_url).await;
    (dir, ctx)
}

/// Opens another context on the same storage, as a restarted client
/// would.
pub async fn reopen(dir: &TempDir, api_url: &str) -> ClientContext {
    let config = AppConfig::default()
        .with_storage_path(dir.path().to_str().expect("Non UTF-8 temp path"))
        .with_api_url(api_url);
    ClientContext::open(config)
        .await
        .expect("Failed to open client context")
}

/// A session that reports telemetry to the chat service itself.
pub async fn test_session(ctx: &ClientContext) -> ChatSession {
    let api = ChatApi::from_config(&ctx.config).expect("Failed to build client");
    let mut session = ChatSessionBuilder::new(api, &ctx.db)
        .session_key(&ctx.config.session_key)
        .build();
    session.load().await;
    session
}
