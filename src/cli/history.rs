use anyhow::Result;

use super::open_session;
use crate::chat::{Message, Role};
use crate::core::ClientContext;

pub(crate) fn render_transcript(messages: &[Message]) -> String {
    if messages.is_empty() {
        return "No messages yet".to_string();
    }
    messages
        .iter()
        .map(|msg| {
            let who = match msg.role {
                Role::User => "you",
                Role::Assistant => "assistant",
            };
            format!("{}: {}", who, msg.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn run(ctx: &ClientContext) -> Result<()> {
    let session = open_session(ctx).await?;
    println!("{}", render_transcript(session.messages()));
    Ok(())
}
