use anyhow::{Result, anyhow};

use super::chat::send_and_print;
use super::open_session;
use crate::core::{ClientContext, SendError};

pub async fn run(ctx: &ClientContext, message: &str) -> Result<()> {
    let mut session = open_session(ctx).await?;
    let result = send_and_print(&mut session, message).await;
    session.flush_telemetry().await;

    match result {
        Ok(reply) => {
            tracing::debug!("Reply {} used ~{} tokens", reply.entry_id, reply.tokens_out);
            Ok(())
        }
        Err(SendError::Cancelled) => Ok(()),
        Err(err) => Err(anyhow!(
            session.error().map(str::to_string).unwrap_or_else(|| err.to_string())
        )),
    }
}
