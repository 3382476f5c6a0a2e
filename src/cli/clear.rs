use anyhow::Result;

use super::open_session;
use crate::core::ClientContext;

pub async fn run(ctx: &ClientContext) -> Result<()> {
    let mut session = open_session(ctx).await?;
    let count = session.messages().len();
    session.clear().await;
    println!("Deleted {} messages", count);
    Ok(())
}
