use anyhow::{Error, Result};
use tokio_rusqlite::Connection;

use super::models::Message;
use crate::core::db::{kv_delete, kv_get, kv_set};

pub async fn save_transcript(
    db: &Connection,
    session_key: &str,
    messages: &[Message],
) -> Result<(), Error> {
    let data = serde_json::to_string(messages)?;
    kv_set(db, session_key, &data).await
}

/// Reads the persisted transcript. Returns `Ok(None)` when nothing
/// was saved and an error when the stored data can't be parsed.
pub async fn find_transcript(
    db: &Connection,
    session_key: &str,
) -> Result<Option<Vec<Message>>, Error> {
    let Some(data) = kv_get(db, session_key).await? else {
        return Ok(None);
    };
    let messages: Vec<Message> = serde_json::from_str(&data)?;
    Ok(Some(messages))
}

pub async fn delete_transcript(db: &Connection, session_key: &str) -> Result<(), Error> {
    kv_delete(db, session_key).await
}
