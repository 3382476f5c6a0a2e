//! Owns the ordered transcript, persists it on every mutation and lets
//! exactly one entry, the one currently being streamed into, change.
use tokio::sync::mpsc;
use tokio_rusqlite::Connection;

use super::db::{delete_transcript, find_transcript, save_transcript};
use super::models::{Message, Transcript};

#[derive(Clone, Debug, PartialEq)]
pub enum TranscriptEvent {
    Appended(Message),
    Updated(Message),
    Cleared,
    Loaded(usize),
}

/// Which entry, if any, may currently be mutated.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum Cursor {
    #[default]
    Idle,
    StreamingInto(String),
}

pub struct TranscriptStore {
    transcript: Transcript,
    cursor: Cursor,
    db: Connection,
    session_key: String,
    subscribers: Vec<mpsc::UnboundedSender<TranscriptEvent>>,
}

impl TranscriptStore {
    pub fn new(db: Connection, session_key: &str) -> Self {
        Self {
            transcript: Transcript::new(),
            cursor: Cursor::Idle,
            db,
            session_key: session_key.to_string(),
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<TranscriptEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn messages(&self) -> &[Message] {
        self.transcript.as_slice()
    }

    pub fn len(&self) -> usize {
        self.transcript.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transcript.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.transcript.as_slice().last()
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Restores the persisted transcript. A missing or unreadable
    /// record leaves the transcript empty and is never an error.
    pub async fn load(&mut self) -> usize {
        let messages = match find_transcript(&self.db, &self.session_key).await {
            Ok(Some(messages)) => messages,
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(
                    "Discarding unreadable transcript {}: {}",
                    self.session_key,
                    e
                );
                Vec::new()
            }
        };
        let count = messages.len();
        self.transcript = Transcript::new_with_messages(messages);
        self.cursor = Cursor::Idle;
        tracing::debug!("Loaded {} messages for {}", count, self.session_key);
        self.notify(TranscriptEvent::Loaded(count));
        count
    }

    pub async fn append(&mut self, msg: Message) {
        self.transcript.push(msg.clone());
        self.notify(TranscriptEvent::Appended(msg));
        self.persist().await;
    }

    /// Appends `msg` and makes it the only mutable entry.
    pub async fn begin_stream(&mut self, msg: Message) {
        self.cursor = Cursor::StreamingInto(msg.id.clone());
        self.append(msg).await;
    }

    /// Applies `mutator` to the last entry if and only if it is `id` and
    /// is the entry being streamed into. Anything else is a no-op and
    /// returns `false`.
    pub async fn update_last<F>(&mut self, id: &str, mutator: F) -> bool
    where
        F: FnOnce(&mut Message),
    {
        if !matches!(&self.cursor, Cursor::StreamingInto(active) if active == id) {
            tracing::debug!("Ignoring update for {}: not the active stream", id);
            return false;
        }
        let Some(last) = self.transcript.last_mut() else {
            return false;
        };
        if last.id != id {
            tracing::debug!("Ignoring update for {}: not the last entry", id);
            return false;
        }

        mutator(last);
        let updated = last.clone();
        self.notify(TranscriptEvent::Updated(updated));
        self.persist().await;
        true
    }

    /// Closes the active stream so nothing can be mutated anymore.
    pub fn end_stream(&mut self) {
        self.cursor = Cursor::Idle;
    }

    /// Empties the transcript and removes the persisted record.
    pub async fn clear(&mut self) {
        self.transcript.clear();
        self.cursor = Cursor::Idle;
        if let Err(e) = delete_transcript(&self.db, &self.session_key).await {
            tracing::warn!("Failed to remove persisted transcript: {}", e);
        }
        self.notify(TranscriptEvent::Cleared);
    }

    async fn persist(&self) {
        if let Err(e) = save_transcript(&self.db, &self.session_key, self.messages()).await {
            tracing::warn!("Failed to persist transcript: {}", e);
        }
    }

    fn notify(&mut self, event: TranscriptEvent) {
        // Drop subscribers that went away
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
