//! Turns a reply byte stream into appends on a single transcript entry.
use std::time::{Duration, Instant};

use anyhow::{Error, Result, anyhow};
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::models::{EntryMetrics, Message};
use super::transcript::TranscriptStore;
use crate::core::SendError;
use crate::metrics::MetricsRecorder;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Started,
    Receiving,
    Completed,
    Failed,
}

/// Result of a fully received reply.
#[derive(Clone, Debug, PartialEq)]
pub struct AssembledReply {
    pub entry_id: String,
    /// One unit per non-empty chunk, an approximation of output tokens
    pub tokens_out: usize,
    pub first_token_time: Option<Duration>,
    pub response_time: Duration,
}

/// Decodes UTF-8 across chunk boundaries.
#[derive(Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    /// Returns all complete characters seen so far, holding back an
    /// incomplete trailing sequence for the next chunk.
    fn decode(&mut self, bytes: &[u8]) -> Result<String, Error> {
        self.pending.extend_from_slice(bytes);
        let valid_up_to = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => return Err(anyhow!("Reply stream is not valid UTF-8: {}", e)),
        };
        let rest = self.pending.split_off(valid_up_to);
        let text = String::from_utf8(std::mem::replace(&mut self.pending, rest))?;
        Ok(text)
    }

    fn finish(&self) -> Result<(), Error> {
        if !self.pending.is_empty() {
            return Err(anyhow!(
                "Reply stream ended inside a UTF-8 sequence ({} dangling bytes)",
                self.pending.len()
            ));
        }
        Ok(())
    }
}

pub struct StreamAssembler<'a> {
    store: &'a mut TranscriptStore,
    recorder: &'a mut MetricsRecorder,
    message_id: String,
    entry_id: String,
    started: Instant,
    state: StreamState,
    fragments: usize,
    decoder: Utf8Decoder,
}

impl<'a> StreamAssembler<'a> {
    /// Appends an empty assistant entry and opens the output counter
    /// for `message_id`, the id of the user message being answered.
    /// `started` is when the request went out.
    pub async fn start(
        store: &'a mut TranscriptStore,
        recorder: &'a mut MetricsRecorder,
        message_id: &str,
        started: Instant,
    ) -> StreamAssembler<'a> {
        let entry = Message::assistant_placeholder();
        let entry_id = entry.id.clone();
        store.begin_stream(entry).await;
        recorder.start_stream(message_id);
        tracing::debug!("Reply stream {} started for {}", entry_id, message_id);

        Self {
            store,
            recorder,
            message_id: message_id.to_string(),
            entry_id,
            started,
            state: StreamState::Started,
            fragments: 0,
            decoder: Utf8Decoder::default(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Pulls chunks until the stream ends, fails or is cancelled. On
    /// any failure the entry keeps whatever arrived so far and is closed
    /// to further writes.
    pub async fn run<S, B, E>(
        mut self,
        mut stream: S,
        cancel: &CancellationToken,
    ) -> Result<AssembledReply, SendError>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        match self.receive(&mut stream, cancel).await {
            Ok(()) => Ok(self.complete().await),
            Err(err) => {
                self.state = StreamState::Failed;
                self.store.end_stream();
                tracing::debug!(
                    "Reply stream {} stopped after {} fragments: {}",
                    self.entry_id,
                    self.fragments,
                    err
                );
                Err(err)
            }
        }
    }

    async fn receive<S, B, E>(
        &mut self,
        stream: &mut S,
        cancel: &CancellationToken,
    ) -> Result<(), SendError>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SendError::Cancelled),
                next = stream.next() => next,
            };
            let chunk = match next {
                None => break,
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return Err(SendError::network(e)),
            };
            let bytes = chunk.as_ref();
            if bytes.is_empty() {
                continue;
            }
            self.on_fragment(bytes).await?;
        }
        self.decoder.finish().map_err(SendError::network)
    }

    async fn on_fragment(&mut self, bytes: &[u8]) -> Result<(), SendError> {
        let text = self.decoder.decode(bytes).map_err(SendError::network)?;

        self.fragments += 1;
        if self.state == StreamState::Started {
            self.state = StreamState::Receiving;
            self.recorder
                .mark_first_token(&self.message_id, self.started.elapsed());
        }

        // A chunk holding only part of a character still counts as a
        // fragment but has nothing to append yet
        if !text.is_empty() {
            self.store
                .update_last(&self.entry_id, |msg| msg.content.push_str(&text))
                .await;
        }
        Ok(())
    }

    async fn complete(mut self) -> AssembledReply {
        let response_time = self.started.elapsed();
        let tokens_out = self.fragments;

        self.store
            .update_last(&self.entry_id, |msg| {
                msg.metrics = Some(EntryMetrics {
                    tokens_in: None,
                    tokens_out: Some(tokens_out),
                })
            })
            .await;
        self.store.end_stream();
        self.recorder
            .complete(&self.message_id, tokens_out, response_time);
        self.state = StreamState::Completed;

        AssembledReply {
            entry_id: self.entry_id.clone(),
            tokens_out,
            first_token_time: self
                .recorder
                .record(&self.message_id)
                .and_then(|r| r.first_token_time),
            response_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use chrono::Utc;
    use futures_util::stream;

    use super::*;
    use crate::chat::models::Role;
    use crate::chat::transcript::Cursor;
    use crate::core::db::memory_db;
    use crate::metrics::sink::testing::RecordingSink;

    async fn fixtures() -> (TranscriptStore, MetricsRecorder, Arc<RecordingSink>) {
        let store = TranscriptStore::new(memory_db().await.unwrap(), "test-session");
        let sink = Arc::new(RecordingSink::default());
        let mut recorder = MetricsRecorder::new(sink.clone());
        recorder.begin("user-1", 2, Utc::now());
        (store, recorder, sink)
    }

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, String>> + Unpin {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn it_assembles_fragments_in_order() {
        let (mut store, mut recorder, sink) = fixtures().await;
        let cancel = CancellationToken::new();

        let assembler =
            StreamAssembler::start(&mut store, &mut recorder, "user-1", Instant::now()).await;
        assert_eq!(assembler.state(), StreamState::Started);
        let reply = assembler
            .run(chunks(&[b"Hel", b"lo, ", b"world!"]), &cancel)
            .await
            .unwrap();

        let entry = store.last().unwrap();
        assert_eq!(entry.role, Role::Assistant);
        assert_eq!(entry.content, "Hello, world!");
        assert_eq!(entry.metrics.as_ref().unwrap().tokens_out, Some(3));
        assert_eq!(store.cursor(), &Cursor::Idle);
        assert_eq!(reply.tokens_out, 3);

        let record = recorder.record("user-1").unwrap();
        assert_eq!(record.tokens_out, 3);
        assert!(record.first_token_time.is_some());
        assert!(record.first_token_time <= record.response_time);
        assert_eq!(recorder.session_totals().tokens_out, 3);

        recorder.flush_pending().await;
        assert_eq!(sink.metrics.lock().unwrap()[0].tokens_out, 3);
    }

    #[tokio::test]
    async fn it_skips_empty_chunks() {
        let (mut store, mut recorder, _sink) = fixtures().await;
        let cancel = CancellationToken::new();

        let reply = StreamAssembler::start(&mut store, &mut recorder, "user-1", Instant::now())
            .await
            .run(chunks(&[b"", b"a", b"", b"b"]), &cancel)
            .await
            .unwrap();

        assert_eq!(reply.tokens_out, 2);
        assert_eq!(store.last().unwrap().content, "ab");
    }

    #[tokio::test]
    async fn it_completes_an_empty_stream() {
        let (mut store, mut recorder, _sink) = fixtures().await;
        let cancel = CancellationToken::new();

        let reply = StreamAssembler::start(&mut store, &mut recorder, "user-1", Instant::now())
            .await
            .run(chunks(&[]), &cancel)
            .await
            .unwrap();

        assert_eq!(reply.tokens_out, 0);
        assert!(reply.first_token_time.is_none());
        assert_eq!(store.last().unwrap().content, "");
        assert!(recorder.record("user-1").unwrap().is_complete());
    }

    #[tokio::test]
    async fn it_joins_characters_split_across_chunks() {
        let (mut store, mut recorder, _sink) = fixtures().await;
        let cancel = CancellationToken::new();

        let reply = StreamAssembler::start(&mut store, &mut recorder, "user-1", Instant::now())
            .await
            .run(chunks(&[b"caf", &[0xC3], &[0xA9]]), &cancel)
            .await
            .unwrap();

        assert_eq!(store.last().unwrap().content, "café");
        assert_eq!(reply.tokens_out, 3);
    }

    #[tokio::test]
    async fn it_fails_on_invalid_utf8() {
        let (mut store, mut recorder, _sink) = fixtures().await;
        let cancel = CancellationToken::new();

        let result = StreamAssembler::start(&mut store, &mut recorder, "user-1", Instant::now())
            .await
            .run(chunks(&[b"ok", &[0xFF, 0xFE]]), &cancel)
            .await;

        assert!(matches!(result, Err(SendError::Network(_))));
        assert_eq!(store.last().unwrap().content, "ok");
        assert_eq!(store.cursor(), &Cursor::Idle);
        assert!(!recorder.record("user-1").unwrap().is_complete());
        assert_eq!(recorder.session_totals().tokens_out, 0);
    }

    #[tokio::test]
    async fn it_fails_on_a_truncated_character() {
        let (mut store, mut recorder, _sink) = fixtures().await;
        let cancel = CancellationToken::new();

        let result = StreamAssembler::start(&mut store, &mut recorder, "user-1", Instant::now())
            .await
            .run(chunks(&[b"caf", &[0xC3]]), &cancel)
            .await;

        assert!(matches!(result, Err(SendError::Network(_))));
        assert_eq!(store.last().unwrap().content, "caf");
    }

    #[tokio::test]
    async fn it_keeps_the_partial_entry_on_transport_errors() {
        let (mut store, mut recorder, _sink) = fixtures().await;
        let cancel = CancellationToken::new();
        let parts: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err("connection reset".to_string()),
            Ok(Bytes::from_static(b"never")),
        ];

        let result = StreamAssembler::start(&mut store, &mut recorder, "user-1", Instant::now())
            .await
            .run(stream::iter(parts), &cancel)
            .await;

        match result {
            Err(SendError::Network(msg)) => assert!(msg.contains("connection reset")),
            other => panic!("Unexpected result {:?}", other),
        }
        assert_eq!(store.last().unwrap().content, "partial");
        assert_eq!(store.cursor(), &Cursor::Idle);
    }

    #[tokio::test]
    async fn it_stops_when_cancelled_mid_stream() {
        let (mut store, mut recorder, sink) = fixtures().await;
        let cancel = CancellationToken::new();
        let stalled = chunks(&[b"first"]).chain(stream::pending());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = StreamAssembler::start(&mut store, &mut recorder, "user-1", Instant::now())
            .await
            .run(stalled, &cancel)
            .await;

        assert_eq!(result, Err(SendError::Cancelled));
        assert_eq!(store.last().unwrap().content, "first");
        assert_eq!(store.cursor(), &Cursor::Idle);

        let record = recorder.record("user-1").unwrap();
        assert!(record.first_token_time.is_some());
        assert!(!record.is_complete());
        recorder.flush_pending().await;
        assert!(sink.metrics.lock().unwrap().is_empty());
    }
}
