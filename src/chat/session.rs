//! The send pipeline. A `ChatSession` owns the transcript and the
//! metrics for one client and turns each submission into a user entry,
//! a request and a streamed assistant entry.
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_rusqlite::Connection;
use tokio_util::sync::CancellationToken;

use super::assembler::{AssembledReply, StreamAssembler};
use super::models::{Message, new_message_id};
use super::tokens::estimate;
use super::transcript::{TranscriptEvent, TranscriptStore};
use crate::backend::{ChatApi, ChatRequest, ErrorEvent};
use crate::core::{DEFAULT_SESSION_KEY, SendError};
use crate::metrics::{MessageMetricsRecord, MetricsRecorder, MetricsSink, SessionTotals};

pub struct ChatSession {
    api: ChatApi,
    store: TranscriptStore,
    recorder: MetricsRecorder,
    in_flight: bool,
    input: String,
    error: Option<String>,
    // Token handed to the next send, see `cancel_handle`
    next_cancel: CancellationToken,
}

impl ChatSession {
    /// Restores the persisted transcript. Metrics and session totals
    /// always start from zero.
    pub async fn load(&mut self) -> usize {
        self.recorder.clear();
        self.store.load().await
    }

    /// Sends `raw_input` and streams the reply into the transcript.
    ///
    /// Empty input and sends made while another is in flight are
    /// refused without touching any state. Every other outcome is also
    /// visible through the transcript and `error()`.
    pub async fn send(&mut self, raw_input: &str) -> Result<AssembledReply, SendError> {
        if raw_input.trim().is_empty() {
            tracing::debug!("Ignoring empty input");
            return Err(SendError::Validation);
        }
        if self.in_flight {
            tracing::warn!("Dropping input, a message is already being sent");
            return Err(SendError::Busy);
        }

        self.in_flight = true;
        self.error = None;
        let cancel = std::mem::take(&mut self.next_cancel);

        let result = self.run_send(raw_input, &cancel).await;
        if let Err(err) = &result {
            self.handle_failure(err, raw_input);
        }

        self.in_flight = false;
        self.input.clear();
        result
    }

    /// Sends whatever is in the input buffer.
    pub async fn submit(&mut self) -> Result<AssembledReply, SendError> {
        let input = self.input.clone();
        self.send(&input).await
    }

    async fn run_send(
        &mut self,
        raw_input: &str,
        cancel: &CancellationToken,
    ) -> Result<AssembledReply, SendError> {
        let id = new_message_id();
        let started = Instant::now();

        let tokens_in = estimate(raw_input);
        self.recorder.begin(&id, tokens_in, Utc::now());

        // The server gets everything before this message as context
        let prior = self.store.messages().to_vec();
        let mut user = Message::user(raw_input, tokens_in);
        user.id = id.clone();
        self.store.append(user).await;
        tracing::info!("Sending message {} (~{} tokens)", id, tokens_in);

        let request = ChatRequest {
            message: raw_input.to_string(),
            messages: prior,
        };
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SendError::Cancelled),
            resp = self.api.chat(&request) => resp.map_err(SendError::network)?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(SendError::api(status));
        }

        StreamAssembler::start(&mut self.store, &mut self.recorder, &id, started)
            .await
            .run(response.bytes_stream(), cancel)
            .await
    }

    fn handle_failure(&mut self, err: &SendError, raw_input: &str) {
        let Some(message) = err.user_message() else {
            tracing::info!("Send stopped: {}", err);
            return;
        };
        tracing::error!("Send failed: {}", err);
        self.error = Some(message);
        self.recorder.report_error(ErrorEvent {
            error_type: err.error_type().to_string(),
            status_code: err.status_code(),
            input_length: raw_input.chars().count(),
            timestamp: Utc::now().to_rfc3339(),
        });
    }

    /// Empties the transcript, the metrics and the persisted record.
    /// Requires exclusive access, so it never overlaps a send.
    pub async fn clear(&mut self) {
        self.store.clear().await;
        self.recorder.clear();
        self.error = None;
        self.input.clear();
    }

    /// Token that cancels the next (or current) send. Cancelling stops
    /// the request or the stream, keeps whatever was received and does
    /// not report an error.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.next_cancel.clone()
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<TranscriptEvent> {
        self.store.subscribe()
    }

    pub fn messages(&self) -> &[Message] {
        self.store.messages()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, input: &str) {
        self.input = input.to_string();
    }

    pub fn session_totals(&self) -> SessionTotals {
        self.recorder.session_totals()
    }

    pub fn metrics_for(&self, id: &str) -> Option<&MessageMetricsRecord> {
        self.recorder.record(id)
    }

    pub fn api(&self) -> &ChatApi {
        &self.api
    }

    /// Waits for outstanding telemetry, e.g. before exiting.
    pub async fn flush_telemetry(&mut self) {
        self.recorder.flush_pending().await;
    }
}

/// Use `ChatSessionBuilder::new()` to construct a `ChatSession`.
pub struct ChatSessionBuilder {
    api: ChatApi,
    db: Connection,
    session_key: String,
    sink: Option<Arc<dyn MetricsSink>>,
}

impl ChatSessionBuilder {
    pub fn new(api: ChatApi, db: &Connection) -> Self {
        Self {
            api,
            db: db.clone(),
            session_key: DEFAULT_SESSION_KEY.to_string(),
            sink: None,
        }
    }

    pub fn session_key(mut self, key: &str) -> Self {
        self.session_key = key.to_string();
        self
    }

    /// Where metrics and errors go. Defaults to the chat service.
    pub fn sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> ChatSession {
        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(self.api.clone()) as Arc<dyn MetricsSink>);
        ChatSession {
            store: TranscriptStore::new(self.db, &self.session_key),
            recorder: MetricsRecorder::new(sink),
            api: self.api,
            in_flight: false,
            input: String::new(),
            error: None,
            next_cancel: CancellationToken::new(),
        }
    }
}
