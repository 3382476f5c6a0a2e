//! Per message timing and token ledger plus running session totals.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;

use super::sink::MetricsSink;
use crate::backend::{ErrorEvent, MessageMetricsEvent};

/// Timing and token counts for one send, keyed by the id of the user
/// message that started it.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageMetricsRecord {
    pub request_time: DateTime<Utc>,
    /// Elapsed from request to first fragment, `None` until it arrives
    pub first_token_time: Option<Duration>,
    /// Elapsed from request to end of stream, `None` until complete
    pub response_time: Option<Duration>,
    pub tokens_in: usize,
    pub tokens_out: usize,
}

impl MessageMetricsRecord {
    fn new(request_time: DateTime<Utc>, tokens_in: usize) -> Self {
        Self {
            request_time,
            first_token_time: None,
            response_time: None,
            tokens_in,
            tokens_out: 0,
        }
    }

    pub fn first_token_ms(&self) -> f64 {
        self.first_token_time
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }

    pub fn response_ms(&self) -> f64 {
        self.response_time
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }

    pub fn is_complete(&self) -> bool {
        self.response_time.is_some()
    }

    fn to_event(&self, message_id: &str) -> MessageMetricsEvent {
        MessageMetricsEvent {
            message_id: message_id.to_string(),
            tokens_in: self.tokens_in,
            tokens_out: self.tokens_out,
            response_time_ms: self.response_ms(),
            time_to_first_token_ms: self.first_token_ms(),
        }
    }
}

/// Approximate tokens sent and received this session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionTotals {
    pub tokens_in: usize,
    pub tokens_out: usize,
}

pub struct MetricsRecorder {
    records: HashMap<String, MessageMetricsRecord>,
    totals: SessionTotals,
    sink: Arc<dyn MetricsSink>,
    deliveries: JoinSet<()>,
}

impl MetricsRecorder {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            records: HashMap::new(),
            totals: SessionTotals::default(),
            sink,
            deliveries: JoinSet::new(),
        }
    }

    /// Opens a record for `id` and counts its input tokens towards the
    /// session totals.
    pub fn begin(&mut self, id: &str, tokens_in: usize, request_time: DateTime<Utc>) {
        self.records
            .insert(id.to_string(), MessageMetricsRecord::new(request_time, tokens_in));
        self.totals.tokens_in += tokens_in;
    }

    /// Resets the output counter when a reply stream opens.
    pub fn start_stream(&mut self, id: &str) {
        if let Some(record) = self.records.get_mut(id) {
            record.tokens_out = 0;
        }
    }

    /// Records time to first fragment. Only the first call for an id
    /// has any effect.
    pub fn mark_first_token(&mut self, id: &str, elapsed: Duration) -> bool {
        match self.records.get_mut(id) {
            Some(record) if record.first_token_time.is_none() => {
                record.first_token_time = Some(elapsed);
                true
            }
            _ => false,
        }
    }

    /// Finalizes the record for `id` and hands it to the sink.
    pub fn complete(&mut self, id: &str, tokens_out: usize, elapsed: Duration) {
        let Some(record) = self.records.get_mut(id) else {
            tracing::warn!("No metrics record for {}", id);
            return;
        };
        record.response_time = Some(elapsed);
        record.tokens_out = tokens_out;
        self.totals.tokens_out += tokens_out;

        let event = record.to_event(id);
        tracing::info!(
            message_id = %id,
            tokens_in = event.tokens_in,
            tokens_out = event.tokens_out,
            response_time_ms = event.response_time_ms,
            time_to_first_token_ms = event.time_to_first_token_ms,
            "Message complete"
        );
        self.flush(event);
    }

    /// Reports a failed send to the sink.
    pub fn report_error(&mut self, event: ErrorEvent) {
        let sink = Arc::clone(&self.sink);
        self.spawn_delivery(async move {
            if let Err(e) = sink.log_error(&event).await {
                tracing::warn!("Failed to deliver error event: {}", e);
            }
        });
    }

    pub fn record(&self, id: &str) -> Option<&MessageMetricsRecord> {
        self.records.get(id)
    }

    pub fn records(&self) -> &HashMap<String, MessageMetricsRecord> {
        &self.records
    }

    pub fn session_totals(&self) -> SessionTotals {
        self.totals
    }

    /// Drops every record and zeroes the totals.
    pub fn clear(&mut self) {
        self.records.clear();
        self.totals = SessionTotals::default();
    }

    /// Waits for telemetry that is still being delivered.
    pub async fn flush_pending(&mut self) {
        while self.deliveries.join_next().await.is_some() {}
    }

    fn flush(&mut self, event: MessageMetricsEvent) {
        let sink = Arc::clone(&self.sink);
        self.spawn_delivery(async move {
            if let Err(e) = sink.log_metrics(&event).await {
                tracing::warn!("Failed to deliver metrics for {}: {}", event.message_id, e);
            }
        });
    }

    fn spawn_delivery<F>(&mut self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        // Reap finished deliveries so the set doesn't grow unbounded
        while self.deliveries.try_join_next().is_some() {}
        self.deliveries.spawn(fut);
    }
}
