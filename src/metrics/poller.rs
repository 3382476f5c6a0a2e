//! Polls the server side metrics summary while a metrics view is shown.
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{ChatApi, MetricsSummary};

pub struct SummaryPoller {
    api: ChatApi,
    interval: Duration,
    tx: watch::Sender<Option<MetricsSummary>>,
    running: Option<(CancellationToken, JoinHandle<()>)>,
}

impl SummaryPoller {
    pub fn new(api: ChatApi, interval: Duration) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            api,
            interval,
            tx,
            running: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<MetricsSummary>> {
        self.tx.subscribe()
    }

    /// Last summary received, if any.
    pub fn latest(&self) -> Option<MetricsSummary> {
        self.tx.borrow().clone()
    }

    /// Latest summary, waiting up to `timeout` for the first one to
    /// arrive if nothing was fetched yet.
    pub async fn wait_for_summary(&self, timeout: Duration) -> Option<MetricsSummary> {
        let mut rx = self.subscribe();
        let summary = match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(summary)) => (*summary).clone(),
            _ => None,
        };
        summary.or_else(|| self.latest())
    }

    pub fn is_visible(&self) -> bool {
        self.running.is_some()
    }

    /// Starts polling immediately and then on every interval. Calling
    /// it again while already polling does nothing.
    pub fn show(&mut self) {
        if self.running.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            self.api.clone(),
            self.interval,
            self.tx.clone(),
            cancel.clone(),
        ));
        self.running = Some((cancel, handle));
    }

    pub fn hide(&mut self) {
        if let Some((cancel, _handle)) = self.running.take() {
            cancel.cancel();
        }
    }

    /// Flips between shown and hidden, returning the new visibility.
    pub fn toggle(&mut self) -> bool {
        if self.is_visible() {
            self.hide();
        } else {
            self.show();
        }
        self.is_visible()
    }
}

impl Drop for SummaryPoller {
    fn drop(&mut self) {
        self.hide();
    }
}

async fn poll_loop(
    api: ChatApi,
    period: Duration,
    tx: watch::Sender<Option<MetricsSummary>>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match api.metrics_summary().await {
                    Ok(summary) => {
                        tx.send_replace(Some(summary));
                    }
                    // Keep showing the last good value
                    Err(e) => tracing::warn!("Failed to fetch metrics summary: {}", e),
                }
            }
        }
    }
    tracing::debug!("Stopped polling metrics summary");
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUMMARY: &str = r#"{"totalRequests":2,"averageResponseTime":1.0,"tokensGenerated":10,"activeUsers":1,"errorRate":0.0}"#;

    #[tokio::test]
    async fn it_polls_while_visible() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/metrics/summary")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(SUMMARY)
            .create_async()
            .await;

        let api = ChatApi::new(&server.url(), Duration::from_secs(5)).unwrap();
        let mut poller = SummaryPoller::new(api, Duration::from_secs(60));
        let mut rx = poller.subscribe();
        assert!(poller.latest().is_none());

        poller.show();
        assert!(poller.is_visible());

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("summary was not fetched")
            .unwrap();
        assert_eq!(poller.latest().unwrap().total_requests, 2);

        poller.hide();
        assert!(!poller.is_visible());
    }

    #[tokio::test]
    async fn it_keeps_the_last_value_on_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/metrics/summary")
            .with_status(500)
            .create_async()
            .await;

        let api = ChatApi::new(&server.url(), Duration::from_secs(5)).unwrap();
        let mut poller = SummaryPoller::new(api, Duration::from_millis(10));
        poller.show();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(poller.latest().is_none());
        poller.hide();
    }

    #[tokio::test]
    async fn it_returns_a_summary_fetched_before_waiting() {
        let api = ChatApi::new("http://127.0.0.1:9", Duration::from_millis(100)).unwrap();
        let poller = SummaryPoller::new(api, Duration::from_secs(60));
        let summary: MetricsSummary = serde_json::from_str(SUMMARY).unwrap();
        poller.tx.send_replace(Some(summary));

        let started = std::time::Instant::now();
        let latest = poller.wait_for_summary(Duration::from_secs(5)).await;
        assert_eq!(latest.unwrap().total_requests, 2);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn it_waits_for_the_first_summary() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/metrics/summary")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(SUMMARY)
            .create_async()
            .await;

        let api = ChatApi::new(&server.url(), Duration::from_secs(5)).unwrap();
        let mut poller = SummaryPoller::new(api, Duration::from_secs(60));
        poller.show();
        let latest = poller.wait_for_summary(Duration::from_secs(5)).await;
        assert_eq!(latest.unwrap().total_requests, 2);
    }

    #[tokio::test]
    async fn it_gives_up_waiting_after_the_timeout() {
        let api = ChatApi::new("http://127.0.0.1:9", Duration::from_millis(100)).unwrap();
        let poller = SummaryPoller::new(api, Duration::from_secs(60));
        assert!(poller.wait_for_summary(Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn it_toggles_visibility() {
        let api = ChatApi::new("http://127.0.0.1:9", Duration::from_millis(100)).unwrap();
        let mut poller = SummaryPoller::new(api, Duration::from_secs(60));
        assert!(poller.toggle());
        assert!(!poller.toggle());
    }
}
