use anyhow::{Error, Result};
use async_trait::async_trait;

use crate::backend::{ErrorEvent, MessageMetricsEvent};

/// Where per message metrics and send failures are reported. Delivery
/// is best effort so callers log failures and move on.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn log_metrics(&self, event: &MessageMetricsEvent) -> Result<(), Error>;
    async fn log_error(&self, event: &ErrorEvent) -> Result<(), Error>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Keeps every event in memory, optionally failing each delivery.
    #[derive(Default)]
    pub struct RecordingSink {
        pub metrics: Mutex<Vec<MessageMetricsEvent>>,
        pub errors: Mutex<Vec<ErrorEvent>>,
        pub fail: bool,
    }

    impl RecordingSink {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl MetricsSink for RecordingSink {
        async fn log_metrics(&self, event: &MessageMetricsEvent) -> Result<(), Error> {
            self.metrics.lock().unwrap().push(event.clone());
            if self.fail {
                anyhow::bail!("sink unreachable");
            }
            Ok(())
        }

        async fn log_error(&self, event: &ErrorEvent) -> Result<(), Error> {
            self.errors.lock().unwrap().push(event.clone());
            if self.fail {
                anyhow::bail!("sink unreachable");
            }
            Ok(())
        }
    }
}
