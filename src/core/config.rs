use std::env;
use std::time::Duration;

/// Key the transcript is persisted under unless overridden.
pub const DEFAULT_SESSION_KEY: &str = "chat-messages";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api_url: String,
    pub storage_path: String,
    pub db_path: String,
    pub session_key: String,
    pub metrics_poll_interval: Duration,
    pub connect_timeout: Duration,
}

impl AppConfig {
    /// Point the config at a different storage directory, keeping the
    /// database path in sync.
    pub fn with_storage_path(mut self, storage_path: &str) -> Self {
        self.storage_path = storage_path.to_string();
        self.db_path = db_path_for(storage_path);
        self
    }

    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let api_url = env::var("STREAMCHAT_API_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_string());
        let storage_path = env::var("STREAMCHAT_STORAGE_PATH").unwrap_or("./".to_string());
        let session_key =
            env::var("STREAMCHAT_SESSION_KEY").unwrap_or_else(|_| DEFAULT_SESSION_KEY.to_string());
        let metrics_poll_interval = secs_from_env("STREAMCHAT_METRICS_POLL_SECS", 10);
        let connect_timeout = secs_from_env("STREAMCHAT_CONNECT_TIMEOUT_SECS", 10);

        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            db_path: db_path_for(&storage_path),
            storage_path,
            session_key,
            metrics_poll_interval,
            connect_timeout,
        }
    }
}

fn db_path_for(storage_path: &str) -> String {
    format!("{}/streamchat.db", storage_path.trim_end_matches('/'))
}

fn secs_from_env(name: &str, default: u64) -> Duration {
    let secs = match env::var(name) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid value for {}: {:?}", name, val);
            default
        }),
        Err(_) => default,
    };
    Duration::from_secs(secs)
}
