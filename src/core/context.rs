//! Explicitly constructed client state that is passed down instead of
//! living in globals.
use anyhow::{Error, Result};
use tokio_rusqlite::Connection;

use super::AppConfig;
use super::db::{async_db, kv_get, kv_set};

pub const DARK_MODE_KEY: &str = "dark-mode";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Preferences {
    pub dark_mode: bool,
}

impl Preferences {
    /// Reads the persisted display preference. Anything unreadable is
    /// treated as the default.
    pub async fn load(db: &Connection) -> Self {
        let dark_mode = match kv_get(db, DARK_MODE_KEY).await {
            Ok(Some(val)) => val.parse::<bool>().unwrap_or_else(|_| {
                tracing::warn!("Ignoring malformed {} preference: {:?}", DARK_MODE_KEY, val);
                false
            }),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("Failed to read display preference: {}", e);
                false
            }
        };
        Self { dark_mode }
    }

    pub async fn save(&self, db: &Connection) -> Result<(), Error> {
        kv_set(db, DARK_MODE_KEY, &self.dark_mode.to_string()).await
    }

    /// Flips the dark mode flag and writes it back.
    pub async fn toggle_dark_mode(&mut self, db: &Connection) -> Result<bool, Error> {
        self.dark_mode = !self.dark_mode;
        self.save(db).await?;
        Ok(self.dark_mode)
    }
}

pub struct ClientContext {
    pub config: AppConfig,
    pub db: Connection,
    pub preferences: Preferences,
}

impl ClientContext {
    pub fn new(config: AppConfig, db: Connection, preferences: Preferences) -> Self {
        Self {
            config,
            db,
            preferences,
        }
    }

    /// Opens storage for `config` and reads persisted preferences.
    pub async fn open(config: AppConfig) -> Result<Self, Error> {
        let db = async_db(&config.db_path).await?;
        let preferences = Preferences::load(&db).await;
        Ok(Self::new(config, db, preferences))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::memory_db;

    #[tokio::test]
    async fn it_defaults_to_light_mode() {
        let db = memory_db().await.unwrap();
        assert_eq!(Preferences::load(&db).await, Preferences { dark_mode: false });
    }

    #[tokio::test]
    async fn it_persists_toggles() {
        let db = memory_db().await.unwrap();
        let mut prefs = Preferences::load(&db).await;
        assert!(prefs.toggle_dark_mode(&db).await.unwrap());

        let reloaded = Preferences::load(&db).await;
        assert!(reloaded.dark_mode);

        prefs.toggle_dark_mode(&db).await.unwrap();
        assert!(!Preferences::load(&db).await.dark_mode);
    }

    #[tokio::test]
    async fn it_ignores_malformed_flags() {
        let db = memory_db().await.unwrap();
        kv_set(&db, DARK_MODE_KEY, "sometimes").await.unwrap();
        assert!(!Preferences::load(&db).await.dark_mode);
    }

    #[tokio::test]
    async fn it_opens_a_context_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::default().with_storage_path(dir.path().to_str().unwrap());
        let ctx = ClientContext::open(config).await.unwrap();
        assert!(!ctx.preferences.dark_mode);
    }
}
