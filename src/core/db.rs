//! Durable key-value storage backed by SQLite.
use anyhow::{Error, Result};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

pub async fn async_db(db_path: &str) -> Result<Connection, Error> {
    let db = Connection::open(db_path).await?;
    db.call(|conn| {
        initialize_db(conn)?;
        Ok(())
    })
    .await?;
    Ok(db)
}

/// Creates the schema if it doesn't exist yet. Safe to call on every
/// startup.
pub fn initialize_db(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        "#,
    )
}

pub async fn kv_get(db: &Connection, key: &str) -> Result<Option<String>, Error> {
    let key = key.to_owned();
    let value = db
        .call(move |conn| {
            let value = conn
                .query_row("SELECT value FROM kv WHERE key = ?", [&key], |row| {
                    row.get::<_, String>(0)
                })
                .optional()?;
            Ok(value)
        })
        .await?;
    Ok(value)
}

pub async fn kv_set(db: &Connection, key: &str, value: &str) -> Result<(), Error> {
    let key = key.to_owned();
    let value = value.to_owned();
    db.call(move |conn| {
        conn.execute(
            r#"
            INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, CURRENT_TIMESTAMP)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
            "#,
            [&key, &value],
        )?;
        Ok(())
    })
    .await?;
    Ok(())
}

pub async fn kv_delete(db: &Connection, key: &str) -> Result<(), Error> {
    let key = key.to_owned();
    db.call(move |conn| {
        conn.execute("DELETE FROM kv WHERE key = ?", [&key])?;
        Ok(())
    })
    .await?;
    Ok(())
}

/// In-memory database with the schema applied. Used by tests.
pub async fn memory_db() -> Result<Connection, Error> {
    let db = Connection::open_in_memory().await?;
    db.call(|conn| {
        initialize_db(conn)?;
        Ok(())
    })
    .await?;
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn it_returns_none_for_missing_keys() {
        let db = memory_db().await.unwrap();
        assert_eq!(kv_get(&db, "nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn it_upserts_values() {
        let db = memory_db().await.unwrap();
        kv_set(&db, "k", "one").await.unwrap();
        kv_set(&db, "k", "two").await.unwrap();
        assert_eq!(kv_get(&db, "k").await.unwrap(), Some("two".to_string()));
    }

    #[tokio::test]
    async fn it_deletes_values() {
        let db = memory_db().await.unwrap();
        kv_set(&db, "k", "one").await.unwrap();
        kv_delete(&db, "k").await.unwrap();
        assert_eq!(kv_get(&db, "k").await.unwrap(), None);

        // Deleting twice is fine
        kv_delete(&db, "k").await.unwrap();
    }

    #[tokio::test]
    async fn it_initializes_file_db_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let path = path.to_str().unwrap();

        let db = async_db(path).await.unwrap();
        kv_set(&db, "k", "v").await.unwrap();
        drop(db);

        let db = async_db(path).await.unwrap();
        assert_eq!(kv_get(&db, "k").await.unwrap(), Some("v".to_string()));
    }
}
