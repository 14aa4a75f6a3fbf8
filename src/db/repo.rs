use super::model::StoreKey;
use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

/// Open (creating if needed) the database behind `database_url`, with WAL
/// and full durability.
pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let options = connect_options(database_url)?;
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database {}", database_url))?;
    Ok(pool)
}

/// Single-connection in-memory database with migrations applied. Every
/// query must see the same memory database, hence one connection that is
/// never recycled.
pub async fn init_memory_pool() -> Result<Pool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Expand a leading `~/` in file-backed URLs and make sure the parent
/// directory exists. In-memory URLs pass through untouched.
fn connect_options(url: &str) -> Result<SqliteConnectOptions> {
    if url.starts_with("sqlite::memory") {
        return Ok(SqliteConnectOptions::from_str(url)?);
    }

    let expanded = match url
        .strip_prefix("sqlite://~/")
        .or_else(|| url.strip_prefix("sqlite:~/"))
    {
        Some(rest) => match std::env::var("HOME") {
            Ok(home) => format!("sqlite://{}/{}", home.trim_end_matches('/'), rest),
            Err(_) => url.to_string(),
        },
        None => url.to_string(),
    };

    let options = SqliteConnectOptions::from_str(&expanded)
        .with_context(|| format!("invalid database url {}", url))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);

    let filename = options.clone().get_filename();
    if let Some(parent) = filename.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    Ok(options)
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Read one document; `None` when the key was never written.
#[instrument(skip_all, fields(key = key.as_str()))]
pub async fn get_json<T: DeserializeOwned>(pool: &Pool, key: StoreKey) -> Result<Option<T>> {
    let raw: Option<String> = sqlx::query_scalar("SELECT value FROM kv_store WHERE key = ?")
        .bind(key.as_str())
        .fetch_optional(pool)
        .await
        .with_context(|| format!("failed to read {}", key.as_str()))?;
    match raw {
        Some(raw) => {
            let value = serde_json::from_str(&raw)
                .with_context(|| format!("corrupt document under {}", key.as_str()))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Replace one document.
#[instrument(skip_all, fields(key = key.as_str()))]
pub async fn put_json<T: Serialize>(pool: &Pool, key: StoreKey, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    sqlx::query(UPSERT)
        .bind(key.as_str())
        .bind(raw)
        .execute(pool)
        .await
        .with_context(|| format!("failed to write {}", key.as_str()))?;
    Ok(())
}

/// Replace several documents in one transaction.
#[instrument(skip_all, fields(count = docs.len()))]
pub async fn put_documents(pool: &Pool, docs: &[(StoreKey, String)]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for (key, raw) in docs {
        sqlx::query(UPSERT)
            .bind(key.as_str())
            .bind(raw)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to write {}", key.as_str()))?;
    }
    tx.commit().await.context("failed to commit store write")?;
    Ok(())
}

const UPSERT: &str = "INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP) \
     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at";

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips_and_overwrites() {
        let pool = init_memory_pool().await.unwrap();

        let missing: Option<Vec<i64>> = get_json(&pool, StoreKey::DeleteQueue).await.unwrap();
        assert!(missing.is_none());

        put_json(&pool, StoreKey::DeleteQueue, &vec![1_i64, 2]).await.unwrap();
        put_json(&pool, StoreKey::DeleteQueue, &vec![3_i64]).await.unwrap();
        let stored: Option<Vec<i64>> = get_json(&pool, StoreKey::DeleteQueue).await.unwrap();
        assert_eq!(stored, Some(vec![3]));

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kv_store")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn put_documents_writes_every_key() {
        let pool = init_memory_pool().await.unwrap();
        put_documents(
            &pool,
            &[
                (StoreKey::Snapshot, "[]".into()),
                (StoreKey::LastRefresh, "null".into()),
            ],
        )
        .await
        .unwrap();
        let snap: Option<Vec<serde_json::Value>> =
            get_json(&pool, StoreKey::Snapshot).await.unwrap();
        assert_eq!(snap, Some(vec![]));
    }

    #[tokio::test]
    async fn file_pool_creates_parent_directory() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("nested").join("quotes.db");
        let url = format!("sqlite://{}", path.display());
        let pool = init_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        assert!(path.exists());

        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode, "wal");
    }
}
