//! Cache namespace storage for the interception worker.

use super::model::CachedResponse;
use super::repo::Pool;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::instrument;

/// Create the namespace if it does not exist yet.
#[instrument(skip_all, fields(namespace = name))]
pub async fn open_namespace(pool: &Pool, name: &str) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO cache_namespaces (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await
        .with_context(|| format!("failed to open cache namespace {}", name))?;
    Ok(())
}

/// Namespace names in creation order.
pub async fn list_namespaces(pool: &Pool) -> Result<Vec<String>> {
    let names = sqlx::query_scalar("SELECT name FROM cache_namespaces ORDER BY rowid ASC")
        .fetch_all(pool)
        .await?;
    Ok(names)
}

/// Drop a namespace with all of its entries. Returns whether it existed.
#[instrument(skip_all, fields(namespace = name))]
pub async fn delete_namespace(pool: &Pool, name: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM cache_entries WHERE namespace = ?")
        .bind(name)
        .execute(&mut *tx)
        .await?;
    let res = sqlx::query("DELETE FROM cache_namespaces WHERE name = ?")
        .bind(name)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(res.rows_affected() > 0)
}

/// Store a response under `request_key`, replacing any earlier copy in the
/// same namespace. Opens the namespace on first use.
#[instrument(skip_all, fields(namespace = namespace, request_key = request_key))]
pub async fn put_response(
    pool: &Pool,
    namespace: &str,
    request_key: &str,
    status: u16,
    content_type: Option<&str>,
    body: &[u8],
) -> Result<()> {
    open_namespace(pool, namespace).await?;
    sqlx::query(
        "INSERT INTO cache_entries (namespace, request_key, status, content_type, body, stored_at) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(namespace, request_key) DO UPDATE SET status = excluded.status, \
         content_type = excluded.content_type, body = excluded.body, stored_at = excluded.stored_at",
    )
    .bind(namespace)
    .bind(request_key)
    .bind(i64::from(status))
    .bind(content_type)
    .bind(body)
    .bind(Utc::now())
    .execute(pool)
    .await
    .context("failed to store cached response")?;
    Ok(())
}

/// Look up `request_key`. With a namespace the search is limited to it;
/// without one, namespaces are searched in creation order and the first
/// hit wins.
pub async fn match_response(
    pool: &Pool,
    namespace: Option<&str>,
    request_key: &str,
) -> Result<Option<CachedResponse>> {
    let row = match namespace {
        Some(ns) => {
            sqlx::query(
                "SELECT namespace, request_key, status, content_type, body, stored_at \
                 FROM cache_entries WHERE namespace = ? AND request_key = ?",
            )
            .bind(ns)
            .bind(request_key)
            .fetch_optional(pool)
            .await?
        }
        None => {
            sqlx::query(
                "SELECT e.namespace, e.request_key, e.status, e.content_type, e.body, e.stored_at \
                 FROM cache_entries e JOIN cache_namespaces n ON n.name = e.namespace \
                 WHERE e.request_key = ? ORDER BY n.rowid ASC LIMIT 1",
            )
            .bind(request_key)
            .fetch_optional(pool)
            .await?
        }
    };

    let Some(row) = row else {
        return Ok(None);
    };
    let status: i64 = row.get("status");
    let stored_at: DateTime<Utc> = row.get("stored_at");
    Ok(Some(CachedResponse {
        namespace: row.get("namespace"),
        request_key: row.get("request_key"),
        status: u16::try_from(status).unwrap_or(200),
        content_type: row.get("content_type"),
        body: row.get("body"),
        stored_at,
    }))
}

pub async fn count_entries(pool: &Pool, namespace: &str) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries WHERE namespace = ?")
        .bind(namespace)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;

    #[tokio::test]
    async fn match_searches_namespaces_in_creation_order() {
        let pool = init_memory_pool().await.unwrap();
        open_namespace(&pool, "app-static-v1").await.unwrap();
        open_namespace(&pool, "app-dynamic-v1").await.unwrap();
        put_response(&pool, "app-dynamic-v1", "GET /a", 200, None, b"dyn")
            .await
            .unwrap();
        put_response(&pool, "app-static-v1", "GET /a", 200, Some("text/css"), b"static")
            .await
            .unwrap();

        let hit = match_response(&pool, None, "GET /a").await.unwrap().unwrap();
        assert_eq!(hit.namespace, "app-static-v1");
        assert_eq!(hit.body, b"static".to_vec());

        let scoped = match_response(&pool, Some("app-dynamic-v1"), "GET /a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(scoped.body, b"dyn".to_vec());
        assert!(match_response(&pool, None, "GET /b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_namespace_removes_entries() {
        let pool = init_memory_pool().await.unwrap();
        put_response(&pool, "app-api-v1", "GET /api/quotes", 200, None, b"[]")
            .await
            .unwrap();
        assert_eq!(count_entries(&pool, "app-api-v1").await.unwrap(), 1);

        assert!(delete_namespace(&pool, "app-api-v1").await.unwrap());
        assert!(!delete_namespace(&pool, "app-api-v1").await.unwrap());
        assert_eq!(count_entries(&pool, "app-api-v1").await.unwrap(), 0);
        assert!(list_namespaces(&pool).await.unwrap().is_empty());
    }
}
