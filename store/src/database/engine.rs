//! Document storage engine
//!
//! Raw collection operations over encoded documents. Every function takes a
//! connection so the caller decides the transaction scope: a pooled
//! connection runs each statement in autocommit, a transaction groups them.
//!
//! Table names and index expressions come from the static collection
//! definitions, never from caller input.

use super::codec::IndexValue;
use super::schema::CollectionDef;
use crate::error::Result;
use sqlx::sqlite::SqliteConnection;

/// A stored document together with its encoded primary key.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct StoredDoc {
    pub key: String,
    pub doc: String,
}

pub async fn get_all(conn: &mut SqliteConnection, collection: &CollectionDef) -> Result<Vec<String>> {
    let docs = sqlx::query_scalar::<_, String>(&format!("SELECT doc FROM {}", collection.name))
        .fetch_all(&mut *conn)
        .await?;

    Ok(docs)
}

pub async fn get(
    conn: &mut SqliteConnection,
    collection: &CollectionDef,
    key: &str,
) -> Result<Option<String>> {
    let doc = sqlx::query_scalar::<_, String>(&format!(
        "SELECT doc FROM {} WHERE key = ?",
        collection.name
    ))
    .bind(key)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(doc)
}

pub async fn count(conn: &mut SqliteConnection, collection: &CollectionDef) -> Result<u64> {
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", collection.name))
        .fetch_one(&mut *conn)
        .await?;

    Ok(count as u64)
}

/// Equality lookup through a declared secondary index.
pub async fn get_by_index(
    conn: &mut SqliteConnection,
    collection: &CollectionDef,
    index: &str,
    value: &IndexValue,
) -> Result<Vec<StoredDoc>> {
    let expr = collection.index_expr(index)?;
    let sql = format!(
        "SELECT key, doc FROM {} WHERE {} = ?",
        collection.name, expr
    );

    let query = sqlx::query_as::<_, StoredDoc>(&sql);
    let query = match value {
        IndexValue::Text(text) => query.bind(text.clone()),
        IndexValue::Integer(number) => query.bind(*number),
    };

    Ok(query.fetch_all(&mut *conn).await?)
}

/// Range lookup through a declared secondary index; bounds are inclusive
/// and either may be left open.
pub async fn get_by_index_range(
    conn: &mut SqliteConnection,
    collection: &CollectionDef,
    index: &str,
    lower: Option<&IndexValue>,
    upper: Option<&IndexValue>,
) -> Result<Vec<StoredDoc>> {
    let expr = collection.index_expr(index)?;

    // Build dynamic range query
    let mut sql = format!(
        "SELECT key, doc FROM {} WHERE {} IS NOT NULL",
        collection.name, expr
    );
    if lower.is_some() {
        sql.push_str(&format!(" AND {} >= ?", expr));
    }
    if upper.is_some() {
        sql.push_str(&format!(" AND {} <= ?", expr));
    }
    sql.push_str(&format!(" ORDER BY {}", expr));

    let mut query = sqlx::query_as::<_, StoredDoc>(&sql);
    for bound in [lower, upper].into_iter().flatten() {
        query = match bound {
            IndexValue::Text(text) => query.bind(text.clone()),
            IndexValue::Integer(number) => query.bind(*number),
        };
    }

    Ok(query.fetch_all(&mut *conn).await?)
}

/// Insert or replace the document stored under `key`.
pub async fn put(
    conn: &mut SqliteConnection,
    collection: &CollectionDef,
    key: &str,
    doc: &str,
) -> Result<()> {
    sqlx::query(&format!(
        r#"
        INSERT INTO {} (key, doc) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET doc = excluded.doc
        "#,
        collection.name
    ))
    .bind(key)
    .bind(doc)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Remove the document under `key`; returns whether one existed.
pub async fn delete(conn: &mut SqliteConnection, collection: &CollectionDef, key: &str) -> Result<bool> {
    let rows = sqlx::query(&format!("DELETE FROM {} WHERE key = ?", collection.name))
        .bind(key)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    Ok(rows > 0)
}

pub async fn clear(conn: &mut SqliteConnection, collection: &CollectionDef) -> Result<u64> {
    let rows = sqlx::query(&format!("DELETE FROM {}", collection.name))
        .execute(&mut *conn)
        .await?
        .rows_affected();

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema::{initialize_database, EVENTS, HABITS};
    use crate::error::StoreError;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    async fn create_test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        initialize_database(&pool, 2).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_put_replaces_whole_document() {
        let pool = create_test_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        put(&mut conn, &EVENTS, "e1", r#"{"status":"todo","course":"A"}"#)
            .await
            .unwrap();
        put(&mut conn, &EVENTS, "e1", r#"{"status":"done"}"#)
            .await
            .unwrap();

        assert_eq!(count(&mut conn, &EVENTS).await.unwrap(), 1);
        assert_eq!(
            get(&mut conn, &EVENTS, "e1").await.unwrap().as_deref(),
            Some(r#"{"status":"done"}"#)
        );
    }

    #[tokio::test]
    async fn test_index_lookups() {
        let pool = create_test_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        put(&mut conn, &HABITS, "h1", r#"{"category":"health","isActive":true}"#)
            .await
            .unwrap();
        put(&mut conn, &HABITS, "h2", r#"{"category":"health","isActive":false}"#)
            .await
            .unwrap();
        put(&mut conn, &HABITS, "h3", r#"{"category":"learning","isActive":true}"#)
            .await
            .unwrap();

        let active = get_by_index(&mut conn, &HABITS, "isActive", &IndexValue::from(true))
            .await
            .unwrap();
        let mut keys: Vec<String> = active.into_iter().map(|d| d.key).collect();
        keys.sort();
        assert_eq!(keys, vec!["h1", "h3"]);

        let health = get_by_index(&mut conn, &HABITS, "category", &"health".into())
            .await
            .unwrap();
        assert_eq!(health.len(), 2);

        let unknown = get_by_index(&mut conn, &HABITS, "color", &"red".into()).await;
        assert!(matches!(unknown, Err(StoreError::UnknownIndex { .. })));
    }

    #[tokio::test]
    async fn test_range_lookup_is_ordered_and_inclusive() {
        let pool = create_test_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        for (key, start) in [
            ("e1", "2024-01-03T00:00:00.000Z"),
            ("e2", "2024-01-01T00:00:00.000Z"),
            ("e3", "2024-01-02T00:00:00.000Z"),
            ("e4", "2024-02-01T00:00:00.000Z"),
        ] {
            let doc = format!(r#"{{"startTime":"{}"}}"#, start);
            put(&mut conn, &EVENTS, key, &doc).await.unwrap();
        }

        let january = get_by_index_range(
            &mut conn,
            &EVENTS,
            "startTime",
            Some(&"2024-01-01T00:00:00.000Z".into()),
            Some(&"2024-01-31T23:59:59.999Z".into()),
        )
        .await
        .unwrap();

        let keys: Vec<&str> = january.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["e2", "e3", "e1"]);

        let open_ended = get_by_index_range(
            &mut conn,
            &EVENTS,
            "startTime",
            Some(&"2024-01-03T00:00:00.000Z".into()),
            None,
        )
        .await
        .unwrap();
        assert_eq!(open_ended.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let pool = create_test_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        put(&mut conn, &EVENTS, "e1", "{}").await.unwrap();
        put(&mut conn, &EVENTS, "e2", "{}").await.unwrap();

        assert!(delete(&mut conn, &EVENTS, "e1").await.unwrap());
        assert!(!delete(&mut conn, &EVENTS, "e1").await.unwrap());

        assert_eq!(clear(&mut conn, &EVENTS).await.unwrap(), 1);
        assert!(get_all(&mut conn, &EVENTS).await.unwrap().is_empty());
    }
}
